use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tenant_keyset::Aead;
use uuid::Uuid;

use crate::error::OutboxError;

pub const SPEC_VERSION: &str = "1.0";
pub const CONTENT_TYPE_PROTOBUF: &str = "application/protobuf";
pub const CONTENT_TYPE_PROTOBUF_ENCRYPTED: &str = "application/protobuf-encrypted";

/// CloudEvents 1.0 envelope in its JSON format. Binary payloads travel in
/// `data_base64`; `tenantid` is the only recognized extension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloudEvent {
    pub specversion: String,
    pub id: String,
    pub source: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datacontenttype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataschema: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenantid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_base64: Option<String>,
}

/// A domain event before it gets an id and (optionally) sealed data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    source: String,
    event_type: String,
    subject: Option<String>,
    dataschema: Option<String>,
    tenant_id: Option<Uuid>,
    data: Vec<u8>,
}

impl NewEvent {
    pub fn new(source: impl Into<String>, event_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            source: source.into(),
            event_type: event_type.into(),
            subject: None,
            dataschema: None,
            tenant_id: None,
            data,
        }
    }

    #[must_use]
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    #[must_use]
    pub fn with_dataschema(mut self, dataschema: impl Into<String>) -> Self {
        self.dataschema = Some(dataschema.into());
        self
    }

    #[must_use]
    pub fn with_tenant(mut self, tenant_id: Uuid) -> Self {
        self.tenant_id = Some(tenant_id);
        self
    }

    #[must_use]
    pub fn tenant_id(&self) -> Option<Uuid> {
        self.tenant_id
    }

    /// Assigns a fresh v7 id and seals the data when `aead` is given.
    pub fn seal(self, aead: Option<&Aead>) -> Result<CloudEvent, OutboxError> {
        self.seal_with_id(Uuid::now_v7(), aead)
    }

    /// `time` is read back from the id, so `id` must be a v7 UUID.
    pub fn seal_with_id(self, id: Uuid, aead: Option<&Aead>) -> Result<CloudEvent, OutboxError> {
        let time = time_from_v7(id)?;
        let id_text = id.to_string();
        let (content_type, data) = match aead {
            Some(aead) => (
                CONTENT_TYPE_PROTOBUF_ENCRYPTED,
                aead.encrypt(&self.data, id_text.as_bytes())
                    .map_err(|error| OutboxError::Crypto(error.to_string()))?,
            ),
            None => (CONTENT_TYPE_PROTOBUF, self.data),
        };
        Ok(CloudEvent {
            specversion: SPEC_VERSION.to_string(),
            id: id_text,
            source: self.source,
            event_type: self.event_type,
            subject: self.subject,
            time: Some(time),
            datacontenttype: Some(content_type.to_string()),
            dataschema: self.dataschema,
            tenantid: self.tenant_id.map(|tenant_id| tenant_id.to_string()),
            data_base64: Some(STANDARD.encode(data)),
        })
    }
}

impl CloudEvent {
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, OutboxError> {
        serde_json::to_vec(self).map_err(|error| OutboxError::Codec(error.to_string()))
    }

    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, OutboxError> {
        let event: Self =
            serde_json::from_slice(bytes).map_err(|error| OutboxError::Codec(error.to_string()))?;
        if event.specversion != SPEC_VERSION {
            return Err(OutboxError::Codec(format!(
                "unsupported specversion {}",
                event.specversion
            )));
        }
        Ok(event)
    }

    pub fn tenant_id(&self) -> Result<Option<Uuid>, OutboxError> {
        self.tenantid
            .as_deref()
            .map(|raw| {
                Uuid::parse_str(raw)
                    .map_err(|error| OutboxError::Codec(format!("tenantid: {error}")))
            })
            .transpose()
    }

    #[must_use]
    pub fn is_encrypted(&self) -> bool {
        self.datacontenttype.as_deref() == Some(CONTENT_TYPE_PROTOBUF_ENCRYPTED)
    }

    /// Raw data bytes, opened with `aead` when the content type says they are
    /// sealed.
    pub fn open_data(&self, aead: Option<&Aead>) -> Result<Vec<u8>, OutboxError> {
        let raw = match &self.data_base64 {
            Some(encoded) => STANDARD
                .decode(encoded)
                .map_err(|error| OutboxError::Codec(format!("data_base64: {error}")))?,
            None => Vec::new(),
        };
        match self.datacontenttype.as_deref() {
            Some(CONTENT_TYPE_PROTOBUF_ENCRYPTED) => {
                let aead = aead.ok_or_else(|| {
                    OutboxError::Crypto(format!("event {} is sealed and no key was given", self.id))
                })?;
                aead.decrypt(&raw, self.id.as_bytes())
                    .map_err(|error| OutboxError::Crypto(error.to_string()))
            }
            Some(CONTENT_TYPE_PROTOBUF) | None => Ok(raw),
            Some(other) => Err(OutboxError::Codec(format!(
                "unsupported datacontenttype {other}"
            ))),
        }
    }

    pub fn decode_data<M>(&self, aead: Option<&Aead>) -> Result<M, OutboxError>
    where
        M: prost::Message + Default,
    {
        let bytes = self.open_data(aead)?;
        M::decode(bytes.as_slice()).map_err(|error| OutboxError::Codec(error.to_string()))
    }
}

fn time_from_v7(id: Uuid) -> Result<DateTime<Utc>, OutboxError> {
    let timestamp = id
        .get_timestamp()
        .ok_or_else(|| OutboxError::Codec(format!("event id {id} carries no timestamp")))?;
    let (secs, nanos) = timestamp.to_unix();
    let secs = i64::try_from(secs)
        .map_err(|_| OutboxError::Codec(format!("event id {id} timestamp out of range")))?;
    DateTime::from_timestamp(secs, nanos)
        .ok_or_else(|| OutboxError::Codec(format!("event id {id} timestamp out of range")))
}

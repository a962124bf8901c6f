use chrono::{DateTime, Utc};
use profile_proto::wire::profile::v1::ProfileV1;
use profile_proto::{ConversionError, datetime_from_timestamp, parse_uuid, timestamp_from_datetime};
use uuid::Uuid;

pub const PROFILE_NAME_HEAP_TYPE: &str = "profile_name";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Profile {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub nin: String,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub dob: Option<DateTime<Utc>>,
}

impl Profile {
    #[must_use]
    pub fn to_wire(&self) -> ProfileV1 {
        ProfileV1 {
            id: self.id.to_string(),
            tenant_id: self.tenant_id.to_string(),
            nin: self.nin.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
            phone: self.phone.clone(),
            dob: self.dob.map(timestamp_from_datetime),
        }
    }

    pub fn from_wire(wire: &ProfileV1) -> Result<Self, ConversionError> {
        Ok(Self {
            id: parse_uuid(&wire.id, "ProfileV1", "id")?,
            tenant_id: parse_uuid(&wire.tenant_id, "ProfileV1", "tenant_id")?,
            nin: wire.nin.clone(),
            name: wire.name.clone(),
            email: wire.email.clone(),
            phone: wire.phone.clone(),
            dob: wire
                .dob
                .as_ref()
                .map(|dob| datetime_from_timestamp(dob, "ProfileV1", "dob"))
                .transpose()?,
        })
    }
}

/// A decrypted profile together with the timestamps the store maintains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileRecord {
    pub profile: Profile,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Column values of a `profile` row: AEAD ciphertext per sensitive field and
/// the primary blind index next to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedProfile {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub nin: Vec<u8>,
    pub nin_bidx: Vec<u8>,
    pub name: Vec<u8>,
    pub name_bidx: Vec<u8>,
    pub email: Vec<u8>,
    pub email_bidx: Vec<u8>,
    pub phone: Vec<u8>,
    pub phone_bidx: Vec<u8>,
    pub dob: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedRow {
    pub sealed: SealedProfile,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Plaintext token a tenant accepts as searchable in the clear.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TextHeapEntry {
    pub tenant_id: Uuid,
    pub kind: String,
    pub content: String,
}

impl TextHeapEntry {
    pub fn profile_name(tenant_id: Uuid, name: impl Into<String>) -> Self {
        Self {
            tenant_id,
            kind: PROFILE_NAME_HEAP_TYPE.to_string(),
            content: name.into(),
        }
    }
}

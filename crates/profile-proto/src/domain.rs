use chrono::{DateTime, Utc};
use prost::Message;
use prost_types::Timestamp;
use thiserror::Error;
use uuid::Uuid;

use crate::wire::profile::v1::ProfileStoredV1;

pub const PROFILE_STORED_TYPE_V1: &str = "profile.stored.v1";
pub const PROFILE_STORED_SCHEMA_V1: &str = "profile.v1.ProfileStoredV1";
pub const PROFILE_EVENT_SOURCE_DEFAULT: &str = "/profile-service";

/// Conversion failures from wire-level payloads.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConversionError {
    #[error("{message}.{field} is required")]
    MissingField {
        message: &'static str,
        field: &'static str,
    },
    #[error("{message}.{field} is invalid: {reason}")]
    InvalidValue {
        message: &'static str,
        field: &'static str,
        reason: String,
    },
    #[error("{message} could not be decoded: {reason}")]
    Decode {
        message: &'static str,
        reason: String,
    },
}

#[must_use]
pub fn timestamp_from_datetime(value: DateTime<Utc>) -> Timestamp {
    Timestamp {
        seconds: value.timestamp(),
        nanos: value.timestamp_subsec_nanos() as i32,
    }
}

pub fn datetime_from_timestamp(
    value: &Timestamp,
    message: &'static str,
    field: &'static str,
) -> Result<DateTime<Utc>, ConversionError> {
    let nanos = u32::try_from(value.nanos).map_err(|_| ConversionError::InvalidValue {
        message,
        field,
        reason: format!("negative nanos {}", value.nanos),
    })?;
    DateTime::from_timestamp(value.seconds, nanos).ok_or_else(|| ConversionError::InvalidValue {
        message,
        field,
        reason: format!("timestamp out of range: {}.{}", value.seconds, value.nanos),
    })
}

pub fn parse_uuid(
    raw: &str,
    message: &'static str,
    field: &'static str,
) -> Result<Uuid, ConversionError> {
    if raw.is_empty() {
        return Err(ConversionError::MissingField { message, field });
    }
    Uuid::parse_str(raw).map_err(|error| ConversionError::InvalidValue {
        message,
        field,
        reason: error.to_string(),
    })
}

/// Decodes a `ProfileStoredV1` payload and checks the fields every consumer
/// relies on.
pub fn decode_profile_stored(bytes: &[u8]) -> Result<ProfileStoredV1, ConversionError> {
    let event = ProfileStoredV1::decode(bytes).map_err(|error| ConversionError::Decode {
        message: "ProfileStoredV1",
        reason: error.to_string(),
    })?;
    let profile = event
        .profile
        .as_ref()
        .ok_or(ConversionError::MissingField {
            message: "ProfileStoredV1",
            field: "profile",
        })?;
    parse_uuid(&profile.id, "ProfileV1", "id")?;
    parse_uuid(&profile.tenant_id, "ProfileV1", "tenant_id")?;
    if let Some(dob) = &profile.dob {
        datetime_from_timestamp(dob, "ProfileV1", "dob")?;
    }
    Ok(event)
}

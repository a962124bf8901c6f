//! Profile wire contracts.
//!
//! `wire` is generated from `proto/profile/v1/profile.proto` at build time. `domain`
//! holds the event identifiers and the conversions between wire payloads and
//! chrono/uuid values used by the service.

/// Proto-generated wire contracts.
pub mod wire {
    include!(concat!(env!("OUT_DIR"), "/profile.rs"));
}

pub mod domain;

pub use domain::{
    ConversionError, PROFILE_EVENT_SOURCE_DEFAULT, PROFILE_STORED_SCHEMA_V1,
    PROFILE_STORED_TYPE_V1, datetime_from_timestamp, decode_profile_stored, parse_uuid,
    timestamp_from_datetime,
};

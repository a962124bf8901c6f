use thiserror::Error;

use crate::keyset::KeyPurpose;

/// Failures raised while loading, deriving or using keysets.
///
/// Cloneable so cached lookups can hand the same failure to every waiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeysetError {
    #[error("keyset io error at {path}: {message}")]
    Io { path: String, message: String },
    #[error("keyset parse error: {0}")]
    Parse(String),
    #[error("invalid keyset: {0}")]
    InvalidKeyset(String),
    #[error("keyset purpose mismatch: expected {expected}, got {actual}")]
    WrongPurpose {
        expected: KeyPurpose,
        actual: KeyPurpose,
    },
    #[error("key derivation failed: {0}")]
    Derivation(String),
    #[error("no usable key with id {0}")]
    UnknownKey(u32),
    #[error("crypto failure: {0}")]
    Crypto(String),
}

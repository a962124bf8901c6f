use ce_outbox::OutboxError;
use sealed_codec::CodecError;
use tenant_keyset::KeysetError;
use thiserror::Error;

use super::store::ProfileStoreError;

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("crypto failure: {0}")]
    Crypto(String),
    #[error("storage unavailable: {0}")]
    StorageTransient(String),
    #[error("storage failure: {0}")]
    Storage(String),
    #[error("tenant directory unavailable: {0}")]
    TenantUnavailable(String),
    #[error("cancelled: {0}")]
    Cancelled(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl ProfileError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::NotFound => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Crypto(_) => "crypto_failure",
            Self::StorageTransient(_) => "storage_unavailable",
            Self::Storage(_) => "storage_failure",
            Self::TenantUnavailable(_) => "dependency_unavailable",
            Self::Cancelled(_) => "cancelled",
            Self::Config(_) => "config_error",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Self::InvalidRequest(message)
            | Self::Conflict(message)
            | Self::Crypto(message)
            | Self::StorageTransient(message)
            | Self::Storage(message)
            | Self::TenantUnavailable(message)
            | Self::Cancelled(message)
            | Self::Config(message) => message.clone(),
            Self::NotFound => "not found".to_string(),
        }
    }

    /// Whether the same request may succeed if retried unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StorageTransient(_) | Self::TenantUnavailable(_)
        )
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidRequest(_) => 400,
            Self::NotFound => 404,
            Self::Conflict(_) => 409,
            Self::StorageTransient(_) | Self::TenantUnavailable(_) | Self::Cancelled(_) => 503,
            Self::Crypto(_) | Self::Storage(_) | Self::Config(_) => 500,
        }
    }
}

impl From<CodecError> for ProfileError {
    fn from(error: CodecError) -> Self {
        Self::Crypto(error.to_string())
    }
}

impl From<KeysetError> for ProfileError {
    fn from(error: KeysetError) -> Self {
        Self::Crypto(error.to_string())
    }
}

impl From<ProfileStoreError> for ProfileError {
    fn from(error: ProfileStoreError) -> Self {
        match error {
            ProfileStoreError::Conflict(message) => Self::Conflict(message),
            ProfileStoreError::Unavailable(message) => Self::StorageTransient(message),
            ProfileStoreError::Db(message) => Self::Storage(message),
        }
    }
}

impl From<OutboxError> for ProfileError {
    fn from(error: OutboxError) -> Self {
        match error {
            OutboxError::Crypto(message) => Self::Crypto(message),
            OutboxError::Transient(message) => Self::StorageTransient(message),
            OutboxError::Cancelled => Self::Cancelled("outbox operation cancelled".to_string()),
            OutboxError::Config(message) => Self::Config(message),
            other => Self::Storage(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ProfileError;
    use crate::profile::ProfileStoreError;

    #[test]
    fn user_facing_statuses_follow_the_error_kind() {
        assert_eq!(ProfileError::InvalidRequest("x".into()).http_status(), 400);
        assert_eq!(ProfileError::NotFound.http_status(), 404);
        assert_eq!(ProfileError::Crypto("x".into()).http_status(), 500);
        assert_eq!(ProfileError::Storage("x".into()).http_status(), 500);
        assert_eq!(ProfileError::Cancelled("x".into()).http_status(), 503);
    }

    #[test]
    fn only_transient_failures_are_retryable() {
        let transient: ProfileError = ProfileStoreError::Unavailable("reset".into()).into();
        assert!(transient.is_retryable());
        assert_eq!(transient.code(), "storage_unavailable");

        let permanent: ProfileError = ProfileStoreError::Db("constraint".into()).into();
        assert!(!permanent.is_retryable());
        assert!(!ProfileError::Crypto("tag mismatch".into()).is_retryable());
        assert!(!ProfileError::Cancelled("deadline".into()).is_retryable());
    }
}

use thiserror::Error;

use crate::event::CloudEvent;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OutboxError {
    #[error("relay lock {0} is held by another replica")]
    LockHeld(i64),
    /// Connection loss, serialization failure, closed listener.
    #[error("transient storage failure: {0}")]
    Transient(String),
    #[error("storage failure: {0}")]
    Permanent(String),
    #[error("event codec failure: {0}")]
    Codec(String),
    #[error("event crypto failure: {0}")]
    Crypto(String),
    #[error("cancelled")]
    Cancelled,
    #[error("invalid outbox config: {0}")]
    Config(String),
}

impl OutboxError {
    /// Whether the outer relay loop should try again after its retry interval.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockHeld(_) | Self::Transient(_))
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::LockHeld(_) => "lock_held",
            Self::Transient(_) => "storage_transient",
            Self::Permanent(_) => "storage_permanent",
            Self::Codec(_) => "codec",
            Self::Crypto(_) => "crypto",
            Self::Cancelled => "cancelled",
            Self::Config(_) => "config",
        }
    }
}

/// One event the sink could not publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayFailure {
    pub event_id: String,
    pub reason: String,
}

/// The failed subset of a batch. Returning it from a [`crate::Relay`] keeps
/// the rest of the batch delivered and puts only these events back in the
/// queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Error)]
#[error("{} event(s) of the batch failed to relay", .failures.len())]
pub struct RelayErrors {
    pub failures: Vec<RelayFailure>,
}

impl RelayErrors {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, event: &CloudEvent, reason: impl Into<String>) {
        self.failures.push(RelayFailure {
            event_id: event.id.clone(),
            reason: reason.into(),
        });
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn event_ids(&self) -> impl Iterator<Item = &str> {
        self.failures.iter().map(|failure| failure.event_id.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// Nothing in the batch can be assumed published.
    #[error("relay failed: {0}")]
    Failed(String),
    #[error(transparent)]
    Partial(RelayErrors),
}

impl From<RelayErrors> for RelayError {
    fn from(errors: RelayErrors) -> Self {
        Self::Partial(errors)
    }
}

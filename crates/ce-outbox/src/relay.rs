use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::RelayError;
use crate::event::CloudEvent;

/// What a sink sees of the relay loop while it publishes.
#[derive(Debug, Clone)]
pub struct RelayContext {
    shutdown: CancellationToken,
    batch: u64,
}

impl RelayContext {
    #[must_use]
    pub fn new(shutdown: CancellationToken, batch: u64) -> Self {
        Self { shutdown, batch }
    }

    /// Sequence number of the batch within the current lease.
    #[must_use]
    pub fn batch(&self) -> u64 {
        self.batch
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Resolves when the process is shutting down. A sink that stops early
    /// should report what it did not publish as a partial failure, and has
    /// until the configured cancel grace to do so before the batch is rolled
    /// back.
    pub async fn cancelled(&self) {
        self.shutdown.cancelled().await;
    }
}

/// Event sink. Events arrive in outbox order; consumers must be idempotent on
/// the event id since delivery is at least once.
#[async_trait]
pub trait Relay: Send + Sync {
    async fn relay(&self, context: &RelayContext, events: &[CloudEvent]) -> Result<(), RelayError>;
}

/// Sink that only logs. Used when no downstream is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogRelay;

#[async_trait]
impl Relay for LogRelay {
    async fn relay(&self, context: &RelayContext, events: &[CloudEvent]) -> Result<(), RelayError> {
        for event in events {
            tracing::info!(
                target: "profile.outbox",
                batch = context.batch(),
                event_id = %event.id,
                event_type = %event.event_type,
                tenant_id = event.tenantid.as_deref().unwrap_or(""),
                "relayed event",
            );
        }
        Ok(())
    }
}

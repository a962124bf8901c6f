use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::OutboxConfig;
use crate::error::OutboxError;
use crate::event::CloudEvent;

/// One row of the `outboxce` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxRecord {
    pub id: Uuid,
    pub tenant_id: Option<Uuid>,
    /// The serialized CloudEvent envelope.
    pub cloud_event: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub is_delivered: bool,
}

impl OutboxRecord {
    /// Row for `event`. The row id is the event id and `created_at` is the
    /// event time.
    pub fn from_event(event: &CloudEvent) -> Result<Self, OutboxError> {
        let id = Uuid::parse_str(&event.id)
            .map_err(|error| OutboxError::Codec(format!("event id: {error}")))?;
        let created_at = event
            .time
            .ok_or_else(|| OutboxError::Codec(format!("event {} has no time", event.id)))?;
        Ok(Self {
            id,
            tenant_id: event.tenant_id()?,
            cloud_event: event.to_json_bytes()?,
            created_at,
            is_delivered: false,
        })
    }

    pub fn event(&self) -> Result<CloudEvent, OutboxError> {
        CloudEvent::from_json_bytes(&self.cloud_event)
    }

    /// Payload of the notification sent when this row is inserted.
    #[must_use]
    pub fn notify_payload(&self) -> String {
        created_at_nanos(self.created_at).to_string()
    }
}

#[must_use]
pub fn created_at_nanos(created_at: DateTime<Utc>) -> i64 {
    created_at.timestamp_nanos_opt().unwrap_or(i64::MAX)
}

/// Why a relay lease stopped waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// A row was committed. Carries its `created_at` in nanoseconds when the
    /// payload could be read.
    Notified(Option<i64>),
    TimedOut,
}

/// Storage side of the relay: hands out at most one live [`RelayLease`] per
/// lock id across every process sharing the store.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Fails with [`OutboxError::LockHeld`] when another relay holds the lease.
    async fn acquire(&self, config: &OutboxConfig) -> Result<Box<dyn RelayLease>, OutboxError>;
}

/// Exclusive right to relay. Dropping a lease releases it.
#[async_trait]
pub trait RelayLease: Send {
    /// Waits for a notification, or returns [`Wake::TimedOut`] at `deadline`.
    async fn wait(&mut self, deadline: Instant) -> Result<Wake, OutboxError>;

    /// Flips up to `max_batch` of the oldest undelivered rows to delivered
    /// inside a transaction that stays open until the batch is finished.
    async fn claim<'a>(
        &'a mut self,
        max_batch: usize,
    ) -> Result<Box<dyn ClaimedBatch + 'a>, OutboxError>;

    async fn release(self: Box<Self>) -> Result<(), OutboxError>;
}

/// A claimed batch. Dropping it without finishing rolls the claim back.
#[async_trait]
pub trait ClaimedBatch: Send {
    /// Claimed rows in `(created_at, id)` order.
    fn records(&self) -> &[OutboxRecord];

    /// Commits the claim, first putting `undelivered` back in the queue.
    async fn commit(self: Box<Self>, undelivered: &[Uuid]) -> Result<(), OutboxError>;

    async fn rollback(self: Box<Self>) -> Result<(), OutboxError>;
}

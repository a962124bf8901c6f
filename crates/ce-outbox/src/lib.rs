//! Transactional CloudEvents outbox.
//!
//! Writers append an [`OutboxRecord`] in the same transaction as the state
//! change it announces. An [`Observer`] per process competes for a lease (a
//! Postgres advisory lock); the replica holding it claims undelivered rows in
//! creation order, hands them to a [`Relay`] sink, and commits, rolls back, or
//! returns only the failed subset to the queue depending on the sink's answer.

mod config;
mod error;
mod event;
mod memory;
mod observer;
pub mod postgres;
mod relay;
mod store;

pub use config::{
    DEFAULT_CANCEL_GRACE, DEFAULT_CHANNEL, DEFAULT_MAX_BATCH, DEFAULT_MAX_WAIT,
    DEFAULT_RETRY_INTERVAL, OutboxConfig, lock_id_for,
};
pub use error::{OutboxError, RelayError, RelayErrors, RelayFailure};
pub use event::{
    CONTENT_TYPE_PROTOBUF, CONTENT_TYPE_PROTOBUF_ENCRYPTED, CloudEvent, NewEvent, SPEC_VERSION,
};
pub use memory::{DEFAULT_DELIVERED_RETENTION, MemoryOutbox};
pub use observer::{Manager, NopObserver, Observer};
pub use postgres::PgOutbox;
pub use relay::{LogRelay, Relay, RelayContext};
pub use store::{ClaimedBatch, OutboxRecord, OutboxStore, RelayLease, Wake, created_at_nanos};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::OutboxConfig;
use crate::error::{OutboxError, RelayError};
use crate::relay::{Relay, RelayContext};
use crate::store::{ClaimedBatch, OutboxStore, RelayLease, Wake, created_at_nanos};

/// Runs the outbox relay for a process.
#[async_trait]
pub trait Manager: Send + Sync {
    /// Keeps relaying until `shutdown` is cancelled, restarting the relay loop
    /// after the configured retry interval whenever it fails or the lease is
    /// held elsewhere.
    async fn observe(&self, shutdown: CancellationToken);

    /// One lease lifetime: acquire, relay until error or shutdown, release.
    async fn relay_loop(&self, shutdown: &CancellationToken) -> Result<(), OutboxError>;
}

/// Used when this process is not configured to relay.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopObserver;

#[async_trait]
impl Manager for NopObserver {
    async fn observe(&self, shutdown: CancellationToken) {
        tracing::info!(target: "profile.outbox", "outbox relay disabled");
        shutdown.cancelled().await;
    }

    async fn relay_loop(&self, _shutdown: &CancellationToken) -> Result<(), OutboxError> {
        Ok(())
    }
}

pub struct Observer {
    store: Arc<dyn OutboxStore>,
    relay: Arc<dyn Relay>,
    config: OutboxConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct BatchOutcome {
    claimed: usize,
    committed: bool,
    newest: Option<i64>,
}

impl Observer {
    pub fn new(
        store: Arc<dyn OutboxStore>,
        relay: Arc<dyn Relay>,
        config: OutboxConfig,
    ) -> Result<Self, OutboxError> {
        config.validate()?;
        Ok(Self {
            store,
            relay,
            config,
        })
    }

    #[must_use]
    pub fn config(&self) -> &OutboxConfig {
        &self.config
    }

    async fn run_lease(
        &self,
        lease: &mut dyn RelayLease,
        shutdown: &CancellationToken,
    ) -> Result<(), OutboxError> {
        let mut last_processed: Option<i64> = None;
        // Rows left behind by a previous relay are drained before waiting.
        let mut scan_now = true;
        let mut batch_seq: u64 = 0;

        loop {
            if !scan_now {
                let deadline = Instant::now() + self.config.max_wait;
                wait_for_fresh(lease, deadline, last_processed, shutdown).await?;
            }

            let batch = tokio::select! {
                biased;
                () = shutdown.cancelled() => return Err(OutboxError::Cancelled),
                batch = lease.claim(self.config.max_batch) => batch?,
            };
            batch_seq += 1;
            let outcome = self.relay_batch(batch, shutdown, batch_seq).await?;

            if outcome.committed {
                last_processed = last_processed.max(outcome.newest);
            }
            scan_now = outcome.committed && outcome.claimed >= self.config.max_batch;

            if shutdown.is_cancelled() {
                return Err(OutboxError::Cancelled);
            }
        }
    }

    /// Publishes one claimed batch and finishes its transaction according to
    /// the sink's answer. After shutdown the sink gets `cancel_grace` to
    /// report; past that the claim is rolled back.
    async fn relay_batch(
        &self,
        batch: Box<dyn ClaimedBatch + '_>,
        shutdown: &CancellationToken,
        batch_seq: u64,
    ) -> Result<BatchOutcome, OutboxError> {
        let records = batch.records();
        if records.is_empty() {
            batch.rollback().await?;
            return Ok(BatchOutcome {
                claimed: 0,
                committed: false,
                newest: None,
            });
        }

        let claimed = records.len();
        let newest = records
            .iter()
            .map(|record| created_at_nanos(record.created_at))
            .max();
        let mut events = Vec::with_capacity(claimed);
        let mut row_ids: HashMap<String, Uuid> = HashMap::with_capacity(claimed);
        for record in records {
            match record.event() {
                Ok(event) => {
                    row_ids.insert(event.id.clone(), record.id);
                    events.push(event);
                }
                Err(error) => {
                    // Leaving it pending would block every later row.
                    tracing::error!(
                        target: "profile.outbox",
                        row_id = %record.id,
                        reason = %error,
                        "dropping undecodable outbox row",
                    );
                }
            }
        }

        let context = RelayContext::new(shutdown.clone(), batch_seq);
        let result = if events.is_empty() {
            Ok(())
        } else {
            let publish = self.relay.relay(&context, &events);
            tokio::pin!(publish);
            let finished = tokio::select! {
                biased;
                result = &mut publish => Some(result),
                () = shutdown.cancelled() => {
                    tokio::time::timeout(self.config.cancel_grace, &mut publish).await.ok()
                }
            };
            match finished {
                Some(result) => result,
                None => {
                    batch.rollback().await?;
                    tracing::warn!(
                        target: "profile.outbox",
                        batch = batch_seq,
                        claimed,
                        grace_ms = self.config.cancel_grace.as_millis() as u64,
                        "relay sink did not finish after shutdown, batch rolled back",
                    );
                    return Err(OutboxError::Cancelled);
                }
            }
        };

        match result {
            Ok(()) => {
                batch.commit(&[]).await?;
                tracing::info!(
                    target: "profile.outbox",
                    batch = batch_seq,
                    delivered = events.len(),
                    "relayed outbox batch",
                );
            }
            Err(RelayError::Partial(errors)) => {
                let mut undelivered: Vec<Uuid> = Vec::with_capacity(errors.len());
                for event_id in errors.event_ids() {
                    match row_ids.get(event_id) {
                        Some(row_id) if !undelivered.contains(row_id) => undelivered.push(*row_id),
                        Some(_) => {}
                        None => tracing::warn!(
                            target: "profile.outbox",
                            event_id,
                            "relay reported failure for an event outside the batch",
                        ),
                    }
                }
                batch.commit(&undelivered).await?;
                tracing::warn!(
                    target: "profile.outbox",
                    batch = batch_seq,
                    delivered = events.len().saturating_sub(undelivered.len()),
                    undelivered = undelivered.len(),
                    "outbox batch partially relayed",
                );
            }
            Err(RelayError::Failed(reason)) => {
                batch.rollback().await?;
                tracing::warn!(
                    target: "profile.outbox",
                    batch = batch_seq,
                    claimed,
                    reason = %reason,
                    "outbox batch relay failed",
                );
                return Ok(BatchOutcome {
                    claimed,
                    committed: false,
                    newest,
                });
            }
        }

        Ok(BatchOutcome {
            claimed,
            committed: true,
            newest,
        })
    }
}

#[async_trait]
impl Manager for Observer {
    async fn observe(&self, shutdown: CancellationToken) {
        let shutdown = shutdown.child_token();
        tracing::info!(
            target: "profile.outbox",
            channel = %self.config.channel,
            lock_id = self.config.lock_id,
            max_batch = self.config.max_batch,
            max_wait_ms = self.config.max_wait.as_millis() as u64,
            "outbox observer started",
        );
        loop {
            match self.relay_loop(&shutdown).await {
                Ok(()) => {}
                Err(OutboxError::Cancelled) => break,
                Err(OutboxError::LockHeld(lock_id)) => {
                    tracing::debug!(
                        target: "profile.outbox",
                        lock_id,
                        "relay lease held by another replica",
                    );
                }
                Err(error) => {
                    tracing::warn!(
                        target: "profile.outbox",
                        code = error.code(),
                        retryable = error.is_retryable(),
                        reason = %error,
                        "relay loop failed",
                    );
                }
            }
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(self.config.retry_interval) => {}
            }
        }
        tracing::info!(target: "profile.outbox", "outbox observer stopped");
    }

    async fn relay_loop(&self, shutdown: &CancellationToken) -> Result<(), OutboxError> {
        let mut lease = tokio::select! {
            biased;
            () = shutdown.cancelled() => return Err(OutboxError::Cancelled),
            lease = self.store.acquire(&self.config) => lease?,
        };
        tracing::info!(
            target: "profile.outbox",
            lock_id = self.config.lock_id,
            "relay lease acquired",
        );

        let result = self.run_lease(lease.as_mut(), shutdown).await;

        if let Err(error) = lease.release().await {
            tracing::warn!(
                target: "profile.outbox",
                reason = %error,
                "failed to release relay lease",
            );
        }
        tracing::info!(target: "profile.outbox", "relay lease released");
        result
    }
}

/// Waits until a notification that is not stale arrives or `deadline`
/// passes. Stale notifications do not move the deadline.
async fn wait_for_fresh(
    lease: &mut dyn RelayLease,
    deadline: Instant,
    last_processed: Option<i64>,
    shutdown: &CancellationToken,
) -> Result<Wake, OutboxError> {
    loop {
        let wake = tokio::select! {
            biased;
            () = shutdown.cancelled() => return Err(OutboxError::Cancelled),
            wake = lease.wait(deadline) => wake?,
        };
        match wake {
            Wake::Notified(Some(nanos)) if is_stale(last_processed, nanos) => {
                tracing::debug!(
                    target: "profile.outbox",
                    notified = nanos,
                    last_processed = last_processed.unwrap_or_default(),
                    "ignoring stale outbox notification",
                );
            }
            wake => return Ok(wake),
        }
    }
}

/// A notification older than the newest relayed row is an echo of work
/// already done.
fn is_stale(last_processed: Option<i64>, notified: i64) -> bool {
    last_processed.is_some_and(|last| notified < last)
}

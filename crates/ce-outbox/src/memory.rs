use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::OutboxConfig;
use crate::error::OutboxError;
use crate::store::{ClaimedBatch, OutboxRecord, OutboxStore, RelayLease, Wake, created_at_nanos};

const NOTIFY_CAPACITY: usize = 1024;
/// Delivered rows kept for inspection before the oldest are dropped.
pub const DEFAULT_DELIVERED_RETENTION: usize = 10_000;

/// In-process outbox with the same lease and claim semantics as the Postgres
/// store. Clones share state, so several observers over clones behave like
/// replicas over one database.
#[derive(Clone)]
pub struct MemoryOutbox {
    shared: Arc<Shared>,
}

struct Shared {
    state: Mutex<State>,
    notify: broadcast::Sender<i64>,
}

struct State {
    rows: Vec<OutboxRecord>,
    ids: HashSet<Uuid>,
    /// Claimed by a batch that has not finished yet.
    in_flight: HashSet<Uuid>,
    delivered_retention: usize,
    leases: HashMap<i64, u64>,
    next_lease: u64,
}

impl Default for MemoryOutbox {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryOutbox {
    #[must_use]
    pub fn new() -> Self {
        Self::with_delivered_retention(DEFAULT_DELIVERED_RETENTION)
    }

    /// Keeps at most `retention` delivered rows; older delivered rows are
    /// dropped whenever a batch finishes.
    #[must_use]
    pub fn with_delivered_retention(retention: usize) -> Self {
        let (notify, _) = broadcast::channel(NOTIFY_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State {
                    rows: Vec::new(),
                    ids: HashSet::new(),
                    in_flight: HashSet::new(),
                    delivered_retention: retention,
                    leases: HashMap::new(),
                    next_lease: 0,
                }),
                notify,
            }),
        }
    }

    /// Appends `records` as one commit, then notifies every lease.
    pub fn append(&self, records: impl IntoIterator<Item = OutboxRecord>) {
        let records: Vec<OutboxRecord> = records.into_iter().collect();
        let payloads: Vec<i64> = records
            .iter()
            .map(|record| created_at_nanos(record.created_at))
            .collect();
        {
            let mut state = self.state();
            state.ids.extend(records.iter().map(|record| record.id));
            state.rows.extend(records);
        }
        for payload in payloads {
            // No receivers just means no relay is listening yet.
            let _ = self.shared.notify.send(payload);
        }
    }

    /// Whether a row with `id` is still held, pending or retained.
    #[must_use]
    pub fn contains(&self, id: Uuid) -> bool {
        self.state().ids.contains(&id)
    }

    #[must_use]
    pub fn records(&self) -> Vec<OutboxRecord> {
        self.state().rows.clone()
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.state()
            .rows
            .iter()
            .filter(|record| !record.is_delivered)
            .count()
    }

    #[must_use]
    pub fn delivered_ids(&self) -> Vec<Uuid> {
        self.state()
            .rows
            .iter()
            .filter(|record| record.is_delivered)
            .map(|record| record.id)
            .collect()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Ends a claim: `revert` goes back to pending, the rest of `claimed`
    /// stays delivered and becomes eligible for pruning.
    fn finish_claim(&self, claimed: &[Uuid], revert: &[Uuid]) {
        let mut state = self.state();
        for record in state.rows.iter_mut().filter(|record| revert.contains(&record.id)) {
            record.is_delivered = false;
        }
        for id in claimed {
            state.in_flight.remove(id);
        }
        prune_delivered(&mut state);
    }
}

#[async_trait]
impl OutboxStore for MemoryOutbox {
    async fn acquire(&self, config: &OutboxConfig) -> Result<Box<dyn RelayLease>, OutboxError> {
        let token = {
            let mut state = self.state();
            if state.leases.contains_key(&config.lock_id) {
                return Err(OutboxError::LockHeld(config.lock_id));
            }
            state.next_lease += 1;
            let token = state.next_lease;
            state.leases.insert(config.lock_id, token);
            token
        };
        Ok(Box::new(MemoryLease {
            outbox: self.clone(),
            lock_id: config.lock_id,
            token,
            notifications: self.shared.notify.subscribe(),
            released: false,
        }))
    }
}

struct MemoryLease {
    outbox: MemoryOutbox,
    lock_id: i64,
    token: u64,
    notifications: broadcast::Receiver<i64>,
    released: bool,
}

impl MemoryLease {
    fn unlock(&mut self) {
        if self.released {
            return;
        }
        let mut state = self.outbox.state();
        if state.leases.get(&self.lock_id) == Some(&self.token) {
            state.leases.remove(&self.lock_id);
        }
        self.released = true;
    }
}

impl Drop for MemoryLease {
    fn drop(&mut self) {
        self.unlock();
    }
}

#[async_trait]
impl RelayLease for MemoryLease {
    async fn wait(&mut self, deadline: Instant) -> Result<Wake, OutboxError> {
        match tokio::time::timeout_at(deadline, self.notifications.recv()).await {
            Err(_) => Ok(Wake::TimedOut),
            Ok(Ok(nanos)) => Ok(Wake::Notified(Some(nanos))),
            Ok(Err(RecvError::Lagged(_))) => Ok(Wake::Notified(None)),
            Ok(Err(RecvError::Closed)) => {
                Err(OutboxError::Transient("notification channel closed".to_string()))
            }
        }
    }

    async fn claim<'a>(
        &'a mut self,
        max_batch: usize,
    ) -> Result<Box<dyn ClaimedBatch + 'a>, OutboxError> {
        let records = {
            let mut state = self.outbox.state();
            let mut pending: Vec<&mut OutboxRecord> = state
                .rows
                .iter_mut()
                .filter(|record| !record.is_delivered)
                .collect();
            pending.sort_by(|left, right| {
                (left.created_at, left.id).cmp(&(right.created_at, right.id))
            });
            let records = pending
                .into_iter()
                .take(max_batch)
                .map(|record| {
                    record.is_delivered = true;
                    record.clone()
                })
                .collect::<Vec<_>>();
            state
                .in_flight
                .extend(records.iter().map(|record| record.id));
            records
        };
        Ok(Box::new(MemoryBatch {
            outbox: self.outbox.clone(),
            records,
            finished: false,
        }))
    }

    async fn release(self: Box<Self>) -> Result<(), OutboxError> {
        let mut lease = self;
        lease.unlock();
        Ok(())
    }
}

struct MemoryBatch {
    outbox: MemoryOutbox,
    records: Vec<OutboxRecord>,
    finished: bool,
}

impl MemoryBatch {
    fn claimed_ids(&self) -> Vec<Uuid> {
        self.records.iter().map(|record| record.id).collect()
    }
}

impl Drop for MemoryBatch {
    fn drop(&mut self) {
        if !self.finished {
            let claimed = self.claimed_ids();
            self.outbox.finish_claim(&claimed, &claimed);
        }
    }
}

#[async_trait]
impl ClaimedBatch for MemoryBatch {
    fn records(&self) -> &[OutboxRecord] {
        &self.records
    }

    async fn commit(self: Box<Self>, undelivered: &[Uuid]) -> Result<(), OutboxError> {
        let mut batch = self;
        let claimed = batch.claimed_ids();
        let revert: Vec<Uuid> = undelivered
            .iter()
            .copied()
            .filter(|id| claimed.contains(id))
            .collect();
        batch.outbox.finish_claim(&claimed, &revert);
        batch.finished = true;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), OutboxError> {
        let mut batch = self;
        let claimed = batch.claimed_ids();
        batch.outbox.finish_claim(&claimed, &claimed);
        batch.finished = true;
        Ok(())
    }
}

/// Drops the oldest delivered rows beyond the retention. Rows of an open
/// claim are kept so a rollback can still return them.
fn prune_delivered(state: &mut State) {
    let delivered = state
        .rows
        .iter()
        .filter(|record| record.is_delivered && !state.in_flight.contains(&record.id))
        .count();
    let mut excess = delivered.saturating_sub(state.delivered_retention);
    if excess == 0 {
        return;
    }
    let State {
        rows,
        ids,
        in_flight,
        ..
    } = state;
    rows.retain(|record| {
        if excess > 0 && record.is_delivered && !in_flight.contains(&record.id) {
            excess -= 1;
            ids.remove(&record.id);
            false
        } else {
            true
        }
    });
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::Instant;

    use super::MemoryOutbox;
    use crate::event::NewEvent;
    use crate::store::{OutboxRecord, OutboxStore, Wake};
    use crate::{OutboxConfig, OutboxError};

    fn records(count: u8) -> Vec<OutboxRecord> {
        (0..count)
            .map(|index| {
                let event = NewEvent::new("/test", "test.event", vec![index])
                    .seal(None)
                    .expect("seal");
                OutboxRecord::from_event(&event).expect("record")
            })
            .collect()
    }

    #[tokio::test]
    async fn lease_is_exclusive_until_dropped() {
        let outbox = MemoryOutbox::new();
        let config = OutboxConfig::default();
        let lease = outbox.acquire(&config).await.expect("first lease");
        let second = outbox.acquire(&config).await;
        assert!(matches!(second, Err(OutboxError::LockHeld(id)) if id == config.lock_id));

        let other_channel = OutboxConfig::default().with_channel("other");
        assert!(outbox.acquire(&other_channel).await.is_ok());

        drop(lease);
        assert!(outbox.acquire(&config).await.is_ok());
    }

    #[tokio::test]
    async fn claim_takes_oldest_rows_first() {
        let outbox = MemoryOutbox::new();
        let rows = records(5);
        outbox.append(rows.clone());
        let mut lease = outbox
            .acquire(&OutboxConfig::default())
            .await
            .expect("lease");

        let batch = lease.claim(3).await.expect("claim");
        let claimed: Vec<_> = batch.records().iter().map(|record| record.id).collect();
        let expected: Vec<_> = rows.iter().take(3).map(|record| record.id).collect();
        assert_eq!(claimed, expected);
        batch.commit(&[]).await.expect("commit");
        assert_eq!(outbox.pending_count(), 2);
    }

    #[tokio::test]
    async fn dropped_batch_rolls_back() {
        let outbox = MemoryOutbox::new();
        outbox.append(records(2));
        let mut lease = outbox
            .acquire(&OutboxConfig::default())
            .await
            .expect("lease");
        let batch = lease.claim(10).await.expect("claim");
        assert_eq!(outbox.pending_count(), 0);
        drop(batch);
        assert_eq!(outbox.pending_count(), 2);
    }

    #[tokio::test]
    async fn partial_commit_returns_only_failed_rows() {
        let outbox = MemoryOutbox::new();
        let rows = records(4);
        outbox.append(rows.clone());
        let mut lease = outbox
            .acquire(&OutboxConfig::default())
            .await
            .expect("lease");
        let batch = lease.claim(10).await.expect("claim");
        batch.commit(&[rows[3].id]).await.expect("commit");
        assert_eq!(outbox.delivered_ids().len(), 3);
        assert!(!outbox.delivered_ids().contains(&rows[3].id));
    }

    #[tokio::test]
    async fn appends_wake_the_lease() {
        let outbox = MemoryOutbox::new();
        let mut lease = outbox
            .acquire(&OutboxConfig::default())
            .await
            .expect("lease");
        assert_eq!(
            lease
                .wait(Instant::now() + Duration::from_millis(10))
                .await
                .expect("wait"),
            Wake::TimedOut
        );
        let rows = records(1);
        let expected = rows[0].notify_payload().parse::<i64>().expect("nanos");
        outbox.append(rows);
        assert_eq!(
            lease
                .wait(Instant::now() + Duration::from_secs(1))
                .await
                .expect("wait"),
            Wake::Notified(Some(expected))
        );
    }

    #[tokio::test]
    async fn delivered_rows_beyond_retention_are_pruned() {
        let outbox = MemoryOutbox::with_delivered_retention(2);
        let rows = records(5);
        outbox.append(rows.clone());
        assert!(outbox.contains(rows[0].id));

        let mut lease = outbox
            .acquire(&OutboxConfig::default())
            .await
            .expect("lease");
        let batch = lease.claim(5).await.expect("claim");
        batch.commit(&[rows[4].id]).await.expect("commit");

        // Four delivered, two retained, the failed row stays pending.
        assert_eq!(outbox.records().len(), 3);
        assert_eq!(outbox.delivered_ids(), vec![rows[2].id, rows[3].id]);
        assert_eq!(outbox.pending_count(), 1);
        assert!(!outbox.contains(rows[0].id));
        assert!(outbox.contains(rows[4].id));
    }

    #[tokio::test]
    async fn open_claims_survive_pruning() {
        let outbox = MemoryOutbox::with_delivered_retention(0);
        let rows = records(2);
        outbox.append(rows.clone());

        let mut first = outbox
            .acquire(&OutboxConfig::default().with_channel("first"))
            .await
            .expect("lease");
        let open = first.claim(1).await.expect("claim");

        outbox.append(records(1));
        let mut second = outbox
            .acquire(&OutboxConfig::default().with_channel("second"))
            .await
            .expect("lease");
        let other = second.claim(10).await.expect("claim");
        other.commit(&[]).await.expect("commit");

        open.rollback().await.expect("rollback");
        assert!(outbox.contains(rows[0].id));
        assert_eq!(outbox.pending_count(), 1);
    }
}

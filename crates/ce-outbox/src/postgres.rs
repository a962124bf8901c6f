use async_trait::async_trait;
use futures::{StreamExt, stream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_postgres::error::SqlState;
use tokio_postgres::{AsyncMessage, Client, NoTls, Row, Transaction};
use uuid::Uuid;

use crate::config::OutboxConfig;
use crate::error::OutboxError;
use crate::store::{ClaimedBatch, OutboxRecord, OutboxStore, RelayLease, Wake};

pub const OUTBOX_SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS outboxce (
    id UUID PRIMARY KEY,
    tenant_id UUID,
    cloud_event BYTEA NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    is_delivered BOOLEAN NOT NULL DEFAULT false
);
CREATE INDEX IF NOT EXISTS outboxce_is_delivered_created_at_idx
    ON outboxce (is_delivered, created_at);
";

const INSERT_SQL: &str = r"
INSERT INTO outboxce (id, tenant_id, cloud_event, created_at, is_delivered)
VALUES ($1, $2, $3, $4, false)
";

const CLAIM_SQL: &str = r"
WITH claimed AS (
    SELECT id
      FROM outboxce
     WHERE is_delivered = false
     ORDER BY created_at, id
     LIMIT $1
       FOR UPDATE SKIP LOCKED
)
UPDATE outboxce AS o
   SET is_delivered = true
  FROM claimed
 WHERE o.id = claimed.id
RETURNING o.id, o.tenant_id, o.cloud_event, o.created_at
";

const REVERT_SQL: &str = "UPDATE outboxce SET is_delivered = false WHERE id = ANY($1)";

/// Whether a Postgres failure is worth retrying: lost connections,
/// serialization and deadlock aborts, server shutdown.
#[must_use]
pub fn is_transient(error: &tokio_postgres::Error) -> bool {
    if error.is_closed() {
        return true;
    }
    let Some(code) = error.code() else {
        return true;
    };
    *code == SqlState::T_R_SERIALIZATION_FAILURE
        || *code == SqlState::T_R_DEADLOCK_DETECTED
        || *code == SqlState::LOCK_NOT_AVAILABLE
        || *code == SqlState::CANNOT_CONNECT_NOW
        || code.code().starts_with("08")
        || code.code().starts_with("57P")
}

#[must_use]
pub fn pg_error(context: &str, error: &tokio_postgres::Error) -> OutboxError {
    let message = format!("{context}: {error}");
    if is_transient(error) {
        OutboxError::Transient(message)
    } else {
        OutboxError::Permanent(message)
    }
}

/// Inserts `record` and queues its notification inside the caller's
/// transaction. Both become visible only when the caller commits.
pub async fn append_in_transaction(
    tx: &Transaction<'_>,
    channel: &str,
    record: &OutboxRecord,
) -> Result<(), OutboxError> {
    tx.execute(
        INSERT_SQL,
        &[
            &record.id,
            &record.tenant_id,
            &record.cloud_event,
            &record.created_at,
        ],
    )
    .await
    .map_err(|error| pg_error("insert outbox row", &error))?;
    tx.execute("SELECT pg_notify($1, $2)", &[&channel, &record.notify_payload()])
        .await
        .map_err(|error| pg_error("notify outbox channel", &error))?;
    Ok(())
}

/// Postgres-backed relay store. Each lease opens two dedicated connections:
/// one holding the advisory lock and running claim transactions, one
/// listening on the notification channel.
#[derive(Debug, Clone)]
pub struct PgOutbox {
    database_url: String,
    listener_url: String,
}

impl PgOutbox {
    pub fn new(database_url: impl Into<String>, listener_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
            listener_url: listener_url.into(),
        }
    }
}

#[async_trait]
impl OutboxStore for PgOutbox {
    async fn acquire(&self, config: &OutboxConfig) -> Result<Box<dyn RelayLease>, OutboxError> {
        config.validate()?;
        let (client, connection) = tokio_postgres::connect(&self.database_url, NoTls)
            .await
            .map_err(|error| pg_error("connect relay", &error))?;
        let connection_task = tokio::spawn(async move {
            if let Err(error) = connection.await {
                tracing::warn!(
                    target: "profile.outbox",
                    reason = %error,
                    "relay postgres connection error",
                );
            }
        });

        let locked = match client
            .query_one("SELECT pg_try_advisory_lock($1)", &[&config.lock_id])
            .await
        {
            Ok(row) => lock_result(&row, "acquire relay lock"),
            Err(error) => Err(pg_error("acquire relay lock", &error)),
        };
        let locked = match locked {
            Ok(locked) => locked,
            Err(error) => {
                connection_task.abort();
                return Err(error);
            }
        };
        if !locked {
            connection_task.abort();
            return Err(OutboxError::LockHeld(config.lock_id));
        }

        let listener = match Listener::connect(&self.listener_url, &config.channel).await {
            Ok(listener) => listener,
            Err(error) => {
                if let Err(unlock_error) = client
                    .execute("SELECT pg_advisory_unlock($1)", &[&config.lock_id])
                    .await
                {
                    tracing::warn!(
                        target: "profile.outbox",
                        lock_id = config.lock_id,
                        reason = %unlock_error,
                        "failed to release relay lock after listener setup failed",
                    );
                }
                connection_task.abort();
                return Err(error);
            }
        };

        Ok(Box::new(PgLease {
            client,
            connection_task,
            listener,
            lock_id: config.lock_id,
        }))
    }
}

struct Listener {
    // Kept so the LISTEN session stays open.
    _client: Client,
    notifications: mpsc::UnboundedReceiver<Option<i64>>,
    task: JoinHandle<()>,
}

impl Listener {
    async fn connect(url: &str, channel: &str) -> Result<Self, OutboxError> {
        let (client, mut connection) = tokio_postgres::connect(url, NoTls)
            .await
            .map_err(|error| pg_error("connect listener", &error))?;
        let (sender, notifications) = mpsc::unbounded_channel();
        let wanted = channel.to_string();
        let task = tokio::spawn(async move {
            let mut messages = std::pin::pin!(stream::poll_fn(move |cx| connection.poll_message(cx)));
            while let Some(message) = messages.next().await {
                match message {
                    Ok(AsyncMessage::Notification(notification))
                        if notification.channel() == wanted =>
                    {
                        let nanos = notification.payload().parse::<i64>().ok();
                        if sender.send(nanos).is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    Err(error) => {
                        tracing::warn!(
                            target: "profile.outbox",
                            reason = %error,
                            "outbox listener connection error",
                        );
                        break;
                    }
                }
            }
        });

        // The channel name is validated by OutboxConfig.
        if let Err(error) = client.batch_execute(&format!("LISTEN {channel}")).await {
            task.abort();
            return Err(pg_error("listen on outbox channel", &error));
        }

        Ok(Self {
            _client: client,
            notifications,
            task,
        })
    }
}

struct PgLease {
    client: Client,
    connection_task: JoinHandle<()>,
    listener: Listener,
    lock_id: i64,
}

impl Drop for PgLease {
    fn drop(&mut self) {
        // Closing the session releases the advisory lock server-side.
        self.listener.task.abort();
        self.connection_task.abort();
    }
}

#[async_trait]
impl RelayLease for PgLease {
    async fn wait(&mut self, deadline: Instant) -> Result<Wake, OutboxError> {
        match tokio::time::timeout_at(deadline, self.listener.notifications.recv()).await {
            Err(_) => Ok(Wake::TimedOut),
            Ok(Some(nanos)) => Ok(Wake::Notified(nanos)),
            Ok(None) => Err(OutboxError::Transient(
                "outbox listener stopped".to_string(),
            )),
        }
    }

    async fn claim<'a>(
        &'a mut self,
        max_batch: usize,
    ) -> Result<Box<dyn ClaimedBatch + 'a>, OutboxError> {
        let limit = i64::try_from(max_batch)
            .map_err(|_| OutboxError::Config(format!("max_batch {max_batch} is too large")))?;
        let tx = self
            .client
            .transaction()
            .await
            .map_err(|error| pg_error("begin claim", &error))?;
        let rows = tx
            .query(CLAIM_SQL, &[&limit])
            .await
            .map_err(|error| pg_error("claim outbox rows", &error))?;
        let mut records = rows
            .iter()
            .map(map_record)
            .collect::<Result<Vec<_>, _>>()?;
        records.sort_by(|left, right| (left.created_at, left.id).cmp(&(right.created_at, right.id)));
        Ok(Box::new(PgBatch { tx, records }))
    }

    async fn release(self: Box<Self>) -> Result<(), OutboxError> {
        let unlocked = self
            .client
            .query_one("SELECT pg_advisory_unlock($1)", &[&self.lock_id])
            .await
            .map_err(|error| pg_error("release relay lock", &error))?;
        if lock_result(&unlocked, "release relay lock")? {
            Ok(())
        } else {
            Err(OutboxError::Transient(format!(
                "relay lock {} was no longer held",
                self.lock_id
            )))
        }
    }
}

struct PgBatch<'a> {
    tx: Transaction<'a>,
    records: Vec<OutboxRecord>,
}

#[async_trait]
impl ClaimedBatch for PgBatch<'_> {
    fn records(&self) -> &[OutboxRecord] {
        &self.records
    }

    async fn commit(self: Box<Self>, undelivered: &[Uuid]) -> Result<(), OutboxError> {
        let PgBatch { tx, .. } = *self;
        if !undelivered.is_empty() {
            tx.execute(REVERT_SQL, &[&undelivered])
                .await
                .map_err(|error| pg_error("revert undelivered rows", &error))?;
        }
        tx.commit()
            .await
            .map_err(|error| pg_error("commit claim", &error))
    }

    async fn rollback(self: Box<Self>) -> Result<(), OutboxError> {
        let PgBatch { tx, .. } = *self;
        tx.rollback()
            .await
            .map_err(|error| pg_error("roll back claim", &error))
    }
}

fn lock_result(row: &Row, context: &str) -> Result<bool, OutboxError> {
    row.try_get::<_, bool>(0)
        .map_err(|error| OutboxError::Permanent(format!("{context}: {error}")))
}

fn map_record(row: &Row) -> Result<OutboxRecord, OutboxError> {
    Ok(OutboxRecord {
        id: row
            .try_get("id")
            .map_err(|error| OutboxError::Codec(error.to_string()))?,
        tenant_id: row
            .try_get("tenant_id")
            .map_err(|error| OutboxError::Codec(error.to_string()))?,
        cloud_event: row
            .try_get("cloud_event")
            .map_err(|error| OutboxError::Codec(error.to_string()))?,
        created_at: row
            .try_get("created_at")
            .map_err(|error| OutboxError::Codec(error.to_string()))?,
        is_delivered: true,
    })
}

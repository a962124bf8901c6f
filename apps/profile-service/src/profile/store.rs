use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use ce_outbox::{MemoryOutbox, OutboxError, OutboxRecord};
use chrono::Utc;
use tokio::sync::Mutex;
use tokio_postgres::Row;
use uuid::Uuid;

use crate::db::ProfileDb;
use crate::profile::types::{PROFILE_NAME_HEAP_TYPE, SealedProfile, SealedRow, TextHeapEntry};

/// Upper bound on names returned by one heap search.
pub const NAME_SEARCH_LIMIT: usize = 100;

#[derive(Debug, thiserror::Error)]
pub enum ProfileStoreError {
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("db error: {0}")]
    Db(String),
}

/// Everything one `StoreProfile` persists, committed as a unit.
#[derive(Debug, Clone)]
pub struct ProfileWrite {
    pub profile: SealedProfile,
    pub heap: TextHeapEntry,
    pub outbox: OutboxRecord,
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Upserts the profile row (a re-store only touches `updated_at`), adds
    /// the heap token and appends the outbox record in one transaction.
    async fn write(&self, write: ProfileWrite) -> Result<(), ProfileStoreError>;

    async fn fetch_row(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<SealedRow>, ProfileStoreError>;

    /// Case-insensitive substring search over the tenant's profile names.
    async fn find_names(
        &self,
        tenant_id: Uuid,
        query: &str,
    ) -> Result<Vec<String>, ProfileStoreError>;

    async fn find_rows_by_name(
        &self,
        tenant_id: Uuid,
        read_set: &[Vec<u8>],
    ) -> Result<Vec<SealedRow>, ProfileStoreError>;
}

pub fn memory(outbox: MemoryOutbox) -> Arc<dyn ProfileStore> {
    Arc::new(MemoryProfileStore::new(outbox))
}

pub fn postgres(db: Arc<ProfileDb>, channel: impl Into<String>) -> Arc<dyn ProfileStore> {
    Arc::new(PostgresProfileStore {
        db,
        channel: channel.into(),
    })
}

/// Step of a memory write at which an injected failure fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePoint {
    ProfileUpsert,
    TextHeap,
    OutboxAppend,
    Commit,
}

/// In-process store. Writes are staged against a snapshot and applied only
/// when every step succeeded, so a failed write leaves no trace.
pub struct MemoryProfileStore {
    inner: Mutex<MemoryProfileStoreInner>,
    outbox: MemoryOutbox,
}

#[derive(Default)]
struct MemoryProfileStoreInner {
    profiles: HashMap<Uuid, SealedRow>,
    heap: BTreeSet<TextHeapEntry>,
    fail_next: Option<FailurePoint>,
}

impl MemoryProfileStore {
    pub fn new(outbox: MemoryOutbox) -> Self {
        Self {
            inner: Mutex::new(MemoryProfileStoreInner::default()),
            outbox,
        }
    }

    pub fn outbox(&self) -> &MemoryOutbox {
        &self.outbox
    }

    /// Makes the next write fail at `point`.
    pub async fn fail_next(&self, point: FailurePoint) {
        self.inner.lock().await.fail_next = Some(point);
    }

    pub async fn profile_count(&self) -> usize {
        self.inner.lock().await.profiles.len()
    }

    pub async fn heap_entries(&self) -> Vec<TextHeapEntry> {
        self.inner.lock().await.heap.iter().cloned().collect()
    }

    /// Overwrites stored column values, bypassing the write path.
    pub async fn replace_sealed(&self, sealed: SealedProfile) -> Result<(), ProfileStoreError> {
        let mut inner = self.inner.lock().await;
        let row = inner
            .profiles
            .get_mut(&sealed.id)
            .ok_or_else(|| ProfileStoreError::Db(format!("no profile row {}", sealed.id)))?;
        row.sealed = sealed;
        Ok(())
    }
}

fn injected(
    armed: &mut Option<FailurePoint>,
    point: FailurePoint,
) -> Result<(), ProfileStoreError> {
    if *armed == Some(point) {
        *armed = None;
        return Err(ProfileStoreError::Db(format!("injected failure at {point:?}")));
    }
    Ok(())
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn write(&self, write: ProfileWrite) -> Result<(), ProfileStoreError> {
        let mut inner = self.inner.lock().await;
        let mut armed = inner.fail_next.take();
        let now = Utc::now();

        injected(&mut armed, FailurePoint::ProfileUpsert)?;
        let staged_row = match inner.profiles.get(&write.profile.id) {
            Some(existing) if existing.sealed.tenant_id != write.profile.tenant_id => {
                return Err(ProfileStoreError::Conflict(format!(
                    "profile {} belongs to another tenant",
                    write.profile.id
                )));
            }
            Some(existing) => SealedRow {
                updated_at: now,
                ..existing.clone()
            },
            None => SealedRow {
                sealed: write.profile.clone(),
                created_at: now,
                updated_at: now,
            },
        };

        injected(&mut armed, FailurePoint::TextHeap)?;
        injected(&mut armed, FailurePoint::OutboxAppend)?;
        if self.outbox.contains(write.outbox.id) {
            return Err(ProfileStoreError::Db(format!(
                "duplicate outbox id {}",
                write.outbox.id
            )));
        }
        injected(&mut armed, FailurePoint::Commit)?;

        inner.profiles.insert(write.profile.id, staged_row);
        inner.heap.insert(write.heap);
        self.outbox.append([write.outbox]);
        Ok(())
    }

    async fn fetch_row(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<SealedRow>, ProfileStoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .profiles
            .get(&id)
            .filter(|row| row.sealed.tenant_id == tenant_id)
            .cloned())
    }

    async fn find_names(
        &self,
        tenant_id: Uuid,
        query: &str,
    ) -> Result<Vec<String>, ProfileStoreError> {
        let needle = query.to_lowercase();
        let inner = self.inner.lock().await;
        Ok(inner
            .heap
            .iter()
            .filter(|entry| entry.tenant_id == tenant_id && entry.kind == PROFILE_NAME_HEAP_TYPE)
            .filter(|entry| entry.content.to_lowercase().contains(&needle))
            .map(|entry| entry.content.clone())
            .take(NAME_SEARCH_LIMIT)
            .collect())
    }

    async fn find_rows_by_name(
        &self,
        tenant_id: Uuid,
        read_set: &[Vec<u8>],
    ) -> Result<Vec<SealedRow>, ProfileStoreError> {
        let inner = self.inner.lock().await;
        let mut rows: Vec<SealedRow> = inner
            .profiles
            .values()
            .filter(|row| row.sealed.tenant_id == tenant_id)
            .filter(|row| read_set.contains(&row.sealed.name_bidx))
            .cloned()
            .collect();
        rows.sort_by_key(|row| row.sealed.id);
        Ok(rows)
    }
}

struct PostgresProfileStore {
    db: Arc<ProfileDb>,
    channel: String,
}

const PROFILE_COLUMNS: &str = "id, tenant_id, nin, nin_bidx, name, name_bidx, email, email_bidx, \
                               phone, phone_bidx, dob, created_at, updated_at";

fn db_error(context: &str, error: &tokio_postgres::Error) -> ProfileStoreError {
    let message = format!("{context}: {error}");
    if ce_outbox::postgres::is_transient(error) {
        ProfileStoreError::Unavailable(message)
    } else {
        ProfileStoreError::Db(message)
    }
}

fn outbox_error(error: OutboxError) -> ProfileStoreError {
    if error.is_retryable() {
        ProfileStoreError::Unavailable(error.to_string())
    } else {
        ProfileStoreError::Db(error.to_string())
    }
}

/// `%`, `_` and the escape character itself match literally.
fn like_pattern(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len() + 2);
    escaped.push('%');
    for ch in query.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

#[async_trait]
impl ProfileStore for PostgresProfileStore {
    async fn write(&self, write: ProfileWrite) -> Result<(), ProfileStoreError> {
        let mut client = self
            .db
            .session()
            .await
            .map_err(|error| db_error("open profile session", &error))?;
        let tx = client
            .transaction()
            .await
            .map_err(|error| db_error("begin profile transaction", &error))?;

        let profile = &write.profile;
        let upserted = tx
            .execute(
                r#"
                INSERT INTO profile (
                    id, tenant_id, nin, nin_bidx, name, name_bidx, email, email_bidx,
                    phone, phone_bidx, dob, created_at, updated_at
                ) VALUES (
                    $1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11, now(), now()
                )
                ON CONFLICT (id) DO UPDATE
                   SET updated_at = now()
                 WHERE profile.tenant_id = EXCLUDED.tenant_id
                "#,
                &[
                    &profile.id,
                    &profile.tenant_id,
                    &profile.nin,
                    &profile.nin_bidx,
                    &profile.name,
                    &profile.name_bidx,
                    &profile.email,
                    &profile.email_bidx,
                    &profile.phone,
                    &profile.phone_bidx,
                    &profile.dob,
                ],
            )
            .await
            .map_err(|error| db_error("upsert profile", &error))?;
        if upserted == 0 {
            return Err(ProfileStoreError::Conflict(format!(
                "profile {} belongs to another tenant",
                profile.id
            )));
        }

        tx.execute(
            r#"
            INSERT INTO text_heap (tenant_id, type, content)
            VALUES ($1, $2, $3)
            ON CONFLICT (tenant_id, type, content) DO NOTHING
            "#,
            &[&write.heap.tenant_id, &write.heap.kind, &write.heap.content],
        )
        .await
        .map_err(|error| db_error("insert text heap", &error))?;

        ce_outbox::postgres::append_in_transaction(&tx, &self.channel, &write.outbox)
            .await
            .map_err(outbox_error)?;

        tx.commit()
            .await
            .map_err(|error| db_error("commit profile transaction", &error))
    }

    async fn fetch_row(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<SealedRow>, ProfileStoreError> {
        let client = self
            .db
            .session()
            .await
            .map_err(|error| db_error("open profile session", &error))?;
        let row = client
            .query_opt(
                &format!("SELECT {PROFILE_COLUMNS} FROM profile WHERE tenant_id = $1 AND id = $2"),
                &[&tenant_id, &id],
            )
            .await
            .map_err(|error| db_error("fetch profile", &error))?;
        row.as_ref().map(map_profile_row).transpose()
    }

    async fn find_names(
        &self,
        tenant_id: Uuid,
        query: &str,
    ) -> Result<Vec<String>, ProfileStoreError> {
        let client = self
            .db
            .session()
            .await
            .map_err(|error| db_error("open profile session", &error))?;
        let rows = client
            .query(
                r#"
                SELECT content
                  FROM text_heap
                 WHERE tenant_id = $1
                   AND type = $2
                   AND content ILIKE $3 ESCAPE '\'
                 ORDER BY content
                 LIMIT $4
                "#,
                &[
                    &tenant_id,
                    &PROFILE_NAME_HEAP_TYPE,
                    &like_pattern(query),
                    &(NAME_SEARCH_LIMIT as i64),
                ],
            )
            .await
            .map_err(|error| db_error("search profile names", &error))?;
        rows.iter()
            .map(|row| {
                row.try_get::<_, String>("content")
                    .map_err(|error| column_error("content", &error))
            })
            .collect()
    }

    async fn find_rows_by_name(
        &self,
        tenant_id: Uuid,
        read_set: &[Vec<u8>],
    ) -> Result<Vec<SealedRow>, ProfileStoreError> {
        let client = self
            .db
            .session()
            .await
            .map_err(|error| db_error("open profile session", &error))?;
        let rows = client
            .query(
                &format!(
                    "SELECT {PROFILE_COLUMNS} FROM profile \
                     WHERE tenant_id = $1 AND name_bidx = ANY($2) ORDER BY id"
                ),
                &[&tenant_id, &read_set],
            )
            .await
            .map_err(|error| db_error("find profiles by name", &error))?;
        rows.iter().map(map_profile_row).collect()
    }
}

fn map_profile_row(row: &Row) -> Result<SealedRow, ProfileStoreError> {
    Ok(SealedRow {
        sealed: SealedProfile {
            id: column(row, "id")?,
            tenant_id: column(row, "tenant_id")?,
            nin: column(row, "nin")?,
            nin_bidx: column(row, "nin_bidx")?,
            name: column(row, "name")?,
            name_bidx: column(row, "name_bidx")?,
            email: column(row, "email")?,
            email_bidx: column(row, "email_bidx")?,
            phone: column(row, "phone")?,
            phone_bidx: column(row, "phone_bidx")?,
            dob: column(row, "dob")?,
        },
        created_at: column(row, "created_at")?,
        updated_at: column(row, "updated_at")?,
    })
}

fn column<'a, T>(row: &'a Row, name: &str) -> Result<T, ProfileStoreError>
where
    T: tokio_postgres::types::FromSql<'a>,
{
    row.try_get(name).map_err(|error| column_error(name, &error))
}

fn column_error(name: &str, error: &tokio_postgres::Error) -> ProfileStoreError {
    ProfileStoreError::Db(format!("read column {name}: {error}"))
}

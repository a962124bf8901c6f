use anyhow::{Context, Result};

use crate::db::ProfileDb;

pub struct Migration {
    pub version: i32,
    pub name: &'static str,
    pub sql: &'static str,
}

const PROFILE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS profile (
    id UUID PRIMARY KEY,
    tenant_id UUID NOT NULL,
    nin BYTEA NOT NULL,
    nin_bidx BYTEA NOT NULL,
    name BYTEA NOT NULL,
    name_bidx BYTEA NOT NULL,
    email BYTEA NOT NULL,
    email_bidx BYTEA NOT NULL,
    phone BYTEA NOT NULL,
    phone_bidx BYTEA NOT NULL,
    dob BYTEA,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
);
CREATE INDEX IF NOT EXISTS profile_tenant_name_bidx_idx ON profile (tenant_id, name_bidx);
CREATE INDEX IF NOT EXISTS profile_tenant_nin_bidx_idx ON profile (tenant_id, nin_bidx);
CREATE INDEX IF NOT EXISTS profile_tenant_email_bidx_idx ON profile (tenant_id, email_bidx);
CREATE INDEX IF NOT EXISTS profile_tenant_phone_bidx_idx ON profile (tenant_id, phone_bidx);

CREATE TABLE IF NOT EXISTS text_heap (
    tenant_id UUID NOT NULL,
    type TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    UNIQUE (tenant_id, type, content)
);
";

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "profile_and_text_heap",
        sql: PROFILE_TABLES,
    },
    Migration {
        version: 2,
        name: "outboxce",
        sql: ce_outbox::postgres::OUTBOX_SCHEMA,
    },
];

/// Applies every migration newer than the recorded version, each in its own
/// transaction. Returns the versions that were applied.
pub async fn apply(db: &ProfileDb) -> Result<Vec<i32>> {
    let mut client = db.session().await.context("open migration session")?;
    client
        .batch_execute(
            r"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
)",
        )
        .await
        .context("create schema_migrations")?;

    let current: i32 = client
        .query_one(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            &[],
        )
        .await
        .context("read schema version")?
        .try_get(0)
        .context("decode schema version")?;

    let mut applied = Vec::new();
    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let tx = client
            .transaction()
            .await
            .context("begin migration transaction")?;
        tx.batch_execute(migration.sql)
            .await
            .with_context(|| format!("apply migration {} ({})", migration.version, migration.name))?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name) VALUES ($1, $2)",
            &[&migration.version, &migration.name],
        )
        .await
        .context("record migration")?;
        tx.commit().await.context("commit migration")?;
        tracing::info!(
            target: "profile.db",
            version = migration.version,
            name = migration.name,
            "applied migration",
        );
        applied.push(migration.version);
    }
    Ok(applied)
}

use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use tokio::sync::{Mutex, MutexGuard};
use tokio_postgres::{Client, NoTls};

/// Request-path session for the profile store. When the connection task dies
/// the next caller reopens it, so a dropped connection costs one failed
/// request instead of every request until restart.
///
/// The outbox relay opens its own dedicated connections and never borrows
/// this one.
pub struct ProfileDb {
    database_url: String,
    client: Mutex<Client>,
    reconnects: AtomicU64,
}

impl ProfileDb {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let client = open(database_url)
            .await
            .context("connect to postgres")?;
        Ok(Self {
            database_url: database_url.to_string(),
            client: Mutex::new(client),
            reconnects: AtomicU64::new(0),
        })
    }

    /// Locks the session, first replacing the client if its connection has
    /// closed.
    pub async fn session(&self) -> Result<MutexGuard<'_, Client>, tokio_postgres::Error> {
        let mut client = self.client.lock().await;
        if client.is_closed() {
            tracing::warn!(
                target: "profile.db",
                reconnects = self.reconnects.load(Ordering::Relaxed),
                "profile postgres connection closed, reconnecting",
            );
            *client = open(&self.database_url).await?;
            self.reconnects.fetch_add(1, Ordering::Relaxed);
        }
        Ok(client)
    }

    /// How many times the session has been reopened.
    #[must_use]
    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }
}

async fn open(database_url: &str) -> Result<Client, tokio_postgres::Error> {
    let (client, connection) = tokio_postgres::connect(database_url, NoTls).await?;
    tokio::spawn(async move {
        if let Err(error) = connection.await {
            tracing::error!(
                target: "profile.db",
                reason = %error,
                "profile postgres connection error",
            );
        }
    });
    Ok(client)
}

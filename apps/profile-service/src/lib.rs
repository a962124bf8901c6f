#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use ce_outbox::{
    DEFAULT_DELIVERED_RETENTION, LogRelay, Manager, MemoryOutbox, NopObserver, Observer,
    OutboxStore, PgOutbox, Relay,
};
use tenant_keyset::{AeadDerivator, BidxDerivator, CacheConfig};

pub mod config;
pub mod db;
pub mod profile;
pub mod relay_http;
pub mod schema;
pub mod telemetry;
pub mod tenant;

use crate::config::Config;
use crate::db::ProfileDb;
use crate::profile::{
    EventSettings, ProfileCrypto, ProfileRepository, ProfileService, ProfileStore,
};
use crate::relay_http::HttpRelay;
use crate::tenant::{HttpTenantDirectory, TenantDirectory};

/// Everything the binary runs: the request-facing service and the outbox
/// manager that relays what the service writes.
pub struct ProfileRuntime {
    pub service: Arc<ProfileService>,
    pub manager: Arc<dyn Manager>,
}

pub async fn build_runtime(config: &Config) -> Result<ProfileRuntime> {
    let cache = CacheConfig::bounded(config.keyset_cache_capacity);
    let aead = Arc::new(
        AeadDerivator::from_path(&config.aead_keyset_path, cache)
            .with_context(|| format!("load {}", config.aead_keyset_path.display()))?,
    );
    let bidx = Arc::new(
        BidxDerivator::from_path(&config.bidx_keyset_path, cache)
            .with_context(|| format!("load {}", config.bidx_keyset_path.display()))?,
    );
    let crypto = ProfileCrypto::new(aead, bidx)
        .with_truncate_len(config.bidx_truncate_len)
        .with_name_truncate_len(config.name_bidx_truncate_len);

    let (store, outbox): (Arc<dyn ProfileStore>, Arc<dyn OutboxStore>) = match &config.db_url {
        Some(db_url) => {
            let db = Arc::new(ProfileDb::connect(db_url).await?);
            let listener_url = config
                .outbox_listener_url
                .clone()
                .unwrap_or_else(|| db_url.clone());
            (
                profile::postgres(db, config.outbox.channel.clone()),
                Arc::new(PgOutbox::new(db_url.clone(), listener_url)) as Arc<dyn OutboxStore>,
            )
        }
        None => {
            tracing::warn!(
                target: "profile.service",
                delivered_retention = DEFAULT_DELIVERED_RETENTION,
                "DB_URL not set; profiles and outbox rows live in memory only",
            );
            let outbox = MemoryOutbox::new();
            (
                profile::memory(outbox.clone()),
                Arc::new(outbox) as Arc<dyn OutboxStore>,
            )
        }
    };

    let repository = Arc::new(ProfileRepository::new(
        store,
        crypto,
        EventSettings {
            source: config.event_source.clone(),
            encrypt: config.encrypt_events,
        },
    ));
    let tenants = config.tenant_api_base_url.as_ref().map(|base_url| {
        Arc::new(HttpTenantDirectory::new(
            base_url.clone(),
            Duration::from_millis(config.tenant_api_timeout_ms),
        )) as Arc<dyn TenantDirectory>
    });
    let service = Arc::new(ProfileService::new(
        repository,
        tenants,
        config.request_timeout(),
    ));

    let manager: Arc<dyn Manager> = if config.outbox_relay_enabled {
        let relay: Arc<dyn Relay> = match &config.outbox_relay_url {
            Some(url) => Arc::new(HttpRelay::new(
                url.clone(),
                Duration::from_millis(config.outbox_relay_timeout_ms),
            )),
            None => Arc::new(LogRelay),
        };
        Arc::new(Observer::new(outbox, relay, config.outbox.clone())?)
    } else {
        Arc::new(NopObserver)
    };

    Ok(ProfileRuntime { service, manager })
}

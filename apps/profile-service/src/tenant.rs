use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tenant {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub expire: Option<DateTime<Utc>>,
}

impl Tenant {
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expire.is_some_and(|expire| expire <= now)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TenantError {
    #[error("tenant directory unavailable: {0}")]
    Unavailable(String),
    #[error("tenant directory returned an invalid response: {0}")]
    InvalidResponse(String),
}

/// Source of tenant metadata consulted before accepting writes.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    async fn fetch_tenant(&self, tenant_id: Uuid) -> Result<Option<Tenant>, TenantError>;
}

#[derive(Default)]
pub struct MemoryTenantDirectory {
    tenants: Mutex<HashMap<Uuid, Tenant>>,
}

impl MemoryTenantDirectory {
    pub fn new(tenants: impl IntoIterator<Item = Tenant>) -> Self {
        Self {
            tenants: Mutex::new(tenants.into_iter().map(|t| (t.id, t)).collect()),
        }
    }

    pub async fn insert(&self, tenant: Tenant) {
        self.tenants.lock().await.insert(tenant.id, tenant);
    }
}

#[async_trait]
impl TenantDirectory for MemoryTenantDirectory {
    async fn fetch_tenant(&self, tenant_id: Uuid) -> Result<Option<Tenant>, TenantError> {
        Ok(self.tenants.lock().await.get(&tenant_id).cloned())
    }
}

/// `GET {base_url}/tenants/{id}`; 404 means the tenant does not exist.
pub struct HttpTenantDirectory {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpTenantDirectory {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl TenantDirectory for HttpTenantDirectory {
    async fn fetch_tenant(&self, tenant_id: Uuid) -> Result<Option<Tenant>, TenantError> {
        let url = format!("{}/tenants/{tenant_id}", self.base_url);
        let resp = self
            .client
            .get(url.as_str())
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|error| TenantError::Unavailable(format!("{url}: {error}")))?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(TenantError::Unavailable(format!("{url} returned {status}")));
        }
        let tenant: Tenant = resp
            .json()
            .await
            .map_err(|error| TenantError::InvalidResponse(error.to_string()))?;
        if tenant.id != tenant_id {
            return Err(TenantError::InvalidResponse(format!(
                "asked for tenant {tenant_id}, got {}",
                tenant.id
            )));
        }
        Ok(Some(tenant))
    }
}

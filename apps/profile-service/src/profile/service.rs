use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use super::error::ProfileError;
use super::repository::ProfileRepository;
use super::types::{Profile, ProfileRecord};
use crate::tenant::TenantDirectory;

/// Request-facing entry points: input validation, tenant checks and a
/// per-call deadline in front of [`ProfileRepository`].
pub struct ProfileService {
    repository: Arc<ProfileRepository>,
    tenants: Option<Arc<dyn TenantDirectory>>,
    request_timeout: Duration,
}

impl ProfileService {
    pub fn new(
        repository: Arc<ProfileRepository>,
        tenants: Option<Arc<dyn TenantDirectory>>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            repository,
            tenants,
            request_timeout,
        }
    }

    pub fn repository(&self) -> &Arc<ProfileRepository> {
        &self.repository
    }

    pub async fn validate_and_store(&self, profile: Profile) -> Result<Uuid, ProfileError> {
        validate_profile(&profile)?;
        self.deadline(async {
            self.ensure_tenant_active(profile.tenant_id).await?;
            self.repository.store_profile(&profile).await
        })
        .await
    }

    pub async fn fetch(&self, tenant_id: &str, id: &str) -> Result<ProfileRecord, ProfileError> {
        let tenant_id = parse_id(tenant_id, "tenant_id")?;
        let id = parse_id(id, "id")?;
        self.deadline(self.repository.fetch_profile(tenant_id, id))
            .await?
            .ok_or(ProfileError::NotFound)
    }

    pub async fn find_names(&self, tenant_id: &str, query: &str) -> Result<Vec<String>, ProfileError> {
        let tenant_id = parse_id(tenant_id, "tenant_id")?;
        let query = query.trim();
        if query.is_empty() {
            return Err(ProfileError::InvalidRequest("query is required".to_string()));
        }
        self.deadline(self.repository.find_profile_names(tenant_id, query))
            .await
    }

    pub async fn find_by_name(
        &self,
        tenant_id: &str,
        name: &str,
    ) -> Result<Vec<ProfileRecord>, ProfileError> {
        let tenant_id = parse_id(tenant_id, "tenant_id")?;
        if name.is_empty() {
            return Err(ProfileError::InvalidRequest("name is required".to_string()));
        }
        self.deadline(self.repository.find_profiles_by_name(tenant_id, name))
            .await
    }

    async fn ensure_tenant_active(&self, tenant_id: Uuid) -> Result<(), ProfileError> {
        let Some(tenants) = &self.tenants else {
            return Ok(());
        };
        let tenant = tenants
            .fetch_tenant(tenant_id)
            .await
            .map_err(|error| ProfileError::TenantUnavailable(error.to_string()))?
            .ok_or_else(|| ProfileError::InvalidRequest(format!("unknown tenant {tenant_id}")))?;
        if tenant.is_expired_at(Utc::now()) {
            return Err(ProfileError::InvalidRequest(format!(
                "tenant {tenant_id} has expired"
            )));
        }
        Ok(())
    }

    async fn deadline<T>(
        &self,
        operation: impl Future<Output = Result<T, ProfileError>>,
    ) -> Result<T, ProfileError> {
        tokio::time::timeout(self.request_timeout, operation)
            .await
            .map_err(|_| {
                ProfileError::Cancelled(format!(
                    "request exceeded {}ms deadline",
                    self.request_timeout.as_millis()
                ))
            })?
    }
}

fn parse_id(raw: &str, field: &str) -> Result<Uuid, ProfileError> {
    let id = Uuid::parse_str(raw.trim())
        .map_err(|error| ProfileError::InvalidRequest(format!("{field} must be a uuid: {error}")))?;
    if id.is_nil() {
        return Err(ProfileError::InvalidRequest(format!("{field} must not be nil")));
    }
    Ok(id)
}

fn validate_profile(profile: &Profile) -> Result<(), ProfileError> {
    if profile.id.is_nil() {
        return Err(ProfileError::InvalidRequest("id must not be nil".to_string()));
    }
    if profile.tenant_id.is_nil() {
        return Err(ProfileError::InvalidRequest(
            "tenant_id must not be nil".to_string(),
        ));
    }
    for (field, value) in [("nin", &profile.nin), ("name", &profile.name)] {
        if value.trim().is_empty() {
            return Err(ProfileError::InvalidRequest(format!("{field} is required")));
        }
    }
    Ok(())
}

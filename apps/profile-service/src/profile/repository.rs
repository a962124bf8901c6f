use std::sync::Arc;

use ce_outbox::{NewEvent, OutboxRecord};
use chrono::Utc;
use profile_proto::wire::profile::v1::ProfileStoredV1;
use profile_proto::{PROFILE_STORED_SCHEMA_V1, PROFILE_STORED_TYPE_V1, timestamp_from_datetime};
use prost::Message;
use uuid::Uuid;

use super::crypto::ProfileCrypto;
use super::error::ProfileError;
use super::store::{ProfileStore, ProfileWrite};
use super::types::{Profile, ProfileRecord, SealedRow, TextHeapEntry};

#[derive(Debug, Clone)]
pub struct EventSettings {
    pub source: String,
    /// Seal event payloads with the tenant's AEAD key.
    pub encrypt: bool,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            source: profile_proto::PROFILE_EVENT_SOURCE_DEFAULT.to_string(),
            encrypt: true,
        }
    }
}

pub struct ProfileRepository {
    store: Arc<dyn ProfileStore>,
    crypto: ProfileCrypto,
    events: EventSettings,
}

impl ProfileRepository {
    pub fn new(store: Arc<dyn ProfileStore>, crypto: ProfileCrypto, events: EventSettings) -> Self {
        Self {
            store,
            crypto,
            events,
        }
    }

    pub fn crypto(&self) -> &ProfileCrypto {
        &self.crypto
    }

    /// Persists `profile` and its `profile.stored.v1` event atomically.
    /// Returns the id of the event appended to the outbox.
    pub async fn store_profile(&self, profile: &Profile) -> Result<Uuid, ProfileError> {
        let sealed = self.crypto.seal(profile)?;
        let outbox = self.build_event(profile)?;
        let event_id = outbox.id;

        self.store
            .write(ProfileWrite {
                profile: sealed,
                heap: TextHeapEntry::profile_name(profile.tenant_id, profile.name.clone()),
                outbox,
            })
            .await?;

        tracing::info!(
            target: "profile.repository",
            tenant_id = %profile.tenant_id,
            profile_id = %profile.id,
            event_id = %event_id,
            "stored profile",
        );
        Ok(event_id)
    }

    pub async fn fetch_profile(
        &self,
        tenant_id: Uuid,
        id: Uuid,
    ) -> Result<Option<ProfileRecord>, ProfileError> {
        let Some(row) = self.store.fetch_row(tenant_id, id).await? else {
            return Ok(None);
        };
        self.open_row(row).map(Some)
    }

    pub async fn find_profile_names(
        &self,
        tenant_id: Uuid,
        query: &str,
    ) -> Result<Vec<String>, ProfileError> {
        Ok(self.store.find_names(tenant_id, query).await?)
    }

    /// Exact-match lookup through the name blind index. Index collisions are
    /// dropped after decryption, so every returned profile carries `name`.
    pub async fn find_profiles_by_name(
        &self,
        tenant_id: Uuid,
        name: &str,
    ) -> Result<Vec<ProfileRecord>, ProfileError> {
        let read_set = self.crypto.name_read_set(tenant_id, name)?;
        let rows = self.store.find_rows_by_name(tenant_id, &read_set).await?;
        let candidates = rows.len();

        let mut matches = Vec::with_capacity(candidates);
        for row in rows {
            let record = self.open_row(row)?;
            if record.profile.name == name {
                matches.push(record);
            }
        }
        if matches.len() < candidates {
            tracing::debug!(
                target: "profile.repository",
                tenant_id = %tenant_id,
                candidates,
                matches = matches.len(),
                "dropped blind index collisions",
            );
        }
        Ok(matches)
    }

    fn build_event(&self, profile: &Profile) -> Result<OutboxRecord, ProfileError> {
        let payload = ProfileStoredV1 {
            profile: Some(profile.to_wire()),
            stored_at: Some(timestamp_from_datetime(Utc::now())),
        };
        let aead = if self.events.encrypt {
            Some(self.crypto.event_aead(profile.tenant_id)?)
        } else {
            None
        };
        let event = NewEvent::new(
            self.events.source.clone(),
            PROFILE_STORED_TYPE_V1,
            payload.encode_to_vec(),
        )
        .with_subject(format!("profiles/{}", profile.id))
        .with_dataschema(PROFILE_STORED_SCHEMA_V1)
        .with_tenant(profile.tenant_id)
        .seal(aead.as_deref())?;
        Ok(OutboxRecord::from_event(&event)?)
    }

    fn open_row(&self, row: SealedRow) -> Result<ProfileRecord, ProfileError> {
        let profile = self.crypto.open(&row.sealed).map_err(|error| {
            tracing::error!(
                target: "profile.repository",
                tenant_id = %row.sealed.tenant_id,
                profile_id = %row.sealed.id,
                reason = %error,
                "profile row failed to decrypt",
            );
            ProfileError::from(error)
        })?;
        Ok(ProfileRecord {
            profile,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

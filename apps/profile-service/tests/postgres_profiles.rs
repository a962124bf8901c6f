//! Runs against a real database only when `PROFILE_TEST_DB_URL` is set.

use std::sync::Arc;

use anyhow::{Context, Result};
use ce_outbox::MemoryOutbox;
use profile_service::db::ProfileDb;
use profile_service::profile::{
    EventSettings, Profile, ProfileCrypto, ProfileError, ProfileRepository, memory, postgres,
};
use profile_service::schema;
use tenant_keyset::{AeadDerivator, BidxDerivator, CacheConfig, KeyPurpose, Keyset};
use uuid::Uuid;

fn database_url() -> Option<String> {
    std::env::var("PROFILE_TEST_DB_URL")
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn crypto() -> Result<ProfileCrypto> {
    Ok(ProfileCrypto::new(
        Arc::new(AeadDerivator::new(
            Keyset::generate(KeyPurpose::Aead),
            CacheConfig::bounded(8),
        )?),
        Arc::new(BidxDerivator::new(
            Keyset::generate(KeyPurpose::Mac),
            CacheConfig::bounded(8),
        )?),
    ))
}

fn profile(tenant_id: Uuid, name: &str) -> Profile {
    Profile {
        id: Uuid::now_v7(),
        tenant_id,
        nin: format!("nin-{}", Uuid::now_v7().simple()),
        name: name.to_string(),
        email: "jane@email.com".to_string(),
        phone: "+15550100".to_string(),
        dob: None,
    }
}

#[tokio::test]
async fn postgres_store_round_trips_and_writes_outbox_rows() -> Result<()> {
    let Some(url) = database_url() else {
        return Ok(());
    };
    let db = Arc::new(ProfileDb::connect(&url).await?);
    schema::apply(&db).await?;
    schema::apply(&db).await?;

    let repository = ProfileRepository::new(
        postgres(db.clone(), "outboxce"),
        crypto()?,
        EventSettings::default(),
    );
    let tenant = Uuid::now_v7();
    let first = profile(tenant, "Jane");
    let second = profile(tenant, "Jane");
    let first_event = repository.store_profile(&first).await?;
    repository.store_profile(&second).await?;
    repository.store_profile(&first).await?;

    let fetched = repository
        .fetch_profile(tenant, first.id)
        .await?
        .context("stored profile")?;
    assert_eq!(fetched.profile, first);

    let found = repository.find_profiles_by_name(tenant, "Jane").await?;
    assert_eq!(found.len(), 2);
    assert!(
        repository
            .find_profiles_by_name(Uuid::now_v7(), "Jane")
            .await?
            .is_empty()
    );
    assert_eq!(
        repository.find_profile_names(tenant, "an").await?,
        vec!["Jane".to_string()]
    );

    let client = db.session().await?;
    let outbox_rows: i64 = client
        .query_one(
            "SELECT COUNT(*) FROM outboxce WHERE tenant_id = $1",
            &[&tenant],
        )
        .await?
        .get(0);
    assert_eq!(outbox_rows, 3);
    let delivered: bool = client
        .query_one(
            "SELECT is_delivered FROM outboxce WHERE id = $1",
            &[&first_event],
        )
        .await?
        .get(0);
    assert!(!delivered);
    Ok(())
}

#[tokio::test]
async fn postgres_store_rejects_cross_tenant_restore_atomically() -> Result<()> {
    let Some(url) = database_url() else {
        return Ok(());
    };
    let db = Arc::new(ProfileDb::connect(&url).await?);
    schema::apply(&db).await?;
    let repository = ProfileRepository::new(
        postgres(db.clone(), "outboxce"),
        crypto()?,
        EventSettings::default(),
    );

    let jane = profile(Uuid::now_v7(), "Jane");
    repository.store_profile(&jane).await?;
    let hijack = Profile {
        tenant_id: Uuid::now_v7(),
        ..jane.clone()
    };
    let error = repository
        .store_profile(&hijack)
        .await
        .err()
        .context("cross-tenant write must fail")?;
    assert!(matches!(error, ProfileError::Conflict(_)), "{error:?}");

    let client = db.session().await?;
    let rows: i64 = client
        .query_one(
            "SELECT COUNT(*) FROM outboxce WHERE tenant_id = $1",
            &[&hijack.tenant_id],
        )
        .await?
        .get(0);
    assert_eq!(rows, 0);
    Ok(())
}

#[tokio::test]
async fn memory_and_postgres_stores_agree_on_name_search() -> Result<()> {
    let Some(url) = database_url() else {
        return Ok(());
    };
    let db = Arc::new(ProfileDb::connect(&url).await?);
    schema::apply(&db).await?;
    let crypto = crypto()?;
    let stores = [
        postgres(db, "outboxce"),
        memory(MemoryOutbox::new()),
    ];
    let tenant = Uuid::now_v7();
    for store in stores {
        let repository = ProfileRepository::new(store, crypto.clone(), EventSettings::default());
        for name in ["Ann_1", "Ann%2", "Annabel"] {
            repository.store_profile(&profile(tenant, name)).await?;
        }
        assert_eq!(
            repository.find_profile_names(tenant, "n_").await?,
            vec!["Ann_1".to_string()]
        );
        assert_eq!(
            repository.find_profile_names(tenant, "%").await?,
            vec!["Ann%2".to_string()]
        );
    }
    Ok(())
}

#[tokio::test]
async fn terminated_session_is_reopened_on_next_request() -> Result<()> {
    let Some(url) = database_url() else {
        return Ok(());
    };
    let db = Arc::new(ProfileDb::connect(&url).await?);
    schema::apply(&db).await?;
    let repository = ProfileRepository::new(
        postgres(db.clone(), "outboxce"),
        crypto()?,
        EventSettings::default(),
    );
    let jane = profile(Uuid::now_v7(), "Jane");
    repository.store_profile(&jane).await?;

    let pid: i32 = db
        .session()
        .await?
        .query_one("SELECT pg_backend_pid()", &[])
        .await?
        .try_get(0)?;
    let (admin, connection) = tokio_postgres::connect(&url, tokio_postgres::NoTls).await?;
    tokio::spawn(connection);
    admin
        .execute("SELECT pg_terminate_backend($1)", &[&pid])
        .await?;

    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(10);
    // Until the client notices the dead backend, requests may still fail.
    let fetched = loop {
        match repository.fetch_profile(jane.tenant_id, jane.id).await {
            Ok(fetched) if db.reconnects() > 0 => break fetched,
            Ok(_) | Err(ProfileError::StorageTransient(_)) => {}
            Err(error) => return Err(error.into()),
        }
        anyhow::ensure!(
            tokio::time::Instant::now() < deadline,
            "session was not reopened"
        );
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    };
    assert_eq!(fetched.context("profile after reconnect")?.profile, jane);
    assert_eq!(db.reconnects(), 1);
    Ok(())
}

use std::sync::Arc;
use std::thread;

use anyhow::Result;
use tenant_keyset::{
    AeadDerivator, BidxDerivator, CacheConfig, KeyPurpose, Keyset, KeysetError,
};

const TENANT_A: &[u8] = &[0x01, 0x90, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xaa];
const TENANT_B: &[u8] = &[0x01, 0x90, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0xbb];

#[test]
fn ciphertext_from_one_tenant_does_not_open_under_another() -> Result<()> {
    let derivator = AeadDerivator::new(
        Keyset::generate(KeyPurpose::Aead),
        CacheConfig::bounded(16),
    )?;
    let tenant_a = derivator.get_primitive(Some(TENANT_A))?;
    let tenant_b = derivator.get_primitive(Some(TENANT_B))?;

    let sealed = tenant_a.encrypt(b"dohnjoe@email.com", b"row")?;
    assert_eq!(tenant_a.decrypt(&sealed, b"row")?, b"dohnjoe@email.com");
    assert!(matches!(
        tenant_b.decrypt(&sealed, b"row"),
        Err(KeysetError::Crypto(_))
    ));
    Ok(())
}

#[test]
fn master_loaded_from_disk_derives_like_the_original() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("bidx.json");
    let master = Keyset::generate(KeyPurpose::Mac);
    master.save(&path)?;

    let original = BidxDerivator::new(master, CacheConfig::disabled())?;
    let reloaded = BidxDerivator::from_path(&path, CacheConfig::disabled())?;
    assert_eq!(
        original.get_primitive(Some(TENANT_A))?.compute_primary(b"Jane")?,
        reloaded.get_primitive(Some(TENANT_A))?.compute_primary(b"Jane")?
    );
    Ok(())
}

#[test]
fn missing_keyset_file_is_reported_with_path() {
    let error = AeadDerivator::from_path("/nonexistent/aead.json", CacheConfig::disabled())
        .err()
        .expect("missing file must fail");
    match error {
        KeysetError::Io { path, .. } => assert_eq!(path, "/nonexistent/aead.json"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn rotated_master_keeps_old_blind_indexes_reachable() -> Result<()> {
    let mut master = Keyset::generate(KeyPurpose::Mac);
    let before = BidxDerivator::new(master.clone(), CacheConfig::disabled())?;
    let written_before = before.get_primitive(Some(TENANT_A))?.compute_primary(b"Jane")?;

    let rotated = master.add_key();
    master.promote(rotated)?;
    let after = BidxDerivator::new(master, CacheConfig::disabled())?;
    let bidx = after.get_primitive(Some(TENANT_A))?;

    let written_after = bidx.compute_primary(b"Jane")?;
    assert_ne!(written_before, written_after);
    let read_set = bidx.compute_all(b"Jane")?;
    assert!(read_set.contains(&written_before));
    assert!(read_set.contains(&written_after));
    Ok(())
}

#[test]
fn cached_derivator_is_safe_across_threads() -> Result<()> {
    let derivator = Arc::new(AeadDerivator::new(
        Keyset::generate(KeyPurpose::Aead),
        CacheConfig::bounded(4),
    )?);
    let sealed = derivator
        .get_primitive(Some(TENANT_A))?
        .encrypt(b"shared", b"aad")?;

    let handles: Vec<_> = (0..8)
        .map(|index| {
            let derivator = Arc::clone(&derivator);
            let sealed = sealed.clone();
            thread::spawn(move || -> Result<(), KeysetError> {
                let salt = if index % 2 == 0 { TENANT_A } else { TENANT_B };
                let aead = derivator.get_primitive(Some(salt))?;
                let opened = aead.decrypt(&sealed, b"aad");
                if salt == TENANT_A {
                    assert_eq!(opened?, b"shared");
                } else {
                    assert!(opened.is_err());
                }
                Ok(())
            })
        })
        .collect();

    for handle in handles {
        handle
            .join()
            .map_err(|_| anyhow::anyhow!("worker thread panicked"))??;
    }
    Ok(())
}

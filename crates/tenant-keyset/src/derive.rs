use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::KeysetError;
use crate::keyset::{KEY_MATERIAL_LEN, Key, KeyPurpose, Keyset, SecretKey};

const DERIVATION_LABEL: &[u8] = b"tenant-keyset/v1/";

/// Derive the per-salt keyset from a master keyset.
///
/// Every non-destroyed master key yields one derived key with the same id
/// and status; the primary id is carried over unchanged. A `None` salt and
/// an empty salt derive the same keyset.
pub fn derive_keyset(master: &Keyset, salt: Option<&[u8]>) -> Result<Keyset, KeysetError> {
    let salt = salt.filter(|salt| !salt.is_empty());
    let mut keys = Vec::with_capacity(master.keys().len());
    for key in master.keys() {
        let Some(material) = key.material() else {
            continue;
        };
        let derived = derive_material(material, salt, master.purpose(), key.key_id())?;
        keys.push(Key::new(key.key_id(), key.status(), derived));
    }
    Keyset::from_parts(master.purpose(), master.primary_key_id(), keys)
}

fn derive_material(
    material: &SecretKey,
    salt: Option<&[u8]>,
    purpose: KeyPurpose,
    key_id: u32,
) -> Result<SecretKey, KeysetError> {
    let hkdf = Hkdf::<Sha256>::new(salt, material.as_bytes());

    // label || purpose || key_id
    let mut info = Vec::with_capacity(DERIVATION_LABEL.len() + 4 + 4);
    info.extend_from_slice(DERIVATION_LABEL);
    info.extend_from_slice(purpose.as_str().as_bytes());
    info.extend_from_slice(&key_id.to_be_bytes());

    let mut okm = [0u8; KEY_MATERIAL_LEN];
    hkdf.expand(&info, &mut okm)
        .map_err(|error| KeysetError::Derivation(error.to_string()))?;
    let derived = SecretKey::new(okm);
    okm.zeroize();
    Ok(derived)
}

#[cfg(test)]
mod tests {
    use super::derive_keyset;
    use crate::keyset::{KeyPurpose, Keyset};

    #[test]
    fn derivation_is_deterministic_per_salt() {
        let master = Keyset::generate(KeyPurpose::Aead);
        let first = derive_keyset(&master, Some(b"tenant-a")).expect("derive");
        let second = derive_keyset(&master, Some(b"tenant-a")).expect("derive");
        assert_eq!(first, second);
    }

    #[test]
    fn different_salts_produce_different_material() {
        let master = Keyset::generate(KeyPurpose::Aead);
        let a = derive_keyset(&master, Some(b"tenant-a")).expect("derive");
        let b = derive_keyset(&master, Some(b"tenant-b")).expect("derive");
        assert_ne!(a, b);
        assert_ne!(a, master);
    }

    #[test]
    fn derived_keyset_tracks_master_primary_and_ids() {
        let mut master = Keyset::generate(KeyPurpose::Mac);
        let rotated = master.add_key();
        master.promote(rotated).expect("promote");

        let derived = derive_keyset(&master, Some(b"tenant")).expect("derive");
        assert_eq!(derived.primary_key_id(), rotated);
        let master_ids: Vec<u32> = master.keys().iter().map(|key| key.key_id()).collect();
        let derived_ids: Vec<u32> = derived.keys().iter().map(|key| key.key_id()).collect();
        assert_eq!(master_ids, derived_ids);
    }

    #[test]
    fn destroyed_master_keys_are_not_derived() {
        let mut master = Keyset::generate(KeyPurpose::Aead);
        let extra = master.add_key();
        master.destroy(extra).expect("destroy");

        let derived = derive_keyset(&master, None).expect("derive");
        assert!(derived.key(extra).is_none());
    }

    #[test]
    fn empty_salt_matches_missing_salt() {
        let master = Keyset::generate(KeyPurpose::Aead);
        let none = derive_keyset(&master, None).expect("derive");
        let empty = derive_keyset(&master, Some(&[])).expect("derive");
        assert_eq!(none, empty);
    }
}

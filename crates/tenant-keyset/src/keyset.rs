use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::KeysetError;

/// Length of every key's material, master or derived.
pub const KEY_MATERIAL_LEN: usize = 32;

/// Primitive family a keyset serves. A derivator refuses a master keyset of
/// the wrong family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyPurpose {
    Aead,
    Mac,
}

impl KeyPurpose {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aead => "aead",
            Self::Mac => "mac",
        }
    }
}

impl fmt::Display for KeyPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyStatus {
    /// Usable for every operation; the only status a primary may have.
    Enabled,
    /// Kept in the keyset but never used.
    Disabled,
    /// Material wiped; the id is retained so it is never reissued.
    Destroyed,
}

/// Raw key material, wiped on drop.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey([u8; KEY_MATERIAL_LEN]);

impl SecretKey {
    #[must_use]
    pub fn new(bytes: [u8; KEY_MATERIAL_LEN]) -> Self {
        Self(bytes)
    }

    #[must_use]
    pub fn random() -> Self {
        Self(rand::random())
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_MATERIAL_LEN] {
        &self.0
    }

    fn from_base64(encoded: &str, key_id: u32) -> Result<Self, KeysetError> {
        let mut decoded = STANDARD.decode(encoded.trim().as_bytes()).map_err(|error| {
            KeysetError::Parse(format!("key {key_id}: invalid base64 material: {error}"))
        })?;
        if decoded.len() != KEY_MATERIAL_LEN {
            let len = decoded.len();
            decoded.zeroize();
            return Err(KeysetError::InvalidKeyset(format!(
                "key {key_id}: expected {KEY_MATERIAL_LEN}-byte material, got {len}"
            )));
        }
        let mut material = [0u8; KEY_MATERIAL_LEN];
        material.copy_from_slice(decoded.as_slice());
        decoded.zeroize();
        Ok(Self(material))
    }

    fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key {
    key_id: u32,
    status: KeyStatus,
    material: Option<SecretKey>,
}

impl Key {
    pub(crate) fn new(key_id: u32, status: KeyStatus, material: SecretKey) -> Self {
        Self {
            key_id,
            status,
            material: Some(material),
        }
    }

    #[must_use]
    pub fn key_id(&self) -> u32 {
        self.key_id
    }

    #[must_use]
    pub fn status(&self) -> KeyStatus {
        self.status
    }

    pub(crate) fn material(&self) -> Option<&SecretKey> {
        self.material.as_ref()
    }

    fn is_enabled(&self) -> bool {
        self.status == KeyStatus::Enabled && self.material.is_some()
    }
}

/// A set of keys of one purpose with a designated primary.
///
/// Used both for master keysets (loaded from disk) and for the per-salt
/// keysets derived from them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyset {
    purpose: KeyPurpose,
    primary_key_id: u32,
    keys: Vec<Key>,
}

#[derive(Serialize, Deserialize)]
struct KeysetDocument {
    purpose: KeyPurpose,
    primary_key_id: u32,
    keys: Vec<KeyDocument>,
}

#[derive(Serialize, Deserialize)]
struct KeyDocument {
    key_id: u32,
    status: KeyStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<String>,
}

impl Keyset {
    /// Fresh keyset with a single random primary key.
    #[must_use]
    pub fn generate(purpose: KeyPurpose) -> Self {
        let key_id = random_key_id(&HashSet::new());
        Self {
            purpose,
            primary_key_id: key_id,
            keys: vec![Key::new(key_id, KeyStatus::Enabled, SecretKey::random())],
        }
    }

    pub(crate) fn from_parts(
        purpose: KeyPurpose,
        primary_key_id: u32,
        keys: Vec<Key>,
    ) -> Result<Self, KeysetError> {
        let keyset = Self {
            purpose,
            primary_key_id,
            keys,
        };
        keyset.validate()?;
        Ok(keyset)
    }

    pub fn from_json(raw: &str) -> Result<Self, KeysetError> {
        let document: KeysetDocument =
            serde_json::from_str(raw).map_err(|error| KeysetError::Parse(error.to_string()))?;
        let mut keys = Vec::with_capacity(document.keys.len());
        for key in document.keys {
            let material = match (key.status, key.value) {
                (KeyStatus::Destroyed, _) => None,
                (_, Some(value)) => Some(SecretKey::from_base64(&value, key.key_id)?),
                (_, None) => {
                    return Err(KeysetError::InvalidKeyset(format!(
                        "key {} has no material",
                        key.key_id
                    )));
                }
            };
            keys.push(Key {
                key_id: key.key_id,
                status: key.status,
                material,
            });
        }
        Self::from_parts(document.purpose, document.primary_key_id, keys)
    }

    pub fn to_json(&self) -> Result<String, KeysetError> {
        let document = KeysetDocument {
            purpose: self.purpose,
            primary_key_id: self.primary_key_id,
            keys: self
                .keys
                .iter()
                .map(|key| KeyDocument {
                    key_id: key.key_id,
                    status: key.status,
                    value: key.material.as_ref().map(SecretKey::to_base64),
                })
                .collect(),
        };
        serde_json::to_string_pretty(&document).map_err(|error| KeysetError::Parse(error.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, KeysetError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|error| KeysetError::Io {
            path: path.display().to_string(),
            message: error.to_string(),
        })?;
        Self::from_json(&raw)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), KeysetError> {
        let path = path.as_ref();
        let raw = self.to_json()?;
        std::fs::write(path, raw).map_err(|error| KeysetError::Io {
            path: path.display().to_string(),
            message: error.to_string(),
        })
    }

    pub fn validate(&self) -> Result<(), KeysetError> {
        if self.keys.is_empty() {
            return Err(KeysetError::InvalidKeyset("keyset has no keys".to_string()));
        }
        let mut seen = HashSet::with_capacity(self.keys.len());
        for key in &self.keys {
            if !seen.insert(key.key_id) {
                return Err(KeysetError::InvalidKeyset(format!(
                    "duplicate key id {}",
                    key.key_id
                )));
            }
            if key.status != KeyStatus::Destroyed && key.material.is_none() {
                return Err(KeysetError::InvalidKeyset(format!(
                    "key {} has no material",
                    key.key_id
                )));
            }
        }
        match self.key(self.primary_key_id) {
            Some(primary) if primary.is_enabled() => Ok(()),
            Some(_) => Err(KeysetError::InvalidKeyset(format!(
                "primary key {} is not enabled",
                self.primary_key_id
            ))),
            None => Err(KeysetError::InvalidKeyset(format!(
                "primary key {} is not in the keyset",
                self.primary_key_id
            ))),
        }
    }

    #[must_use]
    pub fn purpose(&self) -> KeyPurpose {
        self.purpose
    }

    #[must_use]
    pub fn primary_key_id(&self) -> u32 {
        self.primary_key_id
    }

    #[must_use]
    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    #[must_use]
    pub fn key(&self, key_id: u32) -> Option<&Key> {
        self.keys.iter().find(|key| key.key_id == key_id)
    }

    pub fn primary(&self) -> Result<&Key, KeysetError> {
        self.key(self.primary_key_id)
            .filter(|key| key.is_enabled())
            .ok_or(KeysetError::UnknownKey(self.primary_key_id))
    }

    /// Enabled keys, primary first, then keyset order.
    pub fn enabled_keys(&self) -> impl Iterator<Item = &Key> {
        let primary_key_id = self.primary_key_id;
        let primary = self.key(primary_key_id).filter(|key| key.is_enabled());
        primary.into_iter().chain(
            self.keys
                .iter()
                .filter(move |key| key.is_enabled() && key.key_id != primary_key_id),
        )
    }

    /// Adds a new enabled, non-primary key and returns its id.
    pub fn add_key(&mut self) -> u32 {
        let existing: HashSet<u32> = self.keys.iter().map(|key| key.key_id).collect();
        let key_id = random_key_id(&existing);
        self.keys
            .push(Key::new(key_id, KeyStatus::Enabled, SecretKey::random()));
        key_id
    }

    pub fn promote(&mut self, key_id: u32) -> Result<(), KeysetError> {
        let key = self.key(key_id).ok_or(KeysetError::UnknownKey(key_id))?;
        if !key.is_enabled() {
            return Err(KeysetError::InvalidKeyset(format!(
                "cannot promote key {key_id}: not enabled"
            )));
        }
        self.primary_key_id = key_id;
        Ok(())
    }

    pub fn enable(&mut self, key_id: u32) -> Result<(), KeysetError> {
        let key = self.key_mut(key_id)?;
        if key.status == KeyStatus::Destroyed {
            return Err(KeysetError::InvalidKeyset(format!(
                "cannot enable destroyed key {key_id}"
            )));
        }
        key.status = KeyStatus::Enabled;
        Ok(())
    }

    pub fn disable(&mut self, key_id: u32) -> Result<(), KeysetError> {
        self.ensure_not_primary(key_id, "disable")?;
        let key = self.key_mut(key_id)?;
        if key.status == KeyStatus::Destroyed {
            return Err(KeysetError::InvalidKeyset(format!(
                "cannot disable destroyed key {key_id}"
            )));
        }
        key.status = KeyStatus::Disabled;
        Ok(())
    }

    pub fn destroy(&mut self, key_id: u32) -> Result<(), KeysetError> {
        self.ensure_not_primary(key_id, "destroy")?;
        let key = self.key_mut(key_id)?;
        key.status = KeyStatus::Destroyed;
        key.material = None;
        Ok(())
    }

    fn ensure_not_primary(&self, key_id: u32, action: &str) -> Result<(), KeysetError> {
        if key_id == self.primary_key_id {
            return Err(KeysetError::InvalidKeyset(format!(
                "cannot {action} primary key {key_id}"
            )));
        }
        Ok(())
    }

    fn key_mut(&mut self, key_id: u32) -> Result<&mut Key, KeysetError> {
        self.keys
            .iter_mut()
            .find(|key| key.key_id == key_id)
            .ok_or(KeysetError::UnknownKey(key_id))
    }
}

fn random_key_id(existing: &HashSet<u32>) -> u32 {
    loop {
        let candidate: u32 = rand::random();
        if candidate != 0 && !existing.contains(&candidate) {
            return candidate;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{KeyPurpose, KeyStatus, Keyset};
    use crate::KeysetError;

    #[test]
    fn generated_keyset_round_trips_through_json() {
        let keyset = Keyset::generate(KeyPurpose::Aead);
        let raw = keyset.to_json().expect("serialize keyset");
        let parsed = Keyset::from_json(&raw).expect("parse keyset");
        assert_eq!(parsed, keyset);
        assert_eq!(parsed.purpose(), KeyPurpose::Aead);
    }

    #[test]
    fn rotation_keeps_old_keys_enabled() {
        let mut keyset = Keyset::generate(KeyPurpose::Mac);
        let old_primary = keyset.primary_key_id();
        let new_key = keyset.add_key();
        keyset.promote(new_key).expect("promote");

        assert_eq!(keyset.primary_key_id(), new_key);
        let enabled: Vec<u32> = keyset.enabled_keys().map(|key| key.key_id()).collect();
        assert_eq!(enabled, vec![new_key, old_primary]);
    }

    #[test]
    fn primary_cannot_be_disabled_or_destroyed() {
        let mut keyset = Keyset::generate(KeyPurpose::Aead);
        let primary = keyset.primary_key_id();
        assert!(matches!(
            keyset.disable(primary),
            Err(KeysetError::InvalidKeyset(_))
        ));
        assert!(matches!(
            keyset.destroy(primary),
            Err(KeysetError::InvalidKeyset(_))
        ));
    }

    #[test]
    fn destroyed_key_is_serialized_without_material() {
        let mut keyset = Keyset::generate(KeyPurpose::Aead);
        let extra = keyset.add_key();
        keyset.destroy(extra).expect("destroy");

        let raw = keyset.to_json().expect("serialize");
        let parsed = Keyset::from_json(&raw).expect("parse");
        let key = parsed.key(extra).expect("destroyed key retained");
        assert_eq!(key.status(), KeyStatus::Destroyed);
        assert!(key.material().is_none());
        assert!(keyset.enable(extra).is_err());
    }

    #[test]
    fn rejects_keyset_with_missing_primary() {
        let raw = r#"{
            "purpose": "aead",
            "primary_key_id": 7,
            "keys": [{"key_id": 1, "status": "enabled", "value": "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA="}]
        }"#;
        let error = Keyset::from_json(raw).expect_err("primary must exist");
        assert!(matches!(error, KeysetError::InvalidKeyset(message) if message.contains("primary key 7")));
    }

    #[test]
    fn rejects_short_key_material() {
        let raw = r#"{
            "purpose": "mac",
            "primary_key_id": 1,
            "keys": [{"key_id": 1, "status": "enabled", "value": "AAAA"}]
        }"#;
        assert!(matches!(
            Keyset::from_json(raw),
            Err(KeysetError::InvalidKeyset(_))
        ));
    }
}

use chacha20poly1305::aead::{Aead as _, KeyInit, Payload};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use hmac::{Hmac, Mac as _};
use sha2::Sha256;

use crate::error::KeysetError;
use crate::keyset::{KeyPurpose, Keyset, SecretKey};

type HmacSha256 = Hmac<Sha256>;

const CIPHERTEXT_VERSION: u8 = 0x01;
/// version byte + big-endian key id
const CIPHERTEXT_PREFIX_LEN: usize = 5;
const NONCE_LEN: usize = 24;
const TAG_LEN: usize = 16;

/// A primitive that can be built from a keyset handle.
///
/// The `Send + Sync + 'static` bound is what lets derivators hand one
/// instance to any number of concurrent callers.
pub trait Primitive: Send + Sync + Sized + 'static {
    const PURPOSE: KeyPurpose;

    fn from_keyset(keyset: &Keyset) -> Result<Self, KeysetError>;
}

fn ensure_purpose(keyset: &Keyset, expected: KeyPurpose) -> Result<(), KeysetError> {
    if keyset.purpose() != expected {
        return Err(KeysetError::WrongPurpose {
            expected,
            actual: keyset.purpose(),
        });
    }
    Ok(())
}

/// XChaCha20-Poly1305 over every enabled key of a keyset.
///
/// Ciphertext layout: `0x01 || key_id (u32 BE) || nonce (24) || sealed`.
/// Encryption always uses the primary; decryption picks the key named in the
/// prefix.
pub struct Aead {
    primary_key_id: u32,
    ciphers: Vec<(u32, XChaCha20Poly1305)>,
}

impl Aead {
    pub fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, KeysetError> {
        let cipher = self
            .cipher(self.primary_key_id)
            .ok_or(KeysetError::UnknownKey(self.primary_key_id))?;
        let nonce: [u8; NONCE_LEN] = rand::random();
        let sealed = cipher
            .encrypt(
                XNonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| KeysetError::Crypto("encryption failed".to_string()))?;

        let mut out = Vec::with_capacity(CIPHERTEXT_PREFIX_LEN + NONCE_LEN + sealed.len());
        out.push(CIPHERTEXT_VERSION);
        out.extend_from_slice(&self.primary_key_id.to_be_bytes());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&sealed);
        Ok(out)
    }

    pub fn decrypt(&self, ciphertext: &[u8], aad: &[u8]) -> Result<Vec<u8>, KeysetError> {
        if ciphertext.len() < CIPHERTEXT_PREFIX_LEN + NONCE_LEN + TAG_LEN {
            return Err(KeysetError::Crypto("ciphertext too short".to_string()));
        }
        let (prefix, rest) = ciphertext.split_at(CIPHERTEXT_PREFIX_LEN);
        let (version, key_id) = prefix.split_at(1);
        if version != [CIPHERTEXT_VERSION] {
            return Err(KeysetError::Crypto(format!(
                "unsupported ciphertext version {version:?}"
            )));
        }
        let key_id = u32::from_be_bytes(
            key_id
                .try_into()
                .map_err(|_| KeysetError::Crypto("malformed key id".to_string()))?,
        );
        let cipher = self.cipher(key_id).ok_or(KeysetError::UnknownKey(key_id))?;
        let (nonce, sealed) = rest.split_at(NONCE_LEN);
        cipher
            .decrypt(XNonce::from_slice(nonce), Payload { msg: sealed, aad })
            .map_err(|_| KeysetError::Crypto("authentication failed".to_string()))
    }

    fn cipher(&self, key_id: u32) -> Option<&XChaCha20Poly1305> {
        self.ciphers
            .iter()
            .find(|(id, _)| *id == key_id)
            .map(|(_, cipher)| cipher)
    }
}

impl Primitive for Aead {
    const PURPOSE: KeyPurpose = KeyPurpose::Aead;

    fn from_keyset(keyset: &Keyset) -> Result<Self, KeysetError> {
        ensure_purpose(keyset, Self::PURPOSE)?;
        let primary_key_id = keyset.primary()?.key_id();
        let mut ciphers = Vec::new();
        for key in keyset.enabled_keys() {
            let Some(material) = key.material() else {
                continue;
            };
            let cipher = XChaCha20Poly1305::new_from_slice(material.as_bytes())
                .map_err(|error| KeysetError::Crypto(error.to_string()))?;
            ciphers.push((key.key_id(), cipher));
        }
        Ok(Self {
            primary_key_id,
            ciphers,
        })
    }
}

/// HMAC-SHA256 under the primary key only.
pub struct Mac {
    key: SecretKey,
}

impl Mac {
    pub fn compute(&self, data: &[u8]) -> Result<Vec<u8>, KeysetError> {
        hmac_sha256(&self.key, data)
    }

    pub fn verify(&self, tag: &[u8], data: &[u8]) -> Result<(), KeysetError> {
        let mut mac = <HmacSha256 as hmac::Mac>::new_from_slice(self.key.as_bytes())
            .map_err(|error| KeysetError::Crypto(error.to_string()))?;
        mac.update(data);
        mac.verify_slice(tag)
            .map_err(|_| KeysetError::Crypto("mac verification failed".to_string()))
    }
}

impl Primitive for Mac {
    const PURPOSE: KeyPurpose = KeyPurpose::Mac;

    fn from_keyset(keyset: &Keyset) -> Result<Self, KeysetError> {
        ensure_purpose(keyset, Self::PURPOSE)?;
        let primary = keyset.primary()?;
        let key = primary
            .material()
            .cloned()
            .ok_or(KeysetError::UnknownKey(primary.key_id()))?;
        Ok(Self { key })
    }
}

/// Blind-index MAC over a keyset.
///
/// Writes use [`Bidx::compute_primary`]; lookups use [`Bidx::compute_all`] so
/// rows indexed under a previously primary key still match after rotation.
pub struct Bidx {
    keys: Vec<(u32, SecretKey)>,
}

impl Bidx {
    pub fn compute_primary(&self, data: &[u8]) -> Result<Vec<u8>, KeysetError> {
        let (_, key) = self
            .keys
            .first()
            .ok_or_else(|| KeysetError::InvalidKeyset("blind index keyset is empty".to_string()))?;
        hmac_sha256(key, data)
    }

    /// One index per enabled key, primary first.
    pub fn compute_all(&self, data: &[u8]) -> Result<Vec<Vec<u8>>, KeysetError> {
        self.keys
            .iter()
            .map(|(_, key)| hmac_sha256(key, data))
            .collect()
    }

    #[must_use]
    pub fn key_ids(&self) -> Vec<u32> {
        self.keys.iter().map(|(key_id, _)| *key_id).collect()
    }
}

impl Primitive for Bidx {
    const PURPOSE: KeyPurpose = KeyPurpose::Mac;

    fn from_keyset(keyset: &Keyset) -> Result<Self, KeysetError> {
        ensure_purpose(keyset, Self::PURPOSE)?;
        keyset.primary()?;
        let keys = keyset
            .enabled_keys()
            .filter_map(|key| key.material().map(|material| (key.key_id(), material.clone())))
            .collect();
        Ok(Self { keys })
    }
}

fn hmac_sha256(key: &SecretKey, data: &[u8]) -> Result<Vec<u8>, KeysetError> {
    let mut mac = <HmacSha256 as hmac::Mac>::new_from_slice(key.as_bytes())
        .map_err(|error| KeysetError::Crypto(error.to_string()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

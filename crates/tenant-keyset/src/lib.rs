//! Per-tenant keyset derivation.
//!
//! A process loads one master keyset per primitive family (AEAD, MAC). Every
//! tenant gets its own subkeys, derived from the master with HKDF using the
//! tenant identifier as salt. [`Derivator`] turns a salt into a derived
//! keyset handle and a ready-to-use primitive, optionally caching both.
//!
//! Rotation happens on the master keyset: add a key, promote it, restart the
//! derivator. Derived handles keep the master's key ids and primary, so
//! ciphertexts and blind indexes produced under older keys stay usable.

mod derivator;
mod derive;
mod error;
mod keyset;
mod primitive;

pub use derivator::{
    AeadDerivator, BidxDerivator, CacheConfig, Derivator, MacDerivator, PrimitiveFn,
};
pub use derive::derive_keyset;
pub use error::KeysetError;
pub use keyset::{KEY_MATERIAL_LEN, Key, KeyPurpose, KeyStatus, Keyset, SecretKey};
pub use primitive::{Aead, Bidx, Mac, Primitive};

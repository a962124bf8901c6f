//! Typed value codecs for encrypted storage columns.
//!
//! [`AeadCodec`] seals a typed value into an AEAD ciphertext bound to
//! caller-supplied associated data (conventionally the row's primary key) and
//! opens it again. [`BidxCodec`] turns a value into blind-index tokens: one
//! primary token for writes, and the token of every enabled key for reads, so
//! equality lookups keep matching across key rotation.
//!
//! Both codecs take a [`tenant_keyset::PrimitiveFn`] and only derive the
//! tenant key when a value is actually processed.

mod aead;
mod bidx;
mod error;
mod transcode;

pub use aead::AeadCodec;
pub use bidx::{BidxCodec, DEFAULT_TRUNCATE_LEN, FULL_LENGTH};
pub use error::CodecError;
pub use transcode::{Record, Transcode};

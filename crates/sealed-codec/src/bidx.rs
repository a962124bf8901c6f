use std::marker::PhantomData;

use tenant_keyset::{Bidx, PrimitiveFn};

use crate::error::CodecError;
use crate::transcode::Transcode;

/// Default token length for low-entropy columns. Short tokens collide on
/// purpose, so every match must be confirmed against the decrypted value.
pub const DEFAULT_TRUNCATE_LEN: usize = 16;

/// Keep the full MAC output.
pub const FULL_LENGTH: usize = 0;

/// Blind-index tokens for values of type `T`.
pub struct BidxCodec<T> {
    primitive: PrimitiveFn<Bidx>,
    truncate_len: usize,
    _value: PhantomData<fn() -> T>,
}

impl<T> Clone for BidxCodec<T> {
    fn clone(&self) -> Self {
        Self {
            primitive: self.primitive.clone(),
            truncate_len: self.truncate_len,
            _value: PhantomData,
        }
    }
}

impl<T: Transcode> BidxCodec<T> {
    /// `truncate_len` of [`FULL_LENGTH`] keeps the whole MAC.
    pub fn new(primitive: PrimitiveFn<Bidx>, truncate_len: usize) -> Self {
        Self {
            primitive,
            truncate_len,
            _value: PhantomData,
        }
    }

    #[must_use]
    pub fn truncate_len(&self) -> usize {
        self.truncate_len
    }

    /// Token under the primary key; this is what gets stored.
    pub fn for_write(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        let plaintext = value.to_bytes()?;
        let bidx = (self.primitive)().map_err(CodecError::Primitive)?;
        let token = bidx
            .compute_primary(&plaintext)
            .map_err(CodecError::Crypto)?;
        Ok(self.truncate(token))
    }

    /// Tokens under every enabled key, primary first, without duplicates.
    /// Used as the `= ANY(...)` set of an equality lookup.
    pub fn for_read(&self, value: &T) -> Result<Vec<Vec<u8>>, CodecError> {
        let plaintext = value.to_bytes()?;
        let bidx = (self.primitive)().map_err(CodecError::Primitive)?;
        let tokens = bidx.compute_all(&plaintext).map_err(CodecError::Crypto)?;

        let mut out: Vec<Vec<u8>> = Vec::with_capacity(tokens.len());
        for token in tokens {
            let token = self.truncate(token);
            if !out.contains(&token) {
                out.push(token);
            }
        }
        Ok(out)
    }

    fn truncate(&self, mut token: Vec<u8>) -> Vec<u8> {
        if self.truncate_len != FULL_LENGTH && token.len() > self.truncate_len {
            token.truncate(self.truncate_len);
        }
        token
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tenant_keyset::{BidxDerivator, CacheConfig, KeyPurpose, Keyset};

    use super::{BidxCodec, DEFAULT_TRUNCATE_LEN, FULL_LENGTH};

    #[test]
    fn write_token_is_deterministic_and_truncated() {
        let derivator = Arc::new(
            BidxDerivator::new(Keyset::generate(KeyPurpose::Mac), CacheConfig::disabled())
                .expect("derivator"),
        );
        let codec = BidxCodec::<String>::new(
            derivator.get_primitive_fn(Some(b"tenant")),
            DEFAULT_TRUNCATE_LEN,
        );
        let first = codec.for_write(&"Jane".to_string()).expect("token");
        let second = codec.for_write(&"Jane".to_string()).expect("token");
        assert_eq!(first, second);
        assert_eq!(first.len(), DEFAULT_TRUNCATE_LEN);

        let full = BidxCodec::<String>::new(derivator.get_primitive_fn(Some(b"tenant")), FULL_LENGTH);
        let full_token = full.for_write(&"Jane".to_string()).expect("token");
        assert_eq!(full_token.len(), 32);
        assert!(full_token.starts_with(&first));
    }

    #[test]
    fn read_set_starts_with_write_token() {
        let mut master = Keyset::generate(KeyPurpose::Mac);
        let rotated = master.add_key();
        master.promote(rotated).expect("promote");
        let derivator = Arc::new(
            BidxDerivator::new(master, CacheConfig::disabled()).expect("derivator"),
        );
        let codec = BidxCodec::<String>::new(derivator.get_primitive_fn(Some(b"tenant")), 4);
        let write = codec.for_write(&"Jane".to_string()).expect("token");
        let read = codec.for_read(&"Jane".to_string()).expect("tokens");
        assert_eq!(read.len(), 2);
        assert_eq!(read.first(), Some(&write));
        assert!(read.iter().all(|token| token.len() == 4));
    }
}

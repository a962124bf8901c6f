use std::marker::PhantomData;

use tenant_keyset::{Aead, PrimitiveFn};

use crate::error::CodecError;
use crate::transcode::Transcode;

/// Seals values of type `T` for one row.
///
/// `aad` binds every ciphertext to its row: a ciphertext copied into another
/// row (or another tenant) fails to open.
pub struct AeadCodec<T> {
    primitive: PrimitiveFn<Aead>,
    aad: Vec<u8>,
    _value: PhantomData<fn() -> T>,
}

impl<T> Clone for AeadCodec<T> {
    fn clone(&self) -> Self {
        Self {
            primitive: self.primitive.clone(),
            aad: self.aad.clone(),
            _value: PhantomData,
        }
    }
}

impl<T: Transcode> AeadCodec<T> {
    pub fn new(primitive: PrimitiveFn<Aead>, aad: impl Into<Vec<u8>>) -> Self {
        Self {
            primitive,
            aad: aad.into(),
            _value: PhantomData,
        }
    }

    #[must_use]
    pub fn aad(&self) -> &[u8] {
        &self.aad
    }

    pub fn encode(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        let plaintext = value.to_bytes()?;
        let aead = (self.primitive)().map_err(CodecError::Primitive)?;
        aead.encrypt(&plaintext, &self.aad)
            .map_err(CodecError::Crypto)
    }

    /// `None` stays `None`; it is stored as SQL NULL rather than as a sealed
    /// zero value.
    pub fn encode_nullable(&self, value: Option<&T>) -> Result<Option<Vec<u8>>, CodecError> {
        value.map(|value| self.encode(value)).transpose()
    }

    pub fn decode(&self, stored: &[u8]) -> Result<T, CodecError> {
        let aead = (self.primitive)().map_err(CodecError::Primitive)?;
        let plaintext = aead
            .decrypt(stored, &self.aad)
            .map_err(CodecError::Crypto)?;
        T::from_bytes(&plaintext)
    }

    pub fn decode_nullable(&self, stored: Option<&[u8]>) -> Result<Option<T>, CodecError> {
        stored.map(|stored| self.decode(stored)).transpose()
    }
}

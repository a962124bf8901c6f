use tenant_keyset::KeysetError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The tenant primitive could not be derived.
    #[error("primitive unavailable: {0}")]
    Primitive(KeysetError),
    /// Sealing, opening or indexing failed. On the read path this means the
    /// stored bytes do not belong to this row or tenant.
    #[error("crypto failure: {0}")]
    Crypto(KeysetError),
    #[error("transcode failure: {0}")]
    Transcode(String),
}

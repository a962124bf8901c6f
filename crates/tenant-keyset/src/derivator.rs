use std::path::Path;
use std::sync::Arc;

use moka::sync::Cache;

use crate::derive::derive_keyset;
use crate::error::KeysetError;
use crate::keyset::Keyset;
use crate::primitive::{Aead, Bidx, Mac, Primitive};

pub type AeadDerivator = Derivator<Aead>;
pub type MacDerivator = Derivator<Mac>;
pub type BidxDerivator = Derivator<Bidx>;

/// Deferred primitive lookup, handed to value codecs so they only derive a
/// key when a value is actually sealed or opened.
pub type PrimitiveFn<P> = Arc<dyn Fn() -> Result<Arc<P>, KeysetError> + Send + Sync>;

/// Capacities of the derivation caches. Zero disables a cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheConfig {
    pub handle_capacity: u64,
    pub primitive_capacity: u64,
}

impl CacheConfig {
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn bounded(capacity: u64) -> Self {
        Self {
            handle_capacity: capacity,
            primitive_capacity: capacity,
        }
    }
}

type SaltKey = Option<Vec<u8>>;

/// Turns a derivation salt (a tenant id) into a derived keyset and a primitive
/// bound to it.
///
/// The master keyset is fixed for the derivator's lifetime, so cached entries
/// can never go stale: rotating the master means building a new derivator.
pub struct Derivator<P: Primitive> {
    master: Keyset,
    handles: Option<Cache<SaltKey, Arc<Keyset>>>,
    primitives: Option<Cache<SaltKey, Arc<P>>>,
}

impl<P: Primitive> Derivator<P> {
    pub fn new(master: Keyset, cache: CacheConfig) -> Result<Self, KeysetError> {
        if master.purpose() != P::PURPOSE {
            return Err(KeysetError::WrongPurpose {
                expected: P::PURPOSE,
                actual: master.purpose(),
            });
        }
        master.validate()?;

        let derivator = Self {
            master,
            handles: (cache.handle_capacity > 0).then(|| Cache::new(cache.handle_capacity)),
            primitives: (cache.primitive_capacity > 0)
                .then(|| Cache::new(cache.primitive_capacity)),
        };
        // Fail at startup rather than on the first request.
        derivator.derive_primitive(None)?;
        tracing::info!(
            target: "profile.keyset",
            purpose = %P::PURPOSE,
            primary_key_id = derivator.master.primary_key_id(),
            keys = derivator.master.keys().len(),
            handle_cache = cache.handle_capacity,
            primitive_cache = cache.primitive_capacity,
            "keyset derivator ready",
        );
        Ok(derivator)
    }

    pub fn from_path(path: impl AsRef<Path>, cache: CacheConfig) -> Result<Self, KeysetError> {
        Self::new(Keyset::load(path)?, cache)
    }

    #[must_use]
    pub fn master(&self) -> &Keyset {
        &self.master
    }

    pub fn get_handle(&self, salt: Option<&[u8]>) -> Result<Arc<Keyset>, KeysetError> {
        match &self.handles {
            Some(cache) => cache
                .try_get_with(salt_key(salt), || self.derive_handle(salt))
                .map_err(|error| (*error).clone()),
            None => self.derive_handle(salt),
        }
    }

    pub fn get_primitive(&self, salt: Option<&[u8]>) -> Result<Arc<P>, KeysetError> {
        match &self.primitives {
            Some(cache) => cache
                .try_get_with(salt_key(salt), || self.derive_primitive(salt))
                .map_err(|error| (*error).clone()),
            None => self.derive_primitive(salt),
        }
    }

    #[must_use]
    pub fn get_primitive_fn(self: &Arc<Self>, salt: Option<&[u8]>) -> PrimitiveFn<P> {
        let derivator = Arc::clone(self);
        let salt = salt.map(<[u8]>::to_vec);
        Arc::new(move || derivator.get_primitive(salt.as_deref()))
    }

    fn derive_handle(&self, salt: Option<&[u8]>) -> Result<Arc<Keyset>, KeysetError> {
        let keyset = derive_keyset(&self.master, salt)?;
        tracing::debug!(
            target: "profile.keyset",
            purpose = %P::PURPOSE,
            salt_len = salt.map_or(0, <[u8]>::len),
            "derived keyset handle",
        );
        Ok(Arc::new(keyset))
    }

    fn derive_primitive(&self, salt: Option<&[u8]>) -> Result<Arc<P>, KeysetError> {
        let handle = self.get_handle(salt)?;
        P::from_keyset(&handle).map(Arc::new)
    }
}

fn salt_key(salt: Option<&[u8]>) -> SaltKey {
    salt.filter(|salt| !salt.is_empty()).map(<[u8]>::to_vec)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{AeadDerivator, BidxDerivator, CacheConfig};
    use crate::KeysetError;
    use crate::keyset::{KeyPurpose, Keyset};

    #[test]
    fn cached_primitive_is_shared() {
        let derivator = AeadDerivator::new(
            Keyset::generate(KeyPurpose::Aead),
            CacheConfig::bounded(8),
        )
        .expect("derivator");
        let first = derivator.get_primitive(Some(b"tenant")).expect("primitive");
        let second = derivator.get_primitive(Some(b"tenant")).expect("primitive");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn uncached_primitives_are_rebuilt_but_compatible() {
        let derivator =
            AeadDerivator::new(Keyset::generate(KeyPurpose::Aead), CacheConfig::disabled())
                .expect("derivator");
        let first = derivator.get_primitive(Some(b"tenant")).expect("primitive");
        let second = derivator.get_primitive(Some(b"tenant")).expect("primitive");
        assert!(!Arc::ptr_eq(&first, &second));

        let sealed = first.encrypt(b"value", b"aad").expect("encrypt");
        assert_eq!(second.decrypt(&sealed, b"aad").expect("decrypt"), b"value");
    }

    #[test]
    fn derivator_rejects_master_of_wrong_purpose() {
        let error = BidxDerivator::new(
            Keyset::generate(KeyPurpose::Aead),
            CacheConfig::disabled(),
        )
        .err()
        .expect("wrong purpose must fail");
        assert!(matches!(error, KeysetError::WrongPurpose { .. }));
    }

    #[test]
    fn primitive_fn_defers_to_derivator() {
        let derivator = Arc::new(
            AeadDerivator::new(Keyset::generate(KeyPurpose::Aead), CacheConfig::bounded(4))
                .expect("derivator"),
        );
        let produce = derivator.get_primitive_fn(Some(b"tenant"));
        let from_fn = produce().expect("primitive");
        let direct = derivator.get_primitive(Some(b"tenant")).expect("primitive");
        assert!(Arc::ptr_eq(&from_fn, &direct));
    }
}

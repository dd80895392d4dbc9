//! Keyring construction.
//!
//! A [`CipherBuilder`] collects master keys and options, and `build()` turns
//! them into an immutable [`Cipher`]. Master keys never outlive `build()`:
//! the builder owns them, `build()` consumes the builder, and every
//! [`MasterKey`] zeroes its buffer on drop, on the error paths as well.

use crate::blind_index::{Identity, Normalizer};
use crate::cipher::Cipher;
use crate::compression::{Compression, CompressionConfig, LazyCodec};
use crate::envelope::MAX_KEY_ID_LEN;
use crate::error::Error;
use crate::kdf::{derive_keys, DerivedKeys, MasterKey, MASTER_KEY_SIZE};
use crate::key_provider::KeyProvider;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Derived keys by key id, plus the id used when the caller names none.
///
/// Immutable once built, so shared reads need no locking.
pub(crate) struct Keyring {
    keys: BTreeMap<String, DerivedKeys>,
    default_key_id: String,
}

impl Keyring {
    pub(crate) fn default_key_id(&self) -> &str {
        &self.default_key_id
    }

    pub(crate) fn key_ids(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }

    pub(crate) fn contains(&self, key_id: &str) -> bool {
        self.keys.contains_key(key_id)
    }

    /// Looks up an explicit id, or the default when `key_id` is `None`.
    pub(crate) fn resolve<'a>(
        &'a self,
        key_id: Option<&'a str>,
    ) -> Result<(&'a str, &'a DerivedKeys), Error> {
        let key_id = key_id.unwrap_or(self.default_key_id.as_str());
        self.keys
            .get(key_id)
            .map(|keys| (key_id, keys))
            .ok_or_else(|| Error::KeyNotFound(key_id.to_string()))
    }

    /// Looks up a key id read from a sealed value.
    ///
    /// Ids that are not UTF-8 cannot name a configured key.
    pub(crate) fn resolve_bytes<'a>(
        &'a self,
        key_id: &'a [u8],
    ) -> Result<(&'a str, &'a DerivedKeys), Error> {
        match std::str::from_utf8(key_id) {
            Ok(key_id) => self.resolve(Some(key_id)),
            Err(_) => Err(Error::KeyNotFound(String::from_utf8_lossy(key_id).into_owned())),
        }
    }
}

/// Builder for a [`Cipher`].
///
/// # Example
///
/// ```
/// use fieldseal::compression::CompressionConfig;
/// use fieldseal::CipherBuilder;
///
/// let cipher = CipherBuilder::new()
///     .key("v1", vec![1u8; 32])
///     .key("v2", vec![2u8; 32])
///     .default_key("v2")
///     .compression(CompressionConfig::disabled())
///     .build()
///     .expect("valid configuration");
///
/// assert_eq!(cipher.default_key_id(), "v2");
/// ```
pub struct CipherBuilder {
    keys: BTreeMap<String, MasterKey>,
    default_key_id: Option<String>,
    compression: CompressionConfig,
    codecs: Vec<LazyCodec>,
    normalizer: Arc<dyn Normalizer>,
}

impl Default for CipherBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CipherBuilder {
    /// Creates an empty builder with default compression and no normalization.
    #[must_use]
    pub fn new() -> Self {
        Self {
            keys: BTreeMap::new(),
            default_key_id: None,
            compression: CompressionConfig::default(),
            codecs: Vec::new(),
            normalizer: Arc::new(Identity),
        }
    }

    /// Adds a master key. A later key with the same id replaces an earlier one.
    #[must_use]
    pub fn key(mut self, key_id: impl Into<String>, master_key: impl Into<MasterKey>) -> Self {
        self.keys.insert(key_id.into(), master_key.into());
        self
    }

    /// Sets the key id used when callers do not name one.
    ///
    /// Without this, the lexicographically smallest key id is the default.
    #[must_use]
    pub fn default_key(mut self, key_id: impl Into<String>) -> Self {
        self.default_key_id = Some(key_id.into());
        self
    }

    /// Sets the compression policy.
    #[must_use]
    pub fn compression(mut self, config: CompressionConfig) -> Self {
        self.compression = config;
        self
    }

    /// Replaces a built-in codec slot, e.g. to supply a tuned initializer.
    #[must_use]
    pub fn codec(mut self, codec: LazyCodec) -> Self {
        self.codecs.push(codec);
        self
    }

    /// Sets the normalizer applied before blind indexing.
    #[must_use]
    pub fn normalizer(mut self, normalizer: impl Normalizer + 'static) -> Self {
        self.normalizer = Arc::new(normalizer);
        self
    }

    /// Loads master keys (and the default id, if none is set) from a provider.
    ///
    /// # Errors
    ///
    /// Returns `Error::KeyProvider` if the provider fails.
    pub fn with_provider<P: KeyProvider + ?Sized>(mut self, provider: &P) -> Result<Self, Error> {
        for (key_id, master_key) in provider.master_keys()? {
            self.keys.insert(key_id, master_key);
        }
        if self.default_key_id.is_none() {
            self.default_key_id = provider.default_key_id()?;
        }
        Ok(self)
    }

    /// Derives every key and returns the immutable cipher.
    ///
    /// # Errors
    ///
    /// - `Error::NoKeysProvided` if no key was added
    /// - `Error::DefaultKeyNotFound` if the explicit default is not a key id
    /// - `Error::InvalidCompressionConfig` if the size limit is below the
    ///   compression threshold
    /// - `Error::InvalidKeyId` for an empty or over-long key id
    /// - `Error::InvalidMasterKey` for a master key that is not 32 bytes
    /// - `Error::KeyDerivation` if derivation fails
    pub fn build(self) -> Result<Cipher, Error> {
        // `master_keys` is dropped, and zeroed, however this function returns
        let Self { keys: master_keys, default_key_id, compression, codecs, normalizer } = self;

        let Some(first_key_id) = master_keys.keys().next() else {
            return Err(Error::NoKeysProvided);
        };

        let default_key_id = match default_key_id {
            Some(key_id) if master_keys.contains_key(&key_id) => key_id,
            Some(key_id) => return Err(Error::DefaultKeyNotFound(key_id)),
            None => first_key_id.clone(),
        };

        compression.validate()?;

        let mut keys = BTreeMap::new();
        for (key_id, master_key) in &master_keys {
            validate_key_id(key_id)?;
            if master_key.len() != MASTER_KEY_SIZE {
                return Err(Error::InvalidMasterKey {
                    key_id: key_id.clone(),
                    expected: MASTER_KEY_SIZE,
                    actual: master_key.len(),
                });
            }
            keys.insert(key_id.clone(), derive_keys(master_key)?);
        }
        drop(master_keys);

        tracing::debug!(keys = keys.len(), default_key_id = %default_key_id, "keyring built");

        let compression =
            codecs.into_iter().fold(Compression::new(compression), Compression::with_codec);
        let keyring = Keyring { keys, default_key_id };

        Ok(Cipher::from_parts(keyring, compression, normalizer))
    }
}

fn validate_key_id(key_id: &str) -> Result<(), Error> {
    if key_id.is_empty() || key_id.len() > MAX_KEY_ID_LEN {
        return Err(Error::InvalidKeyId(key_id.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KeyProviderError;

    struct MockKeyProvider {
        default: Option<&'static str>,
    }

    impl KeyProvider for MockKeyProvider {
        fn master_keys(&self) -> Result<Vec<(String, MasterKey)>, KeyProviderError> {
            Ok(vec![
                ("k2".to_string(), MasterKey::new(vec![2u8; 32])),
                ("k1".to_string(), MasterKey::new(vec![1u8; 32])),
            ])
        }

        fn default_key_id(&self) -> Result<Option<String>, KeyProviderError> {
            Ok(self.default.map(str::to_string))
        }
    }

    struct FailingProvider;

    impl KeyProvider for FailingProvider {
        fn master_keys(&self) -> Result<Vec<(String, MasterKey)>, KeyProviderError> {
            Err(KeyProviderError::LoadFailed("secret store offline".to_string()))
        }
    }

    #[test]
    fn test_no_keys() {
        let result = CipherBuilder::new().build();
        assert!(matches!(result, Err(Error::NoKeysProvided)));
    }

    #[test]
    fn test_default_is_smallest_key_id() {
        // insertion order must not matter
        let cipher = CipherBuilder::new()
            .key("zeta", vec![1u8; 32])
            .key("alpha", vec![2u8; 32])
            .key("mid", vec![3u8; 32])
            .build()
            .unwrap();

        assert_eq!(cipher.default_key_id(), "alpha");
        assert_eq!(cipher.key_ids().collect::<Vec<_>>(), ["alpha", "mid", "zeta"]);
    }

    #[test]
    fn test_explicit_default() {
        let cipher = CipherBuilder::new()
            .key("a", vec![1u8; 32])
            .key("b", vec![2u8; 32])
            .default_key("b")
            .build()
            .unwrap();

        assert_eq!(cipher.default_key_id(), "b");
        assert!(cipher.has_key("a"));
        assert!(!cipher.has_key("c"));
    }

    #[test]
    fn test_explicit_default_missing() {
        let result = CipherBuilder::new().key("a", vec![1u8; 32]).default_key("b").build();
        assert!(matches!(result, Err(Error::DefaultKeyNotFound(id)) if id == "b"));
    }

    #[test]
    fn test_invalid_key_ids() {
        let empty = CipherBuilder::new().key("", vec![1u8; 32]).build();
        assert!(matches!(empty, Err(Error::InvalidKeyId(_))));

        let long = CipherBuilder::new().key("k".repeat(256), vec![1u8; 32]).build();
        assert!(matches!(long, Err(Error::InvalidKeyId(_))));

        let max = CipherBuilder::new().key("k".repeat(255), vec![1u8; 32]).build();
        assert!(max.is_ok());
    }

    #[test]
    fn test_invalid_master_key_length() {
        let result = CipherBuilder::new().key("v1", vec![1u8; 16]).build();

        match result {
            Err(Error::InvalidMasterKey { key_id, expected, actual }) => {
                assert_eq!(key_id, "v1");
                assert_eq!(expected, 32);
                assert_eq!(actual, 16);
            }
            _ => panic!("expected InvalidMasterKey"),
        }
    }

    #[test]
    fn test_duplicate_key_id_last_wins() {
        let first = CipherBuilder::new().key("v1", vec![1u8; 32]).build().unwrap();
        let both = CipherBuilder::new()
            .key("v1", vec![9u8; 32])
            .key("v1", vec![1u8; 32])
            .build()
            .unwrap();

        assert_eq!(first.blind_index(b"x").unwrap(), both.blind_index(b"x").unwrap());
    }

    #[test]
    fn test_with_provider() {
        let cipher = CipherBuilder::new()
            .with_provider(&MockKeyProvider { default: Some("k2") })
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(cipher.default_key_id(), "k2");

        let cipher = CipherBuilder::new()
            .with_provider(&MockKeyProvider { default: None })
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(cipher.default_key_id(), "k1");
    }

    #[test]
    fn test_builder_default_overrides_provider() {
        let cipher = CipherBuilder::new()
            .default_key("k1")
            .with_provider(&MockKeyProvider { default: Some("k2") })
            .unwrap()
            .build()
            .unwrap();
        assert_eq!(cipher.default_key_id(), "k1");
    }

    #[test]
    fn test_provider_failure() {
        let result = CipherBuilder::new().with_provider(&FailingProvider);
        assert!(matches!(result, Err(Error::KeyProvider(KeyProviderError::LoadFailed(_)))));
    }
}

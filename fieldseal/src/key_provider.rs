//! Key provider abstraction for supplying master keys.

use crate::error::KeyProviderError;
use crate::kdf::MasterKey;

/// Supplies the master keys a [`Cipher`](crate::Cipher) is built from.
///
/// Keys are only needed at construction time. A provider backed by an
/// external secret store fetches them on demand; rotating keys means
/// building a new cipher from the provider's updated set.
///
/// Implementations must be thread-safe (`Send + Sync`).
///
/// # Example
///
/// ```
/// use fieldseal::error::KeyProviderError;
/// use fieldseal::kdf::MasterKey;
/// use fieldseal::key_provider::KeyProvider;
///
/// struct StaticProvider;
///
/// impl KeyProvider for StaticProvider {
///     fn master_keys(&self) -> Result<Vec<(String, MasterKey)>, KeyProviderError> {
///         Ok(vec![("v1".to_string(), MasterKey::new(vec![0u8; 32]))])
///     }
/// }
/// ```
pub trait KeyProvider: Send + Sync {
    /// Returns every `(key id, master key)` pair the cipher should hold.
    ///
    /// # Errors
    ///
    /// Returns `KeyProviderError::LoadFailed` or `KeyProviderError::Io` if
    /// keys cannot be fetched.
    fn master_keys(&self) -> Result<Vec<(String, MasterKey)>, KeyProviderError>;

    /// Returns the key id new values should be sealed under, if the provider
    /// tracks one.
    ///
    /// # Errors
    ///
    /// Returns `KeyProviderError` if the default cannot be read.
    fn default_key_id(&self) -> Result<Option<String>, KeyProviderError> {
        Ok(None)
    }
}

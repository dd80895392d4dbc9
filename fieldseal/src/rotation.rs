//! Re-sealing values under the current key and compression policy.
//!
//! Rotation opens a value with whichever configured key it names and seals
//! the plaintext again under the default key. The plaintext never leaves
//! this module and is zeroed before `rotate` returns.
//!
//! A cipher built with only new keys cannot rotate values sealed under a
//! retired key; `rotate` fails with `Error::KeyNotFound` for those. Keep the
//! old key in the keyring until every value has been migrated.

use crate::cipher::Cipher;
use crate::envelope::OuterEnvelope;
use crate::error::Error;
use zeroize::Zeroizing;

impl Cipher {
    /// Re-seals `sealed` under the default key and current compression policy.
    ///
    /// The result always decrypts to the same plaintext. Its bytes differ
    /// from the input even when nothing changed, because sealing draws a
    /// fresh nonce.
    ///
    /// # Errors
    ///
    /// Any error from [`Cipher::open`] is returned unchanged, followed by
    /// those of [`Cipher::seal`].
    ///
    /// # Example
    ///
    /// ```
    /// use fieldseal::Cipher;
    ///
    /// let old = Cipher::builder().key("2023", vec![1u8; 32]).build()?;
    /// let sealed = old.seal(b"secret")?;
    ///
    /// let new = Cipher::builder()
    ///     .key("2023", vec![1u8; 32])
    ///     .key("2024", vec![2u8; 32])
    ///     .default_key("2024")
    ///     .build()?;
    ///
    /// let rotated = new.rotate(&sealed)?;
    /// assert!(!new.needs_rotation(&rotated)?);
    /// assert_eq!(new.open(&rotated)?, b"secret");
    /// # Ok::<(), fieldseal::Error>(())
    /// ```
    pub fn rotate(&self, sealed: &[u8]) -> Result<Vec<u8>, Error> {
        let plaintext = Zeroizing::new(self.open(sealed)?);
        self.seal_under(None, &plaintext)
    }

    /// Reports whether `sealed` names a key other than the default.
    ///
    /// Only the unauthenticated outer envelope is read, so this is a cheap
    /// filter for migration jobs, not a validity check.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidFormat` if `sealed` is not a sealed value.
    pub fn needs_rotation(&self, sealed: &[u8]) -> Result<bool, Error> {
        let envelope = OuterEnvelope::from_bytes(sealed)?;
        Ok(envelope.key_id != self.default_key_id().as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::CompressionConfig;
    use crate::envelope::CompressionFlag;

    fn payload() -> Vec<u8> {
        b"rotate me ".iter().copied().cycle().take(4096).collect()
    }

    fn old_cipher() -> Cipher {
        Cipher::builder()
            .key("old", vec![1u8; 32])
            .compression(CompressionConfig::disabled())
            .build()
            .unwrap()
    }

    fn new_cipher() -> Cipher {
        Cipher::builder()
            .key("old", vec![1u8; 32])
            .key("new", vec![2u8; 32])
            .default_key("new")
            .build()
            .unwrap()
    }

    #[test]
    fn test_rotate_to_new_key_and_policy() {
        let sealed = old_cipher().seal(&payload()).unwrap();
        assert_eq!(sealed[0], CompressionFlag::NONE.as_u8());

        let cipher = new_cipher();
        assert!(cipher.needs_rotation(&sealed).unwrap());

        let rotated = cipher.rotate(&sealed).unwrap();
        let envelope = OuterEnvelope::from_bytes(&rotated).unwrap();

        assert_eq!(envelope.key_id, b"new");
        assert_eq!(envelope.flag, CompressionFlag::ZSTD);
        assert!(!cipher.needs_rotation(&rotated).unwrap());
        assert_eq!(cipher.open(&rotated).unwrap(), payload());
    }

    #[test]
    fn test_rotate_without_changes() {
        let cipher = old_cipher();
        let sealed = cipher.seal(b"unchanged").unwrap();

        let rotated = cipher.rotate(&sealed).unwrap();

        assert_ne!(rotated, sealed);
        assert_eq!(&rotated[..5], &sealed[..5]);
        assert_eq!(cipher.open(&rotated).unwrap(), b"unchanged");
    }

    #[test]
    fn test_rotate_retired_key_fails() {
        let sealed = old_cipher().seal(b"legacy").unwrap();
        let fresh = Cipher::builder().key("new", vec![2u8; 32]).build().unwrap();

        assert!(matches!(fresh.rotate(&sealed), Err(Error::KeyNotFound(id)) if id == "old"));
    }

    #[test]
    fn test_rotate_corrupted_value_fails() {
        let mut sealed = old_cipher().seal(b"legacy").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xFF;

        assert!(matches!(new_cipher().rotate(&sealed), Err(Error::DecryptionFailed)));
    }

    #[test]
    fn test_needs_rotation_rejects_garbage() {
        assert!(matches!(new_cipher().needs_rotation(b"short"), Err(Error::InvalidFormat(_))));
    }
}

//! Sealing and opening of column values.
//!
//! A sealed value is XChaCha20-Poly1305 over an inner envelope that binds
//! the payload to the key id it was sealed under:
//!
//! 1. Resolve the key (explicit id or the keyring default)
//! 2. Compress the payload if the policy says so
//! 3. Build the inner envelope `[key_id_len][key_id][payload]`
//! 4. Encrypt under a fresh random 24-byte nonce, authenticating the
//!    compression flag as associated data
//! 5. Emit `[flag][key_id_len][key_id][nonce][ciphertext]`
//!
//! Opening reverses this and refuses any value whose authenticated inner key
//! id differs from the key that decrypted it.

use crate::blind_index::Normalizer;
use crate::compression::Compression;
use crate::envelope::{CompressionFlag, InnerEnvelope, OuterEnvelope, NONCE_SIZE};
use crate::error::Error;
use crate::kdf::DerivedKeys;
use crate::keyring::{CipherBuilder, Keyring};
use chacha20poly1305::{
    aead::{rand_core::RngCore, Aead, KeyInit, OsRng, Payload},
    XChaCha20Poly1305, XNonce,
};
use std::fmt;
use std::sync::Arc;
use zeroize::Zeroizing;

/// Immutable cipher context: keyring, compression policy and normalizer.
///
/// Cloning is cheap and every clone shares the same keys and codecs.
/// All methods take `&self`, so a `Cipher` can be used from any number of
/// threads without locking.
///
/// # Example
///
/// ```
/// use fieldseal::compression::CompressionConfig;
/// use fieldseal::Cipher;
///
/// let cipher = Cipher::builder()
///     .key("v1", vec![7u8; 32])
///     .compression(CompressionConfig::disabled())
///     .build()?;
///
/// let sealed = cipher.seal(b"alice@example.com")?;
/// assert_eq!(cipher.open(&sealed)?, b"alice@example.com");
/// # Ok::<(), fieldseal::Error>(())
/// ```
#[derive(Clone)]
pub struct Cipher {
    inner: Arc<Inner>,
}

struct Inner {
    keyring: Keyring,
    compression: Compression,
    normalizer: Arc<dyn Normalizer>,
}

impl Cipher {
    pub(crate) fn from_parts(
        keyring: Keyring,
        compression: Compression,
        normalizer: Arc<dyn Normalizer>,
    ) -> Self {
        Self { inner: Arc::new(Inner { keyring, compression, normalizer }) }
    }

    /// Shorthand for [`CipherBuilder::new`].
    #[must_use]
    pub fn builder() -> CipherBuilder {
        CipherBuilder::new()
    }

    /// Key id used when callers do not name one.
    #[must_use]
    pub fn default_key_id(&self) -> &str {
        self.inner.keyring.default_key_id()
    }

    /// Configured key ids in ascending order.
    pub fn key_ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.inner.keyring.key_ids()
    }

    /// Returns `true` if `key_id` is in the keyring.
    #[must_use]
    pub fn has_key(&self, key_id: &str) -> bool {
        self.inner.keyring.contains(key_id)
    }

    /// Compression subsystem, for inspecting policy and codec state.
    #[must_use]
    pub fn compression(&self) -> &Compression {
        &self.inner.compression
    }

    pub(crate) fn keyring(&self) -> &Keyring {
        &self.inner.keyring
    }

    pub(crate) fn normalizer(&self) -> &dyn Normalizer {
        self.inner.normalizer.as_ref()
    }

    /// Seals `plaintext` under the default key.
    ///
    /// Every call draws a fresh nonce, so sealing the same plaintext twice
    /// gives different bytes.
    ///
    /// # Errors
    ///
    /// - `Error::CompressionFailed` if the codec cannot be used
    /// - `Error::RandomSource` if the OS random source fails
    /// - `Error::EncryptionFailed` if the AEAD rejects the input
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        self.seal_under(None, plaintext)
    }

    /// Seals `plaintext` under an explicit key.
    ///
    /// # Errors
    ///
    /// Returns `Error::KeyNotFound` if `key_id` is not in the keyring, and
    /// otherwise the same errors as [`Cipher::seal`].
    pub fn seal_with_key(&self, key_id: &str, plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        self.seal_under(Some(key_id), plaintext)
    }

    pub(crate) fn seal_under(
        &self,
        key_id: Option<&str>,
        plaintext: &[u8],
    ) -> Result<Vec<u8>, Error> {
        let (key_id, keys) = self.inner.keyring.resolve(key_id)?;

        let compressed = self.inner.compression.compress(plaintext)?;
        let (flag, payload) = match &compressed {
            Some((flag, bytes)) => (*flag, bytes.as_slice()),
            None => (CompressionFlag::NONE, plaintext),
        };

        let inner =
            Zeroizing::new(InnerEnvelope { key_id: key_id.as_bytes(), payload }.to_bytes()?);

        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.try_fill_bytes(&mut nonce).map_err(|_| Error::RandomSource)?;

        let ciphertext = XChaCha20Poly1305::new(keys.encryption_key().into())
            .encrypt(
                &XNonce::from(nonce),
                Payload { msg: inner.as_slice(), aad: &[flag.as_u8()] },
            )
            .map_err(|_| Error::EncryptionFailed)?;

        OuterEnvelope { flag, key_id: key_id.as_bytes(), nonce, ciphertext: &ciphertext }
            .to_bytes()
    }

    /// Opens a sealed value using the key named in its envelope.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidFormat` if the bytes are not a sealed value
    /// - `Error::KeyNotFound` if the envelope names an unknown key
    /// - `Error::DecryptionFailed` if authentication fails
    /// - `Error::KeyIdMismatch` if the authenticated key id disagrees
    /// - `Error::UnsupportedCompression` / `Error::DecompressionFailed`
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, Error> {
        let envelope = OuterEnvelope::from_bytes(sealed)?;
        let (key_id, keys) = self.inner.keyring.resolve_bytes(envelope.key_id)?;
        self.open_envelope(&envelope, key_id, keys)
    }

    /// Opens a sealed value with an explicitly chosen key.
    ///
    /// The envelope's key id is not used to pick the key, but the
    /// authenticated inner key id must still match both the chosen key and
    /// the envelope.
    ///
    /// # Errors
    ///
    /// Same as [`Cipher::open`], with `Error::KeyNotFound` referring to
    /// `key_id`.
    pub fn open_with_key(&self, sealed: &[u8], key_id: &str) -> Result<Vec<u8>, Error> {
        let envelope = OuterEnvelope::from_bytes(sealed)?;
        let (key_id, keys) = self.inner.keyring.resolve(Some(key_id))?;
        self.open_envelope(&envelope, key_id, keys)
    }

    /// Decrypt, check the key binding, decompress. Shared by every open path.
    fn open_envelope(
        &self,
        envelope: &OuterEnvelope<'_>,
        key_id: &str,
        keys: &DerivedKeys,
    ) -> Result<Vec<u8>, Error> {
        let decrypted = XChaCha20Poly1305::new(keys.encryption_key().into())
            .decrypt(
                &XNonce::from(envelope.nonce),
                Payload { msg: envelope.ciphertext, aad: &[envelope.flag.as_u8()] },
            )
            .map(Zeroizing::new)
            .map_err(|_| Error::DecryptionFailed)?;

        let inner = InnerEnvelope::from_bytes(&decrypted)?;
        if inner.key_id != key_id.as_bytes() || inner.key_id != envelope.key_id {
            return Err(Error::KeyIdMismatch);
        }

        let mut payload = self.inner.compression.decompress(envelope.flag, inner.payload)?;
        Ok(std::mem::take(&mut *payload))
    }
}

impl fmt::Debug for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cipher")
            .field("default_key_id", &self.default_key_id())
            .field("key_ids", &self.key_ids().collect::<Vec<_>>())
            .field("compression", self.inner.compression.config())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::{CompressionAlgorithm, CompressionConfig};
    use crate::envelope::MIN_SEALED_LEN;

    fn cipher(config: CompressionConfig) -> Cipher {
        Cipher::builder()
            .key("v1", vec![1u8; 32])
            .key("v2", vec![2u8; 32])
            .compression(config)
            .build()
            .unwrap()
    }

    fn repetitive(len: usize) -> Vec<u8> {
        b"0123456789".iter().copied().cycle().take(len).collect()
    }

    #[test]
    fn test_hello_world_layout() {
        let cipher = Cipher::builder()
            .key("v1", vec![42u8; 32])
            .compression(CompressionConfig::disabled())
            .build()
            .unwrap();

        let sealed = cipher.seal_with_key("v1", b"hello world").unwrap();

        assert_eq!(sealed[0], CompressionFlag::NONE.as_u8());
        assert_eq!(sealed[1], 2);
        assert_eq!(&sealed[2..4], b"v1");
        assert_eq!(cipher.open(&sealed).unwrap(), b"hello world");
    }

    #[test]
    fn test_round_trip_default_key() {
        let cipher = cipher(CompressionConfig::default());
        let sealed = cipher.seal(b"alice@example.com").unwrap();

        assert_eq!(&sealed[2..4], b"v1");
        assert_eq!(cipher.open(&sealed).unwrap(), b"alice@example.com");
    }

    #[test]
    fn test_empty_plaintext() {
        let cipher = cipher(CompressionConfig::default());
        let sealed = cipher.seal(b"").unwrap();
        assert!(cipher.open(&sealed).unwrap().is_empty());
    }

    #[test]
    fn test_same_plaintext_different_ciphertexts() {
        let cipher = cipher(CompressionConfig::disabled());

        let a = cipher.seal(b"same").unwrap();
        let b = cipher.seal(b"same").unwrap();

        assert_ne!(a, b);
        let nonce = |v: &[u8]| OuterEnvelope::from_bytes(v).unwrap().nonce;
        assert_ne!(nonce(&a), nonce(&b));
    }

    #[test]
    fn test_seal_with_unknown_key() {
        let cipher = cipher(CompressionConfig::default());
        let result = cipher.seal_with_key("v9", b"data");
        assert!(matches!(result, Err(Error::KeyNotFound(id)) if id == "v9"));
    }

    #[test]
    fn test_open_with_key() {
        let cipher = cipher(CompressionConfig::default());
        let sealed = cipher.seal_with_key("v2", b"data").unwrap();

        assert_eq!(cipher.open_with_key(&sealed, "v2").unwrap(), b"data");
        assert!(matches!(cipher.open_with_key(&sealed, "v1"), Err(Error::DecryptionFailed)));
        assert!(matches!(cipher.open_with_key(&sealed, "v3"), Err(Error::KeyNotFound(_))));
    }

    #[test]
    fn test_open_unknown_key() {
        let sealed = cipher(CompressionConfig::default()).seal(b"data").unwrap();
        let other = Cipher::builder().key("other", vec![1u8; 32]).build().unwrap();

        assert!(matches!(other.open(&sealed), Err(Error::KeyNotFound(id)) if id == "v1"));
    }

    #[test]
    fn test_relabelled_outer_key_id_fails_decryption() {
        let cipher = cipher(CompressionConfig::default());
        let mut sealed = cipher.seal_with_key("v1", b"data").unwrap();
        sealed[3] = b'2';

        assert!(matches!(cipher.open(&sealed), Err(Error::DecryptionFailed)));
    }

    #[test]
    fn test_key_confusion_detected() {
        // two ids backed by the same master key derive the same sub-keys,
        // so only the inner key id tells them apart
        let cipher = Cipher::builder()
            .key("k1", vec![5u8; 32])
            .key("k2", vec![5u8; 32])
            .build()
            .unwrap();

        let mut sealed = cipher.seal_with_key("k1", b"data").unwrap();
        sealed[3] = b'2';

        assert!(matches!(cipher.open(&sealed), Err(Error::KeyIdMismatch)));

        let original = cipher.seal_with_key("k1", b"data").unwrap();
        assert!(matches!(cipher.open_with_key(&original, "k2"), Err(Error::KeyIdMismatch)));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let cipher = cipher(CompressionConfig::disabled());
        let sealed = cipher.seal(b"alice@example.com").unwrap();
        let start = 2 + 2 + NONCE_SIZE;

        for i in start..sealed.len() {
            let mut tampered = sealed.clone();
            tampered[i] ^= 0x01;
            assert!(matches!(cipher.open(&tampered), Err(Error::DecryptionFailed)), "byte {i}");
        }
    }

    #[test]
    fn test_tampered_nonce_and_flag_fail() {
        let cipher = cipher(CompressionConfig::disabled());
        let sealed = cipher.seal(b"alice@example.com").unwrap();

        let mut bad_nonce = sealed.clone();
        bad_nonce[4] ^= 0x80;
        assert!(matches!(cipher.open(&bad_nonce), Err(Error::DecryptionFailed)));

        let mut bad_flag = sealed;
        bad_flag[0] = CompressionFlag::ZSTD.as_u8();
        assert!(matches!(cipher.open(&bad_flag), Err(Error::DecryptionFailed)));
    }

    #[test]
    fn test_malformed_input() {
        let cipher = cipher(CompressionConfig::default());

        assert!(matches!(cipher.open(&[]), Err(Error::InvalidFormat(_))));
        assert!(matches!(cipher.open(&[0u8; MIN_SEALED_LEN - 1]), Err(Error::InvalidFormat(_))));

        // valid header, truncated tag
        let sealed = cipher.seal(b"x").unwrap();
        let truncated = &sealed[..MIN_SEALED_LEN + 1];
        assert!(matches!(cipher.open(truncated), Err(Error::DecryptionFailed)));
    }

    #[test]
    fn test_compression_shrinks_repetitive_payload() {
        let payload = repetitive(16 * 1024);

        for algorithm in [CompressionAlgorithm::Zstd, CompressionAlgorithm::Lz4] {
            let compressed = cipher(CompressionConfig::default().with_algorithm(algorithm));
            let plain = cipher(CompressionConfig::disabled());

            let small = compressed.seal(&payload).unwrap();
            let large = plain.seal(&payload).unwrap();

            assert_eq!(small[0], algorithm.flag().as_u8());
            assert_eq!(large[0], CompressionFlag::NONE.as_u8());
            assert!(small.len() < large.len());

            assert_eq!(compressed.open(&small).unwrap(), payload);
            assert_eq!(plain.open(&large).unwrap(), payload);
            // a context that no longer compresses still reads old values
            assert_eq!(plain.open(&small).unwrap(), payload);
        }
    }

    #[test]
    fn test_payload_over_decompression_limit_round_trips() {
        let cipher = cipher(CompressionConfig::default().with_max_decompressed_size(2048));
        let payload = repetitive(4096);

        let sealed = cipher.seal(&payload).unwrap();

        assert_eq!(sealed[0], CompressionFlag::NONE.as_u8());
        assert_eq!(cipher.open(&sealed).unwrap(), payload);
    }

    #[test]
    fn test_build_rejects_limit_below_threshold() {
        let result = Cipher::builder()
            .key("v1", vec![1u8; 32])
            .compression(
                CompressionConfig::default().with_threshold(4096).with_max_decompressed_size(2048),
            )
            .build();

        assert!(matches!(
            result,
            Err(Error::InvalidCompressionConfig { threshold: 4096, max_decompressed_size: 2048 })
        ));
    }

    #[test]
    fn test_unavailable_compression_rejects_compressed_values() {
        let sealed = cipher(CompressionConfig::default()).seal(&repetitive(4096)).unwrap();
        let reader = cipher(CompressionConfig::unavailable());

        assert!(matches!(reader.open(&sealed), Err(Error::UnsupportedCompression(_))));
    }

    #[test]
    fn test_concurrent_use() {
        let cipher = cipher(CompressionConfig::default().with_threshold(64));

        let handles: Vec<_> = (0..8u8)
            .map(|i| {
                let cipher = cipher.clone();
                std::thread::spawn(move || {
                    for round in 0..50usize {
                        let payload = vec![i; 64 + round];
                        let sealed = cipher.seal(&payload).unwrap();
                        assert_eq!(cipher.open(&sealed).unwrap(), payload);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_cipher_is_send_and_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Cipher>();
    }

    #[test]
    fn test_debug_hides_keys() {
        let debug = format!("{:?}", cipher(CompressionConfig::default()));
        assert!(debug.contains("v1"));
        assert!(!debug.contains("encryption"));
    }
}

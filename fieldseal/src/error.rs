//! Error types for `fieldseal` operations.

use std::fmt;

/// Main error type for `fieldseal` operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Sealed value or inner envelope bytes are malformed
    #[error("invalid format: {0}")]
    InvalidFormat(&'static str),

    /// Requested key id is not in the keyring
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// Explicitly configured default key id is not in the keyring
    #[error("default key not found: {0}")]
    DefaultKeyNotFound(String),

    /// The authenticated inner key id disagrees with the key used to decrypt.
    ///
    /// Treat as evidence of tampering or key substitution.
    #[error("key id mismatch: sealed value was bound to a different key")]
    KeyIdMismatch,

    /// Authentication tag verification failed
    #[error("decryption failed")]
    DecryptionFailed,

    /// Compression flag or algorithm is not supported by this context
    #[error("unsupported compression: {0}")]
    UnsupportedCompression(String),

    /// Compressed payload could not be decoded
    #[error("decompression failed: {0}")]
    DecompressionFailed(String),

    /// Compression codec could not be initialized or failed to compress
    #[error("compression failed: {0}")]
    CompressionFailed(String),

    /// Compression limits are inconsistent
    #[error(
        "invalid compression config: threshold {threshold} exceeds max decompressed size \
         {max_decompressed_size}"
    )]
    InvalidCompressionConfig {
        /// Configured compression threshold
        threshold: usize,
        /// Configured decompressed size limit
        max_decompressed_size: usize,
    },

    /// No master keys were supplied at construction
    #[error("no keys provided")]
    NoKeysProvided,

    /// Key derivation failed
    #[error("key derivation failed")]
    KeyDerivation,

    /// Key id is empty or longer than the wire format allows
    #[error("invalid key id: {0:?}")]
    InvalidKeyId(String),

    /// Master key has the wrong length
    #[error("invalid master key for {key_id:?}: expected {expected} bytes, got {actual}")]
    InvalidMasterKey {
        /// Key id the master key was supplied under
        key_id: String,
        /// Required length
        expected: usize,
        /// Supplied length
        actual: usize,
    },

    /// Column name failed the identifier allow-list
    #[error("invalid column name: {0:?}")]
    InvalidColumnName(String),

    /// The operating system random source failed
    #[error("secure random source unavailable")]
    RandomSource,

    /// AEAD encryption failed
    #[error("encryption failed")]
    EncryptionFailed,

    /// Key provider operation failed
    #[error("key provider error: {0}")]
    KeyProvider(#[from] KeyProviderError),
}

/// Errors specific to key provider operations.
#[derive(Debug)]
pub enum KeyProviderError {
    /// Key not found
    KeyNotFound(String),

    /// Keys could not be loaded or created
    LoadFailed(String),

    /// I/O operation failed
    Io(std::io::Error),
}

impl fmt::Display for KeyProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyNotFound(id) => write!(f, "key not found: {id}"),
            Self::LoadFailed(msg) => write!(f, "key load failed: {msg}"),
            Self::Io(err) => write!(f, "I/O error: {err}"),
        }
    }
}

impl std::error::Error for KeyProviderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for KeyProviderError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

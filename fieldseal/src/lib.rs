//! # `fieldseal`
//!
//! Column-level searchable encryption: sealed values for confidentiality and
//! integrity, blind indexes for equality search over sealed columns.
//!
//! ## Features
//!
//! - XChaCha20-Poly1305 sealing with a random 24-byte nonce per value
//! - Per-key HKDF-SHA256 derivation of independent encryption and
//!   blind-index sub-keys
//! - Key-id binding inside the ciphertext against key confusion
//! - Optional size-gated zstd or lz4 compression
//! - HMAC-SHA256 blind indexes with pluggable normalization
//! - Multi-key keyrings and rotation to the current default key
//!
//! ## Example
//!
//! ```
//! use fieldseal::prelude::*;
//!
//! let cipher = Cipher::builder()
//!     .key("2024", vec![0x11; 32])
//!     .normalizer(TrimLowercase)
//!     .build()?;
//!
//! let (sealed, index) = cipher.seal_indexed(b"alice@example.com")?;
//! assert_eq!(cipher.open(&sealed)?, b"alice@example.com");
//!
//! let query = cipher.blind_index(b"Alice@Example.com")?;
//! assert_eq!(query, index);
//!
//! let condition = search_condition("email_bidx", &query)?;
//! assert!(condition.to_string().starts_with("email_bidx = '"));
//! # Ok::<(), fieldseal::Error>(())
//! ```

#![warn(clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

pub mod blind_index;
pub mod cipher;
pub mod compression;
pub mod envelope;
pub mod error;
pub mod kdf;
pub mod key_provider;
pub mod keyring;
mod rotation;

pub use cipher::Cipher;
pub use error::{Error, KeyProviderError};
pub use keyring::CipherBuilder;

pub mod prelude {
    //! Convenience re-exports for common use.
    pub use crate::blind_index::{
        search_condition, BlindIndex, Identity, Normalizer, SearchCondition, TrimLowercase,
    };
    pub use crate::cipher::Cipher;
    pub use crate::compression::{CompressionAlgorithm, CompressionConfig, CompressionMode};
    pub use crate::error::{Error, KeyProviderError};
    pub use crate::kdf::MasterKey;
    pub use crate::key_provider::KeyProvider;
    pub use crate::keyring::CipherBuilder;
}

//! Key derivation using HKDF (HMAC-based Key Derivation Function).
//!
//! Every master key is expanded into two computationally unrelated sub-keys:
//! one for authenticated encryption and one for blind indexing. The two
//! expansions use distinct, fixed `info` labels, so a master key is never
//! used directly for either purpose.

use crate::error::Error;
use hkdf::Hkdf;
use secrecy::{ExposeSecret, Secret, SecretVec};
use sha2::Sha256;
use zeroize::Zeroize;

/// Required master key size in bytes (256 bits).
pub const MASTER_KEY_SIZE: usize = 32;

/// Size of each derived sub-key in bytes (256 bits).
pub const DERIVED_KEY_SIZE: usize = 32;

const HKDF_SALT: &[u8] = b"fieldseal/v1/salt";
const ENCRYPTION_INFO: &[u8] = b"fieldseal/v1/encryption";
const BLIND_INDEX_INFO: &[u8] = b"fieldseal/v1/blind-index";

/// Caller-supplied root secret for one key id.
///
/// The bytes live in a [`SecretVec`] and are zeroed when the value is dropped.
pub struct MasterKey(SecretVec<u8>);

impl MasterKey {
    /// Wraps raw key bytes. Ownership moves in so the caller keeps no copy.
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(SecretVec::new(bytes))
    }

    /// Length of the key material in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.expose_secret().len()
    }

    /// Returns `true` if the key holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn expose(&self) -> &[u8] {
        self.0.expose_secret()
    }
}

impl From<Vec<u8>> for MasterKey {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl From<[u8; MASTER_KEY_SIZE]> for MasterKey {
    fn from(mut bytes: [u8; MASTER_KEY_SIZE]) -> Self {
        let key = Self::new(bytes.to_vec());
        bytes.zeroize();
        key
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey([REDACTED])")
    }
}

/// Encryption and blind-index sub-keys derived from one master key.
pub struct DerivedKeys {
    encryption: Secret<[u8; DERIVED_KEY_SIZE]>,
    blind_index: Secret<[u8; DERIVED_KEY_SIZE]>,
}

impl DerivedKeys {
    pub(crate) fn encryption_key(&self) -> &[u8; DERIVED_KEY_SIZE] {
        self.encryption.expose_secret()
    }

    pub(crate) fn blind_index_key(&self) -> &[u8; DERIVED_KEY_SIZE] {
        self.blind_index.expose_secret()
    }
}

/// Derives the encryption and blind-index sub-keys from a master key.
///
/// HKDF-SHA256 extract with a fixed salt, then one expand per purpose.
/// The master key is only borrowed; the caller scopes its lifetime.
///
/// # Errors
///
/// Returns `Error::KeyDerivation` if the HKDF expansion fails.
///
/// # Example
///
/// ```
/// use fieldseal::kdf::{derive_keys, MasterKey};
///
/// let master = MasterKey::new(vec![7u8; 32]);
/// let keys = derive_keys(&master).expect("derivation failed");
/// # let _ = keys;
/// ```
pub fn derive_keys(master: &MasterKey) -> Result<DerivedKeys, Error> {
    let hkdf = Hkdf::<Sha256>::new(Some(HKDF_SALT), master.expose());

    let encryption = expand(&hkdf, ENCRYPTION_INFO)?;
    let blind_index = expand(&hkdf, BLIND_INDEX_INFO)?;

    Ok(DerivedKeys { encryption, blind_index })
}

fn expand(hkdf: &Hkdf<Sha256>, info: &[u8]) -> Result<Secret<[u8; DERIVED_KEY_SIZE]>, Error> {
    let mut okm = [0u8; DERIVED_KEY_SIZE];
    let result = hkdf.expand(info, &mut okm).map(|()| Secret::new(okm));
    // `Secret::new` took a copy; clear the one left on the stack
    okm.zeroize();
    result.map_err(|_| Error::KeyDerivation)
}

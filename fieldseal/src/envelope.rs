//! Binary wire format for sealed values.
//!
//! Outer envelope (persisted by callers):
//! ```text
//! [flag:1][key_id_len:1][key_id:N][nonce:24][ciphertext:rest]
//! ```
//!
//! Inner envelope (authenticated under the AEAD, never persisted on its own):
//! ```text
//! [key_id_len:1][key_id:N][payload:rest]
//! ```
//!
//! The outer key id only selects which derived key to try. The inner copy is
//! the one trusted after decryption.

use crate::error::Error;

/// Nonce size for XChaCha20-Poly1305 (192 bits).
pub const NONCE_SIZE: usize = 24;

/// Smallest possible outer envelope: flag, length, one key id byte, nonce.
pub const MIN_SEALED_LEN: usize = 1 + 1 + 1 + NONCE_SIZE;

/// Largest key id the one-byte length prefix can describe.
pub const MAX_KEY_ID_LEN: usize = u8::MAX as usize;

/// Compression flag stored in the first byte of a sealed value.
///
/// Unknown values are kept as-is so they can be reported as
/// `Error::UnsupportedCompression` instead of a format error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompressionFlag(u8);

impl CompressionFlag {
    /// Payload is stored uncompressed.
    pub const NONE: Self = Self(0);
    /// Payload is zstd-compressed.
    pub const ZSTD: Self = Self(1);
    /// Payload is lz4-compressed.
    pub const LZ4: Self = Self(2);

    /// Returns `true` if the payload is compressed.
    #[must_use]
    pub const fn is_compressed(self) -> bool {
        self.0 != 0
    }

    /// Returns the raw flag value.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self.0
    }

    /// Creates a flag from a raw value.
    #[must_use]
    pub const fn from_u8(value: u8) -> Self {
        Self(value)
    }
}

/// Borrowed view of an outer envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OuterEnvelope<'a> {
    /// Compression applied to the inner payload
    pub flag: CompressionFlag,
    /// Key id hint used to select the decryption key
    pub key_id: &'a [u8],
    /// AEAD nonce
    pub nonce: [u8; NONCE_SIZE],
    /// AEAD ciphertext including the authentication tag
    pub ciphertext: &'a [u8],
}

impl<'a> OuterEnvelope<'a> {
    /// Serializes the envelope.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidFormat` if the key id is empty or longer than
    /// 255 bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let key_id_len = key_id_len(self.key_id)?;

        let mut bytes =
            Vec::with_capacity(2 + self.key_id.len() + NONCE_SIZE + self.ciphertext.len());
        bytes.push(self.flag.as_u8());
        bytes.push(key_id_len);
        bytes.extend_from_slice(self.key_id);
        bytes.extend_from_slice(&self.nonce);
        bytes.extend_from_slice(self.ciphertext);

        Ok(bytes)
    }

    /// Parses an outer envelope without copying.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidFormat` if the input is shorter than
    /// [`MIN_SEALED_LEN`], declares a zero-length key id, or declares a key
    /// id (plus nonce) longer than the remaining input.
    pub fn from_bytes(data: &'a [u8]) -> Result<Self, Error> {
        if data.len() < MIN_SEALED_LEN {
            return Err(Error::InvalidFormat("sealed value too short"));
        }

        let flag = CompressionFlag::from_u8(data[0]);
        let (key_id, rest) = split_key_id(&data[1..])?;

        if rest.len() < NONCE_SIZE {
            return Err(Error::InvalidFormat("nonce truncated"));
        }
        let (nonce_bytes, ciphertext) = rest.split_at(NONCE_SIZE);

        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(nonce_bytes);

        Ok(Self { flag, key_id, nonce, ciphertext })
    }
}

/// Borrowed view of an inner envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InnerEnvelope<'a> {
    /// Key id bound to the payload under authentication
    pub key_id: &'a [u8],
    /// Payload, possibly compressed
    pub payload: &'a [u8],
}

impl<'a> InnerEnvelope<'a> {
    /// Serializes the envelope.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidFormat` if the key id is empty or longer than
    /// 255 bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        let key_id_len = key_id_len(self.key_id)?;

        let mut bytes = Vec::with_capacity(1 + self.key_id.len() + self.payload.len());
        bytes.push(key_id_len);
        bytes.extend_from_slice(self.key_id);
        bytes.extend_from_slice(self.payload);

        Ok(bytes)
    }

    /// Parses an inner envelope without copying.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidFormat` for an empty input, a zero-length key
    /// id, or a key id that runs past the end of the input.
    pub fn from_bytes(data: &'a [u8]) -> Result<Self, Error> {
        let (key_id, payload) = split_key_id(data)?;
        Ok(Self { key_id, payload })
    }
}

fn key_id_len(key_id: &[u8]) -> Result<u8, Error> {
    match u8::try_from(key_id.len()) {
        Ok(0) => Err(Error::InvalidFormat("empty key id")),
        Ok(len) => Ok(len),
        Err(_) => Err(Error::InvalidFormat("key id longer than 255 bytes")),
    }
}

fn split_key_id(data: &[u8]) -> Result<(&[u8], &[u8]), Error> {
    let Some((&len, rest)) = data.split_first() else {
        return Err(Error::InvalidFormat("missing key id length"));
    };

    let len = usize::from(len);
    if len == 0 {
        return Err(Error::InvalidFormat("empty key id"));
    }
    if len > rest.len() {
        return Err(Error::InvalidFormat("key id truncated"));
    }

    Ok(rest.split_at(len))
}

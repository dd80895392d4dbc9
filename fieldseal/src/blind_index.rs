//! Blind index generation for searchable encryption.
//!
//! A blind index is `HMAC-SHA256(blind_index_key, normalize(value))`, keyed
//! by the blind-index sub-key of one key id. Unlike sealing it is
//! deterministic: the same normalized value under the same key always gives
//! the same token, which is what lets a database run `WHERE col_bidx = ?`
//! over sealed columns.
//!
//! # Stability
//!
//! Tokens are only comparable when every writer and every query builder
//! feeds identical bytes. Two things must stay fixed for the lifetime of the
//! stored indexes:
//!
//! - the configured [`Normalizer`], applied on write and on query alike
//! - the serialization of structured values: callers that index anything
//!   other than raw bytes must serialize it to a canonical byte form first,
//!   and that form must not change across releases
//!
//! Changing either silently breaks equality search for existing rows.

use crate::cipher::Cipher;
use crate::error::Error;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::borrow::Cow;
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

/// Blind index output size (32 bytes).
pub const BLIND_INDEX_SIZE: usize = 32;

/// Longest accepted segment of a column name.
const MAX_IDENTIFIER_LEN: usize = 63;

/// Most segments accepted in a qualified column name (`schema.table.column`).
const MAX_IDENTIFIER_SEGMENTS: usize = 3;

/// Canonicalizes values before they are blind-indexed.
///
/// Must be deterministic. It should map values the application considers
/// equal to the same bytes, and nothing else.
pub trait Normalizer: Send + Sync {
    /// Returns the canonical form of `value`.
    fn normalize<'a>(&self, value: &'a [u8]) -> Cow<'a, [u8]>;
}

/// Leaves values untouched. The default.
#[derive(Debug, Default, Clone, Copy)]
pub struct Identity;

impl Normalizer for Identity {
    fn normalize<'a>(&self, value: &'a [u8]) -> Cow<'a, [u8]> {
        Cow::Borrowed(value)
    }
}

/// Trims ASCII whitespace and lowercases ASCII letters.
///
/// Suits identifiers like e-mail addresses. Non-ASCII bytes pass through.
#[derive(Debug, Default, Clone, Copy)]
pub struct TrimLowercase;

impl Normalizer for TrimLowercase {
    fn normalize<'a>(&self, value: &'a [u8]) -> Cow<'a, [u8]> {
        let start = value.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(value.len());
        let end = value.iter().rposition(|b| !b.is_ascii_whitespace()).map_or(start, |i| i + 1);
        let trimmed = &value[start..end];
        if trimmed.iter().any(u8::is_ascii_uppercase) {
            Cow::Owned(trimmed.to_ascii_lowercase())
        } else {
            Cow::Borrowed(trimmed)
        }
    }
}

impl<F> Normalizer for F
where
    F: Fn(&[u8]) -> Vec<u8> + Send + Sync,
{
    fn normalize<'a>(&self, value: &'a [u8]) -> Cow<'a, [u8]> {
        Cow::Owned(self(value))
    }
}

/// A deterministic search token.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlindIndex([u8; BLIND_INDEX_SIZE]);

impl BlindIndex {
    /// Raw token bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; BLIND_INDEX_SIZE] {
        &self.0
    }

    /// Lower-case hex encoding, as stored in an index column.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl From<[u8; BLIND_INDEX_SIZE]> for BlindIndex {
    fn from(bytes: [u8; BLIND_INDEX_SIZE]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for BlindIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for BlindIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlindIndex({})", self.to_hex())
    }
}

impl Cipher {
    /// Computes the blind index of `value` under the default key.
    ///
    /// # Errors
    ///
    /// Returns `Error::KeyDerivation` if the HMAC cannot be keyed.
    ///
    /// # Example
    ///
    /// ```
    /// use fieldseal::blind_index::TrimLowercase;
    /// use fieldseal::Cipher;
    ///
    /// let cipher = Cipher::builder()
    ///     .key("v1", vec![3u8; 32])
    ///     .normalizer(TrimLowercase)
    ///     .build()?;
    ///
    /// let stored = cipher.blind_index(b"Alice@Example.com")?;
    /// let query = cipher.blind_index(b" alice@example.com ")?;
    /// assert_eq!(stored, query);
    /// # Ok::<(), fieldseal::Error>(())
    /// ```
    pub fn blind_index(&self, value: &[u8]) -> Result<BlindIndex, Error> {
        self.blind_index_under(None, value)
    }

    /// Computes the blind index of `value` under an explicit key.
    ///
    /// # Errors
    ///
    /// Returns `Error::KeyNotFound` if `key_id` is not in the keyring.
    pub fn blind_index_with_key(&self, key_id: &str, value: &[u8]) -> Result<BlindIndex, Error> {
        self.blind_index_under(Some(key_id), value)
    }

    /// Computes the blind index of `value` under every configured key.
    ///
    /// While a key rotation is in progress, rows may be indexed under
    /// several keys; a query matches any of these tokens.
    ///
    /// # Errors
    ///
    /// Returns `Error::KeyDerivation` if the HMAC cannot be keyed.
    pub fn blind_indexes(&self, value: &[u8]) -> Result<Vec<(String, BlindIndex)>, Error> {
        self.key_ids()
            .map(|key_id| {
                self.blind_index_under(Some(key_id), value).map(|index| (key_id.to_string(), index))
            })
            .collect()
    }

    /// Seals `value` and computes its blind index under the same key.
    ///
    /// # Errors
    ///
    /// Same as [`Cipher::seal`] and [`Cipher::blind_index`].
    pub fn seal_indexed(&self, value: &[u8]) -> Result<(Vec<u8>, BlindIndex), Error> {
        let key_id = self.default_key_id();
        Ok((self.seal_under(Some(key_id), value)?, self.blind_index_under(Some(key_id), value)?))
    }

    fn blind_index_under(&self, key_id: Option<&str>, value: &[u8]) -> Result<BlindIndex, Error> {
        let (_, keys) = self.keyring().resolve(key_id)?;
        let normalized = self.normalizer().normalize(value);

        // HMAC accepts keys of any length
        let mut mac =
            HmacSha256::new_from_slice(keys.blind_index_key()).map_err(|_| Error::KeyDerivation)?;
        mac.update(&normalized);

        let mut token = [0u8; BLIND_INDEX_SIZE];
        token.copy_from_slice(&mac.finalize().into_bytes());
        Ok(BlindIndex(token))
    }
}

/// An equality predicate over a blind-index column.
///
/// Renders as `column = '<hex token>'`. The column name has passed
/// [`validate_column`], and the token is hex, so neither can inject SQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchCondition {
    column: String,
    token: BlindIndex,
}

impl SearchCondition {
    /// Column the predicate applies to.
    #[must_use]
    pub fn column(&self) -> &str {
        &self.column
    }

    /// Token to compare against.
    #[must_use]
    pub const fn token(&self) -> &BlindIndex {
        &self.token
    }
}

impl fmt::Display for SearchCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = '{}'", self.column, self.token)
    }
}

/// Builds an equality predicate for `column`.
///
/// # Errors
///
/// Returns `Error::InvalidColumnName` if `column` fails [`validate_column`].
///
/// # Example
///
/// ```
/// use fieldseal::blind_index::{search_condition, BlindIndex};
///
/// let token = BlindIndex::from([0xab; 32]);
/// let condition = search_condition("users.email_bidx", &token)?;
/// assert!(condition.to_string().starts_with("users.email_bidx = 'abab"));
///
/// assert!(search_condition("email; DROP TABLE users", &token).is_err());
/// # Ok::<(), fieldseal::Error>(())
/// ```
pub fn search_condition(column: &str, token: &BlindIndex) -> Result<SearchCondition, Error> {
    validate_column(column)?;
    Ok(SearchCondition { column: column.to_string(), token: *token })
}

/// Checks `column` against the identifier allow-list.
///
/// Accepts one to three dot-separated segments, each matching
/// `[A-Za-z_][A-Za-z0-9_]*` and at most 63 bytes long.
///
/// # Errors
///
/// Returns `Error::InvalidColumnName` otherwise.
pub fn validate_column(column: &str) -> Result<(), Error> {
    let valid_segment = |segment: &str| {
        let mut bytes = segment.bytes();
        let starts_ok = bytes.next().is_some_and(|b| b.is_ascii_alphabetic() || b == b'_');
        starts_ok
            && segment.len() <= MAX_IDENTIFIER_LEN
            && bytes.all(|b| b.is_ascii_alphanumeric() || b == b'_')
    };

    let segments = column.split('.').count();
    if segments > MAX_IDENTIFIER_SEGMENTS || !column.split('.').all(valid_segment) {
        return Err(Error::InvalidColumnName(column.to_string()));
    }
    Ok(())
}

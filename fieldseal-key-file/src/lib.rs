//! File-based key provider for `fieldseal`.
//!
//! This provider stores master keys in the filesystem and is suitable for
//! development, testing and single-host deployments.

#![warn(clippy::pedantic, clippy::nursery)]

use fieldseal::error::KeyProviderError;
use fieldseal::kdf::{MasterKey, MASTER_KEY_SIZE};
use fieldseal::key_provider::KeyProvider;
use rand::rngs::OsRng;
use rand::RngCore;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

const KEY_EXTENSION: &str = "key";
const CURRENT_FILE: &str = "current";
const INITIAL_KEY_ID: &str = "v1";

/// File-based key provider.
///
/// Keys are stored in one directory:
/// ```text
/// keys/
/// ├── v1.key      (32 random bytes, 0600 permissions)
/// ├── v2.key      (32 random bytes, 0600 permissions)
/// └── current     (text: id of the default key, e.g. "v2")
/// ```
#[derive(Debug, Clone)]
pub struct FileKeyProvider {
    key_dir: PathBuf,
}

impl FileKeyProvider {
    /// Opens an existing key directory.
    ///
    /// # Errors
    ///
    /// Returns `KeyProviderError::LoadFailed` if the directory does not exist.
    pub fn new(key_dir: impl Into<PathBuf>) -> Result<Self, KeyProviderError> {
        let key_dir = key_dir.into();
        if !key_dir.is_dir() {
            return Err(KeyProviderError::LoadFailed(format!(
                "key directory does not exist: {}",
                key_dir.display()
            )));
        }
        Ok(Self { key_dir })
    }

    /// Creates a key directory holding one fresh key, `v1`, marked current.
    ///
    /// Does nothing to a directory that already contains keys.
    ///
    /// # Errors
    ///
    /// Returns error if directory creation or key generation fails.
    pub fn init(key_dir: impl Into<PathBuf>) -> Result<Self, KeyProviderError> {
        let key_dir = key_dir.into();
        fs::create_dir_all(&key_dir)?;

        let provider = Self { key_dir };
        if provider.key_ids()?.is_empty() {
            provider.create_key(INITIAL_KEY_ID)?;
            provider.set_current(INITIAL_KEY_ID)?;
        }
        Ok(provider)
    }

    /// Directory the keys live in.
    #[must_use]
    pub fn key_dir(&self) -> &Path {
        &self.key_dir
    }

    /// Writes a new random master key under `key_id`.
    ///
    /// # Errors
    ///
    /// Returns `KeyProviderError::LoadFailed` if the id is not a safe file
    /// name or the key already exists, and `KeyProviderError::Io` on write
    /// failure.
    pub fn create_key(&self, key_id: &str) -> Result<(), KeyProviderError> {
        validate_key_id(key_id)?;

        let path = self.key_path(key_id);
        if path.exists() {
            return Err(KeyProviderError::LoadFailed(format!("key already exists: {key_id}")));
        }

        let mut key = Zeroizing::new([0u8; MASTER_KEY_SIZE]);
        OsRng
            .try_fill_bytes(key.as_mut_slice())
            .map_err(|e| KeyProviderError::LoadFailed(format!("random source: {e}")))?;

        write_private(&path, key.as_slice())?;
        tracing::info!(key_id, path = %path.display(), "created master key");
        Ok(())
    }

    /// Marks `key_id` as the key new values are sealed under.
    ///
    /// # Errors
    ///
    /// Returns `KeyProviderError::KeyNotFound` if no such key file exists.
    pub fn set_current(&self, key_id: &str) -> Result<(), KeyProviderError> {
        validate_key_id(key_id)?;
        if !self.key_path(key_id).is_file() {
            return Err(KeyProviderError::KeyNotFound(key_id.to_string()));
        }
        fs::write(self.key_dir.join(CURRENT_FILE), key_id)?;
        Ok(())
    }

    /// Ids of every key file, sorted.
    ///
    /// # Errors
    ///
    /// Returns `KeyProviderError::Io` if the directory cannot be read.
    pub fn key_ids(&self) -> Result<Vec<String>, KeyProviderError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.key_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some(KEY_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn key_path(&self, key_id: &str) -> PathBuf {
        self.key_dir.join(format!("{key_id}.{KEY_EXTENSION}"))
    }

    fn read_key(&self, key_id: &str) -> Result<MasterKey, KeyProviderError> {
        let bytes = Zeroizing::new(fs::read(self.key_path(key_id))?);
        if bytes.len() != MASTER_KEY_SIZE {
            return Err(KeyProviderError::LoadFailed(format!(
                "key {key_id} has {} bytes, expected {MASTER_KEY_SIZE}",
                bytes.len()
            )));
        }
        Ok(MasterKey::new(bytes.to_vec()))
    }
}

impl KeyProvider for FileKeyProvider {
    fn master_keys(&self) -> Result<Vec<(String, MasterKey)>, KeyProviderError> {
        let keys = self
            .key_ids()?
            .into_iter()
            .map(|key_id| {
                let key = self.read_key(&key_id)?;
                Ok((key_id, key))
            })
            .collect::<Result<Vec<_>, KeyProviderError>>()?;

        tracing::debug!(dir = %self.key_dir.display(), keys = keys.len(), "loaded master keys");
        Ok(keys)
    }

    fn default_key_id(&self) -> Result<Option<String>, KeyProviderError> {
        match fs::read_to_string(self.key_dir.join(CURRENT_FILE)) {
            Ok(contents) => {
                let key_id = contents.trim();
                Ok((!key_id.is_empty()).then(|| key_id.to_string()))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

/// Key ids double as file names, so only a conservative charset is allowed.
fn validate_key_id(key_id: &str) -> Result<(), KeyProviderError> {
    let valid = !key_id.is_empty()
        && key_id.len() <= 255
        && key_id.bytes().all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-'));
    if !valid {
        return Err(KeyProviderError::LoadFailed(format!("invalid key id: {key_id:?}")));
    }
    Ok(())
}

fn write_private(path: &Path, bytes: &[u8]) -> Result<(), KeyProviderError> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_creates_current_key() {
        let dir = TempDir::new().unwrap();
        let provider = FileKeyProvider::init(dir.path()).unwrap();

        assert_eq!(provider.key_ids().unwrap(), ["v1"]);
        assert_eq!(provider.default_key_id().unwrap().as_deref(), Some("v1"));

        let keys = provider.master_keys().unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].1.len(), MASTER_KEY_SIZE);
    }

    #[test]
    fn test_init_is_idempotent() {
        let dir = TempDir::new().unwrap();
        FileKeyProvider::init(dir.path()).unwrap();
        let before = fs::read(dir.path().join("v1.key")).unwrap();

        FileKeyProvider::init(dir.path()).unwrap();
        assert_eq!(fs::read(dir.path().join("v1.key")).unwrap(), before);
    }

    #[test]
    fn test_new_requires_directory() {
        let dir = TempDir::new().unwrap();
        let result = FileKeyProvider::new(dir.path().join("missing"));
        assert!(matches!(result, Err(KeyProviderError::LoadFailed(_))));
    }

    #[test]
    fn test_create_and_switch_keys() {
        let dir = TempDir::new().unwrap();
        let provider = FileKeyProvider::init(dir.path()).unwrap();

        provider.create_key("v2").unwrap();
        assert!(matches!(provider.create_key("v2"), Err(KeyProviderError::LoadFailed(_))));

        provider.set_current("v2").unwrap();
        assert_eq!(provider.default_key_id().unwrap().as_deref(), Some("v2"));
        assert_eq!(provider.key_ids().unwrap(), ["v1", "v2"]);

        assert!(matches!(provider.set_current("v9"), Err(KeyProviderError::KeyNotFound(_))));
    }

    #[test]
    fn test_rejects_path_like_key_ids() {
        let dir = TempDir::new().unwrap();
        let provider = FileKeyProvider::init(dir.path()).unwrap();

        for key_id in ["", "../escape", "a/b", "v 1"] {
            assert!(provider.create_key(key_id).is_err(), "{key_id:?}");
        }
    }

    #[test]
    fn test_wrong_length_key_file() {
        let dir = TempDir::new().unwrap();
        let provider = FileKeyProvider::init(dir.path()).unwrap();
        fs::write(dir.path().join("short.key"), [1u8; 8]).unwrap();

        assert!(matches!(provider.master_keys(), Err(KeyProviderError::LoadFailed(_))));
    }

    #[test]
    fn test_missing_current_file() {
        let dir = TempDir::new().unwrap();
        let provider = FileKeyProvider::new(dir.path()).unwrap();

        assert_eq!(provider.default_key_id().unwrap(), None);
        assert!(provider.master_keys().unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_key_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        FileKeyProvider::init(dir.path()).unwrap();

        let mode = fs::metadata(dir.path().join("v1.key")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}

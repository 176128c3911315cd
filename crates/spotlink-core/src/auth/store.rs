//! Durable key-value storage for credentials.
//!
//! The client only ever needs `get`/`set`/`remove` by key, so storage sits
//! behind the small [`TokenStore`] port. [`MemoryStore`] is the in-process
//! fake used by tests, [`FileStore`] keeps a JSON map in the cache directory
//! and [`KeyringStore`](super::KeyringStore) uses the OS keychain.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result};

/// Credentials file name in cache directory
const CREDENTIALS_FILE: &str = "credentials.json";

pub trait TokenStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with the given entries
    pub fn with_entries<'a>(entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let map = entries
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self {
            entries: Mutex::new(map),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}

impl TokenStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
        Ok(())
    }
}

/// JSON map persisted to `<cache_dir>/credentials.json`.
///
/// Every call re-reads the file so several processes sharing the cache
/// directory see each other's writes. The file is deleted once the last
/// key is removed.
pub struct FileStore {
    cache_dir: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(cache_dir: PathBuf) -> Self {
        Self {
            cache_dir,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.cache_dir.join(CREDENTIALS_FILE)
    }

    fn read_map(path: &Path) -> Result<BTreeMap<String, String>> {
        if !path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = std::fs::read_to_string(path).context("Failed to read credentials file")?;
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&contents).context("Failed to parse credentials file")
    }

    fn write_map(path: &Path, map: &BTreeMap<String, String>) -> Result<()> {
        if map.is_empty() {
            if path.exists() {
                std::fs::remove_file(path).context("Failed to remove credentials file")?;
            }
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create cache directory")?;
        }
        let contents = serde_json::to_string_pretty(map)?;
        let mut file = open_owner_only(path)?;
        file.write_all(contents.as_bytes())
            .context("Failed to write credentials file")?;
        Ok(())
    }
}

/// Open for truncating write with owner-only permissions, before any
/// token bytes land on disk.
#[cfg(unix)]
fn open_owner_only(path: &Path) -> Result<File> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)
        .context("Failed to open credentials file")?;
    // `mode` only applies on creation; tighten a file left by an older run
    file.set_permissions(std::fs::Permissions::from_mode(0o600))
        .context("Failed to restrict credentials file permissions")?;
    Ok(file)
}

#[cfg(not(unix))]
fn open_owner_only(path: &Path) -> Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .context("Failed to open credentials file")
}

impl TokenStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(Self::read_map(&self.path())?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let path = self.path();
        let mut map = Self::read_map(&path)?;
        map.insert(key.to_string(), value.to_string());
        Self::write_map(&path, &map)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let path = self.path();
        let mut map = Self::read_map(&path)?;
        if map.remove(key).is_some() {
            Self::write_map(&path, &map)?;
        }
        Ok(())
    }
}

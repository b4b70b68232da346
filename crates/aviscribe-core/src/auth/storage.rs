//! Durable key-value backends that mirror the session.
//!
//! The session store only ever talks to a [`SessionStorage`]; which one is
//! used is decided by configuration. Storage is best-effort: callers log
//! failures and carry on with the in-memory state.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result};
use keyring::Entry;
use tracing::warn;

/// Session file name in the data directory
const SESSION_FILE: &str = "session.json";

/// Keychain service name
const SERVICE_NAME: &str = "aviscribe";

pub trait SessionStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;

    /// Apply several updates at once; `None` removes the key. Backends that
    /// can commit everything in one write should override this.
    fn write_all(&self, updates: &[(&str, Option<&str>)]) -> Result<()> {
        for (key, value) in updates {
            match value {
                Some(value) => self.set(key, value)?,
                None => self.remove(key)?,
            }
        }
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// In-memory
// ============================================================================

#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with existing entries, as if a previous process had written them.
    pub fn with_entries<I, K, V>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            entries: Mutex::new(
                entries
                    .into_iter()
                    .map(|(k, v)| (k.into(), v.into()))
                    .collect(),
            ),
        }
    }

    /// Copy of everything currently stored.
    pub fn entries(&self) -> BTreeMap<String, String> {
        lock(&self.entries).clone()
    }
}

impl SessionStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        lock(&self.entries).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        lock(&self.entries).remove(key);
        Ok(())
    }
}

// ============================================================================
// JSON file
// ============================================================================

/// All keys in a single JSON object, rewritten on every mutation.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl FileStorage {
    /// Open `session.json` inside `dir`, loading whatever is already there.
    /// An unreadable or corrupt file counts as empty and is overwritten by
    /// the next mutation.
    pub fn open(dir: &Path) -> Result<Self> {
        let path = dir.join(SESSION_FILE);
        let entries = if path.exists() {
            Self::load(&path).unwrap_or_else(|e| {
                warn!(path = %path.display(), "Ignoring unusable session file: {:#}", e);
                BTreeMap::new()
            })
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> Result<BTreeMap<String, String>> {
        let contents = std::fs::read_to_string(path).context("Failed to read session file")?;
        serde_json::from_str(&contents).context("Failed to parse session file")
    }

    fn save(&self, entries: &BTreeMap<String, String>) -> Result<()> {
        if entries.is_empty() {
            if self.path.exists() {
                std::fs::remove_file(&self.path).context("Failed to remove session file")?;
            }
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(entries)?;
        std::fs::write(&self.path, contents).context("Failed to write session file")?;
        Ok(())
    }
}

impl SessionStorage for FileStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = lock(&self.entries);
        if entries.get(key).map(String::as_str) == Some(value) {
            return Ok(());
        }
        entries.insert(key.to_string(), value.to_string());
        self.save(&entries)
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut entries = lock(&self.entries);
        if entries.remove(key).is_none() {
            return Ok(());
        }
        self.save(&entries)
    }

    fn write_all(&self, updates: &[(&str, Option<&str>)]) -> Result<()> {
        let mut entries = lock(&self.entries);
        let mut changed = false;
        for (key, value) in updates {
            changed |= match value {
                Some(value) => {
                    entries.insert(key.to_string(), value.to_string()).as_deref() != Some(*value)
                }
                None => entries.remove(*key).is_some(),
            };
        }
        if !changed {
            return Ok(());
        }
        self.save(&entries)
    }
}

// ============================================================================
// OS keychain
// ============================================================================

/// One keychain entry per key under the `aviscribe` service.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeyringStorage;

impl KeyringStorage {
    fn entry(key: &str) -> Result<Entry> {
        Entry::new(SERVICE_NAME, key).context("Failed to create keyring entry")
    }
}

impl SessionStorage for KeyringStorage {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match Self::entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e).context("Failed to retrieve value from keychain"),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        Self::entry(key)?
            .set_password(value)
            .context("Failed to store value in keychain")
    }

    fn remove(&self, key: &str) -> Result<()> {
        match Self::entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e).context("Failed to delete value from keychain"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "aviscribe-storage-{}-{}",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_memory_storage_set_get_remove() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.get("k").unwrap(), None);

        storage.set("k", "v").unwrap();
        assert_eq!(storage.get("k").unwrap().as_deref(), Some("v"));

        storage.remove("k").unwrap();
        storage.remove("k").unwrap(); // removing twice is fine
        assert!(storage.entries().is_empty());
    }

    #[test]
    fn test_file_storage_survives_reopen() {
        let dir = scratch_dir("reopen");
        {
            let storage = FileStorage::open(&dir).unwrap();
            storage.set("aviscribe_access_token", "a1").unwrap();
            storage.set("aviscribe_access_exp", "1700000000").unwrap();
        }

        let reopened = FileStorage::open(&dir).unwrap();
        assert_eq!(
            reopened.get("aviscribe_access_token").unwrap().as_deref(),
            Some("a1")
        );
        assert_eq!(
            reopened.get("aviscribe_access_exp").unwrap().as_deref(),
            Some("1700000000")
        );

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_file_storage_removes_file_when_empty() {
        let dir = scratch_dir("empty");
        let storage = FileStorage::open(&dir).unwrap();
        storage.set("k", "v").unwrap();
        assert!(storage.path().exists());

        storage.remove("k").unwrap();
        assert!(!storage.path().exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_file_storage_recovers_from_corrupt_file() {
        let dir = scratch_dir("corrupt");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(SESSION_FILE), "{truncated").unwrap();

        let storage = FileStorage::open(&dir).unwrap();
        assert_eq!(storage.get("aviscribe_access_token").unwrap(), None);

        // The next write replaces the garbage
        storage.set("aviscribe_access_token", "a1").unwrap();
        let reopened = FileStorage::open(&dir).unwrap();
        assert_eq!(
            reopened.get("aviscribe_access_token").unwrap().as_deref(),
            Some("a1")
        );

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_file_storage_write_all_commits_together() {
        let dir = scratch_dir("batch");
        let storage = FileStorage::open(&dir).unwrap();
        storage.set("stale", "x").unwrap();

        storage
            .write_all(&[
                ("aviscribe_access_token", Some("a2")),
                ("aviscribe_refresh_token", Some("r2")),
                ("stale", None),
            ])
            .unwrap();

        let on_disk: BTreeMap<String, String> =
            serde_json::from_str(&std::fs::read_to_string(storage.path()).unwrap()).unwrap();
        assert_eq!(
            on_disk,
            BTreeMap::from([
                ("aviscribe_access_token".to_string(), "a2".to_string()),
                ("aviscribe_refresh_token".to_string(), "r2".to_string()),
            ])
        );

        storage
            .write_all(&[("aviscribe_access_token", None), ("aviscribe_refresh_token", None)])
            .unwrap();
        assert!(!storage.path().exists());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_default_write_all_applies_each_update() {
        let storage = MemoryStorage::with_entries([("gone", "1")]);

        storage
            .write_all(&[("kept", Some("2")), ("gone", None)])
            .unwrap();

        assert_eq!(
            storage.entries(),
            BTreeMap::from([("kept".to_string(), "2".to_string())])
        );
    }
}

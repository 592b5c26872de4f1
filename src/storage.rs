//! Local key-value storage boundary.
//!
//! The guest and pending stores persist through this interface the way a
//! browser app persists through local storage: each key holds one
//! whole-collection JSON string, read and written in full. There are no
//! partial writes.
//!
//! Two implementations are provided:
//! - `MemoryStorage`: process-local, used in tests and ephemeral sessions
//! - `FileStorage`: one file per key under a directory, for desktop
//!   embeddings where guest/pending data must survive restarts

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::error::{JotError, JotResult};

/// String key-value storage with whole-value reads and writes.
pub trait KeyValueStorage: Send + Sync {
    /// Read the value stored under `key`, or `None` if absent.
    fn get(&self, key: &str) -> JotResult<Option<String>>;

    /// Replace the value stored under `key`.
    fn set(&self, key: &str, value: &str) -> JotResult<()>;

    /// Remove `key`. Removing an absent key is not an error.
    fn remove(&self, key: &str) -> JotResult<()>;
}

/// In-memory key-value storage.
#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
    fail_next_write: AtomicBool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `set` call fail with a storage error. Used to
    /// exercise the rollback paths of the stores built on top.
    #[cfg(test)]
    pub(crate) fn fail_next_write(&self) {
        self.fail_next_write.store(true, Ordering::SeqCst);
    }
}

impl KeyValueStorage for MemoryStorage {
    fn get(&self, key: &str) -> JotResult<Option<String>> {
        let entries = self.entries.lock().unwrap();
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> JotResult<()> {
        if self.fail_next_write.swap(false, Ordering::SeqCst) {
            return Err(JotError::storage("simulated write failure"));
        }
        let mut entries = self.entries.lock().unwrap();
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> JotResult<()> {
        let mut entries = self.entries.lock().unwrap();
        entries.remove(key);
        Ok(())
    }
}

/// File-backed key-value storage: each key maps to `<dir>/<key>.json`.
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    /// Open storage rooted at `dir`, creating the directory if needed.
    pub fn new(dir: impl Into<PathBuf>) -> JotResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| JotError::storage(e.to_string()))?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> JotResult<PathBuf> {
        // Keys become file names; restrict them to a safe alphabet.
        let safe = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !safe {
            return Err(JotError::storage(format!("invalid storage key: {:?}", key)));
        }
        Ok(self.dir.join(format!("{}.json", key)))
    }
}

impl KeyValueStorage for FileStorage {
    fn get(&self, key: &str) -> JotResult<Option<String>> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(JotError::storage(e.to_string())),
        }
    }

    fn set(&self, key: &str, value: &str) -> JotResult<()> {
        let path = self.path_for(key)?;
        fs::write(&path, value).map_err(|e| JotError::storage(e.to_string()))
    }

    fn remove(&self, key: &str) -> JotResult<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(JotError::storage(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_memory_storage_roundtrip() {
        let storage = MemoryStorage::new();
        assert!(storage.get("k").unwrap().is_none());

        storage.set("k", "v").unwrap();
        assert_eq!(storage.get("k").unwrap().as_deref(), Some("v"));

        storage.remove("k").unwrap();
        assert!(storage.get("k").unwrap().is_none());
    }

    #[test]
    fn test_memory_storage_injected_failure_is_one_shot() {
        let storage = MemoryStorage::new();
        storage.fail_next_write();
        assert!(storage.set("k", "v").is_err());
        storage.set("k", "v").unwrap();
        assert_eq!(storage.get("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn test_file_storage_roundtrip() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();

        assert!(storage.get("notes").unwrap().is_none());
        storage.set("notes", "[1,2,3]").unwrap();
        assert_eq!(storage.get("notes").unwrap().as_deref(), Some("[1,2,3]"));

        storage.remove("notes").unwrap();
        assert!(storage.get("notes").unwrap().is_none());
        // Removing again is fine.
        storage.remove("notes").unwrap();
    }

    #[test]
    fn test_file_storage_rejects_path_traversal_keys() {
        let dir = TempDir::new().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        assert!(storage.set("../escape", "x").is_err());
        assert!(storage.get("a/b").is_err());
        assert!(storage.set("", "x").is_err());
    }

    #[test]
    fn test_file_storage_persists_across_instances() {
        let dir = TempDir::new().unwrap();
        {
            let storage = FileStorage::new(dir.path()).unwrap();
            storage.set("jot_guest_notes", "[]").unwrap();
        }
        {
            let storage = FileStorage::new(dir.path()).unwrap();
            assert_eq!(
                storage.get("jot_guest_notes").unwrap().as_deref(),
                Some("[]")
            );
        }
    }
}

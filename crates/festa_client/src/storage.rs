//! Durable client-side key-value storage, the native stand-in for the
//! browser's local storage.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Key holding the serialized thread list.
pub const THREADS_KEY: &str = "chats";
/// Snapshots of thread data that could not be fully read.
pub const THREADS_BACKUP_KEY: &str = "chats.unreadable";
pub const CLIENT_ID_KEY: &str = "clientId";
pub const RECONNECT_TOKEN_KEY: &str = "reconnectToken";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage io error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("storage data is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// String key-value storage. Reads of missing keys yield `None`.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

pub type SharedStore = Arc<dyn KeyValueStore>;

/// All keys in one JSON object file, replaced atomically on every write.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn io_error(&self, source: io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn read_map(&self) -> Result<BTreeMap<String, String>, StoreError> {
        match fs::read(&self.path) {
            Ok(data) => Ok(serde_json::from_slice(&data)?),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(err) => Err(self.io_error(err)),
        }
    }

    fn write_map(&self, map: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
            }
        }
        let bytes = serde_json::to_vec_pretty(map)?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, bytes).map_err(|e| self.io_error(e))?;
        match fs::rename(&tmp_path, &self.path) {
            Ok(()) => Ok(()),
            Err(rename_err) => {
                if self.path.exists() {
                    fs::remove_file(&self.path).map_err(|e| self.io_error(e))?;
                    fs::rename(&tmp_path, &self.path).map_err(|e| self.io_error(e))
                } else {
                    Err(self.io_error(rename_err))
                }
            }
        }
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.read_map()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut map = self.read_map()?;
        map.insert(key.to_string(), value.to_string());
        self.write_map(&map)
    }
}

/// Process-local storage; clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<Mutex<BTreeMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        // A poisoned map is still a valid map.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_store_missing_file_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("storage.json"));
        assert_eq!(store.get(CLIENT_ID_KEY).unwrap(), None);
    }

    #[test]
    fn file_store_persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("storage.json");
        FileStore::new(&path).set(CLIENT_ID_KEY, "123").unwrap();
        FileStore::new(&path).set(RECONNECT_TOKEN_KEY, "tok").unwrap();

        let reopened = FileStore::new(&path);
        assert_eq!(reopened.get(CLIENT_ID_KEY).unwrap().as_deref(), Some("123"));
        assert_eq!(reopened.get(RECONNECT_TOKEN_KEY).unwrap().as_deref(), Some("tok"));

        reopened.set(RECONNECT_TOKEN_KEY, "newer").unwrap();
        assert_eq!(
            FileStore::new(&path).get(RECONNECT_TOKEN_KEY).unwrap().as_deref(),
            Some("newer")
        );
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn file_store_reports_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("storage.json");
        fs::write(&path, "not json").unwrap();
        assert!(matches!(
            FileStore::new(&path).get(THREADS_KEY),
            Err(StoreError::Json(_))
        ));
    }

    #[test]
    fn memory_store_clones_share_entries() {
        let store = MemoryStore::new();
        let other = store.clone();
        store.set(THREADS_KEY, "[]").unwrap();
        assert_eq!(other.get(THREADS_KEY).unwrap().as_deref(), Some("[]"));
    }
}

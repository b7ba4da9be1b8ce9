//! Local thread store: the whole thread list is read and written as one value.

use tracing::warn;

use crate::storage::{SharedStore, StoreError, THREADS_BACKUP_KEY, THREADS_KEY};
use crate::thread::Thread;

#[derive(Clone)]
pub struct ThreadStore {
    storage: SharedStore,
}

impl ThreadStore {
    pub fn new(storage: SharedStore) -> Self {
        Self { storage }
    }

    /// All persisted threads, most recent first. Records that do not parse
    /// are skipped; when any are, the raw value is first copied to
    /// [`THREADS_BACKUP_KEY`] so the next save cannot destroy it.
    pub fn load_all(&self) -> Vec<Thread> {
        let raw = match self.storage.get(THREADS_KEY) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(err) => {
                warn!("failed to read stored threads: {err}");
                return Vec::new();
            }
        };
        let records: Vec<serde_json::Value> = match serde_json::from_str(&raw) {
            Ok(records) => records,
            Err(err) => {
                warn!("stored threads are not a list, starting empty: {err}");
                self.back_up(&raw);
                return Vec::new();
            }
        };

        let total = records.len();
        let threads: Vec<Thread> = records
            .into_iter()
            .filter_map(|record| match serde_json::from_value(record) {
                Ok(thread) => Some(thread),
                Err(err) => {
                    warn!("skipping unreadable stored thread: {err}");
                    None
                }
            })
            .collect();
        if threads.len() < total {
            self.back_up(&raw);
        }
        threads
    }

    /// Append `raw` to the list of snapshots kept under [`THREADS_BACKUP_KEY`].
    fn back_up(&self, raw: &str) {
        let mut snapshots: Vec<String> = match self.storage.get(THREADS_BACKUP_KEY) {
            Ok(Some(existing)) => match serde_json::from_str(&existing) {
                Ok(list) => list,
                Err(_) => vec![existing],
            },
            Ok(None) => Vec::new(),
            Err(err) => {
                warn!("failed to read thread backup: {err}");
                Vec::new()
            }
        };
        snapshots.push(raw.to_string());
        let saved = serde_json::to_string(&snapshots)
            .map_err(StoreError::from)
            .and_then(|value| self.storage.set(THREADS_BACKUP_KEY, &value));
        if let Err(err) = saved {
            warn!("failed to back up unreadable threads: {err}");
        }
    }

    /// Replace the stored thread list.
    pub fn save_all(&self, threads: &[Thread]) -> Result<(), StoreError> {
        let raw = serde_json::to_string(threads)?;
        self.storage.set(THREADS_KEY, &raw)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use super::*;
    use crate::blocks::Block;
    use crate::storage::{KeyValueStore, MemoryStore};
    use crate::thread::{Message, ThreadId};

    #[test]
    fn empty_storage_loads_no_threads() {
        let store = ThreadStore::new(Arc::new(MemoryStore::new()));
        assert!(store.load_all().is_empty());
    }

    #[test]
    fn save_then_load_keeps_order_and_messages() {
        let store = ThreadStore::new(Arc::new(MemoryStore::new()));
        let mut newer = Thread::new(ThreadId::from("2"), Utc::now());
        newer.push(Message::user(vec![Block::text("hello")]));
        let older = Thread::new(ThreadId::from("1"), Utc::now());

        store.save_all(&[newer.clone(), older.clone()]).unwrap();
        assert_eq!(store.load_all(), vec![newer, older]);
    }

    #[test]
    fn unreadable_threads_load_as_empty_and_are_backed_up() {
        let memory = MemoryStore::new();
        memory.set(THREADS_KEY, "{broken").unwrap();
        let store = ThreadStore::new(Arc::new(memory.clone()));
        assert!(store.load_all().is_empty());

        let backup = memory.get(THREADS_BACKUP_KEY).unwrap().unwrap();
        let snapshots: Vec<String> = serde_json::from_str(&backup).unwrap();
        assert_eq!(snapshots, vec!["{broken".to_string()]);
    }

    #[test]
    fn one_bad_record_does_not_hide_the_others() {
        let memory = MemoryStore::new();
        let raw = r#"[
            {"id":"2","title":"Keep me","messages":[],"createdAt":"2024-05-01T10:00:00Z"},
            {"id":"1","title":"Old record","messages":[]}
        ]"#;
        memory.set(THREADS_KEY, raw).unwrap();
        let store = ThreadStore::new(Arc::new(memory.clone()));

        let threads = store.load_all();
        assert_eq!(threads.len(), 1);
        assert_eq!(threads[0].title, "Keep me");

        let backup = memory.get(THREADS_BACKUP_KEY).unwrap().unwrap();
        let snapshots: Vec<String> = serde_json::from_str(&backup).unwrap();
        assert_eq!(snapshots, vec![raw.to_string()]);
    }

    #[test]
    fn readable_threads_leave_no_backup() {
        let memory = MemoryStore::new();
        let store = ThreadStore::new(Arc::new(memory.clone()));
        store
            .save_all(&[Thread::new(ThreadId::from("1"), Utc::now())])
            .unwrap();
        assert_eq!(store.load_all().len(), 1);
        assert_eq!(memory.get(THREADS_BACKUP_KEY).unwrap(), None);
    }
}

//! File-based storage adapter for persistent caches.

use crate::adapter::StorageAdapter;
use crate::error::{StoreError, StoreResult};
use fs2::FileExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// A file-based storage adapter.
///
/// The entire store lives in one JSON document, read on open and
/// rewritten atomically (temp file + rename) on every mutation. An
/// advisory lock held for the adapter's lifetime keeps a second process
/// from opening the same store.
///
/// # Thread Safety
///
/// This adapter is thread-safe; internal locking serializes access.
#[derive(Debug)]
pub struct FileAdapter {
    path: PathBuf,
    // The lock file handle must stay alive to hold the advisory lock.
    _lock: File,
    records: Mutex<HashMap<String, serde_json::Value>>,
}

impl FileAdapter {
    /// Opens or creates a file adapter at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Locked`] if another process holds the store,
    /// or an I/O error if the document cannot be read or parsed.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let lock_path = path.with_extension("lock");
        let lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;
        lock.try_lock_exclusive().map_err(|_| StoreError::Locked)?;

        let records = if path.exists() {
            let mut raw = String::new();
            File::open(path)?.read_to_string(&mut raw)?;
            if raw.is_empty() {
                HashMap::new()
            } else {
                serde_json::from_str(&raw)
                    .map_err(|e| StoreError::corrupt_record(path.display().to_string(), e.to_string()))?
            }
        } else {
            HashMap::new()
        };

        Ok(Self {
            path: path.to_path_buf(),
            _lock: lock,
            records: Mutex::new(records),
        })
    }

    /// Returns the path of the underlying document.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, records: &HashMap<String, serde_json::Value>) -> StoreResult<()> {
        let serialized = serde_json::to_string(records)
            .map_err(|e| StoreError::serialization(e.to_string()))?;

        let tmp_path = self.path.with_extension("tmp");
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(serialized.as_bytes())?;
        tmp.sync_all()?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

impl StorageAdapter for FileAdapter {
    fn load(&self, key: &str) -> StoreResult<Option<serde_json::Value>> {
        Ok(self.records.lock().get(key).cloned())
    }

    fn store(&self, key: &str, value: serde_json::Value) -> StoreResult<()> {
        let mut records = self.records.lock();
        records.insert(key.to_string(), value);
        self.persist(&records)
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        let mut records = self.records.lock();
        if records.remove(key).is_some() {
            self.persist(&records)?;
        }
        Ok(())
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        Ok(self.records.lock().keys().cloned().collect())
    }

    fn clear(&self) -> StoreResult<()> {
        let mut records = self.records.lock();
        records.clear();
        self.persist(&records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn file_roundtrip_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        {
            let adapter = FileAdapter::open(&path).unwrap();
            adapter.store("Game_a", json!([{"score": 1}])).unwrap();
        }

        let adapter = FileAdapter::open(&path).unwrap();
        assert_eq!(
            adapter.load("Game_a").unwrap(),
            Some(json!([{"score": 1}]))
        );
    }

    #[test]
    fn file_second_open_is_locked() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        let _first = FileAdapter::open(&path).unwrap();
        let second = FileAdapter::open(&path);
        assert!(matches!(second, Err(StoreError::Locked)));
    }

    #[test]
    fn file_remove_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        {
            let adapter = FileAdapter::open(&path).unwrap();
            adapter.store("a", json!(1)).unwrap();
            adapter.remove("a").unwrap();
        }

        let adapter = FileAdapter::open(&path).unwrap();
        assert_eq!(adapter.load("a").unwrap(), None);
    }

    #[test]
    fn file_corrupt_document_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "not json").unwrap();

        assert!(matches!(
            FileAdapter::open(&path),
            Err(StoreError::CorruptRecord { .. })
        ));
    }
}

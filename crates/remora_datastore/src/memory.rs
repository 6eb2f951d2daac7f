//! In-memory storage adapter for testing.

use crate::adapter::StorageAdapter;
use crate::error::StoreResult;
use parking_lot::RwLock;
use std::collections::HashMap;

/// An in-memory storage adapter.
///
/// This adapter keeps all records in memory and is suitable for:
/// - Unit tests
/// - Integration tests
/// - Ephemeral caches that don't need persistence
///
/// # Thread Safety
///
/// This adapter is thread-safe and can be shared across threads.
#[derive(Debug, Default)]
pub struct MemoryAdapter {
    records: RwLock<HashMap<String, serde_json::Value>>,
}

impl MemoryAdapter {
    /// Creates a new empty in-memory adapter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an adapter with pre-existing records.
    ///
    /// Useful for testing recovery and migration scenarios.
    #[must_use]
    pub fn with_records(records: HashMap<String, serde_json::Value>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }

    /// Returns a copy of every record in the adapter.
    ///
    /// Useful for testing and debugging.
    #[must_use]
    pub fn contents(&self) -> HashMap<String, serde_json::Value> {
        self.records.read().clone()
    }
}

impl StorageAdapter for MemoryAdapter {
    fn load(&self, key: &str) -> StoreResult<Option<serde_json::Value>> {
        Ok(self.records.read().get(key).cloned())
    }

    fn store(&self, key: &str, value: serde_json::Value) -> StoreResult<()> {
        self.records.write().insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        self.records.write().remove(key);
        Ok(())
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        Ok(self.records.read().keys().cloned().collect())
    }

    fn clear(&self) -> StoreResult<()> {
        self.records.write().clear();
        Ok(())
    }
}

//! Storage adapter trait definition.

use crate::error::StoreResult;

/// A flat, string-keyed JSON store.
///
/// Adapters are **opaque key/value stores**. The datastore owns all key
/// scheme and record format interpretation — adapters do not understand
/// identity keys, pin sets, or object JSON.
///
/// # Invariants
///
/// - `load` returns exactly the value most recently stored under the key
/// - `keys` returns every key currently holding a value, in no particular
///   order
/// - Adapters must be `Send + Sync`; each individual call is atomic, but
///   no atomicity is promised across calls
///
/// # Implementors
///
/// - [`super::MemoryAdapter`] — for tests and ephemeral caches
/// - [`super::FileAdapter`] — for persistent storage
pub trait StorageAdapter: Send + Sync {
    /// Loads the value stored under `key`, if any.
    fn load(&self, key: &str) -> StoreResult<Option<serde_json::Value>>;

    /// Stores `value` under `key`, replacing any existing value.
    fn store(&self, key: &str, value: serde_json::Value) -> StoreResult<()>;

    /// Removes the value under `key`. Removing a missing key is not an
    /// error.
    fn remove(&self, key: &str) -> StoreResult<()>;

    /// Returns all keys currently holding a value.
    fn keys(&self) -> StoreResult<Vec<String>>;

    /// Removes every value in the store.
    fn clear(&self) -> StoreResult<()>;
}

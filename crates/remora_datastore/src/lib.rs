//! # Remora Datastore
//!
//! Flat key/value offline cache with pin sets.
//!
//! This crate provides:
//! - [`StorageAdapter`] — the persistence seam: a string-keyed JSON store
//! - [`MemoryAdapter`] — in-memory adapter for tests and ephemeral caches
//! - [`FileAdapter`] — single-document persistent adapter with advisory
//!   locking and atomic rewrite
//! - [`LocalDatastore`] — identity records, the default pin set, named
//!   pin sets, recursive pinning, and record lifecycle
//!
//! ## Consistency
//!
//! The datastore is a single global resource with **no transactional
//! isolation**: an evaluation that interleaves with a settling pin or
//! unpin may observe the store mid-change. This is an accepted
//! weak-consistency trade-off; callers needing read-your-writes across a
//! multi-step sequence must serialize those steps themselves.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod adapter;
mod datastore;
mod error;
mod file;
mod keys;
mod memory;

pub use adapter::StorageAdapter;
pub use datastore::LocalDatastore;
pub use error::{StoreError, StoreResult};
pub use file::FileAdapter;
pub use keys::{identity_key, pin_set_key, DEFAULT_PIN_KEY, PIN_KEY_PREFIX};
pub use memory::MemoryAdapter;

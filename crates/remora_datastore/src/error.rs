//! Error types for the offline datastore.

use std::io;
use thiserror::Error;

/// Result type for datastore operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in the offline cache.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Underlying adapter I/O error.
    #[error("datastore I/O error: {0}")]
    Io(#[from] io::Error),

    /// Another process holds the store's advisory lock.
    #[error("datastore locked: another process has exclusive access")]
    Locked,

    /// A stored record failed to parse or had the wrong shape.
    #[error("corrupt record at key {key}: {message}")]
    CorruptRecord {
        /// Key of the offending record.
        key: String,
        /// Description of the corruption.
        message: String,
    },

    /// An object graph reached an identity-less object that cannot be
    /// referenced by a pointer.
    #[error("cannot create a pointer to an unsaved object of class {class_name}")]
    UnsavedPointer {
        /// Class of the offending object.
        class_name: String,
    },

    /// Serialization of a record failed.
    #[error("record serialization failed: {message}")]
    Serialization {
        /// Description of the failure.
        message: String,
    },

    /// Value codec error.
    #[error(transparent)]
    Value(#[from] remora_value::ValueError),
}

impl StoreError {
    /// Creates a corrupt record error.
    pub fn corrupt_record(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::CorruptRecord {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Creates a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }
}

//! Error types for save/fetch reconciliation.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// One failed member of a batch operation.
#[derive(Debug)]
pub struct ObjectFailure {
    /// Identity key of the object that failed.
    pub key: String,
    /// The member's failure.
    pub error: SyncError,
}

/// Errors raised by the save, fetch, and destroy paths.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The transport failed to complete a round trip.
    #[error("transport error: {message}")]
    Transport {
        /// Description from the transport layer.
        message: String,
    },

    /// The transport is not connected.
    #[error("transport not connected")]
    NotConnected,

    /// A save graph contains mutually unsaved objects.
    #[error("cannot save a batch with a cycle of unsaved objects")]
    CannotSaveCycle,

    /// A payload referenced an unsaved object whose id never resolved.
    #[error("cannot create a pointer to an unsaved object of class {class_name}")]
    CannotPointToUnsaved {
        /// Class of the offending object.
        class_name: String,
    },

    /// A batch operation partially failed; unaffected members completed.
    #[error("{} batch member(s) failed", failures.len())]
    Aggregate {
        /// One entry per failed member, tagged with its identity key.
        failures: Vec<ObjectFailure>,
    },

    /// State-tracking error.
    #[error(transparent)]
    State(#[from] remora_state::StateError),

    /// Operation algebra error.
    #[error(transparent)]
    Op(#[from] remora_ops::OpError),

    /// Value codec error.
    #[error(transparent)]
    Value(#[from] remora_value::ValueError),

    /// Offline datastore error.
    #[error(transparent)]
    Store(#[from] remora_datastore::StoreError),

    /// Offline query error.
    #[error(transparent)]
    Query(#[from] remora_query::QueryError),
}

impl SyncError {
    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// True if retrying the operation could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::NotConnected)
    }
}

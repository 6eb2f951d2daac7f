//! Error types for state tracking.

use thiserror::Error;

/// Result type for state operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors raised by identity and state-store operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateError {
    /// An attribute name is reserved or structurally invalid.
    #[error("invalid attribute name: {name}")]
    InvalidAttributeName {
        /// The offending name.
        name: String,
    },

    /// An operation referenced a state slot that does not exist.
    #[error("no state for identity {key}")]
    UnknownState {
        /// The identity key that was looked up.
        key: String,
    },

    /// An operation required a server id the object does not have yet.
    #[error("object of class {class_name} has no server id")]
    MissingObjectId {
        /// Class of the offending object.
        class_name: String,
    },

    /// A pending layer pop was attempted with no retired layer available.
    #[error("no pending layer to retire for identity {key}")]
    NoPendingLayer {
        /// The identity key.
        key: String,
    },

    /// Operation algebra error (merge conflict, invalid target).
    #[error(transparent)]
    Op(#[from] remora_ops::OpError),

    /// Value codec error.
    #[error(transparent)]
    Value(#[from] remora_value::ValueError),
}

impl StateError {
    /// Creates an invalid attribute name error.
    pub fn invalid_attribute_name(name: impl Into<String>) -> Self {
        Self::InvalidAttributeName { name: name.into() }
    }

    /// Creates an unknown state error.
    pub fn unknown_state(key: impl Into<String>) -> Self {
        Self::UnknownState { key: key.into() }
    }
}

//! Error types for the operation algebra.

use thiserror::Error;

/// Result type for operation algebra calls.
pub type OpResult<T> = Result<T, OpError>;

/// Errors raised while applying or merging operations.
///
/// All of these are synchronous programming errors: retrying cannot fix
/// them, and none of them leave partially merged state behind.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OpError {
    /// Two operations on the same attribute slot cannot compose.
    #[error("cannot merge {new_kind} op with previous {previous_kind} op")]
    MergeConflict {
        /// Kind of the newer operation.
        new_kind: &'static str,
        /// Kind of the operation already in the slot.
        previous_kind: &'static str,
    },

    /// Increment applied to a value that is neither absent nor numeric.
    #[error("cannot increment a value of type {found}")]
    InvalidIncrementTarget {
        /// Type name of the offending prior value.
        found: &'static str,
    },

    /// An array operation applied to a non-array value.
    #[error("cannot apply {op_kind} op to a value of type {found}")]
    InvalidArrayTarget {
        /// Kind of the array operation.
        op_kind: &'static str,
        /// Type name of the offending prior value.
        found: &'static str,
    },

    /// A relation operation applied to a non-relation value.
    #[error("cannot apply a relation op to a value of type {found}")]
    InvalidRelationTarget {
        /// Type name of the offending prior value.
        found: &'static str,
    },

    /// Objects of more than one class mixed into a single relation op.
    #[error("relation op targets class {expected}, got an object of class {found}")]
    RelationClassMismatch {
        /// Class fixed by the first object seen.
        expected: String,
        /// Class of the offending object.
        found: String,
    },

    /// A relation op member has no server id yet.
    #[error("cannot add or remove an unsaved object from a relation")]
    UnsavedRelationMember,

    /// A wire payload did not describe a valid operation.
    #[error("invalid op wire payload: {message}")]
    InvalidWire {
        /// Description of the problem.
        message: String,
    },

    /// A value inside the operation failed to encode or decode.
    #[error("value codec error: {0}")]
    Value(#[from] remora_value::ValueError),
}

impl OpError {
    /// Creates a merge conflict error.
    pub fn merge_conflict(new_kind: &'static str, previous_kind: &'static str) -> Self {
        Self::MergeConflict {
            new_kind,
            previous_kind,
        }
    }

    /// Creates an invalid wire payload error.
    pub fn invalid_wire(message: impl Into<String>) -> Self {
        Self::InvalidWire {
            message: message.into(),
        }
    }
}

//! Error types for query evaluation.

use thiserror::Error;

/// Result type for query operations.
pub type QueryResult<T> = Result<T, QueryError>;

/// Errors raised while building or evaluating a query.
///
/// Malformed queries fail when executed, never silently.
#[derive(Error, Debug)]
pub enum QueryError {
    /// A regex constraint carried an unknown modifier flag.
    #[error("invalid regex modifiers: {options}")]
    InvalidRegexOptions {
        /// The offending `$options` string.
        options: String,
    },

    /// A regex constraint failed to compile.
    #[error("invalid regex pattern: {message}")]
    InvalidRegexPattern {
        /// Compiler diagnostic.
        message: String,
    },

    /// A polygon constraint was not a valid polygon.
    #[error("malformed polygon: {message}")]
    MalformedPolygon {
        /// Description of the problem.
        message: String,
    },

    /// Ordering was requested on a key that cannot be sorted.
    #[error("cannot sort by key: {key}")]
    UnsupportedSortKey {
        /// The offending sort key.
        key: String,
    },

    /// A `where` tree used an operator the offline engine does not
    /// support.
    #[error("unsupported query operator: {operator}")]
    UnsupportedOperator {
        /// The offending operator.
        operator: String,
    },

    /// A constraint value had the wrong shape.
    #[error("invalid query constraint: {message}")]
    InvalidConstraint {
        /// Description of the problem.
        message: String,
    },

    /// `each` was called on a query with caller-specified ordering or
    /// windowing, which its internal id-pagination cannot honor.
    #[error("cannot iterate on a query with sort, skip, or limit")]
    EachWithConstraints,

    /// Datastore error while loading candidates.
    #[error(transparent)]
    Store(#[from] remora_datastore::StoreError),

    /// Value codec error while decoding records or constraints.
    #[error(transparent)]
    Value(#[from] remora_value::ValueError),
}

impl QueryError {
    /// Creates a malformed polygon error.
    pub fn malformed_polygon(message: impl Into<String>) -> Self {
        Self::MalformedPolygon {
            message: message.into(),
        }
    }

    /// Creates an invalid constraint error.
    pub fn invalid_constraint(message: impl Into<String>) -> Self {
        Self::InvalidConstraint {
            message: message.into(),
        }
    }

    /// Creates an unsupported operator error.
    pub fn unsupported_operator(operator: impl Into<String>) -> Self {
        Self::UnsupportedOperator {
            operator: operator.into(),
        }
    }
}

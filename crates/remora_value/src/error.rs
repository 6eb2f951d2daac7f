//! Error types for the value crate.

use thiserror::Error;

/// Result type for value operations.
pub type ValueResult<T> = Result<T, ValueError>;

/// Errors that can occur while encoding or decoding values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    /// A tagged wire payload was structurally invalid.
    #[error("invalid wire payload: {message}")]
    InvalidPayload {
        /// Description of the structural error.
        message: String,
    },

    /// A `__type` tag named a type this codec does not know.
    #[error("unknown wire type: {type_name}")]
    UnknownWireType {
        /// The unrecognized tag.
        type_name: String,
    },

    /// A date string failed to parse as ISO-8601.
    #[error("invalid date: {raw}")]
    InvalidDate {
        /// The offending string.
        raw: String,
    },

    /// A base64 payload failed to decode.
    #[error("invalid base64 payload")]
    InvalidBase64,

    /// A geo point had out-of-range coordinates.
    #[error("invalid geo point: {message}")]
    InvalidGeoPoint {
        /// Description of the range violation.
        message: String,
    },

    /// A numeric value cannot be represented in JSON (NaN or infinity).
    #[error("non-finite number cannot be encoded")]
    NonFiniteNumber,
}

impl ValueError {
    /// Creates an invalid payload error.
    pub fn invalid_payload(message: impl Into<String>) -> Self {
        Self::InvalidPayload {
            message: message.into(),
        }
    }

    /// Creates an unknown wire type error.
    pub fn unknown_wire_type(type_name: impl Into<String>) -> Self {
        Self::UnknownWireType {
            type_name: type_name.into(),
        }
    }

    /// Creates an invalid date error.
    pub fn invalid_date(raw: impl Into<String>) -> Self {
        Self::InvalidDate { raw: raw.into() }
    }

    /// Creates an invalid geo point error.
    pub fn invalid_geo_point(message: impl Into<String>) -> Self {
        Self::InvalidGeoPoint {
            message: message.into(),
        }
    }
}

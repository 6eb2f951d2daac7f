//! # Remora Value
//!
//! Decoded value model and REST JSON codec for Remora.
//!
//! This crate provides:
//! - The dynamic [`Value`] type mirroring what the document server stores
//! - Typed wrappers for the tagged wire shapes (pointers, dates, bytes,
//!   geo points, relations, nested objects)
//! - Encoding between in-memory values and the `{"__type": ...}` wire JSON
//! - Sensitive-field stripping for records persisted offline
//!
//! ## Wire format
//!
//! Scalars map directly onto JSON. Everything the server distinguishes from
//! plain JSON travels as a tagged map:
//!
//! ```json
//! {"__type": "Pointer", "className": "Game", "objectId": "xWMyZ4YEGZ"}
//! {"__type": "Date", "iso": "2024-07-12T08:30:00.000Z"}
//! {"__type": "Bytes", "base64": "aGVsbG8="}
//! {"__type": "GeoPoint", "latitude": 40.0, "longitude": -30.0}
//! {"__type": "Relation", "className": "Player"}
//! {"__type": "Object", "className": "Game", "objectId": "...", ...attrs}
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decode;
mod encode;
mod error;
mod value;

pub use decode::{decode, decode_attributes, decode_object};
pub use encode::{encode, encode_attributes, strip_sensitive, EncodedObject};
pub use error::{ValueError, ValueResult};
pub use value::{GeoPoint, ObjectData, Pointer, Relation, Value};

/// Attribute names stripped from records before they are persisted offline.
pub const SENSITIVE_FIELDS: &[&str] = &["password", "sessionToken", "authData"];

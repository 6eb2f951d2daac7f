//! # Remora Ops
//!
//! Field mutation operations and their merge algebra.
//!
//! Every local mutation of an object attribute is captured as an immutable
//! [`Op`] value with two behaviors:
//!
//! - [`Op::apply_to`] — the effect on an estimated attribute value (server
//!   data folded through all pending layers)
//! - [`Op::merge_with`] — how a newer mutation composes with whatever
//!   mutation already occupies the same attribute slot in the current
//!   pending layer
//!
//! Incompatible combinations (incrementing an array, adding to a deleted
//! relation) are hard synchronous errors: they signal caller logic bugs,
//! not recoverable network conditions, and they never partially mutate
//! state.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod op;
mod wire;

pub use error::{OpError, OpResult};
pub use op::{Op, RelationOp};
pub use wire::{op_from_wire, op_to_wire};

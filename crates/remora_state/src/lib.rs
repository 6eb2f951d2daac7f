//! # Remora State
//!
//! Object identity and client-side change tracking.
//!
//! This crate provides:
//! - [`Identity`] — the `(class name, id)` pair naming a logical record,
//!   with process-unique local ids for objects that have never been saved
//! - [`ObjectState`] — server-confirmed data, the stack of pending
//!   operation layers, and the container snapshot cache for one identity
//! - [`StateArena`] — the explicit, deterministically keyed store of
//!   object states, with alias tracking for local-to-server id migration
//! - [`RemoraObject`] — the application-facing proxy whose mutators build
//!   operations and feed them into the pending layer
//! - [`ClassRegistry`] — class name to behavior mapping consulted at
//!   decode time
//!
//! ## Layering model
//!
//! Every mutation merges into the *newest* pending layer. Beginning a save
//! pushes a fresh empty layer, freezing the previous one as the save's
//! snapshot. Retiring a save pops the *oldest* layer: into server data on
//! success, or folded into the next layer on failure so nothing is lost.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod arena;
mod error;
mod identity;
mod object;
mod object_state;
mod registry;

pub use arena::{InstanceMode, StateArena};
pub use error::{StateError, StateResult};
pub use identity::{Identity, LocalIdAllocator, ObjectId, RESERVED_ATTRIBUTES};
pub use object::RemoraObject;
pub use object_state::ObjectState;
pub use registry::{ClassBehavior, ClassRegistry};

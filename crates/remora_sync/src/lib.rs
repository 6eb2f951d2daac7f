//! # Remora Sync
//!
//! Save ordering, batching, and reconciliation.
//!
//! This crate provides:
//! - [`TaskQueue`] — strict per-identity FIFO ordering of saves
//! - [`RestTransport`] — the seam to the HTTP layer, with a scripted
//!   [`MockTransport`] and an in-process [`LoopbackTransport`]
//! - Object-graph batching: unsaved children first, twenty objects per
//!   request, cycle detection
//! - [`Context`] — the client surface tying the state arena, offline
//!   datastore, query evaluator, and transport together
//!
//! ## Key invariants
//!
//! - Two saves of one identity reach the network in issue order and
//!   apply their responses in that order
//! - A failed save folds its pending layer forward; the mutation is
//!   retried on the next save, never lost, and the error still surfaces
//! - Batch partial failure completes unaffected members and reports one
//!   sub-error per failed member

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod batch;
mod client;
mod error;
mod loopback;
mod queue;
mod transport;

pub use batch::MAX_BATCH_SIZE;
pub use client::Context;
pub use error::{ObjectFailure, SyncError, SyncResult};
pub use loopback::LoopbackTransport;
pub use queue::{LaneGuard, TaskQueue};
pub use transport::{MockTransport, RestTransport, SaveCommand, SaveOutcome};

//! # Remora Query
//!
//! In-memory query evaluation over the offline datastore.
//!
//! This crate re-implements the remote engine's filtering, sorting, and
//! include semantics entirely in memory over cached JSON:
//!
//! - [`QueryDescription`] — the declarative query shape, mirroring the
//!   remote query JSON (`where` predicate tree, `order`, `limit`, `skip`,
//!   `keys`, `include`)
//! - [`QueryEvaluator`] — loads candidates from a pin-set source, decodes
//!   them, filters, applies a stable multi-key sort, windows, projects,
//!   and hydrates include paths with cycle breaking
//!
//! Sub-queries (`$inQuery`, `$notInQuery`, `$select`, `$dontSelect`)
//! recursively evaluate against the same offline source.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod compare;
mod description;
mod error;
mod evaluate;
mod include;
mod predicate;
mod sort;

pub use description::{QueryDescription, QuerySource, SortKey};
pub use error::{QueryError, QueryResult};
pub use evaluate::QueryEvaluator;

//! # db-query-tagger-ports
//!
//! Boundary traits between the lookup core and the outside world: SQL
//! drivers, structured logging, and telemetry.
//!
//! This crate depends only on `domain` and `shared`.

use std::future::Future;
use std::pin::Pin;

/// Boxed future used by port traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Returns the ports crate version.
#[must_use]
pub const fn ports_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub mod logger;
pub mod sql;
pub mod telemetry;

pub use logger::*;
pub use sql::*;
pub use telemetry::*;

// Re-export domain types used in port signatures, so adapter crates can
// implement ports without importing the domain crate for them.
pub use db_query_tagger_domain::{BoundParam, DatabaseType, LookupFailure, ScalarValue};

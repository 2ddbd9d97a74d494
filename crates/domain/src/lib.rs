//! # db-query-tagger-domain
//!
//! Value objects for SQL lookup tag enrichment.
//!
//! - **Metric** - `Metric`, `FieldValue`, and the `MetricTags` capability
//! - **Scalars** - `ScalarValue` and its canonical tag rendering
//! - **Lookup** - `LookupPlan`, `LookupOutcome`, `LookupFailure`
//! - **Database** - `DatabaseType` and its accepted identifiers
//!
//! ## Dependency Rules
//!
//! - Depends only on `shared` crate
//! - No I/O

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub use db_query_tagger_shared::shared_crate_version;

pub mod database;
pub mod lookup;
pub mod metric;
pub mod outcome;
pub mod plan;
pub mod scalar;

pub use database::{DatabaseType, DatabaseTypeError};
pub use lookup::LookupFailure;
pub use metric::{FieldValue, Metric, MetricTags};
pub use outcome::{BoundParam, LookupOutcome};
pub use plan::LookupPlan;
pub use scalar::ScalarValue;

/// Returns the domain crate version.
#[must_use]
pub const fn domain_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

//! # db-query-tagger-app
//!
//! The lookup core: bind tags to query parameters, run the prepared query
//! once per metric, and merge the returned row back into the metric's tags.
//! This crate depends on `ports`, `domain`, and `shared`.

pub mod binder;
pub mod enrich_batch;
pub mod executor;
pub mod merger;

pub use binder::bind_parameters;
pub use enrich_batch::{
    EnrichBatchDeps, EnrichBatchInput, EnrichBatchOutput, EnrichStats, enrich_batch,
};
pub use executor::execute_lookup;
pub use merger::{MergeStatus, merge_outcome};

/// Returns the app crate version.
#[must_use]
pub const fn app_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

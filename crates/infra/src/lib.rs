//! # db-query-tagger-infra
//!
//! Composition root: driver selection, the processor plugin registry, the
//! JSON-lines runner, and local CLI orchestration. This crate depends on
//! `app`, `adapters`, `config`, and `shared`.

/// Local CLI orchestration helpers.
pub mod cli_local;
/// Config loading helpers used by CLI surfaces.
pub mod config_check;
/// SQL driver selection.
pub mod driver_registry;
/// Environment validation helpers used by CLI surfaces.
pub mod env_check;
/// Logger and telemetry wiring.
pub mod observability;
/// Host plugin contract and registry.
pub mod processor;
/// JSON-lines batch runner.
pub mod runner;
/// The `db_query_tagger` processor.
pub mod tagger;

pub use cli_local::{ApplyOptions, run_apply_local};
pub use config_check::{InstanceSummary, check_config, load_configs, load_effective_config_toml};
pub use driver_registry::{DriverRegistry, driver_feature};
pub use env_check::{InfraError, InfraResult, validate_env_parsing};
pub use observability::Observability;
pub use processor::{PluginInfo, Processor, ProcessorRegistry, ProcessorServices};
pub use runner::{DEFAULT_BATCH_SIZE, RunSummary, run_jsonl};
pub use tagger::DbQueryTagger;

/// Returns the infra crate version.
#[must_use]
pub const fn infra_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

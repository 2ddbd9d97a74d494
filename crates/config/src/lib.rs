//! # db-query-tagger-config
//!
//! Configuration schema, validation, loading, and env overrides for the
//! `db_query_tagger` processor. This crate depends on `domain` and `shared`
//! only.

/// Environment variable parsing and merging.
pub mod env;
/// Config loading helpers (file + env).
pub mod load;
/// Plugin identity and sample configuration.
pub mod sample;
/// Connection-string sanitizing.
pub mod sanitize;
/// Configuration schema types and helpers.
pub mod schema;

pub use env::{
    ENV_DATABASE, ENV_DATABASE_TYPE, ENV_QUERY, ENV_QUERY_TIMEOUT_MS,
    ENV_REMOVE_QUERY_PARAMS_TAGS, EnvParseError, TaggerEnv, apply_env_overrides,
};
pub use load::{
    load_tagger_configs_from_path, load_tagger_configs_from_str, load_tagger_configs_std_env,
    to_pretty_toml,
};
pub use sample::{DESCRIPTION, PLUGIN_NAME, SAMPLE_CONFIG};
pub use sanitize::sanitize_connection_string;
pub use schema::{
    ConfigSchemaError, DEFAULT_QUERY_TIMEOUT_MS, TaggerConfig, ValidatedTaggerConfig,
    parse_tagger_config_json, parse_tagger_config_toml,
};

/// Returns the config crate version.
#[must_use]
pub const fn config_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

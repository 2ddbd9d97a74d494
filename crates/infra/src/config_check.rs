//! Config loading helpers for CLI surfaces.

use crate::InfraResult;
use crate::driver_registry::DriverRegistry;
use db_query_tagger_config::{
    TaggerEnv, ValidatedTaggerConfig, load_tagger_configs_from_path, sanitize_connection_string,
    to_pretty_toml,
};
use db_query_tagger_domain::DatabaseType;
use db_query_tagger_shared::ErrorEnvelope;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// One-line view of a validated tagger instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSummary {
    /// Position in the config file.
    pub index: usize,
    /// Database family.
    pub database_type: DatabaseType,
    /// Sanitized connection string.
    pub database: String,
    /// Number of parameter tags.
    pub param_tags: usize,
    /// Number of result tags.
    pub result_tags: usize,
    /// Whether this build has a driver for the family.
    pub driver_enabled: bool,
}

/// Load and validate every tagger instance in `path` with env overrides.
pub fn load_configs(
    path: &Path,
    env: &BTreeMap<String, String>,
) -> InfraResult<Vec<ValidatedTaggerConfig>> {
    let env = TaggerEnv::from_map(env).map_err(ErrorEnvelope::from)?;
    load_tagger_configs_from_path(path, &env)
}

/// Validate a config file and summarize each instance.
pub fn check_config(
    path: &Path,
    env: &BTreeMap<String, String>,
    drivers: &DriverRegistry,
) -> InfraResult<Vec<InstanceSummary>> {
    let configs = load_configs(path, env)?;
    Ok(configs
        .iter()
        .enumerate()
        .map(|(index, config)| {
            let raw = config.as_ref();
            InstanceSummary {
                index,
                database_type: config.database_type(),
                database: sanitize_connection_string(&raw.database),
                param_tags: raw.query_params_tags.len(),
                result_tags: raw.query_results_tags.len(),
                driver_enabled: drivers.contains(config.database_type()),
            }
        })
        .collect())
}

/// Load and validate the effective config, returning sanitized TOML.
pub fn load_effective_config_toml(
    path: &Path,
    env: &BTreeMap<String, String>,
) -> InfraResult<String> {
    let configs = load_configs(path, env)?;
    to_pretty_toml(&configs)
}

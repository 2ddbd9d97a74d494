//! Environment validation helpers for CLI surfaces.

use db_query_tagger_config::{TaggerConfig, TaggerEnv, apply_env_overrides};
use db_query_tagger_shared::ErrorEnvelope;
use std::collections::BTreeMap;

/// Infra-level error type (shared error envelope).
pub type InfraError = ErrorEnvelope;

/// Infra-level result type.
pub type InfraResult<T> = Result<T, InfraError>;

/// Validate that the provided env overrides parse and merge into a config.
pub fn validate_env_parsing(env: &BTreeMap<String, String>) -> InfraResult<()> {
    let parsed = TaggerEnv::from_map(env).map_err(ErrorEnvelope::from)?;
    let mut config = TaggerConfig::default();
    apply_env_overrides(&mut config, &parsed);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use db_query_tagger_config::ENV_QUERY_TIMEOUT_MS;

    #[test]
    fn bad_timeout_override_is_rejected() {
        let mut env = BTreeMap::new();
        env.insert(ENV_QUERY_TIMEOUT_MS.to_owned(), "soon".to_owned());
        assert!(validate_env_parsing(&env).is_err());

        env.insert(ENV_QUERY_TIMEOUT_MS.to_owned(), "250".to_owned());
        assert!(validate_env_parsing(&env).is_ok());
    }
}

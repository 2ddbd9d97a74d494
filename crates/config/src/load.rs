//! Config loading helpers (file + env).
//!
//! A TOML file holds either one flat tagger table or a host-style document
//! with one or more `[[processors.db_query_tagger]]` tables. JSON files hold
//! one flat object. Env overrides are applied to every instance before
//! validation.

use crate::{PLUGIN_NAME, TaggerConfig, TaggerEnv, ValidatedTaggerConfig, apply_env_overrides};
use crate::schema::ConfigSchemaError;
use db_query_tagger_shared::{ErrorClass, ErrorCode, ErrorEnvelope};
use serde::Serialize;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConfigFormat {
    Json,
    Toml,
}

/// Load every tagger instance from a file, applying env overrides.
pub fn load_tagger_configs_from_path(
    path: &Path,
    env: &TaggerEnv,
) -> Result<Vec<ValidatedTaggerConfig>, ErrorEnvelope> {
    let text = read_config_file(path)?;
    let format = detect_config_format(path)?;
    let configs = load_from_text(&text, format, env)
        .map_err(|error| error.with_metadata("path", path.to_string_lossy().to_string()))?;
    tracing::debug!(
        path = %path.display(),
        instances = configs.len(),
        env_overrides = !env.is_empty(),
        "loaded tagger config"
    );
    Ok(configs)
}

/// Load every tagger instance from a file and the process environment.
pub fn load_tagger_configs_std_env(path: &Path) -> Result<Vec<ValidatedTaggerConfig>, ErrorEnvelope> {
    let env = TaggerEnv::from_std_env().map_err(ErrorEnvelope::from)?;
    load_tagger_configs_from_path(path, &env)
}

/// Parse config text in the named format (`toml` or `json`), apply env
/// overrides, and validate each instance.
pub fn load_tagger_configs_from_str(
    input: &str,
    format: &str,
    env: &TaggerEnv,
) -> Result<Vec<ValidatedTaggerConfig>, ErrorEnvelope> {
    let format = match format {
        "toml" => ConfigFormat::Toml,
        "json" => ConfigFormat::Json,
        other => return Err(unsupported_format(other)),
    };
    load_from_text(input, format, env)
}

fn load_from_text(
    input: &str,
    format: ConfigFormat,
    env: &TaggerEnv,
) -> Result<Vec<ValidatedTaggerConfig>, ErrorEnvelope> {
    let raw = parse_configs_unvalidated(input, format)?;

    raw.into_iter()
        .enumerate()
        .map(|(index, mut config)| {
            apply_env_overrides(&mut config, env);
            config
                .validate_and_normalize()
                .map_err(|error| ErrorEnvelope::from(error).with_metadata("instance", index.to_string()))
        })
        .collect()
}

/// Render the effective configs as a host-style TOML document with every
/// connection string sanitized (trailing newline included).
pub fn to_pretty_toml(configs: &[ValidatedTaggerConfig]) -> Result<String, ErrorEnvelope> {
    #[derive(Serialize)]
    struct Processors {
        db_query_tagger: Vec<TaggerConfig>,
    }

    #[derive(Serialize)]
    struct Document {
        processors: Processors,
    }

    let document = Document {
        processors: Processors {
            db_query_tagger: configs.iter().map(ValidatedTaggerConfig::sanitized).collect(),
        },
    };

    let mut output = toml::to_string_pretty(&document).map_err(|error| {
        ErrorEnvelope::unexpected(
            ErrorCode::new("config", "serialize_toml"),
            format!("failed to serialize config TOML: {error}"),
            ErrorClass::NonRetriable,
        )
    })?;
    if !output.ends_with('\n') {
        output.push('\n');
    }
    Ok(output)
}

fn parse_configs_unvalidated(
    input: &str,
    format: ConfigFormat,
) -> Result<Vec<TaggerConfig>, ErrorEnvelope> {
    match format {
        ConfigFormat::Json => serde_json::from_str::<TaggerConfig>(input)
            .map(|config| vec![config])
            .map_err(|error| {
                ErrorEnvelope::expected(
                    ErrorCode::new("config", "invalid_json"),
                    format!("invalid config JSON: {error}"),
                )
                .with_metadata("source", "config")
            }),
        ConfigFormat::Toml => parse_toml_document(input),
    }
}

fn parse_toml_document(input: &str) -> Result<Vec<TaggerConfig>, ErrorEnvelope> {
    let document: toml::Table = toml::from_str(input).map_err(invalid_toml)?;

    let Some(processors) = document.get("processors") else {
        let config: TaggerConfig = toml::from_str(input).map_err(invalid_toml)?;
        return Ok(vec![config]);
    };

    let instances = processors
        .get(PLUGIN_NAME)
        .and_then(toml::Value::as_array)
        .filter(|instances| !instances.is_empty())
        .ok_or_else(|| ErrorEnvelope::from(ConfigSchemaError::NoInstances))?;

    instances
        .iter()
        .enumerate()
        .map(|(index, value)| {
            value
                .clone()
                .try_into::<TaggerConfig>()
                .map_err(|error| invalid_toml(error).with_metadata("instance", index.to_string()))
        })
        .collect()
}

fn invalid_toml(error: impl std::fmt::Display) -> ErrorEnvelope {
    ErrorEnvelope::expected(
        ErrorCode::new("config", "invalid_toml"),
        format!("invalid config TOML: {error}"),
    )
    .with_metadata("source", "config")
}

fn read_config_file(path: &Path) -> Result<String, ErrorEnvelope> {
    std::fs::read_to_string(path).map_err(|error| {
        let code = match error.kind() {
            std::io::ErrorKind::NotFound => ErrorCode::new("config", "config_file_not_found"),
            std::io::ErrorKind::PermissionDenied => {
                ErrorCode::new("config", "config_file_permission_denied")
            },
            _ => ErrorCode::new("config", "config_file_io"),
        };

        ErrorEnvelope::expected(code, format!("failed to read config file: {error}"))
            .with_metadata("path", path.to_string_lossy().to_string())
    })
}

fn detect_config_format(path: &Path) -> Result<ConfigFormat, ErrorEnvelope> {
    let ext = path
        .extension()
        .and_then(|value| value.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        None | Some("json") => Ok(ConfigFormat::Json),
        Some("toml") => Ok(ConfigFormat::Toml),
        Some(other) => Err(unsupported_format(other)),
    }
}

fn unsupported_format(extension: &str) -> ErrorEnvelope {
    ErrorEnvelope::expected(
        ErrorCode::new("config", "unsupported_format"),
        "unsupported config format; use .json or .toml",
    )
    .with_metadata("extension", extension.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use db_query_tagger_domain::DatabaseType;
    use std::error::Error;

    const HOST_DOCUMENT: &str = r#"
[agent]
interval = "10s"

[[processors.rename]]
namepass = ["cpu"]

[[processors.db_query_tagger]]
database_type = "sqlite3"
database = "/tmp/a.db"
query = "select name from devices where id = ?"
query_params_tags = ["id"]
query_results_tags = ["device_name"]

[[processors.db_query_tagger]]
database_type = "postgresql"
database = "postgres://svc:hunter2@db/app"
query = "select site from racks where rack = $1"
query_params_tags = ["rack"]
query_results_tags = ["site"]
remove_query_params_tags = true
"#;

    #[test]
    fn host_document_yields_instances_in_order() -> Result<(), Box<dyn Error>> {
        let configs = load_tagger_configs_from_str(HOST_DOCUMENT, "toml", &TaggerEnv::default())?;
        assert_eq!(configs.len(), 2);
        assert_eq!(configs[0].database_type(), DatabaseType::Sqlite);
        assert_eq!(configs[1].database_type(), DatabaseType::Postgres);
        assert!(configs[1].remove_query_params_tags);
        Ok(())
    }

    #[test]
    fn host_document_without_tagger_is_rejected() {
        let input = "[[processors.rename]]\nnamepass = [\"cpu\"]\n";
        let error = load_tagger_configs_from_str(input, "toml", &TaggerEnv::default()).err();
        assert_eq!(
            error.map(|error| error.code),
            Some(ErrorCode::new("config", "no_instances"))
        );
    }

    #[test]
    fn instance_errors_carry_their_position() {
        let input = HOST_DOCUMENT.replace(
            "remove_query_params_tags = true",
            "remove_query_params_tags = true\nquery_timeout_ms = 0",
        );
        let error = load_tagger_configs_from_str(&input, "toml", &TaggerEnv::default())
            .expect_err("zero timeout must be rejected");
        assert_eq!(error.code, ErrorCode::new("config", "invalid_timeout"));
        assert_eq!(error.metadata_value("instance"), Some("1"));
    }

    #[test]
    fn env_overrides_apply_to_every_instance() -> Result<(), Box<dyn Error>> {
        let env = TaggerEnv {
            query_timeout_ms: Some(900),
            ..TaggerEnv::default()
        };
        let configs = load_tagger_configs_from_str(HOST_DOCUMENT, "toml", &env)?;
        assert!(configs.iter().all(|config| config.query_timeout_ms == 900));
        Ok(())
    }

    #[test]
    fn pretty_toml_is_host_style_and_sanitized() -> Result<(), Box<dyn Error>> {
        let configs = load_tagger_configs_from_str(HOST_DOCUMENT, "toml", &TaggerEnv::default())?;
        let rendered = to_pretty_toml(&configs)?;
        assert!(rendered.contains("[[processors.db_query_tagger]]"));
        assert!(rendered.contains("postgres://db/app"));
        assert!(!rendered.contains("hunter2"));

        let reparsed = load_tagger_configs_from_str(&rendered, "toml", &TaggerEnv::default())?;
        assert_eq!(reparsed.len(), 2);
        assert_eq!(reparsed[1].database_type, "postgres");
        Ok(())
    }

    #[test]
    fn unknown_format_is_rejected() {
        let error = load_tagger_configs_from_str("", "yaml", &TaggerEnv::default()).err();
        assert_eq!(
            error.map(|error| error.code),
            Some(ErrorCode::new("config", "unsupported_format"))
        );
    }
}

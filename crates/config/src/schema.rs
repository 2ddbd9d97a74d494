//! Tagger configuration schema, defaults, validation, and normalization.
//!
//! - Deserialization uses `serde` (TOML or JSON); unknown keys are rejected.
//! - Validation is manual and returns typed errors mapped to `ErrorEnvelope`.
//! - Only statically knowable properties are checked. Placeholder and column
//!   counts are left to the driver at execution time.

use crate::sanitize::sanitize_connection_string;
use db_query_tagger_domain::{DatabaseType, LookupPlan};
use db_query_tagger_shared::{ErrorCode, ErrorEnvelope, SecretString};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default per-lookup deadline.
pub const DEFAULT_QUERY_TIMEOUT_MS: u64 = 5_000;
const QUERY_TIMEOUT_MIN_MS: u64 = 1;
const QUERY_TIMEOUT_MAX_MS: u64 = 600_000;

/// One `db_query_tagger` processor instance as written in a config file.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct TaggerConfig {
    /// Driver family identifier (`sqlite3`, `mssql`, `mysql`, `postgres`, or an alias).
    pub database_type: String,
    /// Connection string or database file path.
    pub database: String,
    /// SQL text with driver-native positional placeholders.
    pub query: String,
    /// Ordered tag names supplying placeholder values.
    pub query_params_tags: Vec<String>,
    /// Ordered tag names receiving result columns.
    pub query_results_tags: Vec<String>,
    /// Drop the parameter tags from a metric once its lookup matches.
    pub remove_query_params_tags: bool,
    /// Per-lookup deadline in milliseconds.
    pub query_timeout_ms: u64,
}

impl Default for TaggerConfig {
    fn default() -> Self {
        Self {
            database_type: String::new(),
            database: String::new(),
            query: String::new(),
            query_params_tags: Vec::new(),
            query_results_tags: Vec::new(),
            remove_query_params_tags: false,
            query_timeout_ms: DEFAULT_QUERY_TIMEOUT_MS,
        }
    }
}

impl fmt::Debug for TaggerConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("TaggerConfig")
            .field("database_type", &self.database_type)
            .field("database", &sanitize_connection_string(&self.database))
            .field("query", &self.query)
            .field("query_params_tags", &self.query_params_tags)
            .field("query_results_tags", &self.query_results_tags)
            .field("remove_query_params_tags", &self.remove_query_params_tags)
            .field("query_timeout_ms", &self.query_timeout_ms)
            .finish()
    }
}

impl TaggerConfig {
    /// Validate and normalize the config.
    pub fn validate_and_normalize(mut self) -> Result<ValidatedTaggerConfig, ConfigSchemaError> {
        self.database_type = self.database_type.trim().to_owned();
        if self.database_type.is_empty() {
            return Err(ConfigSchemaError::MissingField {
                field: "database_type",
            });
        }
        let database_type = self.database_type.parse::<DatabaseType>().map_err(|error| {
            ConfigSchemaError::UnsupportedDatabaseType { value: error.input }
        })?;
        self.database_type = database_type.as_str().to_owned();

        self.database = self.database.trim().to_owned();
        if self.database.is_empty() {
            return Err(ConfigSchemaError::MissingField { field: "database" });
        }

        self.query = self.query.trim().to_owned();
        if self.query.is_empty() {
            return Err(ConfigSchemaError::MissingField { field: "query" });
        }

        normalize_tag_names("query_params_tags", &mut self.query_params_tags)?;
        normalize_tag_names("query_results_tags", &mut self.query_results_tags)?;

        if !(QUERY_TIMEOUT_MIN_MS..=QUERY_TIMEOUT_MAX_MS).contains(&self.query_timeout_ms) {
            return Err(ConfigSchemaError::TimeoutOutOfRange {
                field: "query_timeout_ms",
                value_ms: self.query_timeout_ms,
                min_ms: QUERY_TIMEOUT_MIN_MS,
                max_ms: QUERY_TIMEOUT_MAX_MS,
            });
        }

        Ok(ValidatedTaggerConfig {
            database_type,
            raw: self,
        })
    }
}

fn normalize_tag_names(
    field: &'static str,
    names: &mut [String],
) -> Result<(), ConfigSchemaError> {
    for (index, name) in names.iter_mut().enumerate() {
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(ConfigSchemaError::EmptyTagName { field, index });
        }
        *name = trimmed.to_owned();
    }
    Ok(())
}

/// Validated config wrapper carrying the parsed database family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedTaggerConfig {
    raw: TaggerConfig,
    database_type: DatabaseType,
}

impl ValidatedTaggerConfig {
    /// Parsed database family.
    #[must_use]
    pub const fn database_type(&self) -> DatabaseType {
        self.database_type
    }

    /// Connection string, wrapped so it cannot leak through formatting.
    #[must_use]
    pub fn connection(&self) -> SecretString {
        SecretString::from(self.raw.database.as_str())
    }

    /// Per-lookup deadline.
    #[must_use]
    pub const fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.raw.query_timeout_ms)
    }

    /// Build the immutable lookup plan the core consumes.
    #[must_use]
    pub fn lookup_plan(&self) -> LookupPlan {
        LookupPlan::new(
            self.raw.query.as_str(),
            self.raw.query_params_tags.iter().map(String::as_str),
            self.raw.query_results_tags.iter().map(String::as_str),
            self.raw.remove_query_params_tags,
        )
    }

    /// Copy of the config with the connection string sanitized, for display.
    #[must_use]
    pub fn sanitized(&self) -> TaggerConfig {
        let mut config = self.raw.clone();
        config.database = sanitize_connection_string(&config.database);
        config
    }

    /// Consume the wrapper and return the raw config.
    #[must_use]
    pub fn into_inner(self) -> TaggerConfig {
        self.raw
    }
}

impl AsRef<TaggerConfig> for ValidatedTaggerConfig {
    fn as_ref(&self) -> &TaggerConfig {
        &self.raw
    }
}

impl std::ops::Deref for ValidatedTaggerConfig {
    type Target = TaggerConfig;

    fn deref(&self) -> &Self::Target {
        &self.raw
    }
}

/// Validation failures for tagger configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSchemaError {
    /// A required field is missing or blank.
    MissingField {
        /// Field name in the config file.
        field: &'static str,
    },
    /// `database_type` does not name a supported family.
    UnsupportedDatabaseType {
        /// Trimmed value provided.
        value: String,
    },
    /// A tag list contains a blank entry.
    EmptyTagName {
        /// Field name in the config file.
        field: &'static str,
        /// Zero-based position of the blank entry.
        index: usize,
    },
    /// A timeout value is out of bounds.
    TimeoutOutOfRange {
        /// Field name in the config file.
        field: &'static str,
        /// Value provided (ms).
        value_ms: u64,
        /// Minimum allowed value (ms).
        min_ms: u64,
        /// Maximum allowed value (ms).
        max_ms: u64,
    },
    /// A host-style document declares no tagger instances.
    NoInstances,
}

impl ConfigSchemaError {
    fn error_code(&self) -> ErrorCode {
        match self {
            Self::MissingField { .. } => ErrorCode::new("config", "missing_field"),
            Self::UnsupportedDatabaseType { .. } => {
                ErrorCode::new("config", "unsupported_database_type")
            },
            Self::EmptyTagName { .. } => ErrorCode::new("config", "empty_tag_name"),
            Self::TimeoutOutOfRange { .. } => ErrorCode::new("config", "invalid_timeout"),
            Self::NoInstances => ErrorCode::new("config", "no_instances"),
        }
    }
}

impl fmt::Display for ConfigSchemaError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField { field } => write!(formatter, "{field} must be non-empty"),
            Self::UnsupportedDatabaseType { value } => write!(
                formatter,
                "unsupported database_type `{value}` (expected sqlite3, mssql, mysql or postgres)"
            ),
            Self::EmptyTagName { field, index } => {
                write!(formatter, "{field}[{index}] must be a non-empty tag name")
            },
            Self::TimeoutOutOfRange {
                field,
                value_ms,
                min_ms,
                max_ms,
            } => write!(
                formatter,
                "{field} must be within [{min_ms}, {max_ms}] ms (got {value_ms})"
            ),
            Self::NoInstances => {
                formatter.write_str("no [[processors.db_query_tagger]] instances found")
            },
        }
    }
}

impl std::error::Error for ConfigSchemaError {}

impl From<ConfigSchemaError> for ErrorEnvelope {
    fn from(error: ConfigSchemaError) -> Self {
        let code = error.error_code();
        let message = error.to_string();
        let envelope = Self::expected(code, message);

        match error {
            ConfigSchemaError::MissingField { field } => envelope.with_metadata("field", field),
            ConfigSchemaError::UnsupportedDatabaseType { value } => {
                envelope.with_metadata("value", value)
            },
            ConfigSchemaError::EmptyTagName { field, index } => envelope
                .with_metadata("field", field)
                .with_metadata("index", index.to_string()),
            ConfigSchemaError::TimeoutOutOfRange {
                field,
                value_ms,
                min_ms,
                max_ms,
            } => envelope
                .with_metadata("field", field)
                .with_metadata("value_ms", value_ms.to_string())
                .with_metadata("min_ms", min_ms.to_string())
                .with_metadata("max_ms", max_ms.to_string()),
            ConfigSchemaError::NoInstances => envelope,
        }
    }
}

/// Parse a single tagger config from a JSON object, applying validation.
pub fn parse_tagger_config_json(input: &str) -> Result<ValidatedTaggerConfig, ErrorEnvelope> {
    let config: TaggerConfig = serde_json::from_str(input).map_err(|error| {
        ErrorEnvelope::expected(
            ErrorCode::new("config", "invalid_json"),
            format!("invalid config JSON: {error}"),
        )
    })?;

    config.validate_and_normalize().map_err(Into::into)
}

/// Parse a single flat tagger table from TOML, applying validation.
pub fn parse_tagger_config_toml(input: &str) -> Result<ValidatedTaggerConfig, ErrorEnvelope> {
    let config: TaggerConfig = toml::from_str(input).map_err(|error| {
        ErrorEnvelope::expected(
            ErrorCode::new("config", "invalid_toml"),
            format!("invalid config TOML: {error}"),
        )
    })?;

    config.validate_and_normalize().map_err(Into::into)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> TaggerConfig {
        TaggerConfig {
            database_type: " SQLite ".to_owned(),
            database: " /tmp/devices.db ".to_owned(),
            query: " select name from devices where id = ? ".to_owned(),
            query_params_tags: vec![" id ".to_owned()],
            query_results_tags: vec!["device_name".to_owned()],
            ..TaggerConfig::default()
        }
    }

    #[test]
    fn normalizes_identifiers_and_trims_values() -> Result<(), ConfigSchemaError> {
        let config = base().validate_and_normalize()?;
        assert_eq!(config.database_type(), DatabaseType::Sqlite);
        assert_eq!(config.as_ref().database_type, "sqlite3");
        assert_eq!(config.database, "/tmp/devices.db");
        assert_eq!(config.query_params_tags, vec!["id".to_owned()]);
        assert_eq!(config.query_timeout(), Duration::from_millis(5_000));
        assert!(!config.lookup_plan().remove_param_tags());
        Ok(())
    }

    #[test]
    fn rejects_blank_required_fields() {
        let mut config = base();
        config.query = "  ".to_owned();
        assert_eq!(
            config.validate_and_normalize().err(),
            Some(ConfigSchemaError::MissingField { field: "query" })
        );

        let mut config = base();
        config.database = String::new();
        assert_eq!(
            config.validate_and_normalize().err(),
            Some(ConfigSchemaError::MissingField { field: "database" })
        );
    }

    #[test]
    fn rejects_unknown_database_type() {
        let mut config = base();
        config.database_type = "oracle".to_owned();
        let error = config.validate_and_normalize().err();
        assert_eq!(
            error,
            Some(ConfigSchemaError::UnsupportedDatabaseType {
                value: "oracle".to_owned()
            })
        );
    }

    #[test]
    fn rejects_blank_tag_names_with_position() {
        let mut config = base();
        config.query_results_tags = vec!["a".to_owned(), " ".to_owned()];
        let envelope: ErrorEnvelope = config
            .validate_and_normalize()
            .err()
            .map(Into::into)
            .unwrap_or_else(|| ErrorEnvelope::cancelled("unexpected success"));
        assert_eq!(envelope.code, ErrorCode::new("config", "empty_tag_name"));
        assert_eq!(envelope.metadata_value("index"), Some("1"));
    }

    #[test]
    fn timeout_bounds_are_enforced() {
        for value in [0, 600_001] {
            let mut config = base();
            config.query_timeout_ms = value;
            assert!(matches!(
                config.validate_and_normalize(),
                Err(ConfigSchemaError::TimeoutOutOfRange { .. })
            ));
        }
    }

    #[test]
    fn lists_may_be_empty() {
        let mut config = base();
        config.query_params_tags.clear();
        config.query_results_tags.clear();
        assert!(config.validate_and_normalize().is_ok());
    }

    #[test]
    fn debug_output_hides_credentials() -> Result<(), ConfigSchemaError> {
        let mut config = base();
        config.database_type = "postgres".to_owned();
        config.database = "postgres://svc:hunter2@db:5432/inventory".to_owned();
        let rendered = format!("{:?}", config.validate_and_normalize()?);
        assert!(!rendered.contains("hunter2"));
        Ok(())
    }

    #[test]
    fn json_rejects_unknown_keys() {
        let result = parse_tagger_config_json(
            r#"{"database_type":"sqlite3","database":"x.db","query":"select 1","colour":"red"}"#,
        );
        let error = result.err().map(|error| error.code);
        assert_eq!(error, Some(ErrorCode::new("config", "invalid_json")));
    }
}

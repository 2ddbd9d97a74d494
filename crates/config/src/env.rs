//! Environment variable parsing and merging.
//!
//! Overrides apply to every configured instance, after file parsing and
//! before validation.

use crate::schema::TaggerConfig;
use db_query_tagger_shared::{ErrorCode, ErrorEnvelope, REDACTED, SecretString, is_secret_key};
use std::collections::BTreeMap;
use std::fmt;

/// Env var: `database_type` override.
pub const ENV_DATABASE_TYPE: &str = "DBQT_DATABASE_TYPE";
/// Env var: `database` (connection string) override.
pub const ENV_DATABASE: &str = "DBQT_DATABASE";
/// Env var: `query` override.
pub const ENV_QUERY: &str = "DBQT_QUERY";
/// Env var: `query_timeout_ms` override.
pub const ENV_QUERY_TIMEOUT_MS: &str = "DBQT_QUERY_TIMEOUT_MS";
/// Env var: `remove_query_params_tags` override.
pub const ENV_REMOVE_QUERY_PARAMS_TAGS: &str = "DBQT_REMOVE_QUERY_PARAMS_TAGS";

const ALL_VARS: [&str; 5] = [
    ENV_DATABASE_TYPE,
    ENV_DATABASE,
    ENV_QUERY,
    ENV_QUERY_TIMEOUT_MS,
    ENV_REMOVE_QUERY_PARAMS_TAGS,
];

/// Typed env-derived overrides for `TaggerConfig`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaggerEnv {
    /// Override for `database_type`.
    pub database_type: Option<Box<str>>,
    /// Override for `database`.
    pub database: Option<SecretString>,
    /// Override for `query`.
    pub query: Option<Box<str>>,
    /// Override for `query_timeout_ms`.
    pub query_timeout_ms: Option<u64>,
    /// Override for `remove_query_params_tags`.
    pub remove_query_params_tags: Option<bool>,
}

impl TaggerEnv {
    /// Parse overrides from an explicit variable map.
    pub fn from_map(map: &BTreeMap<String, String>) -> Result<Self, EnvParseError> {
        Ok(Self {
            database_type: parse_optional_trimmed_string(map, ENV_DATABASE_TYPE)?,
            database: parse_optional_secret(map, ENV_DATABASE)?,
            query: parse_optional_trimmed_string(map, ENV_QUERY)?,
            query_timeout_ms: parse_optional_u64(map, ENV_QUERY_TIMEOUT_MS)?,
            remove_query_params_tags: parse_optional_bool(map, ENV_REMOVE_QUERY_PARAMS_TAGS)?,
        })
    }

    /// Parse overrides from the process environment.
    pub fn from_std_env() -> Result<Self, EnvParseError> {
        let mut map = BTreeMap::new();
        for name in ALL_VARS {
            if let Ok(value) = std::env::var(name) {
                map.insert(name.to_string(), value);
            }
        }
        Self::from_map(&map)
    }

    /// Returns true when no override is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.database_type.is_none()
            && self.database.is_none()
            && self.query.is_none()
            && self.query_timeout_ms.is_none()
            && self.remove_query_params_tags.is_none()
    }
}

/// Apply env overrides to one instance (env wins over file values).
pub fn apply_env_overrides(config: &mut TaggerConfig, env: &TaggerEnv) {
    if let Some(value) = env.database_type.as_deref() {
        value.clone_into(&mut config.database_type);
    }
    if let Some(value) = env.database.as_ref() {
        value.expose().clone_into(&mut config.database);
    }
    if let Some(value) = env.query.as_deref() {
        value.clone_into(&mut config.query);
    }
    if let Some(value) = env.query_timeout_ms {
        config.query_timeout_ms = value;
    }
    if let Some(value) = env.remove_query_params_tags {
        config.remove_query_params_tags = value;
    }
}

/// Validation failures when parsing env variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvParseError {
    /// An env var was present but empty after trimming.
    EmptyValue {
        /// Env var name.
        var: &'static str,
    },
    /// A secret env var was present but empty after trimming.
    EmptySecret {
        /// Env var name.
        var: &'static str,
    },
    /// Boolean env var had an invalid value.
    InvalidBool {
        /// Env var name.
        var: &'static str,
        /// Raw input value.
        value: String,
    },
    /// Integer env var had an invalid value.
    InvalidInt {
        /// Env var name.
        var: &'static str,
        /// Raw input value.
        value: String,
    },
}

impl EnvParseError {
    fn error_code(&self) -> ErrorCode {
        match self {
            Self::EmptyValue { .. } | Self::EmptySecret { .. } => {
                ErrorCode::new("config", "empty_env_var")
            },
            Self::InvalidBool { .. } => ErrorCode::new("config", "invalid_env_bool"),
            Self::InvalidInt { .. } => ErrorCode::new("config", "invalid_env_int"),
        }
    }
}

impl fmt::Display for EnvParseError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyValue { var } | Self::EmptySecret { var } => {
                write!(formatter, "{var} must be non-empty")
            },
            Self::InvalidBool { var, .. } => write!(formatter, "{var} must be a boolean"),
            Self::InvalidInt { var, .. } => write!(formatter, "{var} must be an integer"),
        }
    }
}

impl std::error::Error for EnvParseError {}

impl From<EnvParseError> for ErrorEnvelope {
    fn from(error: EnvParseError) -> Self {
        let code = error.error_code();
        let message = error.to_string();
        let envelope = Self::expected(code, message);

        match error {
            EnvParseError::EmptyValue { var } | EnvParseError::EmptySecret { var } => {
                envelope.with_metadata("env_var", var)
            },
            EnvParseError::InvalidBool { var, value } | EnvParseError::InvalidInt { var, value } => {
                envelope
                    .with_metadata("env_var", var)
                    .with_metadata("value", redact_value(var, &value))
            },
        }
    }
}

fn parse_optional_trimmed_string(
    map: &BTreeMap<String, String>,
    var: &'static str,
) -> Result<Option<Box<str>>, EnvParseError> {
    let Some(raw) = map.get(var) else {
        return Ok(None);
    };

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EnvParseError::EmptyValue { var });
    }

    Ok(Some(trimmed.to_owned().into_boxed_str()))
}

fn parse_optional_secret(
    map: &BTreeMap<String, String>,
    var: &'static str,
) -> Result<Option<SecretString>, EnvParseError> {
    let Some(raw) = map.get(var) else {
        return Ok(None);
    };

    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EnvParseError::EmptySecret { var });
    }

    Ok(Some(SecretString::new(trimmed.to_owned())))
}

fn parse_optional_u64(
    map: &BTreeMap<String, String>,
    var: &'static str,
) -> Result<Option<u64>, EnvParseError> {
    let Some(raw) = map.get(var) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EnvParseError::EmptyValue { var });
    }

    trimmed
        .parse::<u64>()
        .map(Some)
        .map_err(|_| EnvParseError::InvalidInt {
            var,
            value: raw.clone(),
        })
}

fn parse_optional_bool(
    map: &BTreeMap<String, String>,
    var: &'static str,
) -> Result<Option<bool>, EnvParseError> {
    let Some(raw) = map.get(var) else {
        return Ok(None);
    };
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(EnvParseError::EmptyValue { var });
    }

    match trimmed.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(Some(true)),
        "false" | "0" | "no" | "off" => Ok(Some(false)),
        _ => Err(EnvParseError::InvalidBool {
            var,
            value: raw.clone(),
        }),
    }
}

fn redact_value(var: &str, value: &str) -> String {
    if is_secret_key(var) {
        REDACTED.to_string()
    } else {
        value.to_string()
    }
}

//! Supported database families and their configuration identifiers.

use db_query_tagger_shared::{ErrorCode, ErrorEnvelope};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Database family selected by `database_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    /// `SQLite` file databases.
    #[serde(rename = "sqlite3")]
    Sqlite,
    /// Microsoft SQL Server.
    Mssql,
    /// `MySQL` and `MariaDB`.
    Mysql,
    /// `PostgreSQL`.
    Postgres,
}

impl DatabaseType {
    /// Every supported family, in display order.
    pub const ALL: [Self; 4] = [Self::Sqlite, Self::Mssql, Self::Mysql, Self::Postgres];

    /// Returns the canonical identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite3",
            Self::Mssql => "mssql",
            Self::Mysql => "mysql",
            Self::Postgres => "postgres",
        }
    }

    /// Example placeholder for the first parameter.
    #[must_use]
    pub const fn placeholder_hint(self) -> &'static str {
        match self {
            Self::Sqlite | Self::Mysql => "?",
            Self::Mssql => "@P1",
            Self::Postgres => "$1",
        }
    }
}

impl fmt::Display for DatabaseType {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Unknown `database_type` identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseTypeError {
    /// Trimmed input that failed to match.
    pub input: String,
}

impl fmt::Display for DatabaseTypeError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "unsupported database_type `{}` (expected one of sqlite3, mssql, mysql, postgres)",
            self.input
        )
    }
}

impl std::error::Error for DatabaseTypeError {}

impl From<DatabaseTypeError> for ErrorEnvelope {
    fn from(error: DatabaseTypeError) -> Self {
        let message = error.to_string();
        Self::expected(ErrorCode::new("domain", "unsupported_database_type"), message)
            .with_metadata("databaseType", error.input)
    }
}

impl FromStr for DatabaseType {
    type Err = DatabaseTypeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "sqlite3" | "sqlite" => Ok(Self::Sqlite),
            "mssql" | "sqlserver" => Ok(Self::Mssql),
            "mysql" | "mariadb" => Ok(Self::Mysql),
            "postgres" | "postgresql" | "pgx" => Ok(Self::Postgres),
            _ => Err(DatabaseTypeError {
                input: trimmed.to_owned(),
            }),
        }
    }
}

//! SQL driver selection.
//!
//! A registry maps each [`DatabaseType`] to a driver constructor. The default
//! registry holds every driver compiled into this build; tests inject their
//! own.

use crate::InfraResult;
use db_query_tagger_adapters::sql::SqliteDriver;
use db_query_tagger_domain::DatabaseType;
use db_query_tagger_ports::SqlDriverPort;
use db_query_tagger_shared::{ErrorCode, ErrorEnvelope};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

#[cfg(feature = "db-mssql")]
use db_query_tagger_adapters::sql::MsSqlDriver;
#[cfg(feature = "db-mysql")]
use db_query_tagger_adapters::sql::MySqlDriver;
#[cfg(feature = "db-postgres")]
use db_query_tagger_adapters::sql::PostgresDriver;

type DriverConstructor = Arc<dyn Fn() -> Arc<dyn SqlDriverPort> + Send + Sync>;

/// Map from database family to driver constructor.
#[derive(Clone, Default)]
pub struct DriverRegistry {
    constructors: BTreeMap<DatabaseType, DriverConstructor>,
}

impl DriverRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every driver enabled by cargo features.
    #[must_use]
    pub fn with_default_drivers() -> Self {
        let mut registry = Self::new();
        registry.register(DatabaseType::Sqlite, || Arc::new(SqliteDriver::new()));
        #[cfg(feature = "db-postgres")]
        registry.register(DatabaseType::Postgres, || Arc::new(PostgresDriver::new()));
        #[cfg(feature = "db-mysql")]
        registry.register(DatabaseType::Mysql, || Arc::new(MySqlDriver::new()));
        #[cfg(feature = "db-mssql")]
        registry.register(DatabaseType::Mssql, || Arc::new(MsSqlDriver::new()));
        registry
    }

    /// Register (or replace) the constructor for `database_type`.
    pub fn register<F>(&mut self, database_type: DatabaseType, constructor: F)
    where
        F: Fn() -> Arc<dyn SqlDriverPort> + Send + Sync + 'static,
    {
        self.constructors
            .insert(database_type, Arc::new(constructor));
    }

    /// Whether a driver is available for `database_type`.
    #[must_use]
    pub fn contains(&self, database_type: DatabaseType) -> bool {
        self.constructors.contains_key(&database_type)
    }

    /// Families with a registered driver, in stable order.
    #[must_use]
    pub fn enabled(&self) -> Vec<DatabaseType> {
        self.constructors.keys().copied().collect()
    }

    /// Build a driver for `database_type`.
    pub fn resolve(&self, database_type: DatabaseType) -> InfraResult<Arc<dyn SqlDriverPort>> {
        let constructor = self
            .constructors
            .get(&database_type)
            .ok_or_else(|| driver_not_enabled(database_type))?;
        Ok(constructor())
    }
}

impl fmt::Debug for DriverRegistry {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("DriverRegistry")
            .field("enabled", &self.enabled())
            .finish()
    }
}

/// Cargo feature that compiles in the driver for `database_type`.
#[must_use]
pub const fn driver_feature(database_type: DatabaseType) -> Option<&'static str> {
    match database_type {
        DatabaseType::Sqlite => None,
        DatabaseType::Postgres => Some("db-postgres"),
        DatabaseType::Mysql => Some("db-mysql"),
        DatabaseType::Mssql => Some("db-mssql"),
    }
}

fn driver_not_enabled(database_type: DatabaseType) -> ErrorEnvelope {
    let message = driver_feature(database_type).map_or_else(
        || format!("{database_type} driver is not registered"),
        |feature| {
            format!("{database_type} driver is not enabled in this build (enable the `{feature}` feature)")
        },
    );
    ErrorEnvelope::expected(ErrorCode::invalid_input(), message)
        .with_metadata("databaseType", database_type.as_str())
}

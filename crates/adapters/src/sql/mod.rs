//! SQL driver adapters.
//!
//! SQLite is always compiled in. Server drivers sit behind cargo features
//! (`db-postgres`, `db-mysql`, `db-mssql`). Every adapter reports failures
//! through [`LookupFailure::error`] so the core can classify them.

use db_query_tagger_ports::LookupFailure;
use db_query_tagger_shared::ErrorEnvelope;

#[cfg(feature = "db-mssql")]
pub mod mssql;
#[cfg(feature = "db-mysql")]
pub mod mysql;
#[cfg(feature = "db-postgres")]
pub mod postgres;
pub mod sqlite;

#[cfg(feature = "db-mssql")]
pub use mssql::MsSqlDriver;
#[cfg(feature = "db-mysql")]
pub use mysql::MySqlDriver;
#[cfg(feature = "db-postgres")]
pub use postgres::PostgresDriver;
pub use sqlite::SqliteDriver;

pub(crate) fn driver_error(
    stage: LookupFailure,
    driver: &str,
    error: impl std::fmt::Display,
) -> ErrorEnvelope {
    stage
        .error(format!("{driver} {stage} failed: {error}"))
        .with_metadata("driver", driver.to_owned())
}

#[cfg(any(feature = "db-postgres", feature = "db-mysql", feature = "db-mssql"))]
pub(crate) fn row_shape_error(driver: &str, index: usize, type_name: &str) -> ErrorEnvelope {
    driver_error(
        LookupFailure::Scan,
        driver,
        format!("column {index} has unsupported type {type_name}"),
    )
    .with_metadata("column", index.to_string())
}

/// Highest `$n` placeholder referenced by `sql`, ignoring quoted text.
#[cfg(any(feature = "db-postgres", test))]
pub(crate) fn max_dollar_placeholder(sql: &str) -> usize {
    let mut max = 0usize;
    let mut quote: Option<char> = None;
    let mut chars = sql.chars().peekable();
    while let Some(ch) = chars.next() {
        match (quote, ch) {
            (Some(open), _) if ch == open => quote = None,
            (Some(_), _) => {},
            (None, '\'' | '"') => quote = Some(ch),
            (None, '$') => {
                let mut digits = String::new();
                while let Some(next) = chars.peek().copied().filter(char::is_ascii_digit) {
                    digits.push(next);
                    chars.next();
                }
                if let Ok(n) = digits.parse::<usize>() {
                    max = max.max(n);
                }
            },
            _ => {},
        }
    }
    max
}

//! SQL boundary contract: driver, connection, prepared query.
//!
//! Lifecycle for one batch: `open` a connection, `prepare` one statement,
//! call `query_row` once per metric, then close the statement and the
//! connection (in that order). Implementations never pool or cache.

use crate::BoxFuture;
use db_query_tagger_domain::{BoundParam, DatabaseType, ScalarValue};
use db_query_tagger_shared::{RequestContext, Result, SecretString};

/// Static description of a driver implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlDriverInfo {
    /// Database family served.
    pub database_type: DatabaseType,
    /// Implementation name (for logs), e.g. `rusqlite`.
    pub name: Box<str>,
}

/// Opens connections for one database family.
pub trait SqlDriverPort: Send + Sync {
    /// Driver metadata.
    fn info(&self) -> &SqlDriverInfo;

    /// Open a new connection.
    ///
    /// Failures use `lookup:connection`.
    fn open<'a>(
        &'a self,
        ctx: &'a RequestContext,
        database: &'a SecretString,
    ) -> BoxFuture<'a, Result<Box<dyn SqlConnectionPort>>>;
}

/// An open connection, owned by one batch.
pub trait SqlConnectionPort: Send {
    /// Prepare `query` for repeated execution.
    ///
    /// Failures use `lookup:prepare`.
    fn prepare<'a>(
        &'a mut self,
        ctx: &'a RequestContext,
        query: &'a str,
    ) -> BoxFuture<'a, Result<Box<dyn PreparedQueryPort>>>;

    /// Close the connection.
    fn close(self: Box<Self>) -> BoxFuture<'static, Result<()>>;
}

/// A prepared, row-returning statement.
pub trait PreparedQueryPort: Send {
    /// Run the statement once and return the first row, if any.
    ///
    /// Rows are decoded column by column into [`ScalarValue`]s. Rows past the
    /// first are ignored. Failures use `lookup:query` or `lookup:scan`.
    fn query_row<'a>(
        &'a mut self,
        ctx: &'a RequestContext,
        params: &'a [BoundParam],
    ) -> BoxFuture<'a, Result<Option<Vec<ScalarValue>>>>;

    /// Release the statement.
    fn close(self: Box<Self>) -> BoxFuture<'static, Result<()>>;
}

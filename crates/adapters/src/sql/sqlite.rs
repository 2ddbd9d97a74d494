//! SQLite driver backed by `rusqlite`.
//!
//! `rusqlite` is synchronous, so every call runs on the blocking pool. A
//! prepared statement borrows its connection, which cannot cross an await
//! point; the statement handle therefore keeps the SQL text and re-fetches
//! the compiled statement from the connection's statement cache.
//!
//! A lookup whose future is dropped (deadline or cancellation) interrupts
//! the statement running on the blocking pool, and a lookup that has not
//! reached the connection yet never starts.

use super::driver_error;
use db_query_tagger_ports::{
    BoundParam, BoxFuture, DatabaseType, LookupFailure, PreparedQueryPort, ScalarValue,
    SqlConnectionPort, SqlDriverInfo, SqlDriverPort,
};
use db_query_tagger_shared::{RequestContext, Result, SecretString};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, InterruptHandle, OpenFlags, params_from_iter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::spawn_blocking;

const DRIVER: &str = "sqlite";

/// SQLite driver. The connection string is a file path or `file:` URI.
///
/// The file must already exist; a missing database is a connection error
/// rather than a freshly created empty file.
#[derive(Debug, Clone)]
pub struct SqliteDriver {
    info: SqlDriverInfo,
}

impl SqliteDriver {
    /// Create the driver.
    #[must_use]
    pub fn new() -> Self {
        Self {
            info: SqlDriverInfo {
                database_type: DatabaseType::Sqlite,
                name: DRIVER.into(),
            },
        }
    }
}

impl Default for SqliteDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlDriverPort for SqliteDriver {
    fn info(&self) -> &SqlDriverInfo {
        &self.info
    }

    fn open<'a>(
        &'a self,
        ctx: &'a RequestContext,
        database: &'a SecretString,
    ) -> BoxFuture<'a, Result<Box<dyn SqlConnectionPort>>> {
        Box::pin(async move {
            ctx.ensure_not_cancelled("sqlite.open")?;
            let target = database.expose().trim().to_owned();
            let connection = run_blocking(LookupFailure::Connection, move || {
                Connection::open_with_flags(target, open_flags())
                    .map_err(|error| driver_error(LookupFailure::Connection, DRIVER, error))
            })
            .await?;
            tracing::debug!(driver = DRIVER, "opened lookup connection");
            let interrupt = Arc::new(connection.get_interrupt_handle());
            let connection: Box<dyn SqlConnectionPort> = Box::new(SqliteConnection {
                inner: Arc::new(Mutex::new(connection)),
                interrupt,
            });
            Ok(connection)
        })
    }
}

struct SqliteConnection {
    inner: Arc<Mutex<Connection>>,
    interrupt: Arc<InterruptHandle>,
}

impl SqlConnectionPort for SqliteConnection {
    fn prepare<'a>(
        &'a mut self,
        ctx: &'a RequestContext,
        query: &'a str,
    ) -> BoxFuture<'a, Result<Box<dyn PreparedQueryPort>>> {
        Box::pin(async move {
            ctx.ensure_not_cancelled("sqlite.prepare")?;
            let inner = Arc::clone(&self.inner);
            let sql: Arc<str> = Arc::from(query);
            let compiled = Arc::clone(&sql);
            run_blocking(LookupFailure::Prepare, move || {
                let connection = lock(&inner, LookupFailure::Prepare)?;
                connection
                    .prepare_cached(&compiled)
                    .map(drop)
                    .map_err(|error| driver_error(LookupFailure::Prepare, DRIVER, error))
            })
            .await?;

            let statement: Box<dyn PreparedQueryPort> = Box::new(SqliteStatement {
                inner: Arc::clone(&self.inner),
                interrupt: Arc::clone(&self.interrupt),
                sql,
            });
            Ok(statement)
        })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            // Wait out any abandoned lookup still holding the lock on the blocking pool.
            let waiter = Arc::clone(&self.inner);
            run_blocking(LookupFailure::Connection, move || {
                lock(&waiter, LookupFailure::Connection).map(drop)
            })
            .await?;
            let mutex = match Arc::try_unwrap(self.inner) {
                Ok(mutex) => mutex,
                Err(shared) => {
                    // A live statement handle keeps the connection; it closes on the last drop.
                    tracing::debug!(
                        driver = DRIVER,
                        handles = Arc::strong_count(&shared),
                        "connection still shared at close"
                    );
                    return Ok(());
                },
            };
            let connection = mutex.into_inner().map_err(|_| {
                driver_error(LookupFailure::Connection, DRIVER, "connection lock poisoned")
            })?;
            run_blocking(LookupFailure::Connection, move || {
                connection
                    .close()
                    .map_err(|(_, error)| driver_error(LookupFailure::Connection, DRIVER, error))
            })
            .await
        })
    }
}

struct SqliteStatement {
    inner: Arc<Mutex<Connection>>,
    interrupt: Arc<InterruptHandle>,
    sql: Arc<str>,
}

impl PreparedQueryPort for SqliteStatement {
    fn query_row<'a>(
        &'a mut self,
        ctx: &'a RequestContext,
        params: &'a [BoundParam],
    ) -> BoxFuture<'a, Result<Option<Vec<ScalarValue>>>> {
        Box::pin(async move {
            ctx.ensure_not_cancelled("sqlite.query_row")?;
            let inner = Arc::clone(&self.inner);
            let sql = Arc::clone(&self.sql);
            let params = params.to_vec();
            let abandoned = Arc::new(AtomicBool::new(false));
            let guard = InterruptOnDrop {
                handle: Arc::clone(&self.interrupt),
                abandoned: Arc::clone(&abandoned),
                armed: true,
            };
            let result = run_blocking(LookupFailure::Query, move || {
                let connection = lock(&inner, LookupFailure::Query)?;
                if abandoned.load(Ordering::Acquire) {
                    return Err(driver_error(
                        LookupFailure::Query,
                        DRIVER,
                        "lookup abandoned before it started",
                    ));
                }
                query_first_row(&connection, &sql, &params)
            })
            .await;
            guard.disarm();
            result
        })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        drop(self);
        Box::pin(std::future::ready(Ok(())))
    }
}

/// Interrupts the connection when a lookup future is dropped mid-flight.
struct InterruptOnDrop {
    handle: Arc<InterruptHandle>,
    abandoned: Arc<AtomicBool>,
    armed: bool,
}

impl InterruptOnDrop {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InterruptOnDrop {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.abandoned.store(true, Ordering::Release);
        self.handle.interrupt();
    }
}

fn query_first_row(
    connection: &Connection,
    sql: &str,
    params: &[BoundParam],
) -> Result<Option<Vec<ScalarValue>>> {
    let mut statement = connection
        .prepare_cached(sql)
        .map_err(|error| driver_error(LookupFailure::Prepare, DRIVER, error))?;
    let column_count = statement.column_count();
    let mut rows = statement
        .query(params_from_iter(params.iter()))
        .map_err(|error| driver_error(LookupFailure::Query, DRIVER, error))?;
    let Some(row) = rows
        .next()
        .map_err(|error| driver_error(LookupFailure::Query, DRIVER, error))?
    else {
        return Ok(None);
    };

    let mut values = Vec::with_capacity(column_count);
    for index in 0..column_count {
        let value = row
            .get_ref(index)
            .map_err(|error| driver_error(LookupFailure::Scan, DRIVER, error))?;
        values.push(scalar_from_ref(value));
    }
    Ok(Some(values))
}

fn scalar_from_ref(value: ValueRef<'_>) -> ScalarValue {
    match value {
        ValueRef::Null => ScalarValue::Null,
        ValueRef::Integer(value) => ScalarValue::Integer(value),
        ValueRef::Real(value) => ScalarValue::Float(value),
        ValueRef::Text(bytes) => match std::str::from_utf8(bytes) {
            Ok(text) => ScalarValue::Text(text.to_owned()),
            Err(_) => ScalarValue::Bytes(bytes.to_vec()),
        },
        ValueRef::Blob(bytes) => ScalarValue::Bytes(bytes.to_vec()),
    }
}

fn open_flags() -> OpenFlags {
    OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX
}

fn lock(inner: &Mutex<Connection>, stage: LookupFailure) -> Result<MutexGuard<'_, Connection>> {
    inner
        .lock()
        .map_err(|_| driver_error(stage, DRIVER, "connection lock poisoned"))
}

async fn run_blocking<T, F>(stage: LookupFailure, task: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    spawn_blocking(task)
        .await
        .map_err(|error| driver_error(stage, DRIVER, error))?
}

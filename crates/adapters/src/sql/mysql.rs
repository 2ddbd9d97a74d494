//! MySQL / MariaDB driver backed by a single `sqlx` connection.

use super::{driver_error, row_shape_error};
use db_query_tagger_ports::{
    BoundParam, BoxFuture, DatabaseType, LookupFailure, PreparedQueryPort, ScalarValue,
    SqlConnectionPort, SqlDriverInfo, SqlDriverPort,
};
use db_query_tagger_shared::{RequestContext, Result, SecretString};
use sqlx::mysql::{MySqlConnection, MySqlRow, MySqlStatement};
use sqlx::types::chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::{Connection, Executor, Row, Statement, TypeInfo, ValueRef};
use std::sync::Arc;
use tokio::sync::Mutex;

const DRIVER: &str = "mysql";

/// MySQL driver. The connection string is a `mysql://` URL.
#[derive(Debug, Clone)]
pub struct MySqlDriver {
    info: SqlDriverInfo,
}

impl MySqlDriver {
    /// Create the driver.
    #[must_use]
    pub fn new() -> Self {
        Self {
            info: SqlDriverInfo {
                database_type: DatabaseType::Mysql,
                name: DRIVER.into(),
            },
        }
    }
}

impl Default for MySqlDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlDriverPort for MySqlDriver {
    fn info(&self) -> &SqlDriverInfo {
        &self.info
    }

    fn open<'a>(
        &'a self,
        ctx: &'a RequestContext,
        database: &'a SecretString,
    ) -> BoxFuture<'a, Result<Box<dyn SqlConnectionPort>>> {
        Box::pin(async move {
            ctx.ensure_not_cancelled("mysql.open")?;
            let connection = MySqlConnection::connect(database.expose().trim())
                .await
                .map_err(|error| driver_error(LookupFailure::Connection, DRIVER, error))?;
            tracing::debug!(driver = DRIVER, "opened lookup connection");
            let connection: Box<dyn SqlConnectionPort> = Box::new(MySqlLookupConnection {
                inner: Arc::new(Mutex::new(connection)),
            });
            Ok(connection)
        })
    }
}

struct MySqlLookupConnection {
    inner: Arc<Mutex<MySqlConnection>>,
}

impl SqlConnectionPort for MySqlLookupConnection {
    fn prepare<'a>(
        &'a mut self,
        ctx: &'a RequestContext,
        query: &'a str,
    ) -> BoxFuture<'a, Result<Box<dyn PreparedQueryPort>>> {
        Box::pin(async move {
            ctx.ensure_not_cancelled("mysql.prepare")?;
            let statement = {
                let mut connection = self.inner.lock().await;
                let prepared = (&mut *connection)
                    .prepare(query)
                    .await
                    .map_err(|error| driver_error(LookupFailure::Prepare, DRIVER, error))?;
                Statement::to_owned(&prepared)
            };
            let statement: Box<dyn PreparedQueryPort> = Box::new(MySqlLookupStatement {
                inner: Arc::clone(&self.inner),
                statement,
            });
            Ok(statement)
        })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            let Ok(mutex) = Arc::try_unwrap(self.inner) else {
                return Ok(());
            };
            mutex
                .into_inner()
                .close()
                .await
                .map_err(|error| driver_error(LookupFailure::Connection, DRIVER, error))
        })
    }
}

struct MySqlLookupStatement {
    inner: Arc<Mutex<MySqlConnection>>,
    statement: MySqlStatement<'static>,
}

impl PreparedQueryPort for MySqlLookupStatement {
    fn query_row<'a>(
        &'a mut self,
        ctx: &'a RequestContext,
        params: &'a [BoundParam],
    ) -> BoxFuture<'a, Result<Option<Vec<ScalarValue>>>> {
        Box::pin(async move {
            ctx.ensure_not_cancelled("mysql.query_row")?;
            let mut query = self.statement.query();
            for param in params {
                query = query.bind(param.clone());
            }
            let mut connection = self.inner.lock().await;
            let row = query
                .fetch_optional(&mut *connection)
                .await
                .map_err(|error| driver_error(LookupFailure::Query, DRIVER, error))?;
            row.as_ref().map(decode_row).transpose()
        })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        drop(self);
        Box::pin(std::future::ready(Ok(())))
    }
}

fn decode_row(row: &MySqlRow) -> Result<Vec<ScalarValue>> {
    (0..row.len())
        .map(|index| decode_column(row, index))
        .collect()
}

/// How a result column is decoded, keyed by the server's type name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MySqlColumn {
    Bool,
    Signed,
    Unsigned,
    Float,
    Double,
    Decimal,
    Text,
    Bytes,
    Date,
    Time,
    DateTime,
    Timestamp,
}

fn column_kind(type_name: &str) -> Option<MySqlColumn> {
    let kind = match type_name {
        "BOOLEAN" => MySqlColumn::Bool,
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => MySqlColumn::Signed,
        name if name.ends_with(" UNSIGNED") || name == "YEAR" || name == "BIT" => {
            MySqlColumn::Unsigned
        },
        "FLOAT" => MySqlColumn::Float,
        "DOUBLE" => MySqlColumn::Double,
        "DECIMAL" => MySqlColumn::Decimal,
        "VARCHAR" | "CHAR" | "TEXT" | "TINYTEXT" | "MEDIUMTEXT" | "LONGTEXT" | "ENUM" | "SET"
        | "JSON" => MySqlColumn::Text,
        "VARBINARY" | "BINARY" | "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" => {
            MySqlColumn::Bytes
        },
        "DATE" => MySqlColumn::Date,
        "TIME" => MySqlColumn::Time,
        "DATETIME" => MySqlColumn::DateTime,
        "TIMESTAMP" => MySqlColumn::Timestamp,
        _ => return None,
    };
    Some(kind)
}

fn decode_column(row: &MySqlRow, index: usize) -> Result<ScalarValue> {
    let type_name = {
        let raw = row
            .try_get_raw(index)
            .map_err(|error| driver_error(LookupFailure::Scan, DRIVER, error))?;
        if raw.is_null() {
            return Ok(ScalarValue::Null);
        }
        raw.type_info().name().to_owned()
    };
    let Some(kind) = column_kind(&type_name) else {
        return Err(row_shape_error(DRIVER, index, &type_name));
    };

    let decoded = match kind {
        MySqlColumn::Bool => row.try_get::<bool, _>(index).map(ScalarValue::Boolean),
        MySqlColumn::Signed => row.try_get::<i64, _>(index).map(ScalarValue::Integer),
        MySqlColumn::Unsigned => row.try_get::<u64, _>(index).map(|value| {
            i64::try_from(value)
                .map_or_else(|_| ScalarValue::Text(value.to_string()), ScalarValue::Integer)
        }),
        MySqlColumn::Float => row
            .try_get::<f32, _>(index)
            .map(|value| ScalarValue::Float(value.into())),
        MySqlColumn::Double => row.try_get::<f64, _>(index).map(ScalarValue::Float),
        MySqlColumn::Decimal => row.try_get_unchecked::<String, _>(index).map(ScalarValue::Text),
        MySqlColumn::Text => row.try_get::<String, _>(index).map(ScalarValue::Text),
        MySqlColumn::Bytes => row.try_get::<Vec<u8>, _>(index).map(ScalarValue::Bytes),
        MySqlColumn::Date => row
            .try_get::<NaiveDate, _>(index)
            .map(|value| ScalarValue::Text(value.to_string())),
        MySqlColumn::Time => row
            .try_get::<NaiveTime, _>(index)
            .map(|value| ScalarValue::Text(value.to_string())),
        MySqlColumn::DateTime => row
            .try_get::<NaiveDateTime, _>(index)
            .map(|value| ScalarValue::Text(value.to_string())),
        MySqlColumn::Timestamp => row
            .try_get::<DateTime<Utc>, _>(index)
            .map(|value| ScalarValue::Text(value.to_rfc3339())),
    };
    decoded.map_err(|error| driver_error(LookupFailure::Scan, DRIVER, error))
}

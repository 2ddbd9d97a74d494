//! Microsoft SQL Server driver backed by `tiberius`.
//!
//! The connection string is an ADO string
//! (`server=tcp:host,1433;user id=...;password=...`). Placeholders are
//! `@P1`, `@P2`, ... . Statements are compiled by the server on first
//! execution, so `prepare` does not round-trip.

use super::{driver_error, row_shape_error};
use db_query_tagger_ports::{
    BoundParam, BoxFuture, DatabaseType, LookupFailure, PreparedQueryPort, ScalarValue,
    SqlConnectionPort, SqlDriverInfo, SqlDriverPort,
};
use db_query_tagger_shared::{RequestContext, Result, SecretString};
use std::sync::Arc;
use tiberius::time::chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};
use tiberius::{Client, ColumnData, Config, FromSql, Row, ToSql};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

const DRIVER: &str = "mssql";

type MsClient = Client<Compat<TcpStream>>;

/// SQL Server driver.
#[derive(Debug, Clone)]
pub struct MsSqlDriver {
    info: SqlDriverInfo,
}

impl MsSqlDriver {
    /// Create the driver.
    #[must_use]
    pub fn new() -> Self {
        Self {
            info: SqlDriverInfo {
                database_type: DatabaseType::Mssql,
                name: DRIVER.into(),
            },
        }
    }
}

impl Default for MsSqlDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlDriverPort for MsSqlDriver {
    fn info(&self) -> &SqlDriverInfo {
        &self.info
    }

    fn open<'a>(
        &'a self,
        ctx: &'a RequestContext,
        database: &'a SecretString,
    ) -> BoxFuture<'a, Result<Box<dyn SqlConnectionPort>>> {
        Box::pin(async move {
            ctx.ensure_not_cancelled("mssql.open")?;
            let client = connect(database).await?;
            tracing::debug!(driver = DRIVER, "opened lookup connection");
            let connection: Box<dyn SqlConnectionPort> = Box::new(MsSqlConnection {
                inner: Arc::new(Mutex::new(client)),
            });
            Ok(connection)
        })
    }
}

async fn connect(database: &SecretString) -> Result<MsClient> {
    let config = Config::from_ado_string(database.expose().trim())
        .map_err(|error| driver_error(LookupFailure::Connection, DRIVER, error))?;
    let tcp = TcpStream::connect(config.get_addr())
        .await
        .map_err(|error| driver_error(LookupFailure::Connection, DRIVER, error))?;
    tcp.set_nodelay(true)
        .map_err(|error| driver_error(LookupFailure::Connection, DRIVER, error))?;
    Client::connect(config, tcp.compat_write())
        .await
        .map_err(|error| driver_error(LookupFailure::Connection, DRIVER, error))
}

struct MsSqlConnection {
    inner: Arc<Mutex<MsClient>>,
}

impl SqlConnectionPort for MsSqlConnection {
    fn prepare<'a>(
        &'a mut self,
        ctx: &'a RequestContext,
        query: &'a str,
    ) -> BoxFuture<'a, Result<Box<dyn PreparedQueryPort>>> {
        Box::pin(async move {
            ctx.ensure_not_cancelled("mssql.prepare")?;
            let statement: Box<dyn PreparedQueryPort> = Box::new(MsSqlStatement {
                inner: Arc::clone(&self.inner),
                sql: query.into(),
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

struct MsSqlStatement {
    inner: Arc<Mutex<MsClient>>,
    sql: Box<str>,
}

impl PreparedQueryPort for MsSqlStatement {
    fn query_row<'a>(
        &'a mut self,
        ctx: &'a RequestContext,
        params: &'a [BoundParam],
    ) -> BoxFuture<'a, Result<Option<Vec<ScalarValue>>>> {
        Box::pin(async move {
            ctx.ensure_not_cancelled("mssql.query_row")?;
            let values: Vec<Option<&str>> = params.iter().map(Option::as_deref).collect();
            let bound: Vec<&dyn ToSql> = values.iter().map(|value| value as &dyn ToSql).collect();

            let mut client = self.inner.lock().await;
            let stream = client
                .query(&*self.sql, bound.as_slice())
                .await
                .map_err(|error| driver_error(LookupFailure::Query, DRIVER, error))?;
            let row = stream
                .into_row()
                .await
                .map_err(|error| driver_error(LookupFailure::Query, DRIVER, error))?;
            row.map(decode_row).transpose()
        })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        drop(self);
        Box::pin(std::future::ready(Ok(())))
    }
}

fn decode_row(row: Row) -> Result<Vec<ScalarValue>> {
    row.into_iter()
        .enumerate()
        .map(|(index, data)| decode_column(index, data))
        .collect()
}

fn decode_column(index: usize, data: ColumnData<'static>) -> Result<ScalarValue> {
    let value = match data {
        ColumnData::U8(value) => value.map(|value| ScalarValue::Integer(value.into())),
        ColumnData::I16(value) => value.map(|value| ScalarValue::Integer(value.into())),
        ColumnData::I32(value) => value.map(|value| ScalarValue::Integer(value.into())),
        ColumnData::I64(value) => value.map(ScalarValue::Integer),
        ColumnData::F32(value) => value.map(|value| ScalarValue::Float(value.into())),
        ColumnData::F64(value) => value.map(ScalarValue::Float),
        ColumnData::Bit(value) => value.map(ScalarValue::Boolean),
        ColumnData::String(value) => value.map(|value| ScalarValue::Text(value.into_owned())),
        ColumnData::Binary(value) => value.map(|value| ScalarValue::Bytes(value.into_owned())),
        ColumnData::Guid(value) => value.map(|value| ScalarValue::Text(value.to_string())),
        ColumnData::Numeric(value) => value.map(|value| ScalarValue::Text(value.to_string())),
        ColumnData::Xml(None) => None,
        ColumnData::Xml(Some(_)) => return Err(row_shape_error(DRIVER, index, "xml")),
        temporal => decode_temporal(index, &temporal)?.map(ScalarValue::Text),
    };
    Ok(value.unwrap_or(ScalarValue::Null))
}

/// Date and time columns, rendered the way the other drivers render them:
/// naive values with chrono's `Display`, offset values as RFC 3339.
fn decode_temporal(index: usize, data: &ColumnData<'static>) -> Result<Option<String>> {
    let decoded = match data {
        ColumnData::Date(_) => NaiveDate::from_sql(data).map(|value| value.map(|v| v.to_string())),
        ColumnData::Time(_) => NaiveTime::from_sql(data).map(|value| value.map(|v| v.to_string())),
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            NaiveDateTime::from_sql(data).map(|value| value.map(|v| v.to_string()))
        },
        ColumnData::DateTimeOffset(_) => DateTime::<FixedOffset>::from_sql(data)
            .map(|value| value.map(|v| v.to_rfc3339())),
        _ => return Err(row_shape_error(DRIVER, index, "unsupported")),
    };
    decoded.map_err(|error| driver_error(LookupFailure::Scan, DRIVER, error))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;

    #[test]
    fn scalar_columns_decode_directly() -> Result<()> {
        assert_eq!(decode_column(0, ColumnData::I32(Some(42)))?, ScalarValue::Integer(42));
        assert_eq!(
            decode_column(1, ColumnData::String(Some(Cow::Borrowed("sensor-a"))))?,
            ScalarValue::Text("sensor-a".into())
        );
        assert_eq!(decode_column(2, ColumnData::Bit(None))?, ScalarValue::Null);
        Ok(())
    }

    #[test]
    fn null_temporal_columns_are_null() -> Result<()> {
        assert_eq!(decode_column(0, ColumnData::DateTime2(None))?, ScalarValue::Null);
        assert_eq!(decode_column(1, ColumnData::Date(None))?, ScalarValue::Null);
        assert_eq!(decode_column(2, ColumnData::DateTimeOffset(None))?, ScalarValue::Null);
        Ok(())
    }

    #[test]
    fn null_xml_is_null() -> Result<()> {
        assert_eq!(decode_column(3, ColumnData::Xml(None))?, ScalarValue::Null);
        Ok(())
    }
}

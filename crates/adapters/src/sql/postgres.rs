//! Postgres driver backed by a single `sqlx` connection.
//!
//! Parameters are declared as `TEXT` when the statement is prepared, so a
//! comparison against a non-text column needs a cast in SQL (`$1::int`).

use super::{driver_error, max_dollar_placeholder, row_shape_error};
use db_query_tagger_ports::{
    BoundParam, BoxFuture, DatabaseType, LookupFailure, PreparedQueryPort, ScalarValue,
    SqlConnectionPort, SqlDriverInfo, SqlDriverPort,
};
use db_query_tagger_shared::{RequestContext, Result, SecretString};
use sqlx::postgres::types::Oid;
use sqlx::postgres::{PgConnection, PgRow, PgStatement, PgTypeInfo};
use sqlx::types::JsonValue;
use sqlx::types::Uuid;
use sqlx::types::chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::{Connection, Executor, Row, Statement, TypeInfo, ValueRef};
use std::sync::Arc;
use tokio::sync::Mutex;

const DRIVER: &str = "postgres";

/// Postgres driver. The connection string is a `postgres://` URL.
#[derive(Debug, Clone)]
pub struct PostgresDriver {
    info: SqlDriverInfo,
}

impl PostgresDriver {
    /// Create the driver.
    #[must_use]
    pub fn new() -> Self {
        Self {
            info: SqlDriverInfo {
                database_type: DatabaseType::Postgres,
                name: DRIVER.into(),
            },
        }
    }
}

impl Default for PostgresDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlDriverPort for PostgresDriver {
    fn info(&self) -> &SqlDriverInfo {
        &self.info
    }

    fn open<'a>(
        &'a self,
        ctx: &'a RequestContext,
        database: &'a SecretString,
    ) -> BoxFuture<'a, Result<Box<dyn SqlConnectionPort>>> {
        Box::pin(async move {
            ctx.ensure_not_cancelled("postgres.open")?;
            let connection = PgConnection::connect(database.expose().trim())
                .await
                .map_err(|error| driver_error(LookupFailure::Connection, DRIVER, error))?;
            tracing::debug!(driver = DRIVER, "opened lookup connection");
            let connection: Box<dyn SqlConnectionPort> = Box::new(PostgresConnection {
                inner: Arc::new(Mutex::new(connection)),
            });
            Ok(connection)
        })
    }
}

struct PostgresConnection {
    inner: Arc<Mutex<PgConnection>>,
}

impl SqlConnectionPort for PostgresConnection {
    fn prepare<'a>(
        &'a mut self,
        ctx: &'a RequestContext,
        query: &'a str,
    ) -> BoxFuture<'a, Result<Box<dyn PreparedQueryPort>>> {
        Box::pin(async move {
            ctx.ensure_not_cancelled("postgres.prepare")?;
            let parameters = vec![PgTypeInfo::with_name("text"); max_dollar_placeholder(query)];
            let statement = {
                let mut connection = self.inner.lock().await;
                let prepared = (&mut *connection)
                    .prepare_with(query, &parameters)
                    .await
                    .map_err(|error| driver_error(LookupFailure::Prepare, DRIVER, error))?;
                Statement::to_owned(&prepared)
            };
            let statement: Box<dyn PreparedQueryPort> = Box::new(PostgresStatement {
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

struct PostgresStatement {
    inner: Arc<Mutex<PgConnection>>,
    statement: PgStatement<'static>,
}

impl PreparedQueryPort for PostgresStatement {
    fn query_row<'a>(
        &'a mut self,
        ctx: &'a RequestContext,
        params: &'a [BoundParam],
    ) -> BoxFuture<'a, Result<Option<Vec<ScalarValue>>>> {
        Box::pin(async move {
            ctx.ensure_not_cancelled("postgres.query_row")?;
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

fn decode_row(row: &PgRow) -> Result<Vec<ScalarValue>> {
    (0..row.len())
        .map(|index| decode_column(row, index))
        .collect()
}

/// How a result column is decoded, keyed by the server's type name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PgColumn {
    Bool,
    Int2,
    Int4,
    Int8,
    Oid,
    Float4,
    Float8,
    Numeric,
    Text,
    Bytes,
    Uuid,
    Json,
    Date,
    Time,
    Timestamp,
    TimestampTz,
}

fn column_kind(type_name: &str) -> Option<PgColumn> {
    let kind = match type_name {
        "BOOL" => PgColumn::Bool,
        "INT2" => PgColumn::Int2,
        "INT4" => PgColumn::Int4,
        "INT8" => PgColumn::Int8,
        "OID" => PgColumn::Oid,
        "FLOAT4" => PgColumn::Float4,
        "FLOAT8" => PgColumn::Float8,
        "NUMERIC" => PgColumn::Numeric,
        // `CHAR` is how bpchar (`CHAR(n)`) reports itself.
        "TEXT" | "VARCHAR" | "CHAR" | "BPCHAR" | "NAME" | "CITEXT" | "UNKNOWN" => PgColumn::Text,
        "BYTEA" => PgColumn::Bytes,
        "UUID" => PgColumn::Uuid,
        "JSON" | "JSONB" => PgColumn::Json,
        "DATE" => PgColumn::Date,
        "TIME" => PgColumn::Time,
        "TIMESTAMP" => PgColumn::Timestamp,
        "TIMESTAMPTZ" => PgColumn::TimestampTz,
        _ => return None,
    };
    Some(kind)
}

fn decode_column(row: &PgRow, index: usize) -> Result<ScalarValue> {
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
        PgColumn::Bool => row.try_get::<bool, _>(index).map(ScalarValue::Boolean),
        PgColumn::Int2 => row
            .try_get::<i16, _>(index)
            .map(|value| ScalarValue::Integer(value.into())),
        PgColumn::Int4 => row
            .try_get::<i32, _>(index)
            .map(|value| ScalarValue::Integer(value.into())),
        PgColumn::Int8 => row.try_get::<i64, _>(index).map(ScalarValue::Integer),
        PgColumn::Oid => row
            .try_get::<Oid, _>(index)
            .map(|value| ScalarValue::Integer(value.0.into())),
        PgColumn::Float4 => row
            .try_get::<f32, _>(index)
            .map(|value| ScalarValue::Float(value.into())),
        PgColumn::Float8 => row.try_get::<f64, _>(index).map(ScalarValue::Float),
        PgColumn::Numeric => row.try_get_unchecked::<&[u8], _>(index).and_then(|bytes| {
            render_numeric(bytes)
                .map(ScalarValue::Text)
                .ok_or_else(|| sqlx::Error::Decode("malformed NUMERIC value".into()))
        }),
        PgColumn::Text => row.try_get_unchecked::<String, _>(index).map(ScalarValue::Text),
        PgColumn::Bytes => row.try_get::<Vec<u8>, _>(index).map(ScalarValue::Bytes),
        PgColumn::Uuid => row
            .try_get::<Uuid, _>(index)
            .map(|value| ScalarValue::Text(value.to_string())),
        PgColumn::Json => row
            .try_get::<JsonValue, _>(index)
            .map(|value| ScalarValue::Text(value.to_string())),
        PgColumn::Date => row
            .try_get::<NaiveDate, _>(index)
            .map(|value| ScalarValue::Text(value.to_string())),
        PgColumn::Time => row
            .try_get::<NaiveTime, _>(index)
            .map(|value| ScalarValue::Text(value.to_string())),
        PgColumn::Timestamp => row
            .try_get::<NaiveDateTime, _>(index)
            .map(|value| ScalarValue::Text(value.to_string())),
        PgColumn::TimestampTz => row
            .try_get::<DateTime<Utc>, _>(index)
            .map(|value| ScalarValue::Text(value.to_rfc3339())),
    };
    decoded.map_err(|error| driver_error(LookupFailure::Scan, DRIVER, error))
}

const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// Render a NUMERIC in its binary wire form (base-10000 digit groups) as
/// decimal text with the column's display scale.
fn render_numeric(bytes: &[u8]) -> Option<String> {
    let word = |at: usize| {
        bytes
            .get(at..at + 2)
            .and_then(|pair| <[u8; 2]>::try_from(pair).ok())
            .map(u16::from_be_bytes)
    };
    let ndigits = usize::from(word(0)?);
    let weight = i32::from(i16::from_be_bytes(word(2)?.to_be_bytes()));
    let sign = word(4)?;
    let dscale = usize::from(word(6)?);
    let groups: Vec<u16> = (0..ndigits)
        .map(|group| word(8 + 2 * group))
        .collect::<Option<_>>()?;
    let group_at = |position: i32| {
        usize::try_from(position)
            .ok()
            .and_then(|position| groups.get(position).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    match sign {
        NUMERIC_NAN => return Some("NaN".to_owned()),
        NUMERIC_PINF => return Some("Infinity".to_owned()),
        NUMERIC_NINF => return Some("-Infinity".to_owned()),
        NUMERIC_NEG => out.push('-'),
        NUMERIC_POS => {},
        _ => return None,
    }

    if weight < 0 {
        out.push('0');
    } else {
        out.push_str(&group_at(0).to_string());
        for position in 1..=weight {
            out.push_str(&format!("{:04}", group_at(position)));
        }
    }
    if dscale > 0 {
        let mut fraction = String::with_capacity(dscale + 4);
        let mut position = weight + 1;
        while fraction.len() < dscale {
            fraction.push_str(&format!("{:04}", group_at(position)));
            position += 1;
        }
        fraction.truncate(dscale);
        out.push('.');
        out.push_str(&fraction);
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric(weight: i16, sign: u16, dscale: u16, groups: &[u16]) -> Vec<u8> {
        let mut bytes = Vec::new();
        let ndigits = u16::try_from(groups.len()).unwrap_or_default();
        for word in [ndigits, u16::from_be_bytes(weight.to_be_bytes()), sign, dscale] {
            bytes.extend_from_slice(&word.to_be_bytes());
        }
        for group in groups {
            bytes.extend_from_slice(&group.to_be_bytes());
        }
        bytes
    }

    #[test]
    fn fixed_width_char_reports_as_char() {
        assert_eq!(column_kind("CHAR"), Some(PgColumn::Text));
        assert_eq!(column_kind("VARCHAR"), Some(PgColumn::Text));
    }

    #[test]
    fn common_lookup_types_are_decodable() {
        assert_eq!(column_kind("NUMERIC"), Some(PgColumn::Numeric));
        assert_eq!(column_kind("UUID"), Some(PgColumn::Uuid));
        assert_eq!(column_kind("DATE"), Some(PgColumn::Date));
        assert_eq!(column_kind("TIMESTAMP"), Some(PgColumn::Timestamp));
        assert_eq!(column_kind("TIMESTAMPTZ"), Some(PgColumn::TimestampTz));
        assert_eq!(column_kind("JSONB"), Some(PgColumn::Json));
        assert_eq!(column_kind("INTERVAL"), None);
    }

    #[test]
    fn numeric_renders_with_display_scale() {
        assert_eq!(
            render_numeric(&numeric(0, NUMERIC_POS, 1, &[12, 5000])).as_deref(),
            Some("12.5")
        );
        assert_eq!(
            render_numeric(&numeric(-1, NUMERIC_NEG, 2, &[100])).as_deref(),
            Some("-0.01")
        );
        assert_eq!(
            render_numeric(&numeric(1, NUMERIC_POS, 0, &[1])).as_deref(),
            Some("10000")
        );
        assert_eq!(
            render_numeric(&numeric(-2, NUMERIC_POS, 5, &[1000])).as_deref(),
            Some("0.00001")
        );
        assert_eq!(
            render_numeric(&numeric(0, NUMERIC_POS, 0, &[])).as_deref(),
            Some("0")
        );
        assert_eq!(
            render_numeric(&numeric(0, NUMERIC_NAN, 0, &[])).as_deref(),
            Some("NaN")
        );
    }

    #[test]
    fn truncated_numeric_is_rejected() {
        assert_eq!(render_numeric(&[0, 2, 0, 0]), None);
        assert_eq!(render_numeric(&numeric(0, 0x1234, 0, &[1])), None);
    }
}

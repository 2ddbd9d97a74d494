//! In-memory adapter implementations for port contracts.
//!
//! These implementations are intended for:
//! - Unit/integration tests of the lookup core and the processor
//! - Fault injection (connect/prepare failures, mid-batch disconnects, slow queries)
//! - Observing lifecycle ordering through a shared journal

use db_query_tagger_domain::{BoundParam, DatabaseType, LookupFailure, ScalarValue};
use db_query_tagger_ports::{
    BoxFuture, LogEvent, LogFields, LogLevel, LoggerPort, PreparedQueryPort, SqlConnectionPort,
    SqlDriverInfo, SqlDriverPort, TelemetryPort, TelemetryTags,
};
use db_query_tagger_shared::{ErrorEnvelope, RequestContext, Result, SecretString};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A no-op logger implementation.
#[derive(Debug, Default)]
pub struct NoopLogger;

impl LoggerPort for NoopLogger {
    fn log(&self, _event: LogEvent) {}

    fn child(&self, _fields: LogFields) -> Box<dyn LoggerPort> {
        Box::new(Self)
    }
}

/// A no-op telemetry implementation.
#[derive(Debug, Default)]
pub struct NoopTelemetry;

impl TelemetryPort for NoopTelemetry {
    fn increment_counter(&self, _name: &str, _value: u64, _tags: Option<&TelemetryTags>) {}

    fn record_timer_ms(&self, _name: &str, _duration_ms: u64, _tags: Option<&TelemetryTags>) {}
}

/// Logger that keeps every event for later assertions.
#[derive(Debug, Default, Clone)]
pub struct RecordingLogger {
    events: Arc<Mutex<Vec<LogEvent>>>,
    base_fields: LogFields,
}

impl RecordingLogger {
    /// Snapshot of all recorded events.
    pub fn events(&self) -> Vec<LogEvent> {
        self.events.lock().expect("recording logger lock").clone()
    }

    /// Recorded events with the given name.
    pub fn events_named(&self, name: &str) -> Vec<LogEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.event.as_ref() == name)
            .collect()
    }

    /// Number of recorded events at `level`.
    pub fn count_at(&self, level: LogLevel) -> usize {
        self.events()
            .iter()
            .filter(|event| event.level == level)
            .count()
    }
}

impl LoggerPort for RecordingLogger {
    fn log(&self, mut event: LogEvent) {
        if !self.base_fields.is_empty() {
            let mut fields = self.base_fields.clone();
            fields.extend(event.fields.take().unwrap_or_default());
            event.fields = Some(fields);
        }
        self.events.lock().expect("recording logger lock").push(event);
    }

    fn child(&self, fields: LogFields) -> Box<dyn LoggerPort> {
        let mut base_fields = self.base_fields.clone();
        base_fields.extend(fields);
        Box::new(Self {
            events: Arc::clone(&self.events),
            base_fields,
        })
    }
}

/// Telemetry that sums counters and keeps timer samples.
#[derive(Debug, Default, Clone)]
pub struct RecordingTelemetry {
    counters: Arc<Mutex<BTreeMap<String, u64>>>,
    timers: Arc<Mutex<Vec<(String, u64)>>>,
}

impl RecordingTelemetry {
    /// Current value of counter `name` (tags ignored).
    pub fn counter(&self, name: &str) -> u64 {
        self.counters
            .lock()
            .expect("telemetry lock")
            .get(name)
            .copied()
            .unwrap_or_default()
    }

    /// Number of timer samples recorded under `name`.
    pub fn timer_samples(&self, name: &str) -> usize {
        self.timers
            .lock()
            .expect("telemetry lock")
            .iter()
            .filter(|(timer, _)| timer == name)
            .count()
    }
}

impl TelemetryPort for RecordingTelemetry {
    fn increment_counter(&self, name: &str, value: u64, _tags: Option<&TelemetryTags>) {
        *self
            .counters
            .lock()
            .expect("telemetry lock")
            .entry(name.to_owned())
            .or_default() += value;
    }

    fn record_timer_ms(&self, name: &str, duration_ms: u64, _tags: Option<&TelemetryTags>) {
        self.timers
            .lock()
            .expect("telemetry lock")
            .push((name.to_owned(), duration_ms));
    }
}

/// Lookup function backing an [`InMemorySqlDriver`].
pub type LookupFn = dyn Fn(&[BoundParam]) -> Result<Option<Vec<ScalarValue>>> + Send + Sync;

#[derive(Default, Clone)]
struct Faults {
    open: Option<ErrorEnvelope>,
    prepare: Option<ErrorEnvelope>,
    disconnect_after: Option<usize>,
    query_delay: Option<Duration>,
    close_statement: Option<ErrorEnvelope>,
}

struct Shared {
    lookup: Arc<LookupFn>,
    faults: Faults,
    journal: Mutex<Vec<String>>,
    queries: AtomicUsize,
}

impl Shared {
    fn record(&self, entry: impl Into<String>) {
        self.journal.lock().expect("journal lock").push(entry.into());
    }
}

/// Scriptable SQL driver.
///
/// Every lifecycle call is appended to a journal (`open`, `prepare:<sql>`,
/// `query:<params>`, `close:statement`, `close:connection`).
#[derive(Clone)]
pub struct InMemorySqlDriver {
    info: SqlDriverInfo,
    shared: Arc<Shared>,
}

impl InMemorySqlDriver {
    /// Driver answering each query with `lookup(params)`.
    pub fn new<F>(database_type: DatabaseType, lookup: F) -> Self
    where
        F: Fn(&[BoundParam]) -> Result<Option<Vec<ScalarValue>>> + Send + Sync + 'static,
    {
        Self::build(database_type, Arc::new(lookup), Faults::default())
    }

    /// Driver backed by a table keyed on the first bound parameter.
    pub fn keyed(database_type: DatabaseType, rows: BTreeMap<String, Vec<ScalarValue>>) -> Self {
        Self::new(database_type, move |params| {
            let key = params.first().cloned().flatten();
            Ok(key.and_then(|key| rows.get(&key).cloned()))
        })
    }

    /// Fail every `open` with `error`.
    #[must_use]
    pub fn with_open_error(self, error: ErrorEnvelope) -> Self {
        self.with_faults(|faults| faults.open = Some(error))
    }

    /// Fail every `prepare` with `error`.
    #[must_use]
    pub fn with_prepare_error(self, error: ErrorEnvelope) -> Self {
        self.with_faults(|faults| faults.prepare = Some(error))
    }

    /// Answer the first `count` queries normally, then fail every later one
    /// with a `lookup:connection` error.
    #[must_use]
    pub fn with_disconnect_after(self, count: usize) -> Self {
        self.with_faults(|faults| faults.disconnect_after = Some(count))
    }

    /// Sleep before answering each query.
    #[must_use]
    pub fn with_query_delay(self, delay: Duration) -> Self {
        self.with_faults(|faults| faults.query_delay = Some(delay))
    }

    /// Fail statement close with `error`.
    #[must_use]
    pub fn with_close_statement_error(self, error: ErrorEnvelope) -> Self {
        self.with_faults(|faults| faults.close_statement = Some(error))
    }

    /// Snapshot of the lifecycle journal.
    pub fn journal(&self) -> Vec<String> {
        self.shared.journal.lock().expect("journal lock").clone()
    }

    /// Number of `query_row` calls so far.
    pub fn query_count(&self) -> usize {
        self.shared.queries.load(Ordering::SeqCst)
    }

    fn build(database_type: DatabaseType, lookup: Arc<LookupFn>, faults: Faults) -> Self {
        Self {
            info: SqlDriverInfo {
                database_type,
                name: "in-memory".into(),
            },
            shared: Arc::new(Shared {
                lookup,
                faults,
                journal: Mutex::new(Vec::new()),
                queries: AtomicUsize::new(0),
            }),
        }
    }

    fn with_faults(self, apply: impl FnOnce(&mut Faults)) -> Self {
        let mut faults = self.shared.faults.clone();
        apply(&mut faults);
        Self::build(
            self.info.database_type,
            Arc::clone(&self.shared.lookup),
            faults,
        )
    }
}

impl SqlDriverPort for InMemorySqlDriver {
    fn info(&self) -> &SqlDriverInfo {
        &self.info
    }

    fn open<'a>(
        &'a self,
        ctx: &'a RequestContext,
        _database: &'a SecretString,
    ) -> BoxFuture<'a, Result<Box<dyn SqlConnectionPort>>> {
        Box::pin(async move {
            ctx.ensure_not_cancelled("sql.open")?;
            self.shared.record("open");
            if let Some(error) = &self.shared.faults.open {
                return Err(error.clone());
            }
            let connection: Box<dyn SqlConnectionPort> = Box::new(InMemoryConnection {
                shared: Arc::clone(&self.shared),
            });
            Ok(connection)
        })
    }
}

struct InMemoryConnection {
    shared: Arc<Shared>,
}

impl SqlConnectionPort for InMemoryConnection {
    fn prepare<'a>(
        &'a mut self,
        _ctx: &'a RequestContext,
        query: &'a str,
    ) -> BoxFuture<'a, Result<Box<dyn PreparedQueryPort>>> {
        Box::pin(async move {
            self.shared.record(format!("prepare:{query}"));
            if let Some(error) = &self.shared.faults.prepare {
                return Err(error.clone());
            }
            let statement: Box<dyn PreparedQueryPort> = Box::new(InMemoryStatement {
                shared: Arc::clone(&self.shared),
            });
            Ok(statement)
        })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            self.shared.record("close:connection");
            Ok(())
        })
    }
}

struct InMemoryStatement {
    shared: Arc<Shared>,
}

impl PreparedQueryPort for InMemoryStatement {
    fn query_row<'a>(
        &'a mut self,
        _ctx: &'a RequestContext,
        params: &'a [BoundParam],
    ) -> BoxFuture<'a, Result<Option<Vec<ScalarValue>>>> {
        Box::pin(async move {
            let index = self.shared.queries.fetch_add(1, Ordering::SeqCst);
            self.shared
                .record(format!("query:{}", render_params(params)));
            if let Some(delay) = self.shared.faults.query_delay {
                tokio::time::sleep(delay).await;
            }
            if self
                .shared
                .faults
                .disconnect_after
                .is_some_and(|limit| index >= limit)
            {
                return Err(LookupFailure::Connection.error("connection reset by peer"));
            }
            (self.shared.lookup)(params)
        })
    }

    fn close(self: Box<Self>) -> BoxFuture<'static, Result<()>> {
        Box::pin(async move {
            self.shared.record("close:statement");
            match &self.shared.faults.close_statement {
                Some(error) => Err(error.clone()),
                None => Ok(()),
            }
        })
    }
}

fn render_params(params: &[BoundParam]) -> String {
    params
        .iter()
        .map(|param| param.as_deref().unwrap_or("NULL"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Build a `LogEvent` helper for tests.
#[must_use]
pub fn log_event(level: LogLevel, event: &str, message: &str) -> LogEvent {
    LogEvent::new(level, event, message, None)
}

/// Text row helper.
#[must_use]
pub fn text_row(values: &[&str]) -> Vec<ScalarValue> {
    values
        .iter()
        .map(|value| ScalarValue::Text((*value).to_owned()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn keyed_driver_answers_by_first_param() -> Result<()> {
        let ctx = RequestContext::new_run();
        let mut rows = BTreeMap::new();
        rows.insert("42".to_owned(), text_row(&["sensor-a"]));
        let driver = InMemorySqlDriver::keyed(DatabaseType::Sqlite, rows);

        let mut connection = driver.open(&ctx, &SecretString::from("mem")).await?;
        let mut statement = connection.prepare(&ctx, "select name").await?;
        let hit = statement.query_row(&ctx, &[Some("42".to_owned())]).await?;
        let miss = statement.query_row(&ctx, &[None]).await?;
        statement.close().await?;
        connection.close().await?;

        assert_eq!(hit, Some(text_row(&["sensor-a"])));
        assert_eq!(miss, None);
        assert_eq!(
            driver.journal(),
            vec![
                "open",
                "prepare:select name",
                "query:42",
                "query:NULL",
                "close:statement",
                "close:connection",
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn disconnect_after_fails_later_queries() -> Result<()> {
        let ctx = RequestContext::new_run();
        let driver = InMemorySqlDriver::new(DatabaseType::Sqlite, |_| Ok(None))
            .with_disconnect_after(1);
        let mut connection = driver.open(&ctx, &SecretString::from("mem")).await?;
        let mut statement = connection.prepare(&ctx, "select 1").await?;

        assert!(statement.query_row(&ctx, &[]).await.is_ok());
        let error = statement
            .query_row(&ctx, &[])
            .await
            .expect_err("second query should fail");
        assert_eq!(
            LookupFailure::classify(&error),
            Some(LookupFailure::Connection)
        );
        Ok(())
    }

    #[test]
    fn recording_logger_child_shares_events() {
        let logger = RecordingLogger::default();
        let mut fields = LogFields::new();
        fields.insert("batch".into(), serde_json::Value::from("batch_1"));
        let child = logger.child(fields);
        child.warn("x.y", "hello", None);

        let events = logger.events_named("x.y");
        assert_eq!(events.len(), 1);
        assert_eq!(logger.count_at(LogLevel::Warn), 1);
        assert!(
            events[0]
                .fields
                .as_ref()
                .is_some_and(|fields| fields.contains_key("batch"))
        );
    }
}

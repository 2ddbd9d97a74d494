//! Enrich one batch of metrics with lookup results.
//!
//! One connection and one prepared statement serve the whole batch. Both are
//! closed (statement first) on every exit path. Nothing here returns an
//! error: setup and lookup failures are logged, counted, and the batch comes
//! back with the same length and order it went in.

use crate::binder::bind_parameters;
use crate::executor::execute_lookup;
use crate::merger::{MergeStatus, merge_outcome};
use db_query_tagger_domain::{LookupOutcome, LookupPlan, MetricTags};
use db_query_tagger_ports::{
    LogFields, LogLevel, LoggerPort, SqlConnectionPort, SqlDriverPort, TelemetryPort,
    TelemetryTags,
};
use db_query_tagger_shared::{ErrorEnvelope, RequestContext, Result, SecretString};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Input payload for one batch.
#[derive(Debug, Clone)]
pub struct EnrichBatchInput<M> {
    /// Query and tag mapping.
    pub plan: Arc<LookupPlan>,
    /// Connection string or file path.
    pub database: SecretString,
    /// Deadline for each single lookup.
    pub query_timeout: Duration,
    /// The batch, in host order.
    pub metrics: Vec<M>,
}

/// Dependencies required by enrich-batch.
#[derive(Clone)]
pub struct EnrichBatchDeps {
    /// Driver for the configured database family.
    pub driver: Arc<dyn SqlDriverPort>,
    /// Optional logger.
    pub logger: Option<Arc<dyn LoggerPort>>,
    /// Optional telemetry sink.
    pub telemetry: Option<Arc<dyn TelemetryPort>>,
}

/// Per-batch counters. `found + not_found + failed + skipped` equals the
/// batch size.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichStats {
    /// Metrics that received result tags.
    pub found: usize,
    /// Metrics whose lookup matched no row.
    pub not_found: usize,
    /// Metrics whose lookup failed.
    pub failed: usize,
    /// Metrics that saw no lookup (setup failure or cancellation).
    pub skipped: usize,
}

impl EnrichStats {
    /// Number of metrics accounted for.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.found + self.not_found + self.failed + self.skipped
    }
}

/// Output of one batch.
#[derive(Debug, Clone)]
pub struct EnrichBatchOutput<M> {
    /// The batch, same length and order as the input.
    pub metrics: Vec<M>,
    /// Outcome counters.
    pub stats: EnrichStats,
    /// Set when the connection or statement could not be set up.
    pub setup_error: Option<ErrorEnvelope>,
}

/// Look up and merge tags for every metric in the batch.
#[tracing::instrument(
    name = "tagger.batch",
    skip_all,
    fields(
        correlation_id = %ctx.correlation_id().as_str(),
        database_type = deps.driver.info().database_type.as_str(),
        metrics = input.metrics.len(),
    )
)]
pub async fn enrich_batch<M>(
    ctx: &RequestContext,
    deps: &EnrichBatchDeps,
    input: EnrichBatchInput<M>,
) -> EnrichBatchOutput<M>
where
    M: MetricTags + Send,
{
    let started_at = Instant::now();
    let reporter = BatchReporter::new(ctx, deps);
    let EnrichBatchInput {
        plan,
        database,
        query_timeout,
        mut metrics,
    } = input;

    let mut connection = match deps.driver.open(ctx, &database).await {
        Ok(connection) => connection,
        Err(error) => return reporter.setup_failed("open", error, metrics, started_at),
    };
    let mut statement = match connection.prepare(ctx, plan.query()).await {
        Ok(statement) => statement,
        Err(error) => {
            close_connection(&reporter, connection).await;
            return reporter.setup_failed("prepare", error, metrics, started_at);
        },
    };

    let mut stats = EnrichStats::default();
    let total = metrics.len();
    for (index, metric) in metrics.iter_mut().enumerate() {
        if ctx.is_cancelled() {
            stats.skipped = total - index;
            reporter.cancelled(index, stats.skipped);
            break;
        }

        let params = bind_parameters(&*metric, plan.param_tags());
        let outcome = execute_lookup(
            ctx,
            statement.as_mut(),
            &params,
            plan.result_tags().len(),
            query_timeout,
        )
        .await;
        match merge_outcome(metric, &outcome, &plan) {
            MergeStatus::Tagged => stats.found += 1,
            MergeStatus::Unmatched => stats.not_found += 1,
            MergeStatus::Failed => {
                stats.failed += 1;
                reporter.lookup_failed(index, &outcome);
            },
        }
    }

    reporter.close_result("statement", statement.close().await);
    close_connection(&reporter, connection).await;
    reporter.completed(&stats, started_at);

    EnrichBatchOutput {
        metrics,
        stats,
        setup_error: None,
    }
}

async fn close_connection(reporter: &BatchReporter, connection: Box<dyn SqlConnectionPort>) {
    reporter.close_result("connection", connection.close().await);
}

/// Logging and telemetry for one batch, pre-tagged with its correlation id
/// and database family.
struct BatchReporter {
    logger: Option<Box<dyn LoggerPort>>,
    telemetry: Option<Arc<dyn TelemetryPort>>,
    tags: TelemetryTags,
}

impl BatchReporter {
    fn new(ctx: &RequestContext, deps: &EnrichBatchDeps) -> Self {
        let database_type = deps.driver.info().database_type.as_str();
        let logger = deps.logger.as_ref().map(|logger| {
            let mut fields = LogFields::new();
            fields.insert(
                "correlationId".into(),
                Value::String(ctx.correlation_id().as_str().to_owned()),
            );
            fields.insert("databaseType".into(), Value::String(database_type.to_owned()));
            logger.child(fields)
        });
        let mut tags = TelemetryTags::new();
        tags.insert("databaseType".into(), database_type.into());
        Self {
            logger,
            telemetry: deps.telemetry.clone(),
            tags,
        }
    }

    fn setup_failed<M>(
        &self,
        stage: &str,
        error: ErrorEnvelope,
        metrics: Vec<M>,
        started_at: Instant,
    ) -> EnrichBatchOutput<M> {
        let stats = EnrichStats {
            skipped: metrics.len(),
            ..EnrichStats::default()
        };
        if let Some(logger) = self.logger.as_ref() {
            let mut fields = LogFields::new();
            fields.insert("stage".into(), Value::String(stage.to_owned()));
            fields.insert("skipped".into(), Value::from(stats.skipped));
            logger.log_error(
                LogLevel::Error,
                "tagger.batch.setup_failed",
                "Lookup setup failed; batch passes through unchanged",
                Some(fields),
                &error,
            );
        }
        self.count("tagger.batch.setup_failed", 1);
        self.completed(&stats, started_at);
        EnrichBatchOutput {
            metrics,
            stats,
            setup_error: Some(error),
        }
    }

    fn lookup_failed(&self, index: usize, outcome: &LookupOutcome) {
        let LookupOutcome::QueryError(error) = outcome else {
            return;
        };
        if let Some(logger) = self.logger.as_ref() {
            let mut fields = LogFields::new();
            fields.insert("index".into(), Value::from(index));
            fields.insert("outcome".into(), Value::from(outcome.label()));
            logger.log_error(
                LogLevel::Error,
                "tagger.lookup.failed",
                "Lookup failed; metric left unchanged",
                Some(fields),
                error,
            );
        }
    }

    fn cancelled(&self, processed: usize, skipped: usize) {
        if let Some(logger) = self.logger.as_ref() {
            let mut fields = LogFields::new();
            fields.insert("processed".into(), Value::from(processed));
            fields.insert("skipped".into(), Value::from(skipped));
            logger.warn(
                "tagger.batch.cancelled",
                "Batch cancelled; remaining metrics pass through",
                Some(fields),
            );
        }
        self.count("tagger.batch.cancelled", 1);
    }

    fn close_result(&self, resource: &str, result: Result<()>) {
        let Err(error) = result else {
            return;
        };
        if let Some(logger) = self.logger.as_ref() {
            let mut fields = LogFields::new();
            fields.insert("resource".into(), Value::String(resource.to_owned()));
            logger.log_error(
                LogLevel::Warn,
                "tagger.batch.close_failed",
                "Closing lookup resource failed",
                Some(fields),
                &error,
            );
        }
        self.count("tagger.batch.close_failed", 1);
    }

    fn completed(&self, stats: &EnrichStats, started_at: Instant) {
        let duration_ms = duration_ms(started_at);
        if let Some(logger) = self.logger.as_ref() {
            let mut fields = LogFields::new();
            fields.insert("found".into(), Value::from(stats.found));
            fields.insert("notFound".into(), Value::from(stats.not_found));
            fields.insert("failed".into(), Value::from(stats.failed));
            fields.insert("skipped".into(), Value::from(stats.skipped));
            fields.insert("durationMs".into(), Value::from(duration_ms));
            logger.debug("tagger.batch.completed", "Batch completed", Some(fields));
        }
        self.count("tagger.lookup.found", stats.found);
        self.count("tagger.lookup.not_found", stats.not_found);
        self.count("tagger.lookup.failed", stats.failed);
        if let Some(telemetry) = self.telemetry.as_ref() {
            telemetry.record_timer_ms("tagger.batch.duration", duration_ms, Some(&self.tags));
        }
    }

    fn count(&self, name: &str, value: usize) {
        if value == 0 {
            return;
        }
        if let Some(telemetry) = self.telemetry.as_ref() {
            let value = u64::try_from(value).unwrap_or(u64::MAX);
            telemetry.increment_counter(name, value, Some(&self.tags));
        }
    }
}

fn duration_ms(started_at: Instant) -> u64 {
    u64::try_from(started_at.elapsed().as_millis()).unwrap_or(u64::MAX)
}

//! The `db_query_tagger` processor.

use crate::processor::{Processor, ProcessorServices};
use crate::InfraResult;
use db_query_tagger_app::{EnrichBatchDeps, EnrichBatchInput, EnrichBatchOutput, enrich_batch};
use db_query_tagger_config::{DESCRIPTION, PLUGIN_NAME, SAMPLE_CONFIG, ValidatedTaggerConfig};
use db_query_tagger_domain::{LookupPlan, Metric};
use db_query_tagger_ports::BoxFuture;
use db_query_tagger_shared::{RequestContext, SecretString};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// One configured tagger instance.
///
/// Calls to [`DbQueryTagger::apply_batch`] on the same instance run one at a
/// time; separate instances share nothing mutable.
pub struct DbQueryTagger {
    plan: Arc<LookupPlan>,
    database: SecretString,
    query_timeout: Duration,
    deps: EnrichBatchDeps,
    in_flight: Mutex<()>,
}

impl DbQueryTagger {
    /// Build an instance, resolving its driver from `services.drivers`.
    pub fn from_config(
        config: &ValidatedTaggerConfig,
        services: &ProcessorServices,
    ) -> InfraResult<Self> {
        let driver = services.drivers.resolve(config.database_type())?;
        Ok(Self {
            plan: Arc::new(config.lookup_plan()),
            database: config.connection(),
            query_timeout: config.query_timeout(),
            deps: EnrichBatchDeps {
                driver,
                logger: services.logger.clone(),
                telemetry: services.telemetry.clone(),
            },
            in_flight: Mutex::new(()),
        })
    }

    /// Enrich one batch and return it with its stats.
    ///
    /// Each call runs under a child context with its own `batch_*`
    /// correlation id; cancelling `ctx` cancels the batch.
    pub async fn apply_batch(
        &self,
        ctx: &RequestContext,
        metrics: Vec<Metric>,
    ) -> EnrichBatchOutput<Metric> {
        let _in_flight = self.in_flight.lock().await;
        let batch_ctx = ctx.child_batch();
        let input = EnrichBatchInput {
            plan: Arc::clone(&self.plan),
            database: self.database.clone(),
            query_timeout: self.query_timeout,
            metrics,
        };
        enrich_batch(&batch_ctx, &self.deps, input).await
    }
}

impl fmt::Debug for DbQueryTagger {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("DbQueryTagger")
            .field("database_type", &self.deps.driver.info().database_type)
            .field("plan", &self.plan)
            .field("query_timeout", &self.query_timeout)
            .finish_non_exhaustive()
    }
}

impl Processor for DbQueryTagger {
    fn name(&self) -> &'static str {
        PLUGIN_NAME
    }

    fn description(&self) -> &'static str {
        DESCRIPTION
    }

    fn sample_config(&self) -> &'static str {
        SAMPLE_CONFIG
    }

    fn apply<'a>(
        &'a self,
        ctx: &'a RequestContext,
        metrics: Vec<Metric>,
    ) -> BoxFuture<'a, Vec<Metric>> {
        Box::pin(async move { self.apply_batch(ctx, metrics).await.metrics })
    }
}

//! Host plugin contract and the plugin registry.

use crate::driver_registry::DriverRegistry;
use crate::tagger::DbQueryTagger;
use crate::InfraResult;
use db_query_tagger_config::{DESCRIPTION, PLUGIN_NAME, SAMPLE_CONFIG, ValidatedTaggerConfig};
use db_query_tagger_domain::Metric;
use db_query_tagger_ports::{BoxFuture, LoggerPort, TelemetryPort};
use db_query_tagger_shared::{ErrorCode, ErrorEnvelope, RequestContext};
use std::collections::BTreeMap;
use std::sync::Arc;

/// A metric processor as seen by the host pipeline.
///
/// `apply` never fails: the returned batch has the input's length and order.
pub trait Processor: Send + Sync {
    /// Registered plugin name.
    fn name(&self) -> &'static str;

    /// One-line description.
    fn description(&self) -> &'static str;

    /// Annotated sample configuration block.
    fn sample_config(&self) -> &'static str;

    /// Process one batch.
    fn apply<'a>(
        &'a self,
        ctx: &'a RequestContext,
        metrics: Vec<Metric>,
    ) -> BoxFuture<'a, Vec<Metric>>;
}

/// Shared services handed to processor factories.
#[derive(Clone, Default)]
pub struct ProcessorServices {
    /// Driver lookup by database family.
    pub drivers: DriverRegistry,
    /// Optional logger.
    pub logger: Option<Arc<dyn LoggerPort>>,
    /// Optional telemetry sink.
    pub telemetry: Option<Arc<dyn TelemetryPort>>,
}

type ProcessorFactory = Arc<
    dyn Fn(&ValidatedTaggerConfig, &ProcessorServices) -> InfraResult<Arc<dyn Processor>>
        + Send
        + Sync,
>;

/// Static identity of a registered plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PluginInfo {
    /// Registered plugin name.
    pub name: &'static str,
    /// One-line description.
    pub description: &'static str,
    /// Annotated sample configuration block.
    pub sample_config: &'static str,
}

struct Registration {
    info: PluginInfo,
    factory: ProcessorFactory,
}

/// Map from plugin name to factory. Names are unique.
#[derive(Default)]
pub struct ProcessorRegistry {
    plugins: BTreeMap<&'static str, Registration>,
}

impl ProcessorRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `db_query_tagger` registered.
    pub fn with_builtin() -> InfraResult<Self> {
        let mut registry = Self::new();
        registry.register(
            PluginInfo {
                name: PLUGIN_NAME,
                description: DESCRIPTION,
                sample_config: SAMPLE_CONFIG,
            },
            |config, services| {
                let processor: Arc<dyn Processor> =
                    Arc::new(DbQueryTagger::from_config(config, services)?);
                Ok(processor)
            },
        )?;
        Ok(registry)
    }

    /// Register a plugin. A second registration under the same name fails.
    pub fn register<F>(&mut self, info: PluginInfo, factory: F) -> InfraResult<()>
    where
        F: Fn(&ValidatedTaggerConfig, &ProcessorServices) -> InfraResult<Arc<dyn Processor>>
            + Send
            + Sync
            + 'static,
    {
        if self.plugins.contains_key(info.name) {
            return Err(ErrorEnvelope::expected(
                ErrorCode::new("plugin", "duplicate_name"),
                format!("processor `{}` is already registered", info.name),
            )
            .with_metadata("plugin", info.name));
        }
        self.plugins.insert(
            info.name,
            Registration {
                info,
                factory: Arc::new(factory),
            },
        );
        Ok(())
    }

    /// Identity of a registered plugin.
    #[must_use]
    pub fn info(&self, name: &str) -> Option<PluginInfo> {
        self.plugins.get(name).map(|registration| registration.info)
    }

    /// Registered plugin names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.plugins.keys().copied().collect()
    }

    /// Build one processor instance of plugin `name`.
    pub fn build(
        &self,
        name: &str,
        config: &ValidatedTaggerConfig,
        services: &ProcessorServices,
    ) -> InfraResult<Arc<dyn Processor>> {
        let registration = self.plugins.get(name).ok_or_else(|| {
            ErrorEnvelope::expected(
                ErrorCode::new("plugin", "unknown"),
                format!("no processor named `{name}` is registered"),
            )
            .with_metadata("plugin", name.to_owned())
        })?;
        (registration.factory)(config, services)
    }

    /// Build one `db_query_tagger` instance per config, in order.
    pub fn build_taggers(
        &self,
        configs: &[ValidatedTaggerConfig],
        services: &ProcessorServices,
    ) -> InfraResult<Vec<Arc<dyn Processor>>> {
        configs
            .iter()
            .enumerate()
            .map(|(index, config)| {
                self.build(PLUGIN_NAME, config, services)
                    .map_err(|error| error.with_metadata("instance", index.to_string()))
            })
            .collect()
    }
}

//! Local CLI orchestration helpers.

use crate::config_check::load_configs;
use crate::driver_registry::DriverRegistry;
use crate::observability::Observability;
use crate::processor::{ProcessorRegistry, ProcessorServices};
use crate::runner::{DEFAULT_BATCH_SIZE, RunSummary, run_jsonl};
use crate::{InfraError, InfraResult};
use db_query_tagger_ports::LogFields;
use db_query_tagger_shared::{ErrorEnvelope, RequestContext};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use tokio::io::{AsyncBufRead, AsyncWrite, BufReader, BufWriter};

/// Inputs for a local `apply` run.
#[derive(Debug, Clone)]
pub struct ApplyOptions {
    /// Tagger config file (TOML or JSON).
    pub config_path: PathBuf,
    /// JSON-lines input file; stdin when absent.
    pub input: Option<PathBuf>,
    /// JSON-lines output file; stdout when absent.
    pub output: Option<PathBuf>,
    /// Metrics per batch.
    pub batch_size: usize,
    /// Environment snapshot used for config overrides.
    pub env: BTreeMap<String, String>,
    /// Logger and telemetry handed to every processor.
    pub observability: Observability,
    /// Drivers available to the run.
    pub drivers: DriverRegistry,
}

impl ApplyOptions {
    /// Options with stdin/stdout, default batch size, and default drivers.
    #[must_use]
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            config_path: config_path.into(),
            input: None,
            output: None,
            batch_size: DEFAULT_BATCH_SIZE,
            env: BTreeMap::new(),
            observability: Observability::disabled(),
            drivers: DriverRegistry::with_default_drivers(),
        }
    }
}

/// Load the config, build one tagger per instance, and stream metrics
/// through them. Ctrl-C cancels the run between batches.
pub fn run_apply_local(options: &ApplyOptions) -> InfraResult<RunSummary> {
    let configs = load_configs(&options.config_path, &options.env)?;
    let services = ProcessorServices {
        drivers: options.drivers.clone(),
        logger: options.observability.logger.clone(),
        telemetry: options.observability.telemetry.clone(),
    };
    let processors = ProcessorRegistry::with_builtin()?.build_taggers(&configs, &services)?;

    let ctx = RequestContext::new_run();
    if let Some(logger) = &options.observability.logger {
        let mut fields = LogFields::new();
        fields.insert("instances".into(), Value::from(processors.len()));
        fields.insert("batchSize".into(), Value::from(options.batch_size));
        fields.insert(
            "correlationId".into(),
            Value::String(ctx.correlation_id().as_str().to_owned()),
        );
        logger.info("cli.apply.started", "apply started", Some(fields));
    }

    run_async_with_ctx(ctx, |ctx| async move {
        let watcher = spawn_interrupt_watcher(&ctx);
        let reader = open_reader(options.input.as_ref()).await?;
        let writer = open_writer(options.output.as_ref()).await?;
        let result = run_jsonl(&ctx, &processors, reader, writer, options.batch_size).await;
        watcher.abort();
        result
    })
}

async fn open_reader(
    input: Option<&PathBuf>,
) -> InfraResult<Box<dyn AsyncBufRead + Unpin + Send>> {
    match input {
        Some(path) => {
            let file = tokio::fs::File::open(path).await.map_err(|error| {
                InfraError::from(error).with_metadata("path", path.display().to_string())
            })?;
            Ok(Box::new(BufReader::new(file)))
        },
        None => Ok(Box::new(BufReader::new(tokio::io::stdin()))),
    }
}

async fn open_writer(output: Option<&PathBuf>) -> InfraResult<Box<dyn AsyncWrite + Unpin + Send>> {
    match output {
        Some(path) => {
            let file = tokio::fs::File::create(path).await.map_err(|error| {
                InfraError::from(error).with_metadata("path", path.display().to_string())
            })?;
            Ok(Box::new(BufWriter::new(file)))
        },
        None => Ok(Box::new(BufWriter::new(tokio::io::stdout()))),
    }
}

fn run_async_with_ctx<F, T>(
    ctx: RequestContext,
    op: impl FnOnce(RequestContext) -> F,
) -> InfraResult<T>
where
    F: Future<Output = Result<T, ErrorEnvelope>>,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(InfraError::from)?;
    runtime.block_on(async { op(ctx).await })
}

fn spawn_interrupt_watcher(ctx: &RequestContext) -> tokio::task::JoinHandle<()> {
    let token = ctx.cancellation_token();
    tokio::spawn(async move {
        tokio::select! {
            () = token.cancelled() => {},
            signal = tokio::signal::ctrl_c() => {
                if signal.is_ok() {
                    tracing::warn!("interrupt received, stopping after the current batch");
                    token.cancel();
                }
            },
        }
    })
}

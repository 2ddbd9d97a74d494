//! JSON-lines batch runner.
//!
//! Reads one JSON [`Metric`] per line, groups lines into batches, pushes
//! every batch through the processors in configuration order, and writes
//! one JSON metric per line.

use crate::InfraResult;
use crate::processor::Processor;
use db_query_tagger_domain::Metric;
use db_query_tagger_shared::{ErrorClass, ErrorCode, ErrorEnvelope, RequestContext};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Default number of metrics per batch.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Totals for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    /// Batches processed.
    pub batches: usize,
    /// Metrics written.
    pub metrics: usize,
}

/// Stream metrics from `reader` through `processors` to `writer`.
///
/// Blank lines are skipped. A malformed line stops the run with an
/// `invalid_input` error carrying the 1-based `line` number; batches before
/// it have already been written. Cancellation is checked between batches.
pub async fn run_jsonl<R, W>(
    ctx: &RequestContext,
    processors: &[Arc<dyn Processor>],
    reader: R,
    mut writer: W,
    batch_size: usize,
) -> InfraResult<RunSummary>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if batch_size == 0 {
        return Err(ErrorEnvelope::expected(
            ErrorCode::invalid_input(),
            "batch size must be at least 1",
        )
        .with_metadata("batchSize", "0"));
    }

    let mut summary = RunSummary::default();
    let mut batch = Vec::with_capacity(batch_size.min(DEFAULT_BATCH_SIZE));
    let mut lines = reader.lines();
    let mut line_number = 0usize;

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|error| read_error(&error, line_number + 1))?
    {
        line_number += 1;
        if line.trim().is_empty() {
            continue;
        }
        batch.push(parse_metric(&line, line_number)?);
        if batch.len() >= batch_size {
            flush_batch(ctx, processors, &mut batch, &mut writer, &mut summary).await?;
        }
    }
    if !batch.is_empty() {
        flush_batch(ctx, processors, &mut batch, &mut writer, &mut summary).await?;
    }
    writer
        .flush()
        .await
        .map_err(|error| io_error(&error, "flush"))?;

    tracing::debug!(
        batches = summary.batches,
        metrics = summary.metrics,
        "jsonl run finished"
    );
    Ok(summary)
}

fn parse_metric(line: &str, line_number: usize) -> InfraResult<Metric> {
    serde_json::from_str(line).map_err(|error| {
        ErrorEnvelope::expected(
            ErrorCode::invalid_input(),
            format!("line {line_number} is not a valid metric: {error}"),
        )
        .with_metadata("line", line_number.to_string())
    })
}

async fn flush_batch<W>(
    ctx: &RequestContext,
    processors: &[Arc<dyn Processor>],
    batch: &mut Vec<Metric>,
    writer: &mut W,
    summary: &mut RunSummary,
) -> InfraResult<()>
where
    W: AsyncWrite + Unpin,
{
    ctx.ensure_not_cancelled("runner.batch")?;
    let mut metrics = std::mem::take(batch);
    for processor in processors {
        metrics = processor.apply(ctx, metrics).await;
    }

    let mut out = String::new();
    for metric in &metrics {
        let line = serde_json::to_string(metric).map_err(|error| {
            ErrorEnvelope::unexpected(
                ErrorCode::internal(),
                format!("failed to encode metric: {error}"),
                ErrorClass::NonRetriable,
            )
        })?;
        out.push_str(&line);
        out.push('\n');
    }
    writer
        .write_all(out.as_bytes())
        .await
        .map_err(|error| io_error(&error, "write"))?;

    summary.batches += 1;
    summary.metrics += metrics.len();
    Ok(())
}

fn read_error(error: &std::io::Error, line_number: usize) -> ErrorEnvelope {
    if error.kind() == std::io::ErrorKind::InvalidData {
        return ErrorEnvelope::expected(
            ErrorCode::invalid_input(),
            format!("line {line_number} is not valid UTF-8"),
        )
        .with_metadata("line", line_number.to_string());
    }
    io_error(error, "read")
}

fn io_error(error: &std::io::Error, operation: &'static str) -> ErrorEnvelope {
    ErrorEnvelope::unexpected(ErrorCode::io(), error.to_string(), ErrorClass::NonRetriable)
        .with_metadata("operation", operation)
}

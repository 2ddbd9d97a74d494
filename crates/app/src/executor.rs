//! Single-row lookup execution.

use db_query_tagger_domain::{BoundParam, LookupFailure, LookupOutcome};
use db_query_tagger_ports::PreparedQueryPort;
use db_query_tagger_shared::{RequestContext, timeout_with_context};
use std::time::Duration;

/// Run the prepared query once and classify the result.
///
/// The row must have exactly `expected_columns` columns; any other width is
/// a `lookup:scan` failure. The call is bounded by `timeout`
/// (`lookup:timeout`) and by request cancellation (`core:cancelled`).
pub async fn execute_lookup(
    ctx: &RequestContext,
    statement: &mut dyn PreparedQueryPort,
    params: &[BoundParam],
    expected_columns: usize,
    timeout: Duration,
) -> LookupOutcome {
    let result = timeout_with_context(
        ctx,
        timeout,
        "tagger.lookup",
        statement.query_row(ctx, params),
        || {
            LookupFailure::Timeout
                .error(format!("lookup exceeded {} ms", timeout.as_millis()))
                .with_metadata("timeoutMs", timeout.as_millis().to_string())
        },
    )
    .await;

    match result {
        Ok(Some(values)) if values.len() == expected_columns => LookupOutcome::Found(values),
        Ok(Some(values)) => LookupOutcome::QueryError(
            LookupFailure::Scan
                .error(format!(
                    "query returned {} columns but {expected_columns} result tags are configured",
                    values.len()
                ))
                .with_metadata("columns", values.len().to_string())
                .with_metadata("resultTags", expected_columns.to_string()),
        ),
        Ok(None) => LookupOutcome::NotFound,
        Err(error) => LookupOutcome::QueryError(error),
    }
}

//! Deadline helper with cancellation awareness.

use crate::{ErrorCode, ErrorEnvelope, RequestContext, Result};
use std::future::Future;
use std::time::Duration;

/// Run `fut` under a deadline, honoring request cancellation.
///
/// `on_timeout` builds the error returned when the deadline elapses, so each
/// caller can report the failure in its own namespace.
pub async fn timeout_with_context<T, F, E>(
    ctx: &RequestContext,
    timeout: Duration,
    operation: &'static str,
    fut: F,
    on_timeout: E,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
    E: FnOnce() -> ErrorEnvelope,
{
    ctx.ensure_not_cancelled(operation)?;

    tokio::select! {
        () = ctx.cancelled() => Err(cancelled_error(operation)),
        res = tokio::time::timeout(timeout, fut) => {
            res.unwrap_or_else(|_| Err(on_timeout().with_metadata("operation", operation)))
        }
    }
}

/// Default timeout error in the `core` namespace.
#[must_use]
pub fn core_timeout_error() -> ErrorEnvelope {
    ErrorEnvelope::unexpected(
        ErrorCode::timeout(),
        "operation timed out",
        crate::ErrorClass::Retriable,
    )
}

fn cancelled_error(operation: &'static str) -> ErrorEnvelope {
    ErrorEnvelope::cancelled("operation cancelled").with_metadata("operation", operation)
}

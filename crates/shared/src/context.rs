//! Request-scoped context: correlation ids and cooperative cancellation.

use crate::{ErrorEnvelope, Result};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;

/// A correlation identifier used for logging and telemetry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(Arc<str>);

impl CorrelationId {
    /// Create a new run id (one per CLI invocation or host session).
    #[must_use]
    pub fn new_run_id() -> Self {
        next_scoped_id(&RUN_ID_COUNTER, "run_")
    }

    /// Create a new batch id, best-effort unique within this process.
    #[must_use]
    pub fn new_batch_id() -> Self {
        next_scoped_id(&BATCH_ID_COUNTER, "batch_")
    }

    /// Borrow the identifier as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

static RUN_ID_COUNTER: AtomicU64 = AtomicU64::new(1);
static BATCH_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

fn next_scoped_id(counter: &AtomicU64, prefix: &'static str) -> CorrelationId {
    let n = counter.fetch_add(1, Ordering::Relaxed);
    CorrelationId(Arc::<str>::from(format!("{prefix}{n}")))
}

/// Request-scoped context passed across boundaries.
#[derive(Debug, Clone)]
pub struct RequestContext {
    correlation_id: CorrelationId,
    cancellation: CancellationToken,
}

impl RequestContext {
    /// Create a new context with a fresh cancellation token.
    #[must_use]
    pub fn new(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            cancellation: CancellationToken::new(),
        }
    }

    /// Convenience constructor with an auto-generated `run_*` id.
    #[must_use]
    pub fn new_run() -> Self {
        Self::new(CorrelationId::new_run_id())
    }

    /// Derive a per-batch context.
    ///
    /// The child gets a fresh `batch_*` id and a child token: cancelling the
    /// parent cancels the batch, cancelling the batch leaves the parent alone.
    #[must_use]
    pub fn child_batch(&self) -> Self {
        Self {
            correlation_id: CorrelationId::new_batch_id(),
            cancellation: self.cancellation.child_token(),
        }
    }

    /// Return the correlation id.
    #[must_use]
    pub const fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Return a clone of the cancellation token.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Returns true if the request was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Cancel this request.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Await cancellation.
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await;
    }

    /// Return a cancellation error when cancelled, including operation metadata.
    pub fn ensure_not_cancelled(&self, operation: &'static str) -> Result<()> {
        if self.is_cancelled() {
            return Err(ErrorEnvelope::cancelled("operation cancelled")
                .with_metadata("operation", operation));
        }
        Ok(())
    }
}

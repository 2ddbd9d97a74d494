//! Per-metric lookup results.

use crate::ScalarValue;
use db_query_tagger_shared::ErrorEnvelope;

/// One bound query parameter: the tag's value, or `None` for SQL NULL.
pub type BoundParam = Option<String>;

/// Result of running the lookup for one metric.
#[derive(Debug, Clone, PartialEq)]
pub enum LookupOutcome {
    /// A row was returned; values are in column order.
    Found(Vec<ScalarValue>),
    /// The query matched no rows.
    NotFound,
    /// The lookup failed; the metric is left untouched.
    QueryError(ErrorEnvelope),
}

impl LookupOutcome {
    /// Short label used in logs and stats.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Found(_) => "found",
            Self::NotFound => "notFound",
            Self::QueryError(_) => "queryError",
        }
    }
}

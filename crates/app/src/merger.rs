//! Apply a lookup outcome to a metric's tags.

use db_query_tagger_domain::{LookupOutcome, LookupPlan, MetricTags};

/// What happened to the metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStatus {
    /// Result tags were written (and parameter tags dropped, if configured).
    Tagged,
    /// No row matched; the metric is unchanged.
    Unmatched,
    /// The lookup failed; the metric is unchanged.
    Failed,
}

/// Merge `outcome` into `metric` according to `plan`.
///
/// On a match, parameter tags are removed first so that a result tag sharing
/// a parameter's name survives with the looked-up value. A row whose width
/// differs from the result tag list is treated as a failure and nothing is
/// written.
pub fn merge_outcome<M>(metric: &mut M, outcome: &LookupOutcome, plan: &LookupPlan) -> MergeStatus
where
    M: MetricTags + ?Sized,
{
    let values = match outcome {
        LookupOutcome::Found(values) => values,
        LookupOutcome::NotFound => return MergeStatus::Unmatched,
        LookupOutcome::QueryError(_) => return MergeStatus::Failed,
    };
    if values.len() != plan.result_tags().len() {
        return MergeStatus::Failed;
    }

    if plan.remove_param_tags() {
        for name in plan.param_tags() {
            metric.remove_tag(name);
        }
    }
    for (name, value) in plan.result_tags().iter().zip(values) {
        metric.add_tag(name, value.render());
    }
    MergeStatus::Tagged
}

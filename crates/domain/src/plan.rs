//! The immutable part of a tagger configuration the core needs.

/// What to run per metric and how to merge the result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupPlan {
    query: Box<str>,
    param_tags: Vec<Box<str>>,
    result_tags: Vec<Box<str>>,
    remove_param_tags: bool,
}

impl LookupPlan {
    /// Build a plan. Lengths are not checked against the SQL here; the
    /// driver reports mismatches at execution time.
    pub fn new<P, R>(
        query: impl Into<Box<str>>,
        param_tags: P,
        result_tags: R,
        remove_param_tags: bool,
    ) -> Self
    where
        P: IntoIterator,
        P::Item: Into<Box<str>>,
        R: IntoIterator,
        R::Item: Into<Box<str>>,
    {
        Self {
            query: query.into(),
            param_tags: param_tags.into_iter().map(Into::into).collect(),
            result_tags: result_tags.into_iter().map(Into::into).collect(),
            remove_param_tags,
        }
    }

    /// SQL text with driver-native placeholders.
    #[must_use]
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Ordered tag names that feed the placeholders.
    #[must_use]
    pub fn param_tags(&self) -> &[Box<str>] {
        &self.param_tags
    }

    /// Ordered tag names that receive result columns.
    #[must_use]
    pub fn result_tags(&self) -> &[Box<str>] {
        &self.result_tags
    }

    /// Whether parameter tags are dropped on a match.
    #[must_use]
    pub const fn remove_param_tags(&self) -> bool {
        self.remove_param_tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_preserves_tag_order() {
        let plan = LookupPlan::new(
            "select a, b from t where x = ? and y = ?",
            ["x", "y"],
            vec!["a".to_owned(), "b".to_owned()],
            true,
        );
        let params: Vec<&str> = plan.param_tags().iter().map(AsRef::as_ref).collect();
        let results: Vec<&str> = plan.result_tags().iter().map(AsRef::as_ref).collect();
        assert_eq!(params, ["x", "y"]);
        assert_eq!(results, ["a", "b"]);
        assert!(plan.remove_param_tags());
        assert!(plan.query().starts_with("select"));
    }
}

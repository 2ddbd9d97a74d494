//! Tag -> query parameter binding.

use db_query_tagger_domain::{BoundParam, MetricTags};

/// Map `param_tags` onto the metric's tags, in order.
///
/// A missing tag binds SQL NULL; the lookup still runs.
pub fn bind_parameters<M>(metric: &M, param_tags: &[Box<str>]) -> Vec<BoundParam>
where
    M: MetricTags + ?Sized,
{
    param_tags
        .iter()
        .map(|name| metric.tag(name).map(str::to_owned))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use db_query_tagger_domain::Metric;
    use proptest::prelude::*;

    fn names(values: &[&str]) -> Vec<Box<str>> {
        values.iter().map(|value| (*value).into()).collect()
    }

    #[test]
    fn present_and_missing_tags_bind_in_order() {
        let metric = Metric::new("cpu").with_tag("id", "42").with_tag("site", "lab");
        let params = bind_parameters(&metric, &names(&["site", "rack", "id"]));
        assert_eq!(
            params,
            vec![Some("lab".to_owned()), None, Some("42".to_owned())]
        );
    }

    #[test]
    fn repeated_names_bind_repeatedly() {
        let metric = Metric::new("cpu").with_tag("id", "7");
        let params = bind_parameters(&metric, &names(&["id", "id"]));
        assert_eq!(params, vec![Some("7".to_owned()), Some("7".to_owned())]);
    }

    proptest! {
        #[test]
        fn binding_is_positional_and_pure(
            tags in proptest::collection::btree_map("[a-c]{1,2}", "[a-z0-9]{0,4}", 0..6),
            wanted in proptest::collection::vec("[a-c]{1,2}", 0..6),
        ) {
            let mut metric = Metric::new("m");
            metric.tags = tags.clone();
            let wanted: Vec<Box<str>> = wanted.into_iter().map(Into::into).collect();

            let params = bind_parameters(&metric, &wanted);

            prop_assert_eq!(params.len(), wanted.len());
            for (name, param) in wanted.iter().zip(&params) {
                prop_assert_eq!(param.as_deref(), tags.get(name.as_ref()).map(String::as_str));
            }
            prop_assert_eq!(&metric.tags, &tags);
        }
    }
}

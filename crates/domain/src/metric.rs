//! Metric records and the tag capability the lookup core depends on.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tag access needed by the lookup core.
///
/// Hosts with their own metric representation implement this; the core
/// never touches anything else on a metric.
pub trait MetricTags {
    /// Returns the value of `key`, if present.
    fn tag(&self, key: &str) -> Option<&str>;

    /// Inserts or replaces the tag `key`.
    fn add_tag(&mut self, key: &str, value: String);

    /// Removes the tag `key`, returning its previous value.
    fn remove_tag(&mut self, key: &str) -> Option<String>;
}

/// A numeric or textual field value carried by a metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Boolean field.
    Boolean(bool),
    /// Signed integer field.
    Integer(i64),
    /// Floating point field.
    Float(f64),
    /// String field.
    Text(String),
}

/// One observation flowing through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Metric {
    /// Measurement name.
    pub name: String,
    /// Tag set; names are unique.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Field set.
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
    /// Timestamp as supplied upstream (opaque to the core).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

impl Metric {
    /// Create a metric with no tags or fields.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tags: BTreeMap::new(),
            fields: BTreeMap::new(),
            timestamp: None,
        }
    }

    /// Builder-style tag insertion.
    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Builder-style field insertion.
    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    /// Builder-style timestamp.
    #[must_use]
    pub const fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

impl MetricTags for Metric {
    fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    fn add_tag(&mut self, key: &str, value: String) {
        self.tags.insert(key.to_owned(), value);
    }

    fn remove_tag(&mut self, key: &str) -> Option<String> {
        self.tags.remove(key)
    }
}

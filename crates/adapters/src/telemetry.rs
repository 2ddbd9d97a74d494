//! JSON telemetry adapter (counters and timers).
//!
//! Lookup outcomes are counted per batch (`tagger.lookup.found`,
//! `tagger.lookup.not_found`, `tagger.lookup.failed`) and batch durations
//! are recorded as timers; this adapter writes each sample as one JSON line.

use crate::log_sink::{LogSink, encode_line, now_epoch_ms};
use db_query_tagger_ports::{TelemetryPort, TelemetryTags};
use db_query_tagger_shared::{REDACTED, is_secret_key};
use serde::Serialize;
use std::sync::Arc;

const FALLBACK_LINE: &str = "{\"type\":\"metric\",\"metricType\":\"error\",\"name\":\"telemetry.serialize_failed\",\"value\":1}\n";

/// Telemetry adapter that emits JSON lines.
#[derive(Clone)]
pub struct JsonTelemetry {
    sink: Arc<dyn LogSink>,
    base_tags: TelemetryTags,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
enum SampleKind {
    Counter,
    Timer,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SampleLine<'a> {
    #[serde(rename = "type")]
    line_type: &'static str,
    timestamp_ms: u64,
    metric_type: SampleKind,
    name: &'a str,
    value: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    unit: Option<&'static str>,
    #[serde(skip_serializing_if = "TelemetryTags::is_empty")]
    tags: TelemetryTags,
}

impl JsonTelemetry {
    /// Telemetry writing to `sink` with no base tags.
    #[must_use]
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self {
            sink,
            base_tags: TelemetryTags::new(),
        }
    }

    /// Tags added to every sample; per-call tags win on conflict.
    #[must_use]
    pub fn with_base_tags(mut self, tags: TelemetryTags) -> Self {
        self.base_tags = tags;
        self
    }

    fn emit(
        &self,
        metric_type: SampleKind,
        name: &str,
        value: u64,
        unit: Option<&'static str>,
        tags: Option<&TelemetryTags>,
    ) {
        let mut merged = self.base_tags.clone();
        if let Some(tags) = tags {
            merged.extend(tags.iter().map(|(key, value)| (key.clone(), value.clone())));
        }
        for (key, value) in &mut merged {
            if is_secret_key(key) {
                *value = REDACTED.into();
            }
        }

        let line = SampleLine {
            line_type: "metric",
            timestamp_ms: now_epoch_ms(),
            metric_type,
            name,
            value,
            unit,
            tags: merged,
        };
        self.sink.write_line(&encode_line(&line, FALLBACK_LINE));
    }
}

impl TelemetryPort for JsonTelemetry {
    fn increment_counter(&self, name: &str, value: u64, tags: Option<&TelemetryTags>) {
        self.emit(SampleKind::Counter, name, value, None, tags);
    }

    fn record_timer_ms(&self, name: &str, duration_ms: u64, tags: Option<&TelemetryTags>) {
        self.emit(SampleKind::Timer, name, duration_ms, Some("ms"), tags);
    }
}

//! Structured JSON logger adapter.
//!
//! One JSON object per line: `timestampMs`, `level`, `event`, `message`,
//! plus optional `fields` and `error`. Values under secret-looking keys
//! (`password`, `database`, `dsn`, ...) are replaced before writing.

use crate::log_sink::{LogSink, encode_line, now_epoch_ms};
use db_query_tagger_ports::{LogEvent, LogFields, LogLevel, LoggerPort};
use db_query_tagger_shared::{REDACTED, is_secret_key};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

const FALLBACK_LINE: &str = "{\"timestampMs\":0,\"level\":\"error\",\"event\":\"logger.serialize_failed\",\"message\":\"log serialization failed\"}\n";

/// JSON logger emitting one line per event.
#[derive(Clone)]
pub struct JsonLogger {
    sink: Arc<dyn LogSink>,
    base_fields: LogFields,
    min_level: LogLevel,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LogLine<'a> {
    timestamp_ms: u64,
    level: &'static str,
    event: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "LogFields::is_empty")]
    fields: LogFields,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<Value>,
}

impl JsonLogger {
    /// Logger writing to `sink` at `info` and above.
    #[must_use]
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self {
            sink,
            base_fields: LogFields::new(),
            min_level: LogLevel::Info,
        }
    }

    /// Fields merged into every event; event fields win on conflict.
    #[must_use]
    pub fn with_base_fields(mut self, fields: LogFields) -> Self {
        self.base_fields = fields;
        self
    }

    /// Drop events below `level`.
    #[must_use]
    pub const fn with_min_level(mut self, level: LogLevel) -> Self {
        self.min_level = level;
        self
    }
}

impl LoggerPort for JsonLogger {
    fn log(&self, event: LogEvent) {
        if event.level < self.min_level {
            return;
        }

        let mut fields = self.base_fields.clone();
        fields.extend(event.fields.unwrap_or_default());
        for (key, value) in &mut fields {
            redact_entry(key, value);
        }
        let error = event.error.map(|mut error| {
            redact_value(&mut error);
            error
        });

        let line = LogLine {
            timestamp_ms: now_epoch_ms(),
            level: event.level.as_str(),
            event: &event.event,
            message: &event.message,
            fields,
            error,
        };
        self.sink.write_line(&encode_line(&line, FALLBACK_LINE));
    }

    fn child(&self, fields: LogFields) -> Box<dyn LoggerPort> {
        let mut merged = self.base_fields.clone();
        merged.extend(fields);
        Box::new(Self {
            sink: Arc::clone(&self.sink),
            base_fields: merged,
            min_level: self.min_level,
        })
    }
}

fn redact_entry(key: &str, value: &mut Value) {
    if is_secret_key(key) {
        *value = Value::String(REDACTED.to_owned());
    } else {
        redact_value(value);
    }
}

fn redact_value(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map.iter_mut() {
                redact_entry(key, nested);
            }
        },
        Value::Array(items) => items.iter_mut().for_each(redact_value),
        _ => {},
    }
}

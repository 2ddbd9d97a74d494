//! Logger and telemetry wiring for local runs.

use db_query_tagger_adapters::log_sink::{LogSink, StderrLogSink};
use db_query_tagger_adapters::logger::JsonLogger;
use db_query_tagger_adapters::telemetry::JsonTelemetry;
use db_query_tagger_ports::{LogLevel, LoggerPort, TelemetryPort};
use std::sync::Arc;

/// Optional logger and telemetry handles passed to processors.
#[derive(Clone, Default)]
pub struct Observability {
    /// JSON logger, when enabled.
    pub logger: Option<Arc<dyn LoggerPort>>,
    /// JSON telemetry, when enabled.
    pub telemetry: Option<Arc<dyn TelemetryPort>>,
}

impl Observability {
    /// No logger, no telemetry.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    /// JSON lines on stderr, keeping stdout for metric output.
    #[must_use]
    pub fn stderr(level: LogLevel, telemetry: bool) -> Self {
        Self::with_sink(Arc::new(StderrLogSink), level, telemetry)
    }

    /// JSON lines written to `sink`.
    #[must_use]
    pub fn with_sink(sink: Arc<dyn LogSink>, level: LogLevel, telemetry: bool) -> Self {
        let logger: Arc<dyn LoggerPort> =
            Arc::new(JsonLogger::new(Arc::clone(&sink)).with_min_level(level));
        let telemetry: Option<Arc<dyn TelemetryPort>> = if telemetry {
            Some(Arc::new(JsonTelemetry::new(sink)))
        } else {
            None
        };
        Self {
            logger: Some(logger),
            telemetry,
        }
    }
}

impl std::fmt::Debug for Observability {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Observability")
            .field("logger", &self.logger.is_some())
            .field("telemetry", &self.telemetry.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use db_query_tagger_adapters::log_sink::BufferLogSink;

    #[test]
    fn level_filter_applies_to_the_sink() {
        let sink = Arc::new(BufferLogSink::default());
        let observability = Observability::with_sink(sink.clone(), LogLevel::Warn, false);
        let Some(logger) = observability.logger else {
            panic!("logger should be enabled");
        };

        logger.info("test.info", "dropped", None);
        logger.warn("test.warn", "kept", None);

        let lines = sink.take();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("test.warn"));
        assert!(observability.telemetry.is_none());
    }

    #[test]
    fn telemetry_shares_the_sink() {
        let sink = Arc::new(BufferLogSink::default());
        let observability = Observability::with_sink(sink.clone(), LogLevel::Error, true);
        let Some(telemetry) = observability.telemetry else {
            panic!("telemetry should be enabled");
        };

        telemetry.increment_counter("tagger.lookup.found", 1, None);
        assert_eq!(sink.take().len(), 1);
    }

    #[test]
    fn disabled_has_no_handles() {
        let observability = Observability::disabled();
        assert!(observability.logger.is_none());
        assert!(observability.telemetry.is_none());
    }
}

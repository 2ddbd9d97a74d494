//! # db-query-tagger-adapters
//!
//! Port implementations: SQL drivers, the JSON logger, and JSON telemetry.
//! This crate depends on `ports`, `domain`, and `shared`.

pub mod log_sink;
pub mod logger;
pub mod sql;
pub mod telemetry;

pub use log_sink::{BufferLogSink, LogSink, StderrLogSink};
pub use logger::JsonLogger;
pub use telemetry::JsonTelemetry;

/// Returns the adapters crate version.
#[must_use]
pub const fn adapters_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

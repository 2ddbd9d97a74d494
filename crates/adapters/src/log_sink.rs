//! Line sinks for the JSON logger and telemetry adapters.

use serde::Serialize;
use std::io::Write;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// A sink that receives pre-formatted, newline-terminated lines.
pub trait LogSink: Send + Sync {
    /// Write a line to the sink.
    fn write_line(&self, line: &str);
}

/// Log sink that writes to stderr, keeping stdout free for metric output.
#[derive(Debug, Default)]
pub struct StderrLogSink;

impl LogSink for StderrLogSink {
    fn write_line(&self, line: &str) {
        let mut stderr = std::io::stderr().lock();
        if let Err(error) = stderr.write_all(line.as_bytes()) {
            eprintln!("log sink write failed: {error}");
        }
    }
}

/// Sink that buffers lines in memory.
#[derive(Debug, Default)]
pub struct BufferLogSink {
    lines: Mutex<Vec<String>>,
}

impl BufferLogSink {
    /// Drain every buffered line.
    pub fn take(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|mut guard| std::mem::take(&mut *guard))
            .unwrap_or_default()
    }
}

impl LogSink for BufferLogSink {
    fn write_line(&self, line: &str) {
        if let Ok(mut guard) = self.lines.lock() {
            guard.push(line.to_string());
        }
    }
}

/// Encode `payload` as one newline-terminated JSON line, or `fallback`
/// when serialization fails.
pub(crate) fn encode_line<T: Serialize>(payload: &T, fallback: &str) -> String {
    serde_json::to_string(payload).map_or_else(
        |_| fallback.to_owned(),
        |mut encoded| {
            encoded.push('\n');
            encoded
        },
    )
}

pub(crate) fn now_epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|duration| u64::try_from(duration.as_millis()).ok())
        .unwrap_or_default()
}

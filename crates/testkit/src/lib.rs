//! # db-query-tagger-testkit
//!
//! Test helpers, fixtures, and in-memory adapters.
//! This crate depends on `ports`, `domain`, and `shared`.
//!
//! Fixture files live under `fixtures/` (config, env, and metric streams).

pub mod in_memory;

use std::path::PathBuf;

/// Returns the testkit crate version.
#[must_use]
pub const fn testkit_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Absolute path of a fixture file, e.g. `fixture_path("config/tagger.flat.toml")`.
#[must_use]
pub fn fixture_path(relative: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("fixtures")
        .join(relative)
}

/// Fresh, not-yet-created directory under the system temp dir.
#[must_use]
pub fn unique_temp_dir(prefix: &str) -> PathBuf {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};

    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_nanos())
        .unwrap_or_default();
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("{prefix}-{}-{nanos}-{n}", std::process::id()))
}

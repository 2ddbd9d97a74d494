//! # db-query-tagger-shared
//!
//! Foundational types used by every crate in the workspace:
//!
//! - `ErrorEnvelope` and the shared `Result` alias
//! - `RequestContext` (correlation id + cancellation)
//! - Deadline helper for a single async operation
//! - Secret redaction helpers
//!
//! This crate depends only on external crates.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod context;
pub mod errors;
pub mod redaction;
pub mod result;
pub mod timeout;

pub use context::{CorrelationId, RequestContext};
pub use errors::{ErrorClass, ErrorCode, ErrorEnvelope, ErrorKind, ErrorMetadata};
pub use redaction::{REDACTED, SecretString, is_secret_key};
pub use result::Result;
pub use timeout::{core_timeout_error, timeout_with_context};

/// Returns the shared crate version.
#[must_use]
pub const fn shared_crate_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_error_types_are_available() {
        let error = ErrorEnvelope::expected(ErrorCode::invalid_input(), "invalid");
        assert_eq!(error.kind, ErrorKind::Expected);
        assert_eq!(error.class, ErrorClass::NonRetriable);
    }

    #[test]
    fn shared_crate_version_is_set() {
        assert!(!shared_crate_version().is_empty());
    }
}

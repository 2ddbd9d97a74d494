//! Error envelope shared by every crate.
//!
//! Nothing inside a batch ever propagates an envelope to the host; they are
//! logged where they happen. Outside the batch (config, CLI, the runner)
//! they travel as ordinary `Result` errors.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::{fmt, io};

/// Metadata attached to errors for diagnostics.
pub type ErrorMetadata = BTreeMap<String, String>;

const CORE: &str = "core";

/// Whether a failure was anticipated by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// Bad config, bad input, cancellation.
    Expected,
    /// Database faults, I/O, anything else.
    Unexpected,
}

impl ErrorKind {
    /// Lowercase identifier.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Expected => "expected",
            Self::Unexpected => "unexpected",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// Retry classification.
///
/// Nothing in the lookup path retries; the class tells operators a dropped
/// connection apart from bad SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorClass {
    /// The failure is likely transient.
    Retriable,
    /// The failure will repeat until something changes.
    NonRetriable,
}

impl ErrorClass {
    /// Returns true when the error is considered transient.
    #[must_use]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Retriable)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(if self.is_retriable() {
            "retriable"
        } else {
            "non-retriable"
        })
    }
}

/// `namespace:code` pair, stable across releases.
///
/// Namespaces in use: `core`, `config`, `lookup`, `plugin`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ErrorCode {
    namespace: String,
    code: String,
}

impl ErrorCode {
    /// Build a code.
    pub fn new(namespace: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            code: code.into(),
        }
    }

    /// `core:cancelled`
    pub fn cancelled() -> Self {
        Self::new(CORE, "cancelled")
    }

    /// `core:invalid_input`
    pub fn invalid_input() -> Self {
        Self::new(CORE, "invalid_input")
    }

    /// `core:not_found`
    pub fn not_found() -> Self {
        Self::new(CORE, "not_found")
    }

    /// `core:permission_denied`
    pub fn permission_denied() -> Self {
        Self::new(CORE, "permission_denied")
    }

    /// `core:timeout`
    pub fn timeout() -> Self {
        Self::new(CORE, "timeout")
    }

    /// `core:io`
    pub fn io() -> Self {
        Self::new(CORE, "io")
    }

    /// `core:internal`
    pub fn internal() -> Self {
        Self::new(CORE, "internal")
    }

    /// Namespace part.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Identifier part.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Whether this code belongs to `namespace`.
    #[must_use]
    pub fn in_namespace(&self, namespace: &str) -> bool {
        self.namespace == namespace
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}:{}", self.namespace, self.code)
    }
}

/// Structured error carried across crate boundaries and into log lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// Expected or unexpected.
    pub kind: ErrorKind,
    /// Retry classification.
    pub class: ErrorClass,
    /// Stable code.
    pub code: ErrorCode,
    /// Human-readable message. Never contains a connection string.
    pub message: String,
    /// Extra diagnostic keys (`path`, `line`, `instance`, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: ErrorMetadata,
}

impl ErrorEnvelope {
    fn build(kind: ErrorKind, class: ErrorClass, code: ErrorCode, message: String) -> Self {
        Self {
            kind,
            class,
            code,
            message,
            metadata: ErrorMetadata::new(),
        }
    }

    /// Anticipated, non-retriable failure.
    pub fn expected(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::build(
            ErrorKind::Expected,
            ErrorClass::NonRetriable,
            code,
            message.into(),
        )
    }

    /// Unanticipated failure with an explicit retry class.
    pub fn unexpected(code: ErrorCode, message: impl Into<String>, class: ErrorClass) -> Self {
        Self::build(ErrorKind::Unexpected, class, code, message.into())
    }

    /// `core:cancelled`.
    pub fn cancelled(message: impl Into<String>) -> Self {
        Self::expected(ErrorCode::cancelled(), message)
    }

    /// Returns true if the error represents a cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.code == ErrorCode::cancelled()
    }

    /// Attach a single metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Look up a metadata value.
    #[must_use]
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

impl fmt::Display for ErrorEnvelope {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "{} {} {}: {}",
            self.kind, self.class, self.code, self.message
        )
    }
}

impl std::error::Error for ErrorEnvelope {}

impl From<io::Error> for ErrorEnvelope {
    fn from(error: io::Error) -> Self {
        let kind = error.kind();
        let code = match kind {
            io::ErrorKind::NotFound => ErrorCode::not_found(),
            io::ErrorKind::PermissionDenied => ErrorCode::permission_denied(),
            io::ErrorKind::TimedOut => ErrorCode::timeout(),
            io::ErrorKind::Interrupted => ErrorCode::cancelled(),
            _ => ErrorCode::io(),
        };
        let class = if matches!(
            kind,
            io::ErrorKind::WouldBlock
                | io::ErrorKind::TimedOut
                | io::ErrorKind::Interrupted
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::ConnectionRefused
                | io::ErrorKind::ConnectionReset
                | io::ErrorKind::NotConnected
                | io::ErrorKind::BrokenPipe
        ) {
            ErrorClass::Retriable
        } else {
            ErrorClass::NonRetriable
        };
        Self::unexpected(code, error.to_string(), class)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_set_kind_and_class() {
        let expected = ErrorEnvelope::expected(ErrorCode::invalid_input(), "invalid");
        assert_eq!(expected.kind, ErrorKind::Expected);
        assert_eq!(expected.class, ErrorClass::NonRetriable);

        let unexpected =
            ErrorEnvelope::unexpected(ErrorCode::timeout(), "timeout", ErrorClass::Retriable);
        assert_eq!(unexpected.kind, ErrorKind::Unexpected);
        assert!(unexpected.class.is_retriable());
    }

    #[test]
    fn io_errors_map_to_core_codes() {
        let refused = ErrorEnvelope::from(io::Error::new(io::ErrorKind::ConnectionRefused, "x"));
        assert_eq!(refused.code, ErrorCode::io());
        assert!(refused.class.is_retriable());

        let missing = ErrorEnvelope::from(io::Error::new(io::ErrorKind::NotFound, "x"));
        assert_eq!(missing.code, ErrorCode::not_found());
        assert!(!missing.class.is_retriable());
    }

    #[test]
    fn display_includes_code_and_message() {
        let error = ErrorEnvelope::cancelled("stopped").with_metadata("operation", "lookup");
        assert!(error.is_cancelled());
        assert_eq!(error.metadata_value("operation"), Some("lookup"));
        assert_eq!(
            error.to_string(),
            "expected non-retriable core:cancelled: stopped"
        );
    }

    #[test]
    fn serialized_code_is_nested() {
        let error = ErrorEnvelope::expected(ErrorCode::new("plugin", "unknown"), "no such plugin");
        let value = serde_json::to_value(&error).ok();
        assert_eq!(
            value.as_ref().and_then(|value| value.pointer("/code/namespace")),
            Some(&serde_json::Value::from("plugin"))
        );
        assert!(error.code.in_namespace("plugin"));
    }
}

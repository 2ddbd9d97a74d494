//! Lookup failure taxonomy.

use db_query_tagger_shared::{ErrorClass, ErrorCode, ErrorEnvelope};
use std::fmt;

const NAMESPACE: &str = "lookup";

/// Where in the lookup lifecycle a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LookupFailure {
    /// Opening the database connection failed.
    Connection,
    /// Preparing the statement failed.
    Prepare,
    /// Executing the statement failed.
    Query,
    /// Decoding the returned row failed, or its shape was wrong.
    Scan,
    /// The per-query deadline elapsed.
    Timeout,
}

impl LookupFailure {
    /// Returns the stable code identifier within the `lookup` namespace.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Prepare => "prepare",
            Self::Query => "query",
            Self::Scan => "scan",
            Self::Timeout => "timeout",
        }
    }

    /// Error code for this failure.
    #[must_use]
    pub fn code(self) -> ErrorCode {
        ErrorCode::new(NAMESPACE, self.as_str())
    }

    /// Retry classification (informational; nothing retries).
    #[must_use]
    pub const fn class(self) -> ErrorClass {
        match self {
            Self::Connection | Self::Timeout => ErrorClass::Retriable,
            Self::Prepare | Self::Query | Self::Scan => ErrorClass::NonRetriable,
        }
    }

    /// Build an envelope for this failure.
    pub fn error(self, message: impl Into<String>) -> ErrorEnvelope {
        ErrorEnvelope::unexpected(self.code(), message, self.class())
    }

    /// Recover the failure kind from an envelope, if it carries a lookup code.
    #[must_use]
    pub fn classify(error: &ErrorEnvelope) -> Option<Self> {
        if error.code.namespace() != NAMESPACE {
            return None;
        }
        match error.code.code() {
            "connection" => Some(Self::Connection),
            "prepare" => Some(Self::Prepare),
            "query" => Some(Self::Query),
            "scan" => Some(Self::Scan),
            "timeout" => Some(Self::Timeout),
            _ => None,
        }
    }
}

impl fmt::Display for LookupFailure {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

use db_query_tagger_shared::{ErrorCode, ErrorEnvelope, ErrorKind};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Ok = 0,
    InvalidInput = 2,
    Io = 3,
    Internal = 1,
}

impl ExitCode {
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Exit code for a failed command.
    ///
    /// File-system codes (including unreadable config files) map to `Io`;
    /// any other expected error is bad input or config.
    #[must_use]
    pub fn for_error(error: &ErrorEnvelope) -> Self {
        let io_codes = [
            ErrorCode::io(),
            ErrorCode::not_found(),
            ErrorCode::permission_denied(),
        ];
        let config_file =
            error.code.in_namespace("config") && error.code.code().starts_with("config_file_");
        if config_file || io_codes.contains(&error.code) {
            return Self::Io;
        }
        match error.kind {
            ErrorKind::Expected if !error.is_cancelled() => Self::InvalidInput,
            _ => Self::Internal,
        }
    }
}

#[derive(Debug)]
pub enum CliError {
    Io(std::io::Error),
    Serialization(serde_json::Error),
}

impl CliError {
    #[must_use]
    pub const fn exit_code(&self) -> ExitCode {
        match self {
            Self::Io(_) => ExitCode::Io,
            Self::Serialization(_) => ExitCode::Internal,
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(error) => write!(formatter, "io error: {error}"),
            Self::Serialization(error) => write!(formatter, "serialization error: {error}"),
        }
    }
}

impl std::error::Error for CliError {}

impl From<std::io::Error> for CliError {
    fn from(error: std::io::Error) -> Self {
        Self::Io(error)
    }
}

impl From<serde_json::Error> for CliError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error)
    }
}

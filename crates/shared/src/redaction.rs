//! Secret detection and redaction utilities.
//!
//! Connection strings routinely carry passwords, so they travel as
//! [`SecretString`] and never reach logs or error messages verbatim.

/// The redacted placeholder string.
pub const REDACTED: &str = "[REDACTED]";

/// Checks if a key/variable name likely refers to a secret.
///
/// # Examples
///
/// ```
/// use db_query_tagger_shared::is_secret_key;
///
/// assert!(is_secret_key("password"));
/// assert!(is_secret_key("DBQT_DATABASE"));
/// assert!(is_secret_key("connection_string"));
/// assert!(!is_secret_key("DBQT_QUERY"));
/// ```
pub fn is_secret_key(key: &str) -> bool {
    let key = key.to_ascii_uppercase();
    key.contains("KEY")
        || key.contains("TOKEN")
        || key.contains("SECRET")
        || key.contains("PASSWORD")
        || key.contains("PWD")
        || key.contains("CREDENTIAL")
        || key.contains("AUTH")
        || key.contains("DSN")
        || key.contains("CONNECTION_STRING")
        || key.ends_with("DATABASE")
}

/// A secret string wrapper that redacts on Display/Debug.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SecretString(Box<str>);

impl SecretString {
    /// Wrap a secret value.
    pub fn new(value: impl Into<Box<str>>) -> Self {
        Self(value.into())
    }

    /// Borrow the underlying secret.
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Returns true when the wrapped value is empty after trimming.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl std::fmt::Debug for SecretString {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(REDACTED)
    }
}

impl std::fmt::Display for SecretString {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(REDACTED)
    }
}

impl From<String> for SecretString {
    fn from(value: String) -> Self {
        Self(value.into_boxed_str())
    }
}

impl From<&str> for SecretString {
    fn from(value: &str) -> Self {
        Self(Box::from(value))
    }
}

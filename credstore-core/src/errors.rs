use std::time::Duration;
use thiserror::Error;

/// Result alias for credential store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Canonical error surface for the store, the envelope codec and the
/// consumed key-management / record-backend interfaces.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("secret `{name}` not found{}", version_suffix(.version))]
    NotFound {
        name: String,
        version: Option<String>,
    },
    #[error("secret `{name}` already has version {version}")]
    VersionConflict { name: String, version: String },
    #[error("secret hmac validation failed")]
    IntegrityCheckFailed,
    #[error("key management access denied: {0}")]
    AccessDenied(String),
    #[error("encryption context mismatch: {0}")]
    ContextMismatch(String),
    #[error("key `{key_id}` unavailable: {reason}")]
    KeyUnavailable { key_id: String, reason: String },
    #[error("stored version `{value}` for `{name}` is not a fixed-width number")]
    CorruptVersion { name: String, value: String },
    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
    #[error("timed out after {waited:?} waiting for table `{table}` to become active")]
    Timeout { table: String, waited: Duration },
    #[error("invalid table wait policy: {0}")]
    InvalidWaitPolicy(String),
    #[error("secret name must not be empty")]
    InvalidName,
    #[error("invalid version: {value}")]
    InvalidVersion { value: String },
    #[error("invalid encryption context: {0}")]
    InvalidContext(String),
    #[error("corrupt record: {0}")]
    CorruptRecord(String),
    #[error("crypto error: {0}")]
    Crypto(String),
    #[error("conditional write rejected")]
    ConditionFailed,
    #[error("deleted {} version(s) of `{name}` before failing: {source}", .deleted.len())]
    PartialDelete {
        name: String,
        deleted: Vec<String>,
        source: Box<Error>,
    },
}

impl Error {
    pub(crate) fn not_found(name: &str, version: Option<&str>) -> Self {
        Self::NotFound {
            name: name.to_string(),
            version: version.map(str::to_string),
        }
    }

    /// Key-unwrap failures that a bulk read skips instead of aborting on.
    pub fn is_key_access_failure(&self) -> bool {
        matches!(self, Self::AccessDenied(_) | Self::ContextMismatch(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

fn version_suffix(version: &Option<String>) -> String {
    match version {
        Some(version) => format!(" at version {version}"),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message_mentions_version_when_present() {
        let err = Error::not_found("db", Some("0000000000000000002"));
        assert_eq!(
            err.to_string(),
            "secret `db` not found at version 0000000000000000002"
        );
        assert_eq!(
            Error::not_found("db", None).to_string(),
            "secret `db` not found"
        );
    }

    #[test]
    fn key_access_failures_are_classified() {
        assert!(Error::AccessDenied("nope".into()).is_key_access_failure());
        assert!(Error::ContextMismatch("ctx".into()).is_key_access_failure());
        assert!(!Error::IntegrityCheckFailed.is_key_access_failure());
        assert!(!Error::BackendUnavailable("down".into()).is_key_access_failure());
    }
}

//! Error types for kbsync.
//!
//! Library crates use [`KbSyncError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all kbsync operations.
#[derive(Debug, thiserror::Error)]
pub enum KbSyncError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Connection-level failure talking to a remote endpoint.
    #[error("network error: {0}")]
    Network(String),

    /// A remote call exceeded its time budget.
    #[error("timeout after {after_ms}ms: {endpoint}")]
    Timeout { endpoint: String, after_ms: u64 },

    /// Non-2xx status or malformed results envelope from an endpoint.
    #[error("endpoint error from {endpoint}: {message}")]
    Endpoint {
        endpoint: String,
        status: Option<u16>,
        message: String,
    },

    /// A single field or row failed normalization.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Two sources disagree on a field and precedence could not settle it.
    #[error("merge conflict on {field}: {message}")]
    MergeConflict { field: String, message: String },

    /// The atomic batch write to the local store failed.
    #[error("commit failed: {0}")]
    Commit(String),

    /// Database or storage layer error outside a commit.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (unknown entity type, bad argument, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, KbSyncError>;

impl KbSyncError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether a retry of the same request could plausibly succeed.
    ///
    /// Connection errors, timeouts, HTTP 5xx and 429 are transient.
    /// Malformed envelopes and other client errors are not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout { .. } => true,
            Self::Endpoint {
                status: Some(status),
                ..
            } => is_retryable_status(*status),
            _ => false,
        }
    }

    /// Whether this error came from talking to a remote source.
    pub fn is_source_failure(&self) -> bool {
        matches!(
            self,
            Self::Network(_) | Self::Timeout { .. } | Self::Endpoint { .. }
        )
    }
}

/// HTTP statuses worth retrying: rate limiting and server errors.
fn is_retryable_status(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = KbSyncError::config("missing database path");
        assert_eq!(err.to_string(), "config error: missing database path");

        let err = KbSyncError::validation("unknown entity type 'volcano'");
        assert!(err.to_string().contains("volcano"));
    }

    #[test]
    fn transient_classification() {
        assert!(KbSyncError::Network("connection refused".into()).is_transient());
        assert!(
            KbSyncError::Timeout {
                endpoint: "https://query.wikidata.org/sparql".into(),
                after_ms: 30_000,
            }
            .is_transient()
        );

        let server_error = KbSyncError::Endpoint {
            endpoint: "x".into(),
            status: Some(503),
            message: "unavailable".into(),
        };
        assert!(server_error.is_transient());

        let malformed = KbSyncError::Endpoint {
            endpoint: "x".into(),
            status: Some(200),
            message: "malformed results envelope".into(),
        };
        assert!(!malformed.is_transient());
        assert!(malformed.is_source_failure());

        let bad_query = KbSyncError::Endpoint {
            endpoint: "x".into(),
            status: Some(400),
            message: "bad request".into(),
        };
        assert!(!bad_query.is_transient());

        let status_error = |status| KbSyncError::Endpoint {
            endpoint: "x".into(),
            status: Some(status),
            message: String::new(),
        };
        for status in [429, 500, 502, 599] {
            assert!(status_error(status).is_transient(), "{status}");
        }
        for status in [200, 404, 408, 600] {
            assert!(!status_error(status).is_transient(), "{status}");
        }

        assert!(!KbSyncError::Commit("disk full".into()).is_source_failure());
    }
}

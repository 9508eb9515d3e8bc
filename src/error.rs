//! Error types for cluster-dl
//!
//! This module provides the error hierarchy for the library:
//! - [`Error`] is the crate-level error returned by configuration, manifest and service setup
//! - [`FetchError`] classifies a single failed fetch attempt (transport, HTTP status, filesystem)
//! - [`ProtocolError`] describes a wire message the Worker Service could not accept
//! - [`DispatchError`] describes a failed send-and-acknowledge round trip
//!
//! Fetch and dispatch errors never escape their retry loops as panics or aborts; they are
//! logged, counted against an attempt budget, and finally folded into an outcome value.
//! That is why [`Error`] has no variant wrapping them.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for cluster-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for cluster-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "pool_size")
        key: Option<String>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error from the HTTP client
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A job manifest line could not be parsed
    #[error("invalid manifest line {line}: {reason}")]
    Manifest {
        /// 1-based line number in the manifest file
        line: usize,
        /// Why the line was rejected
        reason: String,
    },
}

impl Error {
    /// Shorthand for a configuration error tied to a specific key
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Machine-readable error code, used as a structured log field
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::Manifest { .. } => "manifest_error",
        }
    }
}

/// Broad classification of why a fetch attempt failed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Connection refused/reset, stalled transfer, truncated body
    Transport,
    /// The origin answered with something other than 200
    HttpStatus,
    /// Directory creation, temp write, sync or rename failed
    Filesystem,
    /// The job itself cannot succeed (bad URL, no free rename slot)
    InvalidInput,
}

impl FailureKind {
    /// Stable snake_case name of the kind
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Transport => "transport",
            FailureKind::HttpStatus => "http_status",
            FailureKind::Filesystem => "filesystem",
            FailureKind::InvalidInput => "invalid_input",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single fetch attempt
#[derive(Debug, Error)]
pub enum FetchError {
    /// Request could not be sent or the body stream broke off
    #[error("transport error for {url}: {source}")]
    Transport {
        /// URL being fetched
        url: String,
        /// Underlying HTTP client error
        #[source]
        source: reqwest::Error,
    },

    /// No response headers or body data arrived within the idle timeout
    #[error("no data from {url} for {idle:?}")]
    Stalled {
        /// URL being fetched
        url: String,
        /// How long the transfer sat idle
        idle: Duration,
    },

    /// The origin responded with a non-200 status
    #[error("unexpected HTTP status {status} for {url}")]
    HttpStatus {
        /// Status code returned by the origin
        status: u16,
        /// URL being fetched
        url: String,
    },

    /// Local filesystem operation failed
    #[error("filesystem error at {path}: {source}")]
    Filesystem {
        /// Path the operation was applied to
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The URL cannot be requested at all
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl {
        /// The offending URL
        url: String,
        /// Why it was rejected
        reason: String,
    },

    /// Every bracketed rename candidate is already taken
    #[error("no free rename slot for {path}")]
    RenameExhausted {
        /// The original destination path
        path: PathBuf,
    },
}

impl FetchError {
    /// Classify this failure
    pub fn kind(&self) -> FailureKind {
        match self {
            FetchError::Transport { .. } | FetchError::Stalled { .. } => FailureKind::Transport,
            FetchError::HttpStatus { .. } => FailureKind::HttpStatus,
            FetchError::Filesystem { .. } => FailureKind::Filesystem,
            FetchError::InvalidUrl { .. } | FetchError::RenameExhausted { .. } => {
                FailureKind::InvalidInput
            }
        }
    }

    pub(crate) fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FetchError::Filesystem {
            path: path.into(),
            source,
        }
    }
}

/// A wire message the Worker Service refused to accept
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The peer closed the connection without sending anything
    #[error("empty message")]
    Empty,

    /// The message exceeded the configured size limit
    #[error("message exceeds {limit} bytes")]
    TooLarge {
        /// Maximum accepted message size in bytes
        limit: usize,
    },

    /// The peer did not finish sending in time
    #[error("timed out reading message")]
    ReadTimeout,

    /// The connection failed while the message was being read
    #[error("I/O error reading message: {0}")]
    Io(#[from] std::io::Error),

    /// The payload is not valid UTF-8
    #[error("message is not valid UTF-8")]
    NotUtf8,

    /// The payload is neither the shutdown sentinel nor a decodable job
    #[error("undecodable job payload: {0}")]
    Malformed(#[source] serde_json::Error),

    /// The job decoded but its fields are unusable
    #[error("invalid job: {0}")]
    InvalidJob(String),
}

/// Failure of one send-and-acknowledge round trip
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Could not connect to the endpoint
    #[error("failed to connect to {endpoint}: {source}")]
    Connect {
        /// Endpoint address
        endpoint: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Connection broke while writing the message or reading the reply
    #[error("I/O error talking to {endpoint}: {source}")]
    Io {
        /// Endpoint address
        endpoint: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// A stage of the round trip did not finish in time
    #[error("timed out during {stage} with {endpoint}")]
    Timeout {
        /// Endpoint address
        endpoint: String,
        /// Which stage timed out ("connect" or "acknowledge")
        stage: &'static str,
    },

    /// The endpoint replied with something other than `OK`
    #[error("unexpected reply from {endpoint}: {reply:?}")]
    UnexpectedReply {
        /// Endpoint address
        endpoint: String,
        /// What was received instead (lossy UTF-8)
        reply: String,
    },
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_errors_classify_by_cause() {
        let status = FetchError::HttpStatus {
            status: 404,
            url: "http://example.com/a.zip".into(),
        };
        assert_eq!(status.kind(), FailureKind::HttpStatus);

        let fs = FetchError::filesystem(
            "/downloads/a.zip",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(fs.kind(), FailureKind::Filesystem);

        let bad = FetchError::InvalidUrl {
            url: "nope".into(),
            reason: "relative URL without a base".into(),
        };
        assert_eq!(bad.kind(), FailureKind::InvalidInput);

        let full = FetchError::RenameExhausted {
            path: "/downloads/a.zip".into(),
        };
        assert_eq!(full.kind(), FailureKind::InvalidInput);
    }

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(
            Error::config("pool_size", "must be at least 1").error_code(),
            "config_error"
        );
        let err = Error::Manifest {
            line: 3,
            reason: "missing field `url`".into(),
        };
        assert_eq!(err.error_code(), "manifest_error");
        assert_eq!(err.to_string(), "invalid manifest line 3: missing field `url`");
        let err = Error::from(std::io::Error::other("disk gone"));
        assert_eq!(err.error_code(), "io_error");
    }

    #[test]
    fn stalled_transfer_is_a_transport_failure() {
        let err = FetchError::Stalled {
            url: "http://example.com/a.zip".into(),
            idle: Duration::from_secs(30),
        };
        assert_eq!(err.kind(), FailureKind::Transport);
        assert_eq!(err.to_string(), "no data from http://example.com/a.zip for 30s");
    }

    #[test]
    fn config_helper_records_key() {
        match Error::config("pool_size", "must be at least 1") {
            Error::Config { message, key } => {
                assert_eq!(message, "must be at least 1");
                assert_eq!(key.as_deref(), Some("pool_size"));
            }
            other => panic!("expected Config error, got {other:?}"),
        }
    }

    #[test]
    fn display_messages_carry_context() {
        let err = DispatchError::UnexpectedReply {
            endpoint: "10.0.0.2:42069".into(),
            reply: "NO".into(),
        };
        assert_eq!(
            err.to_string(),
            "unexpected reply from 10.0.0.2:42069: \"NO\""
        );

        let err = ProtocolError::TooLarge { limit: 1024 };
        assert_eq!(err.to_string(), "message exceeds 1024 bytes");
    }

    #[test]
    fn failure_kind_serializes_snake_case() {
        let json = serde_json::to_string(&FailureKind::HttpStatus).unwrap();
        assert_eq!(json, "\"http_status\"");
        assert_eq!(FailureKind::Filesystem.to_string(), "filesystem");
    }
}

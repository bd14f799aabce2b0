use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigError;

/// Main library error type that encompasses all possible failure modes
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    View(#[from] ViewError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("HTTP client setup failed: {0}")]
    Client(#[from] reqwest::Error),

    #[error("Transport failure: {verb} - {details}")]
    Transport { verb: String, details: String },

    #[error("HTTP status error: {verb} - {status} {reason}")]
    Http {
        verb: String,
        status: u16,
        reason: String,
    },

    #[error("Service error: {verb} - {message}")]
    Service { verb: String, message: String },

    #[error("Malformed response: {verb} - {details}")]
    Malformed { verb: String, details: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

/// Failure raised by the XML codec
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Malformed document at byte {position}: {details}")]
    MalformedDocument { position: u64, details: String },
}

impl CodecError {
    pub(crate) fn malformed(position: u64, details: impl Into<String>) -> Self {
        CodecError::MalformedDocument {
            position,
            details: details.into(),
        }
    }
}

/// Failure raised by required reads on a response view
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ViewError {
    #[error("Field not found: {path}")]
    FieldNotFound { path: String },
}

/// Network-level failures: no response was received
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Request timeout: {url} after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },

    #[error("Connection failed: {url} - {details}")]
    Connection { url: String, details: String },

    #[error("Batch round deadline exceeded after {elapsed_ms}ms")]
    Deadline { elapsed_ms: u64 },

    #[error("Request not sent within {rounds} rounds")]
    NotSent { rounds: u32 },

    #[error("Request failed: {url} - {details}")]
    Other { url: String, details: String },
}

impl TransportError {
    pub(crate) fn from_reqwest(url: &str, timeout_ms: u64, err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout {
                url: url.to_string(),
                timeout_ms,
            }
        } else if err.is_connect() {
            TransportError::Connection {
                url: url.to_string(),
                details: err.to_string(),
            }
        } else {
            TransportError::Other {
                url: url.to_string(),
                details: err.to_string(),
            }
        }
    }
}

/// How far an exchange got before it failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    /// No response received
    Transport,
    /// Response received with a status other than 200
    Http,
    /// Status 200, but the body reports a service-level failure
    Service,
    /// The body is not a well-formed document
    Malformed,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Transport => "Transport",
            FailureKind::Http => "Http",
            FailureKind::Service => "Service",
            FailureKind::Malformed => "Malformed",
        };
        f.write_str(name)
    }
}

/// Classified failure of a single exchange
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{verb}: {kind}: {message}")]
pub struct ExchangeFailure {
    pub verb: String,
    pub kind: FailureKind,
    pub message: String,
    pub status: Option<u16>,
}

impl From<ExchangeFailure> for Error {
    fn from(failure: ExchangeFailure) -> Self {
        let ExchangeFailure {
            verb,
            kind,
            message,
            status,
        } = failure;

        match kind {
            FailureKind::Transport => Error::Transport {
                verb,
                details: message,
            },
            FailureKind::Http => Error::Http {
                verb,
                status: status.unwrap_or_default(),
                reason: message,
            },
            FailureKind::Service => Error::Service { verb, message },
            FailureKind::Malformed => Error::Malformed {
                verb,
                details: message,
            },
        }
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, Error>;

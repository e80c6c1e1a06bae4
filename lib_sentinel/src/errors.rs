//! # Error Taxonomy
//!
//! Every failure inside the core is recorded as state (health flags,
//! `last_error`, `metadata.errorCount`) rather than thrown across the public
//! boundary. These types are what gets recorded.

use std::time::Duration;
use thiserror::Error;

/// Failures of either transport. Always non-fatal: they feed the backoff and
/// failover logic and are stored as the connector's `last_error`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("invalid transport url `{0}`")]
    InvalidUrl(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection closed unexpectedly")]
    UnexpectedClose,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("http status {status}: {body}")]
    Http { status: u16, body: String },

    #[error("upstream reported failure: {0}")]
    Upstream(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("no async runtime available")]
    NoRuntime,
}

/// A schema violation found while checking one inbound telemetry record.
/// Carries the path of the offending field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("record must be a JSON object, found {found}")]
    NotAnObject { found: &'static str },

    #[error("missing required field `{field}`")]
    MissingField { field: String },

    #[error("field `{field}` must be {expected}, found {found}")]
    WrongType {
        field: String,
        expected: &'static str,
        found: &'static str,
    },
}

impl ValidationError {
    /// Path of the field that failed, or `$` for the record itself.
    pub fn field(&self) -> &str {
        match self {
            ValidationError::NotAnObject { .. } => "$",
            ValidationError::MissingField { field } => field,
            ValidationError::WrongType { field, .. } => field,
        }
    }
}

/// A subscriber callback panicked while being notified.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("subscriber {subscriber_id} failed: {message}")]
pub struct SubscriberError {
    pub subscriber_id: u64,
    pub message: String,
}

/// Rejected connector or state-manager options.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("option `{option}` is invalid: {reason}")]
    Invalid { option: &'static str, reason: String },

    #[error("no transport configured: set a push url, a pull url, or both")]
    NoTransport,
}

/// Logging bootstrap failures.
#[cfg(feature = "loggers")]
#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("I/O error occurred: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid log filter: {0}")]
    Filter(String),

    #[error("a global subscriber is already installed: {0}")]
    AlreadyInstalled(String),
}

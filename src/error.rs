//! Error Handling Module
//!
//! Two error families live here:
//! - [`TrackerError`]: raised while building a tracker. This is the only error a
//!   caller ever sees from this crate, because it means the setup is unusable.
//! - [`DeliveryError`]: produced while shipping events to the collector. These
//!   are absorbed by the delivery client and only show up in health status.
//!
//! Errors from the wrapped client are never converted; see
//! [`CallError`](crate::types::CallError) for how they are inspected.

use std::time::Duration;

use thiserror::Error;

/// Construction-time errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TrackerError {
    /// Generic configuration problem (bad numeric value, inconsistent thresholds).
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A required credential was not provided explicitly or via environment.
    #[error("Missing API key: {0}")]
    MissingApiKey(String),

    /// A credential was provided but is unusable.
    #[error("Invalid API key: {0}")]
    InvalidApiKey(String),

    /// The collector endpoint is not an absolute http(s) URL.
    #[error("Invalid endpoint '{url}': {reason}")]
    InvalidEndpoint { url: String, reason: String },

    /// The background delivery runtime could not be started.
    #[error("Runtime error: {0}")]
    Runtime(String),
}

/// Result type for tracker construction.
pub type Result<T> = std::result::Result<T, TrackerError>;

/// Failure of a single delivery attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("collector request timed out")]
    Timeout,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("collector returned HTTP {status}: {message}")]
    Status {
        status: u16,
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("exporter error: {0}")]
    Exporter(String),
}

impl DeliveryError {
    /// Build a status error without a retry hint.
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Transient failures are worth another attempt; everything else is dropped.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout | Self::Connection(_) => true,
            Self::Status { status, .. } => *status == 429 || (500..=599).contains(status),
            Self::Serialization(_) | Self::Exporter(_) => false,
        }
    }

    /// Short label used in logs and health status.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Connection(_) => "connection",
            Self::Status { status: 429, .. } => "rate_limit",
            Self::Status { status, .. } if *status >= 500 => "server",
            Self::Status { .. } => "client",
            Self::Serialization(_) => "serialization",
            Self::Exporter(_) => "exporter",
        }
    }

    /// Server-provided backoff hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for DeliveryError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_connect() || e.is_request() {
            Self::Connection(e.to_string())
        } else if let Some(status) = e.status() {
            Self::status(status.as_u16(), e.to_string())
        } else {
            Self::Exporter(e.to_string())
        }
    }
}

impl From<serde_json::Error> for DeliveryError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

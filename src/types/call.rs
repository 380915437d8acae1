//! Inspecting errors raised by the wrapped client
//!
//! The tracker never converts, wraps or swallows a wrapped-operation error.
//! It only reads a few facts from it through [`CallError`] to label the
//! failed-call usage event.

use std::fmt;

use serde_json::Value;

/// Read-only view of a wrapped-operation error.
///
/// Implement it for your client's error type; all methods have defaults, so
/// `impl CallError for MyError {}` is enough when the error is `Display`.
pub trait CallError: fmt::Display {
    /// HTTP status reported by the provider, if any.
    fn status_code(&self) -> Option<u16> {
        None
    }

    /// Provider request id, if any.
    fn request_id(&self) -> Option<&str> {
        None
    }

    fn is_timeout(&self) -> bool {
        false
    }

    fn is_connection(&self) -> bool {
        false
    }
}

/// Label a failed call the way the collector groups errors.
pub fn classify_error<E: CallError + ?Sized>(error: &E) -> &'static str {
    match error.status_code() {
        Some(400) => "invalid_request",
        Some(401) => "authentication",
        Some(403) => "permission_denied",
        Some(404) => "not_found",
        Some(413) => "request_too_large",
        Some(429) => "rate_limit",
        Some(529) => "overloaded",
        Some(code) if code >= 500 => "server_error",
        Some(code) if code >= 400 => "client_error",
        _ if error.is_timeout() => "timeout",
        _ if error.is_connection() => "connection_error",
        _ => "api_error",
    }
}

impl CallError for std::io::Error {
    fn is_timeout(&self) -> bool {
        self.kind() == std::io::ErrorKind::TimedOut
    }

    fn is_connection(&self) -> bool {
        matches!(
            self.kind(),
            std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
                | std::io::ErrorKind::ConnectionAborted
                | std::io::ErrorKind::NotConnected
        )
    }
}

impl CallError for reqwest::Error {
    fn status_code(&self) -> Option<u16> {
        self.status().map(|s| s.as_u16())
    }

    fn is_timeout(&self) -> bool {
        reqwest::Error::is_timeout(self)
    }

    fn is_connection(&self) -> bool {
        self.is_connect()
    }
}

impl CallError for Box<dyn std::error::Error + Send + Sync> {}

/// Error returned by the Messages API.
///
/// Clients that speak the HTTP API directly can use this as their error
/// type; the tracker reads status and request id from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    pub status: Option<u16>,
    pub error_type: String,
    pub message: String,
    pub request_id: Option<String>,
}

impl ApiError {
    pub fn new(status: u16, error_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            error_type: error_type.into(),
            message: message.into(),
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Parse an error body of the form
    /// `{"type": "error", "error": {"type": "...", "message": "..."}}`.
    pub fn from_body(status: u16, body: &Value) -> Self {
        let error = body.get("error").unwrap_or(body);
        let error_type = error
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("api_error");
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        let mut out = Self::new(status, error_type, message);
        if let Some(id) = body.get("request_id").and_then(Value::as_str) {
            out.request_id = Some(id.to_string());
        }
        out
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} ({}): {}", self.error_type, status, self.message),
            None => write!(f, "{}: {}", self.error_type, self.message),
        }
    }
}

impl std::error::Error for ApiError {}

impl CallError for ApiError {
    fn status_code(&self) -> Option<u16> {
        self.status
    }

    fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    fn is_timeout(&self) -> bool {
        self.status.is_none() && self.error_type == "timeout"
    }

    fn is_connection(&self) -> bool {
        self.status.is_none() && self.error_type == "connection_error"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn classifies_by_status() {
        assert_eq!(classify_error(&ApiError::new(500, "api_error", "x")), "server_error");
        assert_eq!(classify_error(&ApiError::new(401, "authentication_error", "x")), "authentication");
        assert_eq!(classify_error(&ApiError::new(429, "rate_limit_error", "x")), "rate_limit");
        assert_eq!(classify_error(&ApiError::new(529, "overloaded_error", "x")), "overloaded");
        assert_eq!(classify_error(&ApiError::new(418, "teapot", "x")), "client_error");
    }

    #[test]
    fn classifies_io_errors_without_status() {
        let timeout = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        assert_eq!(classify_error(&timeout), "timeout");
        let refused = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "nope");
        assert_eq!(classify_error(&refused), "connection_error");
        let other = std::io::Error::other("weird");
        assert_eq!(classify_error(&other), "api_error");
    }

    #[test]
    fn parses_error_body() {
        let body = json!({
            "type": "error",
            "error": {"type": "invalid_request_error", "message": "max_tokens required"},
            "request_id": "req_abc"
        });
        let err = ApiError::from_body(400, &body);
        assert_eq!(err.error_type, "invalid_request_error");
        assert_eq!(err.request_id(), Some("req_abc"));
        assert_eq!(err.to_string(), "invalid_request_error (400): max_tokens required");
    }
}

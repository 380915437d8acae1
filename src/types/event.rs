//! Usage event model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::sanitize::{sanitize_log_line, sanitize_map, truncate_chars};

/// Provider family reported on every event.
pub const PROVIDER: &str = "anthropic";

/// Model name used when neither the result nor the request names one.
pub const UNKNOWN_MODEL: &str = "unknown";

/// Maximum length of an error message carried on an event.
pub const MAX_ERROR_MESSAGE_LEN: usize = 500;

/// One billable API call.
///
/// Immutable once built: fields are read through accessors and the only
/// transformation is [`UsageEvent::sanitized`], which returns a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageEvent {
    event_id: Uuid,
    customer_id: String,
    provider: String,
    model: String,
    input_tokens: u64,
    output_tokens: u64,
    total_tokens: u64,
    timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    metadata: Map<String, Value>,
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    request_start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    request_end_time: Option<DateTime<Utc>>,
}

impl UsageEvent {
    /// Start building an event for `customer_id` and `model`.
    pub fn builder(customer_id: impl Into<String>, model: impl Into<String>) -> UsageEventBuilder {
        UsageEventBuilder::new(customer_id, model)
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn customer_id(&self) -> &str {
        &self.customer_id
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn input_tokens(&self) -> u64 {
        self.input_tokens
    }

    pub fn output_tokens(&self) -> u64 {
        self.output_tokens
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_tokens
    }

    /// Capture time of the call, not delivery time.
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn metadata(&self) -> &Map<String, Value> {
        &self.metadata
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn error_kind(&self) -> Option<&str> {
        self.error_kind.as_deref()
    }

    pub fn error_code(&self) -> Option<&str> {
        self.error_code.as_deref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn request_start_time(&self) -> Option<DateTime<Utc>> {
        self.request_start_time
    }

    pub fn request_end_time(&self) -> Option<DateTime<Utc>> {
        self.request_end_time
    }

    /// Copy of this event that is safe to transmit or log.
    pub fn sanitized(&self) -> Self {
        let mut out = self.clone();
        out.metadata = sanitize_map(&self.metadata);
        out.error_message = self
            .error_message
            .as_deref()
            .map(|m| truncate_chars(&sanitize_log_line(m), MAX_ERROR_MESSAGE_LEN));
        out.request_id = self.request_id.as_deref().map(sanitize_log_line);
        out
    }
}

/// Builder for [`UsageEvent`].
#[derive(Debug, Clone)]
pub struct UsageEventBuilder {
    customer_id: String,
    model: String,
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
    reported_total: Option<u64>,
    timestamp: Option<DateTime<Utc>>,
    metadata: Map<String, Value>,
    success: bool,
    error_kind: Option<String>,
    error_code: Option<String>,
    error_message: Option<String>,
    request_id: Option<String>,
    request_start_time: Option<DateTime<Utc>>,
    request_end_time: Option<DateTime<Utc>>,
}

impl UsageEventBuilder {
    pub fn new(customer_id: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            customer_id: customer_id.into(),
            model: model.into(),
            input_tokens: None,
            output_tokens: None,
            reported_total: None,
            timestamp: None,
            metadata: Map::new(),
            success: true,
            error_kind: None,
            error_code: None,
            error_message: None,
            request_id: None,
            request_start_time: None,
            request_end_time: None,
        }
    }

    pub fn input_tokens(mut self, tokens: u64) -> Self {
        self.input_tokens = Some(tokens);
        self
    }

    pub fn output_tokens(mut self, tokens: u64) -> Self {
        self.output_tokens = Some(tokens);
        self
    }

    /// The provider's own total. Only used when input or output is unknown.
    pub fn reported_total(mut self, tokens: u64) -> Self {
        self.reported_total = Some(tokens);
        self
    }

    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn extend_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata.extend(metadata);
        self
    }

    /// Mark the call as failed with the given error label.
    pub fn failed(mut self, error_kind: impl Into<String>) -> Self {
        self.success = false;
        self.error_kind = Some(error_kind.into());
        self
    }

    pub fn error_code(mut self, code: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self
    }

    pub fn error_message(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn request_window(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.request_start_time = Some(start);
        self.request_end_time = Some(end);
        self
    }

    /// Finish the event. Returns `None` when the customer id is blank: an
    /// event is never sent with a placeholder customer.
    pub fn build(self) -> Option<UsageEvent> {
        let customer_id = self.customer_id.trim();
        if customer_id.is_empty() {
            return None;
        }
        let model = match self.model.trim() {
            "" => UNKNOWN_MODEL.to_string(),
            m => m.to_string(),
        };
        let input = self.input_tokens.unwrap_or(0);
        let output = self.output_tokens.unwrap_or(0);
        let total = match (self.input_tokens, self.output_tokens, self.reported_total) {
            (Some(i), Some(o), _) => i.saturating_add(o),
            (_, _, Some(reported)) => reported,
            _ => input.saturating_add(output),
        };
        Some(UsageEvent {
            event_id: Uuid::new_v4(),
            customer_id: customer_id.to_string(),
            provider: PROVIDER.to_string(),
            model,
            input_tokens: input,
            output_tokens: output,
            total_tokens: total,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            metadata: self.metadata,
            success: self.success,
            error_kind: self.error_kind,
            error_code: self.error_code,
            error_message: self.error_message,
            request_id: self.request_id,
            request_start_time: self.request_start_time,
            request_end_time: self.request_end_time,
        })
    }
}

//! Event extraction
//!
//! Turns one finished call into at most one [`UsageEvent`]. Only metadata is
//! read: the model name, provider-reported token counts and a few response
//! identifiers. Message content is never touched.
//!
//! Extraction cannot fail from the caller's point of view. Missing fields
//! degrade to zeros plus a metadata flag, and any internal fault degrades to
//! "no event" with a logged diagnostic.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::sanitize::sanitize_log_line;
use crate::types::{CallError, TrackingOptions, UNKNOWN_MODEL, UsageEvent, UsageSource, classify_error};

/// Metadata flag set when the result carried no usage block.
pub const USAGE_MISSING_KEY: &str = "usage_missing";
/// Metadata flag set when input or output count was absent.
pub const USAGE_INCOMPLETE_KEY: &str = "usage_incomplete";

/// Everything the extractor needs to know about a finished call.
#[derive(Debug)]
pub struct CapturedCall<'a, R: ?Sized, E: ?Sized> {
    /// Name of the tracked operation, e.g. `messages.create`.
    pub operation: &'a str,
    /// `model` argument of the request, if any.
    pub request_model: Option<&'a str>,
    pub options: &'a TrackingOptions,
    /// Ambient customer captured when the call started.
    pub ambient_customer: Option<&'a str>,
    pub outcome: Result<&'a R, &'a E>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration: Duration,
}

impl<'a, R: ?Sized, E: ?Sized> CapturedCall<'a, R, E> {
    /// Customer for this call: explicit option, then the captured ambient id.
    pub fn customer_id(&self) -> Option<String> {
        [self.options.customer_id.as_deref(), self.ambient_customer]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|id| !id.is_empty())
            .map(str::to_string)
    }
}

/// Build the usage event for a captured call.
///
/// Returns `None` when tracking is off for the call, when no customer can be
/// resolved, or when extraction hit an internal fault.
pub fn extract_event<R, E>(call: &CapturedCall<'_, R, E>) -> Option<UsageEvent>
where
    R: UsageSource + ?Sized,
    E: CallError + ?Sized,
{
    if !call.options.track_usage {
        tracing::debug!(target: "cmdrdata::extract", operation = call.operation, "tracking disabled for call");
        return None;
    }
    let Some(customer_id) = call.customer_id() else {
        tracing::debug!(target: "cmdrdata::extract", operation = call.operation, "no customer id resolved, skipping event");
        return None;
    };

    match catch_unwind(AssertUnwindSafe(|| build_event(call, customer_id))) {
        Ok(event) => event,
        Err(_) => {
            tracing::warn!(target: "cmdrdata::extract", operation = call.operation, "usage extraction panicked, event dropped");
            None
        }
    }
}

fn build_event<R, E>(call: &CapturedCall<'_, R, E>, customer_id: String) -> Option<UsageEvent>
where
    R: UsageSource + ?Sized,
    E: CallError + ?Sized,
{
    let result_model = call.outcome.ok().and_then(|r| r.model());
    let model = result_model
        .or(call.request_model)
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or(UNKNOWN_MODEL);

    let mut builder = UsageEvent::builder(customer_id, model)
        .timestamp(call.started_at)
        .request_window(call.started_at, call.finished_at)
        .extend_metadata(call.options.custom_metadata.clone());

    let mut system = Map::new();
    system.insert("operation".into(), call.operation.into());
    system.insert(
        "duration_ms".into(),
        Value::from(u64::try_from(call.duration.as_millis()).unwrap_or(u64::MAX)),
    );

    match call.outcome {
        Ok(result) => {
            match result.usage() {
                Some(usage) => {
                    if let Some(tokens) = usage.input_tokens {
                        builder = builder.input_tokens(tokens);
                    }
                    if let Some(tokens) = usage.output_tokens {
                        builder = builder.output_tokens(tokens);
                    }
                    if let Some(tokens) = usage.total_tokens {
                        builder = builder.reported_total(tokens);
                    }
                    if !usage.is_complete() {
                        system.insert(USAGE_INCOMPLETE_KEY.into(), Value::Bool(true));
                    }
                    if let Some(tokens) = usage.cache_creation_input_tokens {
                        system.insert("cache_creation_input_tokens".into(), tokens.into());
                    }
                    if let Some(tokens) = usage.cache_read_input_tokens {
                        system.insert("cache_read_input_tokens".into(), tokens.into());
                    }
                }
                None => {
                    system.insert(USAGE_MISSING_KEY.into(), Value::Bool(true));
                }
            }
            let fields = [
                ("response_id", result.response_id()),
                ("type", result.response_type()),
                ("role", result.role()),
                ("stop_reason", result.stop_reason()),
                ("stop_sequence", result.stop_sequence()),
            ];
            for (key, value) in fields {
                if let Some(value) = value {
                    system.insert(key.into(), value.into());
                }
            }
        }
        Err(error) => {
            builder = builder
                .failed(classify_error(error))
                .error_message(sanitize_log_line(&error.to_string()));
            if let Some(status) = error.status_code() {
                builder = builder.error_code(status.to_string());
            }
            if let Some(request_id) = error.request_id() {
                builder = builder.request_id(request_id);
            }
        }
    }

    builder.extend_metadata(system).build()
}

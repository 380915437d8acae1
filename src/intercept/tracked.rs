//! Generic call interception
//!
//! Wraps any billable operation: strips the tracking arguments, times the
//! call, hands the outcome to the extractor and returns the outcome exactly
//! as the operation produced it.

use std::future::Future;
use std::time::Instant;

use chrono::Utc;
use serde_json::{Map, Value};

use crate::context::current_customer;
use crate::extract::{CapturedCall, extract_event};
use crate::tracker::UsageTracker;
use crate::types::{CallError, TrackingOptions, UsageSource};

/// Call facts gathered before the wrapped operation runs.
struct CallStart {
    options: TrackingOptions,
    ambient_customer: Option<String>,
    request_model: Option<String>,
    started_at: chrono::DateTime<Utc>,
    clock: Instant,
}

impl CallStart {
    fn begin(params: &mut Map<String, Value>, explicit: TrackingOptions) -> Self {
        let options = TrackingOptions::take_from(params).merge(explicit);
        Self {
            options,
            ambient_customer: current_customer(),
            request_model: params.get("model").and_then(Value::as_str).map(str::to_string),
            started_at: Utc::now(),
            clock: Instant::now(),
        }
    }
}

impl UsageTracker {
    /// Track an async operation.
    ///
    /// `params` are the operation's arguments; `customer_id`,
    /// `custom_metadata` and `track_usage` are removed before `call` sees
    /// them. The operation's result or error is returned untouched.
    pub async fn intercept<R, E, F, Fut>(
        &self,
        operation: &str,
        params: Map<String, Value>,
        call: F,
    ) -> Result<R, E>
    where
        R: UsageSource,
        E: CallError,
        F: FnOnce(Map<String, Value>) -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        self.intercept_with(operation, params, TrackingOptions::default(), call)
            .await
    }

    /// [`intercept`](Self::intercept) with options passed out of band. Values
    /// in `options` override the ones found in `params`.
    pub async fn intercept_with<R, E, F, Fut>(
        &self,
        operation: &str,
        mut params: Map<String, Value>,
        options: TrackingOptions,
        call: F,
    ) -> Result<R, E>
    where
        R: UsageSource,
        E: CallError,
        F: FnOnce(Map<String, Value>) -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        let start = CallStart::begin(&mut params, options);
        let outcome = call(params).await;
        self.capture(operation, start, outcome.as_ref());
        outcome
    }

    /// Track a synchronous operation. Same contract as [`intercept`](Self::intercept).
    pub fn intercept_blocking<R, E, F>(
        &self,
        operation: &str,
        params: Map<String, Value>,
        call: F,
    ) -> Result<R, E>
    where
        R: UsageSource,
        E: CallError,
        F: FnOnce(Map<String, Value>) -> Result<R, E>,
    {
        self.intercept_blocking_with(operation, params, TrackingOptions::default(), call)
    }

    /// [`intercept_blocking`](Self::intercept_blocking) with tracking options passed alongside the params.
    pub fn intercept_blocking_with<R, E, F>(
        &self,
        operation: &str,
        mut params: Map<String, Value>,
        options: TrackingOptions,
        call: F,
    ) -> Result<R, E>
    where
        R: UsageSource,
        E: CallError,
        F: FnOnce(Map<String, Value>) -> Result<R, E>,
    {
        let start = CallStart::begin(&mut params, options);
        let outcome = call(params);
        self.capture(operation, start, outcome.as_ref());
        outcome
    }

    fn capture<R, E>(&self, operation: &str, start: CallStart, outcome: Result<&R, &E>)
    where
        R: UsageSource,
        E: CallError,
    {
        let duration = start.clock.elapsed();
        self.record_call(duration, outcome.is_ok());
        if !self.is_enabled() {
            return;
        }
        let call = CapturedCall {
            operation,
            request_model: start.request_model.as_deref(),
            options: &start.options,
            ambient_customer: start.ambient_customer.as_deref(),
            outcome,
            started_at: start.started_at,
            finished_at: Utc::now(),
            duration,
        };
        if let Some(event) = extract_event(&call) {
            tracing::debug!(
                target: "cmdrdata::intercept",
                operation,
                event_id = %event.event_id(),
                success = event.success(),
                "usage event captured"
            );
            self.track_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::with_customer;
    use crate::types::ApiError;
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn forwards_params_without_tracking_arguments() {
        let tracker = UsageTracker::disabled();
        let seen = tracker.intercept_blocking(
            "messages.create",
            params(json!({"model": "m", "max_tokens": 10, "customer_id": "c", "track_usage": false})),
            |p| Ok::<Value, ApiError>(Value::Object(p)),
        );
        let seen = seen.expect("ok");
        assert_eq!(seen, json!({"model": "m", "max_tokens": 10}));
    }

    #[test]
    fn returns_errors_unchanged() {
        let tracker = UsageTracker::disabled();
        let _scope = with_customer("cust-err");
        let err = ApiError::new(529, "overloaded_error", "Overloaded").with_request_id("req_1");
        let out: Result<Value, ApiError> =
            tracker.intercept_blocking("messages.create", Map::new(), |_| Err(err.clone()));
        assert_eq!(out, Err(err));
        let stats = tracker.performance_stats();
        assert_eq!(stats.count, 1);
        assert_eq!(stats.failures, 1);
    }

    #[tokio::test]
    async fn async_interception_returns_result_unchanged() {
        let tracker = UsageTracker::disabled();
        let response = json!({"id": "msg_1", "model": "m", "usage": {"input_tokens": 1, "output_tokens": 1}});
        let expected = response.clone();
        let out = tracker
            .intercept("messages.create", Map::new(), |_| async move {
                Ok::<Value, ApiError>(response)
            })
            .await;
        assert_eq!(out, Ok(expected));
    }
}

//! Per-call tracking options
//!
//! A tracked call accepts three private arguments next to the wrapped
//! operation's own: `customer_id`, `custom_metadata` and `track_usage`. They
//! are removed from the argument map before it is forwarded.

use serde::Serialize;
use serde_json::{Map, Value};

/// Argument name carrying the explicit customer id.
pub const CUSTOMER_ID_ARG: &str = "customer_id";
/// Argument name carrying caller billing dimensions.
pub const CUSTOM_METADATA_ARG: &str = "custom_metadata";
/// Argument name carrying the per-call tracking switch.
pub const TRACK_USAGE_ARG: &str = "track_usage";

/// Tracking options for a single call.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingOptions {
    pub customer_id: Option<String>,
    pub custom_metadata: Map<String, Value>,
    pub track_usage: bool,
}

impl Default for TrackingOptions {
    fn default() -> Self {
        Self {
            customer_id: None,
            custom_metadata: Map::new(),
            track_usage: true,
        }
    }
}

impl TrackingOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attribute the call to `customer_id`, overriding any ambient context.
    pub fn customer(mut self, customer_id: impl Into<String>) -> Self {
        self.customer_id = Some(customer_id.into());
        self
    }

    /// Add one billing dimension. Values that cannot be represented as JSON
    /// are dropped.
    pub fn metadata(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        let key = key.into();
        match serde_json::to_value(value) {
            Ok(value) => {
                self.custom_metadata.insert(key, value);
            }
            Err(e) => {
                tracing::debug!(target: "cmdrdata::extract", key = %key, error = %e, "dropping non-serializable metadata value");
            }
        }
        self
    }

    /// Replace all billing dimensions.
    pub fn with_metadata(mut self, metadata: Map<String, Value>) -> Self {
        self.custom_metadata = metadata;
        self
    }

    /// Disable tracking for this call.
    pub fn untracked(mut self) -> Self {
        self.track_usage = false;
        self
    }

    pub fn track_usage(mut self, enabled: bool) -> Self {
        self.track_usage = enabled;
        self
    }

    /// Remove the tracking arguments from `params` and return them as options.
    ///
    /// Malformed values (a numeric `customer_id`, a non-object
    /// `custom_metadata`) are stripped and ignored; a non-boolean
    /// `track_usage` keeps tracking on.
    pub fn take_from(params: &mut Map<String, Value>) -> Self {
        let mut options = Self::default();
        if let Some(value) = params.remove(CUSTOMER_ID_ARG) {
            options.customer_id = value.as_str().map(str::to_string);
        }
        if let Some(Value::Object(map)) = params.remove(CUSTOM_METADATA_ARG) {
            options.custom_metadata = map;
        }
        if let Some(value) = params.remove(TRACK_USAGE_ARG) {
            options.track_usage = value.as_bool().unwrap_or(true);
        }
        options
    }

    /// Overlay `other` on top of `self`: `other`'s customer and metadata keys
    /// win, and tracking stays on only if both allow it.
    pub fn merge(mut self, other: TrackingOptions) -> Self {
        if other.customer_id.is_some() {
            self.customer_id = other.customer_id;
        }
        self.custom_metadata.extend(other.custom_metadata);
        self.track_usage = self.track_usage && other.track_usage;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn strips_private_arguments() {
        let mut p = params(json!({
            "model": "claude-3-5-haiku-20241022",
            "max_tokens": 64,
            "customer_id": "cust-1",
            "custom_metadata": {"feature": "summaries"},
            "track_usage": true
        }));
        let options = TrackingOptions::take_from(&mut p);
        assert_eq!(options.customer_id.as_deref(), Some("cust-1"));
        assert_eq!(options.custom_metadata["feature"], "summaries");
        assert!(options.track_usage);
        assert_eq!(p.len(), 2);
        assert!(p.contains_key("model"));
        assert!(p.contains_key("max_tokens"));
    }

    #[test]
    fn malformed_arguments_are_stripped_and_ignored() {
        let mut p = params(json!({
            "customer_id": 42,
            "custom_metadata": "not a map",
            "track_usage": "no"
        }));
        let options = TrackingOptions::take_from(&mut p);
        assert!(p.is_empty());
        assert_eq!(options, TrackingOptions::default());
    }

    #[test]
    fn track_usage_false_is_honoured() {
        let mut p = params(json!({"track_usage": false}));
        assert!(!TrackingOptions::take_from(&mut p).track_usage);
    }

    #[test]
    fn merge_prefers_later_values() {
        let base = TrackingOptions::new()
            .customer("a")
            .metadata("tier", "free")
            .metadata("region", "eu");
        let merged = base.merge(TrackingOptions::new().customer("b").metadata("tier", "pro"));
        assert_eq!(merged.customer_id.as_deref(), Some("b"));
        assert_eq!(merged.custom_metadata["tier"], "pro");
        assert_eq!(merged.custom_metadata["region"], "eu");

        let off = TrackingOptions::new().merge(TrackingOptions::new().untracked());
        assert!(!off.track_usage);
    }

    #[test]
    fn non_serializable_metadata_is_dropped() {
        let mut bad = std::collections::HashMap::new();
        bad.insert((1, 2), "tuple keys cannot be JSON object keys");
        let options = TrackingOptions::new().metadata("bad", bad).metadata("ok", 1);
        assert!(!options.custom_metadata.contains_key("bad"));
        assert_eq!(options.custom_metadata["ok"], 1);
    }
}

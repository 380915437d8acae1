//! Reading provider-reported usage from a call result
//!
//! The wrapped client's response is opaque to this crate. [`UsageSource`]
//! is the narrow read-only view the extractor needs: model, token counts and
//! a few response identifiers. Message content is never part of it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Token counts as reported by the provider. Any field may be missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportedUsage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
    pub cache_creation_input_tokens: Option<u64>,
    pub cache_read_input_tokens: Option<u64>,
}

impl ReportedUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens: Some(input_tokens),
            output_tokens: Some(output_tokens),
            ..Default::default()
        }
    }

    /// Whether both input and output counts were reported.
    pub fn is_complete(&self) -> bool {
        self.input_tokens.is_some() && self.output_tokens.is_some()
    }
}

/// Read-only view of a call result used for billing extraction.
///
/// Every method has a default returning `None`, so a result type only needs
/// to expose what it actually has.
pub trait UsageSource {
    fn model(&self) -> Option<&str> {
        None
    }

    fn usage(&self) -> Option<ReportedUsage> {
        None
    }

    fn response_id(&self) -> Option<&str> {
        None
    }

    fn response_type(&self) -> Option<&str> {
        None
    }

    fn role(&self) -> Option<&str> {
        None
    }

    fn stop_reason(&self) -> Option<&str> {
        None
    }

    fn stop_sequence(&self) -> Option<&str> {
        None
    }
}

impl<T: UsageSource + ?Sized> UsageSource for &T {
    fn model(&self) -> Option<&str> {
        (**self).model()
    }
    fn usage(&self) -> Option<ReportedUsage> {
        (**self).usage()
    }
    fn response_id(&self) -> Option<&str> {
        (**self).response_id()
    }
    fn response_type(&self) -> Option<&str> {
        (**self).response_type()
    }
    fn role(&self) -> Option<&str> {
        (**self).role()
    }
    fn stop_reason(&self) -> Option<&str> {
        (**self).stop_reason()
    }
    fn stop_sequence(&self) -> Option<&str> {
        (**self).stop_sequence()
    }
}

impl<T: UsageSource + ?Sized> UsageSource for Box<T> {
    fn model(&self) -> Option<&str> {
        (**self).model()
    }
    fn usage(&self) -> Option<ReportedUsage> {
        (**self).usage()
    }
    fn response_id(&self) -> Option<&str> {
        (**self).response_id()
    }
    fn response_type(&self) -> Option<&str> {
        (**self).response_type()
    }
    fn role(&self) -> Option<&str> {
        (**self).role()
    }
    fn stop_reason(&self) -> Option<&str> {
        (**self).stop_reason()
    }
    fn stop_sequence(&self) -> Option<&str> {
        (**self).stop_sequence()
    }
}

impl<T: UsageSource + ?Sized> UsageSource for Arc<T> {
    fn model(&self) -> Option<&str> {
        (**self).model()
    }
    fn usage(&self) -> Option<ReportedUsage> {
        (**self).usage()
    }
    fn response_id(&self) -> Option<&str> {
        (**self).response_id()
    }
    fn response_type(&self) -> Option<&str> {
        (**self).response_type()
    }
    fn role(&self) -> Option<&str> {
        (**self).role()
    }
    fn stop_reason(&self) -> Option<&str> {
        (**self).stop_reason()
    }
    fn stop_sequence(&self) -> Option<&str> {
        (**self).stop_sequence()
    }
}

fn read_u64(value: &Value, keys: &[&str]) -> Option<u64> {
    keys.iter().find_map(|key| value.get(*key).and_then(Value::as_u64))
}

/// Raw JSON responses are read defensively: wrong types count as absent.
impl UsageSource for Value {
    fn model(&self) -> Option<&str> {
        self.get("model").and_then(Value::as_str)
    }

    fn usage(&self) -> Option<ReportedUsage> {
        let usage = self.get("usage").filter(|u| u.is_object())?;
        Some(ReportedUsage {
            input_tokens: read_u64(usage, &["input_tokens", "prompt_tokens"]),
            output_tokens: read_u64(usage, &["output_tokens", "completion_tokens"]),
            total_tokens: read_u64(usage, &["total_tokens"]),
            cache_creation_input_tokens: read_u64(usage, &["cache_creation_input_tokens"]),
            cache_read_input_tokens: read_u64(usage, &["cache_read_input_tokens"]),
        })
    }

    fn response_id(&self) -> Option<&str> {
        self.get("id").and_then(Value::as_str)
    }

    fn response_type(&self) -> Option<&str> {
        self.get("type").and_then(Value::as_str)
    }

    fn role(&self) -> Option<&str> {
        self.get("role").and_then(Value::as_str)
    }

    fn stop_reason(&self) -> Option<&str> {
        self.get("stop_reason").and_then(Value::as_str)
    }

    fn stop_sequence(&self) -> Option<&str> {
        self.get("stop_sequence").and_then(Value::as_str)
    }
}

/// Usage block of a Messages API response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagesUsage {
    #[serde(default)]
    pub input_tokens: Option<u64>,
    #[serde(default)]
    pub output_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_creation_input_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_read_input_tokens: Option<u64>,
}

/// Typed Messages API response.
///
/// `content` is kept as opaque JSON so callers get it back untouched; the
/// tracker never looks inside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagesResponse {
    pub id: String,
    #[serde(rename = "type", default = "default_response_type")]
    pub response_type: String,
    #[serde(default = "default_role")]
    pub role: String,
    pub model: String,
    #[serde(default)]
    pub content: Vec<Value>,
    #[serde(default)]
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub stop_sequence: Option<String>,
    #[serde(default)]
    pub usage: Option<MessagesUsage>,
}

fn default_response_type() -> String {
    "message".to_string()
}

fn default_role() -> String {
    "assistant".to_string()
}

impl UsageSource for MessagesResponse {
    fn model(&self) -> Option<&str> {
        Some(&self.model)
    }

    fn usage(&self) -> Option<ReportedUsage> {
        self.usage.as_ref().map(|u| ReportedUsage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
            total_tokens: None,
            cache_creation_input_tokens: u.cache_creation_input_tokens,
            cache_read_input_tokens: u.cache_read_input_tokens,
        })
    }

    fn response_id(&self) -> Option<&str> {
        Some(&self.id)
    }

    fn response_type(&self) -> Option<&str> {
        Some(&self.response_type)
    }

    fn role(&self) -> Option<&str> {
        Some(&self.role)
    }

    fn stop_reason(&self) -> Option<&str> {
        self.stop_reason.as_deref()
    }

    fn stop_sequence(&self) -> Option<&str> {
        self.stop_sequence.as_deref()
    }
}

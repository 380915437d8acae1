//! Payload and log sanitization
//!
//! Everything that leaves the process (collector payloads, log lines) goes
//! through this module first. The functions are pure and deterministic, and
//! applying them twice gives the same result as applying them once.
//!
//! Rules, in order:
//! - keys that carry message text (`messages`, `prompt`, ...) are dropped;
//! - keys that name a credential (`api_key`, `authorization`, `*_token`, ...)
//!   have their value replaced with [`REDACTION_MARKER`];
//! - credential-looking substrings inside string values are replaced;
//! - long strings are truncated, long arrays and wide objects are capped,
//!   and structures nested deeper than [`MAX_DEPTH`] are dropped.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};

/// Replacement for any redacted value.
pub const REDACTION_MARKER: &str = "[REDACTED]";

/// Maximum string length (in characters) kept in a sanitized payload.
pub const MAX_STRING_LEN: usize = 1000;

/// Maximum nesting depth kept in a sanitized payload.
pub const MAX_DEPTH: usize = 8;

/// Maximum number of array items or object entries kept per level.
pub const MAX_ITEMS: usize = 100;

const TRUNCATION_SUFFIX: &str = "...[truncated]";

/// Keys whose values are message text and must never be transmitted.
const CONTENT_KEYS: &[&str] = &[
    "messages",
    "content",
    "prompt",
    "system",
    "completion",
    "text",
];

const SENSITIVE_KEYS: &[&str] = &[
    "api_key",
    "apikey",
    "x_api_key",
    "secret",
    "client_secret",
    "password",
    "passwd",
    "token",
    "authorization",
    "proxy_authorization",
    "auth",
    "credential",
    "credentials",
    "private_key",
    "secret_key",
    "access_key",
    "cookie",
    "set_cookie",
];

const SENSITIVE_SUFFIXES: &[&str] = &["_api_key", "_secret", "_password", "_token"];

lazy_static! {
    static ref CREDENTIAL_PATTERNS: Vec<(Regex, &'static str)> = vec![
        (
            Regex::new(r"sk-ant-[A-Za-z0-9_\-]{8,}").expect("valid regex"),
            REDACTION_MARKER,
        ),
        (
            Regex::new(r"\b(?:sk|tk|pk|rk)-[A-Za-z0-9_\-]{16,}").expect("valid regex"),
            REDACTION_MARKER,
        ),
        (
            Regex::new(r"\bAKIA[0-9A-Z]{16}\b").expect("valid regex"),
            REDACTION_MARKER,
        ),
        (
            Regex::new(r"\beyJ[A-Za-z0-9_\-]+\.[A-Za-z0-9_\-]+\.[A-Za-z0-9_\-]+")
                .expect("valid regex"),
            REDACTION_MARKER,
        ),
        (
            Regex::new(r"(?i)\b(bearer|basic)\s+[A-Za-z0-9._~+/=\-]+").expect("valid regex"),
            "$1 [REDACTED]",
        ),
        (
            Regex::new(
                r#"(?i)\b(api[_-]?key|x-api-key|secret|password|token|authorization)(["']?\s*[:=]\s*["']?)[^\s"',;&\[]+"#,
            )
            .expect("valid regex"),
            "$1$2[REDACTED]",
        ),
    ];
}

/// Whether `key` names a credential.
///
/// Token *counts* such as `input_tokens` are not credentials.
pub fn is_sensitive_key(key: &str) -> bool {
    let normalized = normalize_key(key);
    SENSITIVE_KEYS.contains(&normalized.as_str())
        || SENSITIVE_SUFFIXES
            .iter()
            .any(|suffix| normalized.ends_with(suffix))
}

/// Whether `key` carries prompt or completion text.
pub fn is_content_key(key: &str) -> bool {
    CONTENT_KEYS.contains(&normalize_key(key).as_str())
}

fn normalize_key(key: &str) -> String {
    key.trim().to_ascii_lowercase().replace('-', "_")
}

/// Replace credential-looking substrings. Used for log lines and error messages.
pub fn sanitize_log_line(line: &str) -> String {
    let mut out = line.to_string();
    for (pattern, replacement) in CREDENTIAL_PATTERNS.iter() {
        if pattern.is_match(&out) {
            out = pattern.replace_all(&out, *replacement).into_owned();
        }
    }
    out
}

/// Passes of redact-then-truncate before giving up on a fixed point.
const MAX_SANITIZE_PASSES: usize = 4;

/// Sanitize a string value: redact, then truncate.
///
/// A cut can end a token on a fresh word boundary and expose a credential the
/// first redaction could not match, so the pair repeats until stable.
pub fn sanitize_str(value: &str) -> String {
    let mut current = truncate_chars(&sanitize_log_line(value), MAX_STRING_LEN);
    for _ in 1..MAX_SANITIZE_PASSES {
        let next = truncate_chars(&sanitize_log_line(&current), MAX_STRING_LEN);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

/// Truncate to at most `max_chars` characters, marking the cut.
///
/// The result of a truncation is exactly `max_chars` long, so truncating
/// again is a no-op.
pub fn truncate_chars(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let suffix_len = TRUNCATION_SUFFIX.chars().count();
    if max_chars <= suffix_len {
        return value.chars().take(max_chars).collect();
    }
    let mut out: String = value.chars().take(max_chars - suffix_len).collect();
    out.push_str(TRUNCATION_SUFFIX);
    out
}

/// Sanitize an arbitrary JSON value. A value that must be dropped entirely
/// (too deeply nested) becomes `Null` at the top level.
pub fn sanitize_value(value: &Value) -> Value {
    sanitize_at(value, 0).unwrap_or(Value::Null)
}

/// Sanitize a metadata mapping.
pub fn sanitize_map(map: &Map<String, Value>) -> Map<String, Value> {
    sanitize_object(map, 0)
}

fn sanitize_at(value: &Value, depth: usize) -> Option<Value> {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) => Some(value.clone()),
        Value::String(s) => Some(Value::String(sanitize_str(s))),
        Value::Array(items) => {
            if depth >= MAX_DEPTH {
                return None;
            }
            Some(Value::Array(
                items
                    .iter()
                    .take(MAX_ITEMS)
                    .filter_map(|item| sanitize_at(item, depth + 1))
                    .collect(),
            ))
        }
        Value::Object(map) => {
            if depth >= MAX_DEPTH {
                return None;
            }
            Some(Value::Object(sanitize_object(map, depth)))
        }
    }
}

fn sanitize_object(map: &Map<String, Value>, depth: usize) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, value) in map {
        if out.len() >= MAX_ITEMS {
            break;
        }
        if is_content_key(key) {
            continue;
        }
        if is_sensitive_key(key) {
            out.insert(key.clone(), Value::String(REDACTION_MARKER.to_string()));
            continue;
        }
        if let Some(clean) = sanitize_at(value, depth + 1) {
            out.insert(key.clone(), clean);
        }
    }
    out
}

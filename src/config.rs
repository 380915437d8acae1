//! Tracker Configuration
//!
//! Every setting can come from three places; the first one present wins:
//! an explicit builder call, an environment variable, the default.
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use cmdrdata_anthropic::config::TrackerConfig;
//!
//! # fn example() -> cmdrdata_anthropic::Result<()> {
//! // Everything from CMDRDATA_* variables
//! let from_env = TrackerConfig::from_env()?;
//!
//! // Explicit values override the environment
//! let config = TrackerConfig::builder()
//!     .api_key("tk-your-cmdrdata-key")
//!     .timeout(Duration::from_secs(2))
//!     .max_retries(5)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::delivery::{DeliverySettings, HealthSettings, RetryPolicy};
use crate::error::{Result, TrackerError};

/// Collector API key.
pub const ENV_API_KEY: &str = "CMDRDATA_API_KEY";
/// Collector endpoint URL.
pub const ENV_API_URL: &str = "CMDRDATA_API_URL";
/// Provider API key handed to the wrapped client.
pub const ENV_PROVIDER_API_KEY: &str = "ANTHROPIC_API_KEY";
/// `true`/`false` switch for all tracking.
pub const ENV_TRACKING_ENABLED: &str = "CMDRDATA_TRACKING_ENABLED";
/// Per-attempt timeout in seconds, fractions allowed.
pub const ENV_TIMEOUT: &str = "CMDRDATA_TIMEOUT";
/// Total delivery attempts per event.
pub const ENV_MAX_RETRIES: &str = "CMDRDATA_MAX_RETRIES";

/// Default collector endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://api.cmdrdata.ai/api/events";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_LATENCY_WINDOW: usize = 1000;

/// Validated tracker configuration.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Collector API key. Always present when tracking is enabled.
    pub api_key: Option<SecretString>,
    pub endpoint: String,
    /// Provider API key, for callers that build the wrapped client from it.
    pub provider_api_key: Option<SecretString>,
    pub tracking_enabled: bool,
    /// Per-attempt delivery timeout.
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub health: HealthSettings,
    pub delivery: DeliverySettings,
    /// Number of recent call latencies kept for percentiles.
    pub latency_window: usize,
}

impl TrackerConfig {
    pub fn builder() -> TrackerConfigBuilder {
        TrackerConfigBuilder::default()
    }

    /// Build entirely from environment variables and defaults.
    pub fn from_env() -> Result<Self> {
        Self::builder().build()
    }

    /// Total delivery attempts per event.
    pub fn max_retries(&self) -> u32 {
        self.retry.max_attempts
    }
}

/// Builder for [`TrackerConfig`]
#[derive(Debug, Clone, Default)]
pub struct TrackerConfigBuilder {
    api_key: Option<String>,
    endpoint: Option<String>,
    provider_api_key: Option<String>,
    tracking_enabled: Option<bool>,
    timeout: Option<Duration>,
    max_retries: Option<u32>,
    retry: Option<RetryPolicy>,
    health: Option<HealthSettings>,
    queue_capacity: Option<usize>,
    max_concurrent_deliveries: Option<usize>,
    latency_window: Option<usize>,
}

impl TrackerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collector API key
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Collector endpoint URL
    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.endpoint = Some(url.into());
        self
    }

    pub fn provider_api_key(mut self, key: impl Into<String>) -> Self {
        self.provider_api_key = Some(key.into());
        self
    }

    pub fn tracking_enabled(mut self, enabled: bool) -> Self {
        self.tracking_enabled = Some(enabled);
        self
    }

    /// Per-attempt delivery timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Total delivery attempts per event (at least 1)
    pub fn max_retries(mut self, attempts: u32) -> Self {
        self.max_retries = Some(attempts);
        self
    }

    /// Backoff schedule. `max_retries`, when set, overrides its attempt count.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn health_settings(mut self, settings: HealthSettings) -> Self {
        self.health = Some(settings);
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity);
        self
    }

    pub fn max_concurrent_deliveries(mut self, workers: usize) -> Self {
        self.max_concurrent_deliveries = Some(workers);
        self
    }

    pub fn latency_window(mut self, samples: usize) -> Self {
        self.latency_window = Some(samples);
        self
    }

    /// Validate and build, reading unset values from the process environment.
    pub fn build(self) -> Result<TrackerConfig> {
        self.build_with(|name| std::env::var(name).ok())
    }

    /// Validate and build, reading unset values through `lookup`.
    pub fn build_with<F>(self, lookup: F) -> Result<TrackerConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let tracking_enabled = match self.tracking_enabled {
            Some(enabled) => enabled,
            None => match env(ENV_TRACKING_ENABLED) {
                Some(raw) => parse_bool(ENV_TRACKING_ENABLED, &raw)?,
                None => true,
            },
        };

        let api_key = self.api_key.or_else(|| env(ENV_API_KEY));
        let api_key = match api_key {
            Some(key) => Some(validate_key(ENV_API_KEY, key)?),
            None if tracking_enabled => {
                return Err(TrackerError::MissingApiKey(format!(
                    "collector API key is required when tracking is enabled; pass it explicitly or set {ENV_API_KEY}"
                )));
            }
            None => None,
        };

        let provider_api_key = self
            .provider_api_key
            .or_else(|| env(ENV_PROVIDER_API_KEY))
            .map(|key| validate_key(ENV_PROVIDER_API_KEY, key))
            .transpose()?;

        let endpoint = self
            .endpoint
            .or_else(|| env(ENV_API_URL))
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        validate_endpoint(&endpoint)?;

        let timeout = match self.timeout {
            Some(timeout) => timeout,
            None => match env(ENV_TIMEOUT) {
                Some(raw) => parse_timeout(&raw)?,
                None => DEFAULT_TIMEOUT,
            },
        };
        if timeout.is_zero() {
            return Err(TrackerError::Configuration("timeout must be greater than zero".into()));
        }

        let mut retry = self.retry.unwrap_or_default();
        let max_retries = match self.max_retries {
            Some(attempts) => Some(attempts),
            None => env(ENV_MAX_RETRIES)
                .map(|raw| {
                    raw.trim().parse::<u32>().map_err(|_| {
                        TrackerError::Configuration(format!(
                            "{ENV_MAX_RETRIES} must be a non-negative integer, got '{raw}'"
                        ))
                    })
                })
                .transpose()?,
        };
        if let Some(attempts) = max_retries {
            retry.max_attempts = attempts;
        }
        if retry.max_attempts == 0 {
            return Err(TrackerError::Configuration("max retries must be at least 1".into()));
        }

        let health = self.health.unwrap_or_default();
        if health.degraded_threshold == 0 || health.degraded_threshold > health.unhealthy_threshold {
            return Err(TrackerError::Configuration(format!(
                "health thresholds must satisfy 1 <= degraded ({}) <= unhealthy ({})",
                health.degraded_threshold, health.unhealthy_threshold
            )));
        }

        let defaults = DeliverySettings::default();
        let delivery = DeliverySettings {
            queue_capacity: self.queue_capacity.unwrap_or(defaults.queue_capacity),
            max_concurrent_deliveries: self
                .max_concurrent_deliveries
                .unwrap_or(defaults.max_concurrent_deliveries),
            attempt_timeout: timeout,
        };
        if delivery.queue_capacity == 0 || delivery.max_concurrent_deliveries == 0 {
            return Err(TrackerError::Configuration(
                "queue capacity and concurrent deliveries must be at least 1".into(),
            ));
        }

        Ok(TrackerConfig {
            api_key,
            endpoint,
            provider_api_key,
            tracking_enabled,
            timeout,
            retry,
            health,
            delivery,
            latency_window: self.latency_window.unwrap_or(DEFAULT_LATENCY_WINDOW).max(1),
        })
    }
}

fn validate_key(name: &str, key: String) -> Result<SecretString> {
    let secret = SecretString::from(key);
    let exposed = secret.expose_secret();
    if exposed.trim().is_empty() {
        return Err(TrackerError::InvalidApiKey(format!("{name} is empty")));
    }
    if exposed.chars().any(char::is_whitespace) {
        return Err(TrackerError::InvalidApiKey(format!("{name} contains whitespace")));
    }
    Ok(secret)
}

fn validate_endpoint(endpoint: &str) -> Result<()> {
    let invalid = |reason: &str| TrackerError::InvalidEndpoint {
        url: endpoint.to_string(),
        reason: reason.to_string(),
    };
    let url = reqwest::Url::parse(endpoint).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid("scheme must be http or https"));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(invalid("missing host"));
    }
    Ok(())
}

fn parse_bool(name: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(TrackerError::Configuration(format!(
            "{name} must be true or false, got '{raw}'"
        ))),
    }
}

fn parse_timeout(raw: &str) -> Result<Duration> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs > 0.0)
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .ok_or_else(|| {
            TrackerError::Configuration(format!(
                "{ENV_TIMEOUT} must be a positive number of seconds, got '{raw}'"
            ))
        })
}

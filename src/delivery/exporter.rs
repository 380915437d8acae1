//! Collector exporters
//!
//! [`UsageExporter`] is the seam between the delivery client and the network.
//! [`HttpExporter`] posts events to the collector; tests plug in in-memory
//! implementations instead.
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use cmdrdata_anthropic::delivery::HttpExporter;
//!
//! # fn example() -> cmdrdata_anthropic::Result<()> {
//! let exporter = HttpExporter::new(
//!     "https://api.cmdrdata.ai/api/events",
//!     "tk-your-cmdrdata-key".to_string().into(),
//!     Duration::from_secs(5),
//! )?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use secrecy::{ExposeSecret, SecretString};

use crate::error::{DeliveryError, TrackerError};
use crate::sanitize::{sanitize_str, truncate_chars};
use crate::types::UsageEvent;

const USER_AGENT: &str = concat!("cmdrdata-anthropic/", env!("CARGO_PKG_VERSION"));

/// Longest collector error body kept in a [`DeliveryError`].
const MAX_ERROR_BODY_LEN: usize = 200;

/// Ships one usage event somewhere.
///
/// Implementations perform a single attempt; retries and health tracking are
/// handled by the delivery client.
#[async_trait]
pub trait UsageExporter: Send + Sync {
    /// Deliver an already sanitized event.
    async fn export(&self, event: &UsageEvent) -> Result<(), DeliveryError>;

    /// Short name used in logs.
    fn name(&self) -> &str {
        "custom"
    }
}

/// Posts events as JSON to the collector endpoint with bearer auth.
pub struct HttpExporter {
    client: Client,
    endpoint: String,
    api_key: SecretString,
}

impl std::fmt::Debug for HttpExporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpExporter")
            .field("endpoint", &self.endpoint)
            .field("api_key", &"[REDACTED]")
            .finish()
    }
}

impl HttpExporter {
    /// Create an exporter with a per-attempt `timeout`.
    pub fn new(
        endpoint: impl Into<String>,
        api_key: SecretString,
        timeout: Duration,
    ) -> Result<Self, TrackerError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| TrackerError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client, endpoint, api_key))
    }

    /// Use a preconfigured client (proxies, custom TLS). The client's own
    /// timeout applies.
    pub fn with_client(client: Client, endpoint: impl Into<String>, api_key: SecretString) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            api_key,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[async_trait]
impl UsageExporter for HttpExporter {
    async fn export(&self, event: &UsageEvent) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(event)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await.unwrap_or_default();
        Err(DeliveryError::Status {
            status: status.as_u16(),
            message: truncate_chars(&sanitize_str(&body), MAX_ERROR_BODY_LEN),
            retry_after,
        })
    }

    fn name(&self) -> &str {
        "http"
    }
}

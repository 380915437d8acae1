//! Minimal Messages API client
//!
//! Sends `POST {base_url}/v1/messages` and returns the typed response or an
//! [`ApiError`]. Request bodies are forwarded as given; nothing is validated
//! locally.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{Map, Value};

use crate::config::TrackerConfig;
use crate::error::{Result, TrackerError};
use crate::intercept::MessagesApi;
use crate::types::{ApiError, MessagesResponse};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

/// Messages API client
#[derive(Clone)]
pub struct AnthropicClient {
    http: Client,
    api_key: SecretString,
    base_url: String,
}

impl std::fmt::Debug for AnthropicClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl AnthropicClient {
    pub fn new(api_key: SecretString) -> Result<Self> {
        let http = Client::builder()
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .build()
            .map_err(|e| TrackerError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Use the provider key from a tracker configuration.
    pub fn from_config(config: &TrackerConfig) -> Result<Self> {
        let api_key = config.provider_api_key.clone().ok_or_else(|| {
            TrackerError::MissingApiKey(format!(
                "provider API key is required; pass it explicitly or set {}",
                crate::config::ENV_PROVIDER_API_KEY
            ))
        })?;
        Self::new(api_key)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl MessagesApi for AnthropicClient {
    type Response = MessagesResponse;
    type Error = ApiError;

    async fn create(&self, params: Map<String, Value>) -> std::result::Result<MessagesResponse, ApiError> {
        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&params)
            .send()
            .await
            .map_err(|e| ApiError {
                status: None,
                error_type: if e.is_timeout() { "timeout" } else { "connection_error" }.to_string(),
                message: e.to_string(),
                request_id: None,
            })?;

        let status = response.status().as_u16();
        let request_id = response
            .headers()
            .get("request-id")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body: Value = response.json().await.map_err(|e| ApiError {
            status: Some(status),
            error_type: "api_error".into(),
            message: format!("invalid response body: {e}"),
            request_id: request_id.clone(),
        })?;

        if !(200..300).contains(&status) {
            let mut error = ApiError::from_body(status, &body);
            if error.request_id.is_none() {
                error.request_id = request_id;
            }
            return Err(error);
        }

        serde_json::from_value(body).map_err(|e| ApiError {
            status: Some(status),
            error_type: "api_error".into(),
            message: format!("unexpected response shape: {e}"),
            request_id,
        })
    }
}

//! Tracked client proxy
//!
//! [`TrackedClient`] holds the real client and forwards to it. Billable
//! operations go through the tracker; everything else is reachable unchanged
//! through `Deref`.
//!
//! ```rust,no_run
//! use cmdrdata_anthropic::prelude::*;
//! use serde_json::json;
//!
//! # async fn example() -> cmdrdata_anthropic::Result<()> {
//! let config = TrackerConfig::from_env()?;
//! let anthropic = AnthropicClient::from_config(&config)?;
//! let client = TrackedClient::new(anthropic, UsageTracker::new(config)?);
//!
//! let params = json!({
//!     "model": "claude-sonnet-4-20250514",
//!     "max_tokens": 1024,
//!     "messages": [{"role": "user", "content": "Hello"}],
//!     "customer_id": "customer-123",
//!     "custom_metadata": {"feature": "chat"}
//! });
//! if let serde_json::Value::Object(params) = params {
//!     let response = client.messages().create(params).await;
//! }
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::ops::Deref;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::tracker::UsageTracker;
use crate::types::{CallError, TrackingOptions, UsageSource};

/// Operation name recorded for message creation.
pub const MESSAGES_CREATE: &str = "messages.create";

/// The Messages API surface of a client.
#[async_trait]
pub trait MessagesApi: Send + Sync {
    type Response: UsageSource + Send;
    type Error: CallError + Send;

    async fn create(&self, params: Map<String, Value>) -> Result<Self::Response, Self::Error>;
}

/// Synchronous Messages API surface.
pub trait BlockingMessagesApi {
    type Response: UsageSource;
    type Error: CallError;

    fn create(&self, params: Map<String, Value>) -> Result<Self::Response, Self::Error>;
}

/// A client whose billable calls are tracked.
#[derive(Debug, Clone)]
pub struct TrackedClient<C> {
    inner: C,
    tracker: UsageTracker,
}

impl<C> TrackedClient<C> {
    pub fn new(inner: C, tracker: UsageTracker) -> Self {
        Self { inner, tracker }
    }

    pub fn tracker(&self) -> &UsageTracker {
        &self.tracker
    }

    /// The wrapped client, bypassing tracking.
    pub fn inner(&self) -> &C {
        &self.inner
    }

    pub fn into_inner(self) -> C {
        self.inner
    }

    /// Tracked access to `messages.create`.
    pub fn messages(&self) -> TrackedMessages<'_, C> {
        TrackedMessages { client: self }
    }

    /// Track any other billable async operation of the wrapped client.
    pub async fn track<'a, R, E, F, Fut>(
        &'a self,
        operation: &str,
        params: Map<String, Value>,
        call: F,
    ) -> Result<R, E>
    where
        R: UsageSource,
        E: CallError,
        F: FnOnce(&'a C, Map<String, Value>) -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        let inner = &self.inner;
        self.tracker
            .intercept(operation, params, move |params| call(inner, params))
            .await
    }

    /// Track any other billable synchronous operation of the wrapped client.
    pub fn track_blocking<R, E, F>(
        &self,
        operation: &str,
        params: Map<String, Value>,
        call: F,
    ) -> Result<R, E>
    where
        R: UsageSource,
        E: CallError,
        F: FnOnce(&C, Map<String, Value>) -> Result<R, E>,
    {
        let inner = &self.inner;
        self.tracker
            .intercept_blocking(operation, params, move |params| call(inner, params))
    }
}

impl<C> Deref for TrackedClient<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.inner
    }
}

/// Tracked view of the Messages API.
#[derive(Debug)]
pub struct TrackedMessages<'a, C> {
    client: &'a TrackedClient<C>,
}

impl<C: MessagesApi> TrackedMessages<'_, C> {
    /// Create a message. Tracking arguments may be passed inside `params`.
    pub async fn create(&self, params: Map<String, Value>) -> Result<C::Response, C::Error> {
        self.create_with(params, TrackingOptions::default()).await
    }

    /// Create a message with tracking options passed separately.
    pub async fn create_with(
        &self,
        params: Map<String, Value>,
        options: TrackingOptions,
    ) -> Result<C::Response, C::Error> {
        let inner = &self.client.inner;
        self.client
            .tracker
            .intercept_with(MESSAGES_CREATE, params, options, |params| MessagesApi::create(inner, params))
            .await
    }
}

impl<C: BlockingMessagesApi> TrackedMessages<'_, C> {
    /// Create a message on the current thread. Tracking arguments may be passed inside `params`.
    pub fn create_blocking(&self, params: Map<String, Value>) -> Result<C::Response, C::Error> {
        self.create_blocking_with(params, TrackingOptions::default())
    }

    /// Create a message on the current thread with tracking options passed separately.
    pub fn create_blocking_with(
        &self,
        params: Map<String, Value>,
        options: TrackingOptions,
    ) -> Result<C::Response, C::Error> {
        let inner = &self.client.inner;
        self.client.tracker.intercept_blocking_with(
            MESSAGES_CREATE,
            params,
            options,
            |params| BlockingMessagesApi::create(inner, params),
        )
    }
}

//! # cmdrdata-anthropic - Customer-attributed usage tracking for Anthropic clients
//!
//! Wraps a Messages API client so that every billable call is attributed to a
//! customer and reported to the cmdrdata collector, without changing the call
//! site and without ever letting tracking affect the call.
//!
#![deny(unsafe_code)]

//! ## Features
//!
//! - **Invisible**: results and errors come back exactly as the wrapped client produced them.
//! - **Customer Context**: explicit `customer_id` per call, or an ambient id scoped to a thread or task.
//! - **Metadata Only**: token counts, model and response ids are captured; message content never is.
//! - **Fire and Forget**: events are queued and delivered in the background with retries and a circuit breaker.
//! - **Sanitized**: credentials are redacted from every payload and log line.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cmdrdata_anthropic::prelude::*;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // CMDRDATA_API_KEY and ANTHROPIC_API_KEY from the environment
//!     let config = TrackerConfig::from_env()?;
//!     let client = TrackedClient::new(
//!         AnthropicClient::from_config(&config)?,
//!         UsageTracker::new(config)?,
//!     );
//!
//!     let response = with_customer_async("customer-123", async {
//!         let params = json!({
//!             "model": "claude-sonnet-4-20250514",
//!             "max_tokens": 256,
//!             "messages": [{"role": "user", "content": "Hello!"}]
//!         });
//!         let serde_json::Value::Object(params) = params else { unreachable!() };
//!         client.messages().create(params).await
//!     })
//!     .await?;
//!     println!("{:?}", response.usage);
//!
//!     client.tracker().flush(std::time::Duration::from_secs(5)).await;
//!     Ok(())
//! }
//! ```

pub mod anthropic;
pub mod config;
pub mod context;
pub mod delivery;
pub mod error;
pub mod extract;
pub mod intercept;
pub mod logging;
pub mod monitor;
pub mod sanitize;
pub mod tracker;
pub mod types;

pub use error::{DeliveryError, Result, TrackerError};
pub use tracker::UsageTracker;

/// Common imports
pub mod prelude {
    pub use crate::anthropic::AnthropicClient;
    pub use crate::config::{TrackerConfig, TrackerConfigBuilder};
    pub use crate::context::{
        ContextSnapshot, CustomerScope, clear_customer_context, current_customer,
        set_customer_context, spawn_thread_with_context, spawn_with_context, with_customer,
        with_customer_async,
    };
    pub use crate::delivery::{HealthState, HealthStatus, RetryPolicy, UsageExporter};
    pub use crate::error::{DeliveryError, TrackerError};
    pub use crate::intercept::{BlockingMessagesApi, MessagesApi, TrackedClient};
    pub use crate::monitor::PerformanceStats;
    pub use crate::tracker::UsageTracker;
    pub use crate::types::{
        ApiError, CallError, MessagesResponse, TrackingOptions, UsageEvent, UsageSource,
    };
}

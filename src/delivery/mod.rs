//! Usage event delivery
//!
//! - [`client`]: non-blocking queue, dispatcher and retry loop
//! - [`exporter`]: the network seam and the HTTP collector exporter
//! - [`retry`]: backoff policy
//! - [`health`]: consecutive-failure circuit and counters

pub mod client;
pub mod exporter;
pub mod health;
pub mod retry;

pub use client::{DeliveryClient, DeliveryOutcome, DeliverySettings};
pub use exporter::{HttpExporter, UsageExporter};
pub use health::{Admission, HealthSettings, HealthState, HealthStatus, HealthTracker};
pub use retry::RetryPolicy;

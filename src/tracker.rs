//! Usage tracker facade
//!
//! A [`UsageTracker`] owns the delivery client and the monitor for one
//! wrapped client. It is cheap to clone; clones share state.

use std::sync::Arc;
use std::time::Duration;

use crate::config::TrackerConfig;
use crate::delivery::{DeliveryClient, HealthState, HealthTracker, HttpExporter, UsageExporter};
use crate::error::{Result, TrackerError};
use crate::monitor::{Monitor, PerformanceMonitor, PerformanceStats};
use crate::types::UsageEvent;

#[derive(Debug)]
struct TrackerInner {
    delivery: Option<DeliveryClient>,
    monitor: Monitor,
}

/// Captures usage events and ships them to the collector in the background.
#[derive(Debug, Clone)]
pub struct UsageTracker {
    inner: Arc<TrackerInner>,
}

impl UsageTracker {
    /// Build a tracker posting to the configured collector endpoint.
    pub fn new(config: TrackerConfig) -> Result<Self> {
        if !config.tracking_enabled {
            return Ok(Self::untracked(&config));
        }
        let api_key = config.api_key.clone().ok_or_else(|| {
            TrackerError::MissingApiKey("collector API key is required when tracking is enabled".into())
        })?;
        let exporter = HttpExporter::new(config.endpoint.clone(), api_key, config.timeout)?;
        Self::with_exporter(config, Arc::new(exporter))
    }

    /// Build from `CMDRDATA_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::new(TrackerConfig::from_env()?)
    }

    /// Build a tracker that ships events through a custom exporter.
    pub fn with_exporter(config: TrackerConfig, exporter: Arc<dyn UsageExporter>) -> Result<Self> {
        if !config.tracking_enabled {
            return Ok(Self::untracked(&config));
        }
        let health = Arc::new(HealthTracker::new(config.health.clone()));
        let delivery = DeliveryClient::start(
            exporter,
            config.retry.clone(),
            health.clone(),
            config.delivery.clone(),
        )?;
        tracing::debug!(
            target: "cmdrdata::delivery",
            endpoint = %config.endpoint,
            max_retries = config.max_retries(),
            "usage tracking enabled"
        );
        Ok(Self {
            inner: Arc::new(TrackerInner {
                delivery: Some(delivery),
                monitor: Monitor::new(Arc::new(PerformanceMonitor::new(config.latency_window)), health),
            }),
        })
    }

    /// A tracker that measures calls but never sends anything.
    pub fn disabled() -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                delivery: None,
                monitor: Monitor::new(
                    Arc::new(PerformanceMonitor::default()),
                    Arc::new(HealthTracker::default()),
                ),
            }),
        }
    }

    fn untracked(config: &TrackerConfig) -> Self {
        tracing::debug!(target: "cmdrdata::delivery", "usage tracking disabled by configuration");
        Self {
            inner: Arc::new(TrackerInner {
                delivery: None,
                monitor: Monitor::new(
                    Arc::new(PerformanceMonitor::new(config.latency_window)),
                    Arc::new(HealthTracker::new(config.health.clone())),
                ),
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.delivery.is_some()
    }

    /// Queue a usage event measured by the caller. Never blocks, never fails.
    pub fn track_event(&self, event: UsageEvent) {
        match &self.inner.delivery {
            Some(delivery) => delivery.deliver(event),
            None => {
                tracing::trace!(target: "cmdrdata::delivery", "tracking disabled, event discarded");
            }
        }
    }

    /// Record a finished call in the performance monitor.
    pub fn record_call(&self, duration: Duration, success: bool) {
        self.inner.monitor.record_call(duration, success);
    }

    pub fn monitor(&self) -> &Monitor {
        &self.inner.monitor
    }

    pub fn performance_stats(&self) -> PerformanceStats {
        self.inner.monitor.performance_stats()
    }

    pub fn health_status(&self) -> HealthState {
        self.inner.monitor.health_status()
    }

    pub fn delivery(&self) -> Option<&DeliveryClient> {
        self.inner.delivery.as_ref()
    }

    /// Wait for queued events to be delivered or dropped.
    pub async fn flush(&self, timeout: Duration) -> bool {
        match &self.inner.delivery {
            Some(delivery) => delivery.flush(timeout).await,
            None => true,
        }
    }

    /// Blocking [`flush`](Self::flush) for synchronous programs.
    pub fn flush_blocking(&self, timeout: Duration) -> bool {
        match &self.inner.delivery {
            Some(delivery) => delivery.flush_blocking(timeout),
            None => true,
        }
    }
}

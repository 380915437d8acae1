//! Fire-and-forget delivery client
//!
//! [`DeliveryClient::deliver`] only enqueues: it never blocks and never
//! fails. A dispatcher task drains the bounded queue and runs at most
//! `max_concurrent_deliveries` sends at a time, each with retries and
//! health bookkeeping. When the queue is full the event is dropped and
//! counted.
//!
//! The dispatcher runs on the ambient Tokio runtime when the client is built
//! inside one, and otherwise on a dedicated background thread, so plain
//! synchronous programs are supported too.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{Notify, Semaphore, mpsc};

use super::exporter::UsageExporter;
use super::health::{Admission, HealthTracker};
use super::retry::RetryPolicy;
use crate::error::{DeliveryError, TrackerError};
use crate::sanitize::sanitize_str;
use crate::types::UsageEvent;

/// Queue and concurrency limits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliverySettings {
    /// Events waiting for a worker; further events are dropped.
    pub queue_capacity: usize,
    /// Deliveries running at the same time.
    pub max_concurrent_deliveries: usize,
    /// Upper bound for one attempt, whatever the exporter does.
    pub attempt_timeout: Duration,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
            max_concurrent_deliveries: 4,
            attempt_timeout: Duration::from_secs(5),
        }
    }
}

/// What happened to one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { attempts: u32 },
    Failed { attempts: u32, error: DeliveryError },
    /// Not attempted because the collector is marked unhealthy.
    Skipped,
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

struct Shared {
    exporter: Arc<dyn UsageExporter>,
    policy: RetryPolicy,
    health: Arc<HealthTracker>,
    attempt_timeout: Duration,
    pending: AtomicUsize,
    idle: Notify,
}

impl Shared {
    async fn attempt(&self, event: &UsageEvent) -> Result<(), DeliveryError> {
        match tokio::time::timeout(self.attempt_timeout, self.exporter.export(event)).await {
            Ok(result) => result,
            Err(_) => Err(DeliveryError::Timeout),
        }
    }

    async fn deliver_with_retry(&self, event: &UsageEvent) -> DeliveryOutcome {
        let admission = self.health.admit();
        if admission == Admission::Rejected {
            self.health.record_dropped();
            tracing::debug!(
                target: "cmdrdata::delivery",
                event_id = %event.event_id(),
                "collector unhealthy, skipping delivery"
            );
            return DeliveryOutcome::Skipped;
        }

        let event = event.sanitized();
        let mut attempt = 0u32;
        loop {
            match self.attempt(&event).await {
                Ok(()) => {
                    self.health.record_success(admission);
                    tracing::debug!(
                        target: "cmdrdata::delivery",
                        event_id = %event.event_id(),
                        attempts = attempt + 1,
                        exporter = self.exporter.name(),
                        "usage event delivered"
                    );
                    return DeliveryOutcome::Delivered {
                        attempts: attempt + 1,
                    };
                }
                Err(error) => {
                    let probing = admission == Admission::Probe;
                    if !probing && self.policy.should_retry(&error, attempt) {
                        let delay = self.policy.delay_for(&error, attempt);
                        tracing::debug!(
                            target: "cmdrdata::delivery",
                            event_id = %event.event_id(),
                            attempt = attempt + 1,
                            category = error.category(),
                            delay_ms = delay.as_millis() as u64,
                            "delivery attempt failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }
                    tracing::warn!(
                        target: "cmdrdata::delivery",
                        event_id = %event.event_id(),
                        attempts = attempt + 1,
                        category = error.category(),
                        error = %sanitize_str(&error.to_string()),
                        "usage event dropped"
                    );
                    self.health.record_failure(&error, admission);
                    return DeliveryOutcome::Failed {
                        attempts: attempt + 1,
                        error,
                    };
                }
            }
        }
    }

    fn finish_one(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

async fn run_dispatcher(
    mut receiver: mpsc::Receiver<UsageEvent>,
    shared: Arc<Shared>,
    permits: Arc<Semaphore>,
) {
    while let Some(event) = receiver.recv().await {
        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };
        let shared = shared.clone();
        tokio::spawn(async move {
            let _permit = permit;
            shared.deliver_with_retry(&event).await;
            shared.finish_one();
        });
    }
    tracing::debug!(target: "cmdrdata::delivery", "delivery dispatcher stopped");
}

/// Non-blocking usage event delivery with retries and circuit breaking.
#[derive(Clone)]
pub struct DeliveryClient {
    sender: mpsc::Sender<UsageEvent>,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for DeliveryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryClient")
            .field("exporter", &self.shared.exporter.name())
            .field("policy", &self.shared.policy)
            .field("pending", &self.pending())
            .finish()
    }
}

impl DeliveryClient {
    /// Start a client and its dispatcher.
    pub fn start(
        exporter: Arc<dyn UsageExporter>,
        policy: RetryPolicy,
        health: Arc<HealthTracker>,
        settings: DeliverySettings,
    ) -> Result<Self, TrackerError> {
        let (sender, receiver) = mpsc::channel(settings.queue_capacity.max(1));
        let shared = Arc::new(Shared {
            exporter,
            policy,
            health,
            attempt_timeout: settings.attempt_timeout,
            pending: AtomicUsize::new(0),
            idle: Notify::new(),
        });
        let permits = Arc::new(Semaphore::new(settings.max_concurrent_deliveries.max(1)));
        let dispatcher = run_dispatcher(receiver, shared.clone(), permits);

        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(dispatcher);
            }
            Err(_) => {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .map_err(|e| TrackerError::Runtime(format!("failed to build delivery runtime: {e}")))?;
                std::thread::Builder::new()
                    .name("cmdrdata-delivery".into())
                    .spawn(move || runtime.block_on(dispatcher))
                    .map_err(|e| TrackerError::Runtime(format!("failed to spawn delivery thread: {e}")))?;
            }
        }

        Ok(Self { sender, shared })
    }

    /// Queue `event` for delivery and return immediately.
    pub fn deliver(&self, event: UsageEvent) {
        self.shared.pending.fetch_add(1, Ordering::AcqRel);
        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                self.shared.finish_one();
                self.shared.health.record_dropped();
                tracing::warn!(
                    target: "cmdrdata::delivery",
                    event_id = %event.event_id(),
                    "delivery queue full, usage event dropped"
                );
            }
            Err(TrySendError::Closed(event)) => {
                self.shared.finish_one();
                self.shared.health.record_dropped();
                tracing::warn!(
                    target: "cmdrdata::delivery",
                    event_id = %event.event_id(),
                    "delivery dispatcher stopped, usage event dropped"
                );
            }
        }
    }

    /// Deliver `event` on the current task and report the outcome.
    ///
    /// Same retry and health rules as [`deliver`](Self::deliver), but the
    /// caller waits.
    pub async fn deliver_now(&self, event: &UsageEvent) -> DeliveryOutcome {
        self.shared.deliver_with_retry(event).await
    }

    /// Events queued or being delivered.
    pub fn pending(&self) -> usize {
        self.shared.pending.load(Ordering::Acquire)
    }

    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.shared.health
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.shared.policy
    }

    /// Wait until every queued event has been delivered or dropped.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub async fn flush(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let idle = self.shared.idle.notified();
            if self.pending() == 0 {
                return true;
            }
            if tokio::time::timeout_at(deadline, idle).await.is_err() {
                return self.pending() == 0;
            }
        }
    }

    /// Blocking variant of [`flush`](Self::flush) for synchronous code.
    ///
    /// Must not be called from inside an async task.
    pub fn flush_blocking(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        while self.pending() > 0 {
            if std::time::Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::health::{HealthSettings, HealthStatus};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicU32;

    /// Fails the first `failures` attempts with `error`, then succeeds.
    struct ScriptedExporter {
        failures: u32,
        error: DeliveryError,
        calls: AtomicU32,
        delivered: Mutex<Vec<UsageEvent>>,
    }

    impl ScriptedExporter {
        fn new(failures: u32, error: DeliveryError) -> Arc<Self> {
            Arc::new(Self {
                failures,
                error,
                calls: AtomicU32::new(0),
                delivered: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl UsageExporter for ScriptedExporter {
        async fn export(&self, event: &UsageEvent) -> Result<(), DeliveryError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(self.error.clone());
            }
            self.delivered
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .push(event.clone());
            Ok(())
        }
    }

    struct HangingExporter;

    #[async_trait]
    impl UsageExporter for HangingExporter {
        async fn export(&self, _event: &UsageEvent) -> Result<(), DeliveryError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    fn event() -> UsageEvent {
        UsageEvent::builder("cust-1", "model-x")
            .input_tokens(1)
            .output_tokens(2)
            .metadata("api_key", "should-not-leave")
            .build()
            .expect("event")
    }

    fn client(exporter: Arc<dyn UsageExporter>, attempts: u32, health: HealthSettings) -> DeliveryClient {
        DeliveryClient::start(
            exporter,
            RetryPolicy::immediate(attempts),
            Arc::new(HealthTracker::new(health)),
            DeliverySettings::default(),
        )
        .expect("client starts")
    }

    #[tokio::test]
    async fn retries_transient_failures_then_succeeds() {
        let exporter = ScriptedExporter::new(2, DeliveryError::Timeout);
        let client = client(exporter.clone(), 3, HealthSettings::default());
        let outcome = client.deliver_now(&event()).await;
        assert_eq!(outcome, DeliveryOutcome::Delivered { attempts: 3 });
        assert_eq!(exporter.calls(), 3);
        assert_eq!(client.health().status(), HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn stops_after_max_attempts() {
        let exporter = ScriptedExporter::new(u32::MAX, DeliveryError::status(503, "down"));
        let client = client(exporter.clone(), 3, HealthSettings::default());
        let outcome = client.deliver_now(&event()).await;
        assert!(matches!(outcome, DeliveryOutcome::Failed { attempts: 3, .. }));
        assert_eq!(exporter.calls(), 3);
        assert_eq!(client.health().snapshot().consecutive_failures, 1);
    }

    #[tokio::test]
    async fn permanent_failures_are_not_retried() {
        let exporter = ScriptedExporter::new(u32::MAX, DeliveryError::status(422, "bad event"));
        let client = client(exporter.clone(), 3, HealthSettings::default());
        let outcome = client.deliver_now(&event()).await;
        assert!(matches!(outcome, DeliveryOutcome::Failed { attempts: 1, .. }));
        assert_eq!(exporter.calls(), 1);
    }

    #[tokio::test]
    async fn open_circuit_skips_and_counts_drops() {
        let exporter = ScriptedExporter::new(u32::MAX, DeliveryError::Timeout);
        let settings = HealthSettings {
            degraded_threshold: 1,
            unhealthy_threshold: 2,
            cooldown: Duration::from_secs(600),
        };
        let client = client(exporter.clone(), 1, settings);
        client.deliver_now(&event()).await;
        client.deliver_now(&event()).await;
        assert_eq!(client.deliver_now(&event()).await, DeliveryOutcome::Skipped);
        let state = client.health().snapshot();
        assert!(!state.healthy);
        assert_eq!(state.dropped, 1);
        assert_eq!(exporter.calls(), 2);
    }

    #[tokio::test]
    async fn sanitizes_before_export() {
        let exporter = ScriptedExporter::new(0, DeliveryError::Timeout);
        let client = client(exporter.clone(), 1, HealthSettings::default());
        client.deliver(event());
        assert!(client.flush(Duration::from_secs(5)).await);
        let delivered = exporter
            .delivered
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].metadata()["api_key"], "[REDACTED]");
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_timeout_bounds_slow_exporters() {
        let client = DeliveryClient::start(
            Arc::new(HangingExporter),
            RetryPolicy::immediate(2),
            Arc::new(HealthTracker::default()),
            DeliverySettings {
                attempt_timeout: Duration::from_millis(50),
                ..Default::default()
            },
        )
        .expect("client starts");
        let outcome = client.deliver_now(&event()).await;
        assert_eq!(
            outcome,
            DeliveryOutcome::Failed {
                attempts: 2,
                error: DeliveryError::Timeout
            }
        );
    }

    #[tokio::test]
    async fn full_queue_drops_events() {
        let client = DeliveryClient::start(
            Arc::new(HangingExporter),
            RetryPolicy::immediate(1),
            Arc::new(HealthTracker::default()),
            DeliverySettings {
                queue_capacity: 1,
                max_concurrent_deliveries: 1,
                attempt_timeout: Duration::from_secs(3600),
            },
        )
        .expect("client starts");
        for _ in 0..10 {
            client.deliver(event());
        }
        assert!(client.health().snapshot().dropped >= 7);
        assert!(!client.flush(Duration::from_millis(20)).await);
    }

    #[test]
    fn works_without_an_ambient_runtime() {
        let exporter = ScriptedExporter::new(0, DeliveryError::Timeout);
        let client = client(exporter.clone(), 1, HealthSettings::default());
        client.deliver(event());
        assert!(client.flush_blocking(Duration::from_secs(5)));
        assert_eq!(exporter.calls(), 1);
    }
}

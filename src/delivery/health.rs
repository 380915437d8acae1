//! Collector health tracking
//!
//! A small circuit breaker over consecutive delivery failures:
//!
//!   Healthy --[degraded_threshold failures]--> Degraded
//!   Degraded --[unhealthy_threshold failures]--> Unhealthy (skip deliveries)
//!   Unhealthy --[cooldown expires]--> one probe delivery allowed
//!   Unhealthy --[probe fails]--> Unhealthy, cooldown restarts
//!   any state --[one success]--> Healthy

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DeliveryError;
use crate::sanitize::sanitize_str;

/// Reachability of the collector as seen by this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    #[default]
    Healthy,
    Degraded,
    /// Deliveries are skipped until the cooldown allows a probe.
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Thresholds for [`HealthTracker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthSettings {
    /// Consecutive failures before reporting Degraded.
    pub degraded_threshold: u32,
    /// Consecutive failures before reporting Unhealthy.
    pub unhealthy_threshold: u32,
    /// How long to skip deliveries once Unhealthy before allowing a probe.
    pub cooldown: Duration,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            degraded_threshold: 1,
            unhealthy_threshold: 3,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Decision for one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allowed,
    /// The circuit is open but the cooldown elapsed: this delivery is the probe.
    Probe,
    /// The circuit is open; skip the delivery.
    Rejected,
}

/// Point-in-time copy of the health state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthState {
    pub status: HealthStatus,
    pub healthy: bool,
    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub delivered: u64,
    pub failed: u64,
    pub dropped: u64,
}

impl HealthState {
    /// Share of finished deliveries that failed, in `[0, 1]`.
    pub fn failure_rate(&self) -> f64 {
        let finished = self.delivered + self.failed;
        if finished == 0 {
            0.0
        } else {
            self.failed as f64 / finished as f64
        }
    }
}

#[derive(Debug, Default)]
struct Circuit {
    status: HealthStatus,
    consecutive_failures: u32,
    last_success: Option<DateTime<Utc>>,
    last_error: Option<String>,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Shared health state, updated by the delivery workers.
#[derive(Debug)]
pub struct HealthTracker {
    settings: HealthSettings,
    circuit: Mutex<Circuit>,
    delivered: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new(HealthSettings::default())
    }
}

impl HealthTracker {
    pub fn new(settings: HealthSettings) -> Self {
        Self {
            settings,
            circuit: Mutex::new(Circuit::default()),
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> &HealthSettings {
        &self.settings
    }

    fn circuit(&self) -> MutexGuard<'_, Circuit> {
        self.circuit.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decide whether the next delivery may go out.
    pub fn admit(&self) -> Admission {
        let mut circuit = self.circuit();
        if circuit.status != HealthStatus::Unhealthy {
            return Admission::Allowed;
        }
        if circuit.probe_in_flight {
            return Admission::Rejected;
        }
        let cooled_down = circuit
            .opened_at
            .is_none_or(|at| at.elapsed() >= self.settings.cooldown);
        if cooled_down {
            circuit.probe_in_flight = true;
            Admission::Probe
        } else {
            Admission::Rejected
        }
    }

    /// A delivery succeeded: back to Healthy immediately.
    ///
    /// `admission` is what [`admit`](Self::admit) returned for this delivery.
    pub fn record_success(&self, admission: Admission) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        let mut circuit = self.circuit();
        if circuit.status != HealthStatus::Healthy {
            tracing::info!(target: "cmdrdata::delivery", previous = %circuit.status, "collector healthy again");
        }
        circuit.status = HealthStatus::Healthy;
        circuit.consecutive_failures = 0;
        circuit.last_success = Some(Utc::now());
        circuit.opened_at = None;
        if admission == Admission::Probe {
            circuit.probe_in_flight = false;
        }
    }

    /// A delivery failed after exhausting its attempts.
    ///
    /// Only the outcome of the admitted probe releases the probe slot and
    /// restarts the cooldown; a late failure from a delivery admitted before
    /// the circuit opened leaves both alone.
    pub fn record_failure(&self, error: &DeliveryError, admission: Admission) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        let mut circuit = self.circuit();
        circuit.consecutive_failures = circuit.consecutive_failures.saturating_add(1);
        circuit.last_error = Some(sanitize_str(&error.to_string()));
        let probed = admission == Admission::Probe;
        if probed {
            circuit.probe_in_flight = false;
        }

        let failures = circuit.consecutive_failures;
        let next = if failures >= self.settings.unhealthy_threshold {
            HealthStatus::Unhealthy
        } else if failures >= self.settings.degraded_threshold {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        if next == HealthStatus::Unhealthy && (probed || circuit.status != HealthStatus::Unhealthy) {
            circuit.opened_at = Some(Instant::now());
        }
        if next != circuit.status {
            tracing::warn!(
                target: "cmdrdata::delivery",
                from = %circuit.status,
                to = %next,
                consecutive_failures = failures,
                "collector health changed"
            );
        }
        circuit.status = next;
    }

    /// An event was discarded without a delivery attempt.
    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn status(&self) -> HealthStatus {
        self.circuit().status
    }

    pub fn snapshot(&self) -> HealthState {
        let circuit = self.circuit();
        HealthState {
            status: circuit.status,
            healthy: circuit.status != HealthStatus::Unhealthy,
            consecutive_failures: circuit.consecutive_failures,
            last_success: circuit.last_success,
            last_error: circuit.last_error.clone(),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

//! Performance and health introspection
//!
//! Counters for intercepted calls plus a bounded window of recent latencies
//! for percentile estimates. Writers hold the window lock only to push one
//! sample; readers copy the window and compute outside the lock.
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//! use cmdrdata_anthropic::monitor::PerformanceMonitor;
//!
//! let monitor = PerformanceMonitor::new(100);
//! monitor.record_call(Duration::from_millis(120), true);
//! monitor.record_call(Duration::from_millis(80), false);
//!
//! let stats = monitor.stats();
//! assert_eq!(stats.count, 2);
//! assert_eq!(stats.failures, 1);
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::delivery::{HealthState, HealthTracker};

/// Latency summary of intercepted calls. Durations are in milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub count: u64,
    pub successes: u64,
    pub failures: u64,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

/// Call counters and recent latencies.
#[derive(Debug)]
pub struct PerformanceMonitor {
    count: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    total_micros: AtomicU64,
    window: Mutex<VecDeque<Duration>>,
    window_size: usize,
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new(1000)
    }
}

impl PerformanceMonitor {
    /// Keep at most `window_size` recent latencies for percentiles.
    pub fn new(window_size: usize) -> Self {
        let window_size = window_size.max(1);
        Self {
            count: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            total_micros: AtomicU64::new(0),
            window: Mutex::new(VecDeque::with_capacity(window_size.min(1024))),
            window_size,
        }
    }

    /// Record one finished call.
    pub fn record_call(&self, duration: Duration, success: bool) {
        self.count.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successes.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        self.total_micros.fetch_add(micros, Ordering::Relaxed);

        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        if window.len() == self.window_size {
            window.pop_front();
        }
        window.push_back(duration);
    }

    pub fn stats(&self) -> PerformanceStats {
        let mut samples: Vec<Duration> = self
            .window
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .copied()
            .collect();
        let count = self.count.load(Ordering::Relaxed);
        if count == 0 {
            return PerformanceStats::default();
        }
        samples.sort_unstable();

        let total_ms = self.total_micros.load(Ordering::Relaxed) as f64 / 1000.0;
        PerformanceStats {
            count,
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            avg_ms: total_ms / count as f64,
            min_ms: samples.first().map(as_ms).unwrap_or_default(),
            max_ms: samples.last().map(as_ms).unwrap_or_default(),
            p50_ms: percentile(&samples, 0.50),
            p95_ms: percentile(&samples, 0.95),
            p99_ms: percentile(&samples, 0.99),
        }
    }

    pub fn reset(&self) {
        let mut window = self.window.lock().unwrap_or_else(PoisonError::into_inner);
        window.clear();
        self.count.store(0, Ordering::Relaxed);
        self.successes.store(0, Ordering::Relaxed);
        self.failures.store(0, Ordering::Relaxed);
        self.total_micros.store(0, Ordering::Relaxed);
    }
}

fn as_ms(d: &Duration) -> f64 {
    d.as_micros() as f64 / 1000.0
}

/// Nearest-rank percentile over sorted samples.
fn percentile(sorted: &[Duration], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (q * sorted.len() as f64).ceil() as usize;
    let index = rank.clamp(1, sorted.len()) - 1;
    as_ms(&sorted[index])
}

/// Call performance plus collector health, created with the tracker.
#[derive(Debug, Clone)]
pub struct Monitor {
    performance: Arc<PerformanceMonitor>,
    health: Arc<HealthTracker>,
}

impl Monitor {
    pub fn new(performance: Arc<PerformanceMonitor>, health: Arc<HealthTracker>) -> Self {
        Self {
            performance,
            health,
        }
    }

    pub fn record_call(&self, duration: Duration, success: bool) {
        self.performance.record_call(duration, success);
    }

    pub fn performance_stats(&self) -> PerformanceStats {
        self.performance.stats()
    }

    pub fn health_status(&self) -> HealthState {
        self.health.snapshot()
    }

    pub fn health(&self) -> &Arc<HealthTracker> {
        &self.health
    }
}

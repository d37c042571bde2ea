//! Metrics collection for executor monitoring.

use hdrhistogram::Histogram;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Longest execution time tracked by the histogram: one hour.
const MAX_TRACKED_NS: u64 = 3_600_000_000_000;

/// Executor metrics collector
#[derive(Debug)]
pub struct Metrics {
    // Task counters
    tasks_submitted: AtomicU64,
    tasks_executed: AtomicU64,
    tasks_canceled: AtomicU64,
    tasks_panicked: AtomicU64,

    // Pool growth
    threads_spawned: AtomicU64,
    spawn_failures: AtomicU64,

    busy_time_ns: AtomicU64,

    // None only if the histogram could not be allocated.
    latency_histogram: RwLock<Option<Histogram<u64>>>,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            tasks_submitted: AtomicU64::new(0),
            tasks_executed: AtomicU64::new(0),
            tasks_canceled: AtomicU64::new(0),
            tasks_panicked: AtomicU64::new(0),
            threads_spawned: AtomicU64::new(0),
            spawn_failures: AtomicU64::new(0),
            busy_time_ns: AtomicU64::new(0),
            latency_histogram: RwLock::new(Histogram::new_with_bounds(1, MAX_TRACKED_NS, 3).ok()),
            start_time: Instant::now(),
        }
    }

    pub fn record_task_submitted(&self) {
        self.tasks_submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed callback with its run time
    pub fn record_task_execution(&self, duration_ns: u64) {
        self.tasks_executed.fetch_add(1, Ordering::Relaxed);
        self.busy_time_ns.fetch_add(duration_ns, Ordering::Relaxed);

        // Skip the sample rather than stall a worker on a contended lock.
        if let Some(mut hist) = self.latency_histogram.try_write() {
            if let Some(hist) = hist.as_mut() {
                let _ = hist.record(duration_ns.clamp(1, MAX_TRACKED_NS));
            }
        }
    }

    pub fn record_task_canceled(&self) {
        self.tasks_canceled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_task_panic(&self) {
        self.tasks_panicked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_thread_spawned(&self) {
        self.threads_spawned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_spawn_failure(&self) {
        self.spawn_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let histogram = self.latency_histogram.read();
        let (avg, p50, p99, max) = match histogram.as_ref() {
            Some(h) if h.len() > 0 => (
                h.mean() as u64,
                h.value_at_quantile(0.50),
                h.value_at_quantile(0.99),
                h.max(),
            ),
            _ => (0, 0, 0, 0),
        };

        MetricsSnapshot {
            uptime: self.start_time.elapsed(),
            tasks_submitted: self.tasks_submitted.load(Ordering::Relaxed),
            tasks_executed: self.tasks_executed.load(Ordering::Relaxed),
            tasks_canceled: self.tasks_canceled.load(Ordering::Relaxed),
            tasks_panicked: self.tasks_panicked.load(Ordering::Relaxed),
            threads_spawned: self.threads_spawned.load(Ordering::Relaxed),
            spawn_failures: self.spawn_failures.load(Ordering::Relaxed),
            busy_time_ns: self.busy_time_ns.load(Ordering::Relaxed),
            avg_latency_ns: avg,
            p50_latency_ns: p50,
            p99_latency_ns: p99,
            max_latency_ns: max,
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub uptime: Duration,
    pub tasks_submitted: u64,
    pub tasks_executed: u64,
    pub tasks_canceled: u64,
    pub tasks_panicked: u64,
    pub threads_spawned: u64,
    pub spawn_failures: u64,
    pub busy_time_ns: u64,
    pub avg_latency_ns: u64,
    pub p50_latency_ns: u64,
    pub p99_latency_ns: u64,
    pub max_latency_ns: u64,
}

impl MetricsSnapshot {
    /// Tasks that reached a final state, by completion, panic or cancellation.
    pub fn tasks_settled(&self) -> u64 {
        self.tasks_executed + self.tasks_panicked + self.tasks_canceled
    }
}

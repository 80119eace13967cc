//! Lock-free client metrics collection and periodic reporting
//!
//! Uses atomics so fetch tasks can record without contention.
//! `report()` swaps the interval counters to zero and returns a snapshot.
//!
//! NOTE: All atomics use Relaxed ordering. They are statistical counters
//! only; never read them for coordination or logic decisions.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Fetch latency bucket boundaries (milliseconds)
/// Buckets: ≤10, ≤25, ≤50, ≤100, ≤250, ≤500, ≤1000, >1000
const LATENCY_BOUNDS_MS: [u64; 7] = [10, 25, 50, 100, 250, 500, 1000];
const NUM_BUCKETS: usize = 8;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_ms: u64) -> usize {
    LATENCY_BOUNDS_MS.partition_point(|&bound| bound < latency_ms)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Swap all buckets to zero and return their values
#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    let mut result = [0u64; NUM_BUCKETS];
    for (i, bucket) in buckets.iter().enumerate() {
        result[i] = bucket.swap(0, Ordering::Relaxed);
    }
    result
}

/// Which polled resource a fetch was for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    Vehicles,
    Metrics,
}

/// Lock-free metrics collector
pub struct Metrics {
    /// Interval timer ticks across all polling loops (monotonic)
    poll_ticks_total: AtomicU64,
    /// Successful vehicle list fetches (monotonic)
    vehicle_fetch_ok: AtomicU64,
    /// Failed vehicle list fetches (monotonic)
    vehicle_fetch_err: AtomicU64,
    /// Successful metrics snapshot fetches (monotonic)
    metrics_fetch_ok: AtomicU64,
    /// Failed metrics snapshot fetches (monotonic)
    metrics_fetch_err: AtomicU64,
    /// Responses dropped as stale or out of order (monotonic)
    stale_dropped_total: AtomicU64,
    /// Commands sent to the gateway (monotonic)
    commands_sent: AtomicU64,
    /// Commands rejected or unreachable (monotonic)
    commands_failed: AtomicU64,
    /// Fetches since last report (reset on report)
    fetches_since_report: AtomicU64,
    /// Sum of fetch latencies in ms (reset on report)
    latency_sum_ms: AtomicU64,
    /// Max fetch latency in ms (reset on report)
    latency_max_ms: AtomicU64,
    /// Fetch latency histogram (reset on report)
    latency_buckets: [AtomicU64; NUM_BUCKETS],
    last_report_time: Mutex<Instant>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            poll_ticks_total: AtomicU64::new(0),
            vehicle_fetch_ok: AtomicU64::new(0),
            vehicle_fetch_err: AtomicU64::new(0),
            metrics_fetch_ok: AtomicU64::new(0),
            metrics_fetch_err: AtomicU64::new(0),
            stale_dropped_total: AtomicU64::new(0),
            commands_sent: AtomicU64::new(0),
            commands_failed: AtomicU64::new(0),
            fetches_since_report: AtomicU64::new(0),
            latency_sum_ms: AtomicU64::new(0),
            latency_max_ms: AtomicU64::new(0),
            latency_buckets: Default::default(),
            last_report_time: Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_poll_tick(&self) {
        self.poll_ticks_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one completed fetch with its outcome and latency
    #[inline]
    pub fn record_fetch(&self, kind: FetchKind, ok: bool, latency_ms: u64) {
        let counter = match (kind, ok) {
            (FetchKind::Vehicles, true) => &self.vehicle_fetch_ok,
            (FetchKind::Vehicles, false) => &self.vehicle_fetch_err,
            (FetchKind::Metrics, true) => &self.metrics_fetch_ok,
            (FetchKind::Metrics, false) => &self.metrics_fetch_err,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        self.fetches_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        update_atomic_max(&self.latency_max_ms, latency_ms);
        self.latency_buckets[bucket_index(latency_ms)].fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_stale_dropped(&self) {
        self.stale_dropped_total.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_command(&self, ok: bool) {
        self.commands_sent.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.commands_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn poll_ticks_total(&self) -> u64 {
        self.poll_ticks_total.load(Ordering::Relaxed)
    }

    pub fn stale_dropped_total(&self) -> u64 {
        self.stale_dropped_total.load(Ordering::Relaxed)
    }

    pub fn fetch_failures(&self, kind: FetchKind) -> u64 {
        match kind {
            FetchKind::Vehicles => self.vehicle_fetch_err.load(Ordering::Relaxed),
            FetchKind::Metrics => self.metrics_fetch_err.load(Ordering::Relaxed),
        }
    }

    /// Snapshot counters, resetting the per-interval ones
    pub fn report(&self) -> MetricsSummary {
        let fetch_count = self.fetches_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.latency_sum_ms.swap(0, Ordering::Relaxed);
        let max_latency = self.latency_max_ms.swap(0, Ordering::Relaxed);
        let latency_buckets = swap_buckets(&self.latency_buckets);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };
        let secs = elapsed.as_secs_f64();

        MetricsSummary {
            poll_ticks_total: self.poll_ticks_total.load(Ordering::Relaxed),
            vehicle_fetch_ok: self.vehicle_fetch_ok.load(Ordering::Relaxed),
            vehicle_fetch_err: self.vehicle_fetch_err.load(Ordering::Relaxed),
            metrics_fetch_ok: self.metrics_fetch_ok.load(Ordering::Relaxed),
            metrics_fetch_err: self.metrics_fetch_err.load(Ordering::Relaxed),
            stale_dropped_total: self.stale_dropped_total.load(Ordering::Relaxed),
            commands_sent: self.commands_sent.load(Ordering::Relaxed),
            commands_failed: self.commands_failed.load(Ordering::Relaxed),
            fetches_per_sec: if secs > 0.0 { fetch_count as f64 / secs } else { 0.0 },
            avg_fetch_latency_ms: if fetch_count > 0 { latency_sum / fetch_count } else { 0 },
            max_fetch_latency_ms: max_latency,
            latency_buckets,
        }
    }
}

/// Point-in-time view of the collector
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub poll_ticks_total: u64,
    pub vehicle_fetch_ok: u64,
    pub vehicle_fetch_err: u64,
    pub metrics_fetch_ok: u64,
    pub metrics_fetch_err: u64,
    pub stale_dropped_total: u64,
    pub commands_sent: u64,
    pub commands_failed: u64,
    pub fetches_per_sec: f64,
    pub avg_fetch_latency_ms: u64,
    pub max_fetch_latency_ms: u64,
    /// Bounds: ≤10, ≤25, ≤50, ≤100, ≤250, ≤500, ≤1000, >1000 ms
    pub latency_buckets: [u64; NUM_BUCKETS],
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            poll_ticks = %self.poll_ticks_total,
            vehicles_ok = %self.vehicle_fetch_ok,
            vehicles_err = %self.vehicle_fetch_err,
            metrics_ok = %self.metrics_fetch_ok,
            metrics_err = %self.metrics_fetch_err,
            stale_dropped = %self.stale_dropped_total,
            commands = %self.commands_sent,
            commands_failed = %self.commands_failed,
            fetches_per_sec = format!("{:.1}", self.fetches_per_sec),
            avg_latency_ms = %self.avg_fetch_latency_ms,
            max_latency_ms = %self.max_fetch_latency_ms,
            "client_metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.poll_ticks_total(), 0);
        assert_eq!(metrics.stale_dropped_total(), 0);
        assert_eq!(metrics.fetch_failures(FetchKind::Vehicles), 0);
    }

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(0), 0);
        assert_eq!(bucket_index(10), 0);
        assert_eq!(bucket_index(11), 1);
        assert_eq!(bucket_index(500), 5);
        assert_eq!(bucket_index(5000), 7);
    }

    #[test]
    fn test_report_resets_interval_counters() {
        let metrics = Metrics::new();
        metrics.record_fetch(FetchKind::Vehicles, true, 20);
        metrics.record_fetch(FetchKind::Metrics, false, 40);
        metrics.record_command(false);

        let summary = metrics.report();
        assert_eq!(summary.vehicle_fetch_ok, 1);
        assert_eq!(summary.metrics_fetch_err, 1);
        assert_eq!(summary.avg_fetch_latency_ms, 30);
        assert_eq!(summary.max_fetch_latency_ms, 40);
        assert_eq!(summary.commands_failed, 1);
        assert_eq!(summary.latency_buckets[1], 1);
        assert_eq!(summary.latency_buckets[2], 1);

        let second = metrics.report();
        assert_eq!(second.avg_fetch_latency_ms, 0);
        assert_eq!(second.max_fetch_latency_ms, 0);
        // Monotonic counters survive the swap
        assert_eq!(second.vehicle_fetch_ok, 1);
        assert_eq!(second.commands_sent, 1);
    }
}

//! Lock-free pipeline metrics and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! Counter updates are lock-free; `report()` swaps the periodic counters.
//!
//! NOTE: All atomics use Relaxed ordering. These are statistical counters
//! only and must not be used for coordination or logic decisions.

use crate::domain::AnomalyKind;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Prometheus-style exponential bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;

/// Compute bucket index for a latency value using binary search
#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
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
    std::array::from_fn(|i| buckets[i].swap(0, Ordering::Relaxed))
}

/// Compute percentile from histogram buckets
/// Returns the upper bound of the bucket containing the percentile
fn percentile_from_buckets(buckets: &[u64; NUM_BUCKETS], percentile: f64) -> u64 {
    let total: u64 = buckets.iter().sum();
    if total == 0 {
        return 0;
    }

    let target = (total as f64 * percentile) as u64;
    let mut cumulative = 0u64;

    // Last bucket uses 2x the previous bound
    const BUCKET_UPPER_BOUNDS: [u64; NUM_BUCKETS] =
        [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200, 102400];

    for (i, &count) in buckets.iter().enumerate() {
        cumulative += count;
        if cumulative >= target {
            return BUCKET_UPPER_BOUNDS[i];
        }
    }
    BUCKET_UPPER_BOUNDS[NUM_BUCKETS - 1]
}

/// Lock-free metrics collector for the detection → analytics pipeline
pub struct Metrics {
    /// Update cycles processed (monotonic)
    cycles_total: AtomicU64,
    /// Cycles since last report (reset on report)
    cycles_since_report: AtomicU64,
    /// Sum of cycle latencies in microseconds (reset on report)
    latency_sum_us: AtomicU64,
    /// Max cycle latency in microseconds (reset on report)
    latency_max_us: AtomicU64,
    /// Cycle latency histogram buckets (reset on report)
    latency_buckets: [AtomicU64; NUM_BUCKETS],
    /// Detections received across all batches (monotonic)
    detections_total: AtomicU64,
    /// Detections skipped as malformed or duplicate (monotonic)
    detections_rejected: AtomicU64,
    /// Zone changes observed (monotonic)
    zone_transitions: AtomicU64,
    /// Residency intervals closed and aggregated (monotonic)
    intervals_closed: AtomicU64,
    /// Open intervals discarded on eviction (monotonic)
    orphaned_intervals: AtomicU64,
    /// Entities evicted for being absent from a batch (monotonic)
    evictions_total: AtomicU64,
    idle_anomalies: AtomicU64,
    unauthorized_anomalies: AtomicU64,
    /// Batches accepted by ingest (monotonic)
    batches_received: AtomicU64,
    /// Batches dropped because the engine queue was full (monotonic)
    batches_dropped: AtomicU64,
    /// Messages that failed to parse (monotonic)
    messages_invalid: AtomicU64,
    /// Currently tracked entities (gauge)
    tracked_entities: AtomicU64,
    /// Last report time (only accessed from reporter)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            cycles_total: AtomicU64::new(0),
            cycles_since_report: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            detections_total: AtomicU64::new(0),
            detections_rejected: AtomicU64::new(0),
            zone_transitions: AtomicU64::new(0),
            intervals_closed: AtomicU64::new(0),
            orphaned_intervals: AtomicU64::new(0),
            evictions_total: AtomicU64::new(0),
            idle_anomalies: AtomicU64::new(0),
            unauthorized_anomalies: AtomicU64::new(0),
            batches_received: AtomicU64::new(0),
            batches_dropped: AtomicU64::new(0),
            messages_invalid: AtomicU64::new(0),
            tracked_entities: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record a completed update cycle with its latency (lock-free)
    #[inline]
    pub fn record_cycle(&self, latency_us: u64, detections: u64) {
        self.cycles_total.fetch_add(1, Ordering::Relaxed);
        self.cycles_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.latency_buckets[bucket_index(latency_us)].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.latency_max_us, latency_us);
        self.detections_total.fetch_add(detections, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_detection_rejected(&self) {
        self.detections_rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_zone_transition(&self) {
        self.zone_transitions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_interval_closed(&self) {
        self.intervals_closed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_eviction(&self, orphaned: bool) {
        self.evictions_total.fetch_add(1, Ordering::Relaxed);
        if orphaned {
            self.orphaned_intervals.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_anomaly(&self, kind: AnomalyKind) {
        match kind {
            AnomalyKind::IdleTime => self.idle_anomalies.fetch_add(1, Ordering::Relaxed),
            AnomalyKind::UnauthorizedAccess => {
                self.unauthorized_anomalies.fetch_add(1, Ordering::Relaxed)
            }
        };
    }

    #[inline]
    pub fn record_batch_received(&self) {
        self.batches_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_batch_dropped(&self) {
        self.batches_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_message_invalid(&self) {
        self.messages_invalid.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_tracked_entities(&self, count: usize) {
        self.tracked_entities.store(count as u64, Ordering::Relaxed);
    }

    /// Generate a summary report and reset periodic counters
    pub fn report(&self) -> PipelineSummary {
        let cycles_count = self.cycles_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.latency_sum_us.swap(0, Ordering::Relaxed);
        let max_latency = self.latency_max_us.swap(0, Ordering::Relaxed);
        let lat_buckets = swap_buckets(&self.latency_buckets);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        self.summarize(cycles_count, latency_sum, max_latency, lat_buckets, elapsed.as_secs_f64())
    }

    /// Current values without resetting anything (for scrapes)
    pub fn peek(&self) -> PipelineSummary {
        let cycles_count = self.cycles_since_report.load(Ordering::Relaxed);
        let latency_sum = self.latency_sum_us.load(Ordering::Relaxed);
        let max_latency = self.latency_max_us.load(Ordering::Relaxed);
        let lat_buckets = std::array::from_fn(|i| self.latency_buckets[i].load(Ordering::Relaxed));
        let elapsed = self.last_report_time.lock().elapsed();

        self.summarize(cycles_count, latency_sum, max_latency, lat_buckets, elapsed.as_secs_f64())
    }

    fn summarize(
        &self,
        cycles_count: u64,
        latency_sum: u64,
        max_latency: u64,
        lat_buckets: [u64; NUM_BUCKETS],
        elapsed_secs: f64,
    ) -> PipelineSummary {
        let cycles_per_sec =
            if elapsed_secs > 0.0 { cycles_count as f64 / elapsed_secs } else { 0.0 };
        let avg_latency = if cycles_count > 0 { latency_sum / cycles_count } else { 0 };

        PipelineSummary {
            cycles_total: self.cycles_total.load(Ordering::Relaxed),
            cycles_per_sec,
            avg_cycle_latency_us: avg_latency,
            max_cycle_latency_us: max_latency,
            lat_buckets,
            lat_p50_us: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p95_us: percentile_from_buckets(&lat_buckets, 0.95),
            lat_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
            detections_total: self.detections_total.load(Ordering::Relaxed),
            detections_rejected: self.detections_rejected.load(Ordering::Relaxed),
            zone_transitions: self.zone_transitions.load(Ordering::Relaxed),
            intervals_closed: self.intervals_closed.load(Ordering::Relaxed),
            orphaned_intervals: self.orphaned_intervals.load(Ordering::Relaxed),
            evictions_total: self.evictions_total.load(Ordering::Relaxed),
            idle_anomalies: self.idle_anomalies.load(Ordering::Relaxed),
            unauthorized_anomalies: self.unauthorized_anomalies.load(Ordering::Relaxed),
            batches_received: self.batches_received.load(Ordering::Relaxed),
            batches_dropped: self.batches_dropped.load(Ordering::Relaxed),
            messages_invalid: self.messages_invalid.load(Ordering::Relaxed),
            tracked_entities: self.tracked_entities.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Number of histogram buckets (exported for formatting)
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;

/// Exported bucket bounds for Prometheus formatting
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;

#[derive(Debug, Clone)]
pub struct PipelineSummary {
    pub cycles_total: u64,
    pub cycles_per_sec: f64,
    pub avg_cycle_latency_us: u64,
    pub max_cycle_latency_us: u64,
    /// Cycle latency histogram buckets
    /// Bounds: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200 µs
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub lat_p50_us: u64,
    pub lat_p95_us: u64,
    pub lat_p99_us: u64,
    pub detections_total: u64,
    pub detections_rejected: u64,
    pub zone_transitions: u64,
    pub intervals_closed: u64,
    pub orphaned_intervals: u64,
    pub evictions_total: u64,
    pub idle_anomalies: u64,
    pub unauthorized_anomalies: u64,
    pub batches_received: u64,
    pub batches_dropped: u64,
    pub messages_invalid: u64,
    pub tracked_entities: u64,
}

impl PipelineSummary {
    pub fn log(&self) {
        info!(
            cycles_total = %self.cycles_total,
            cycles_per_sec = format!("{:.1}", self.cycles_per_sec),
            avg_latency_us = %self.avg_cycle_latency_us,
            max_latency_us = %self.max_cycle_latency_us,
            p99_us = %self.lat_p99_us,
            tracked = %self.tracked_entities,
            transitions = %self.zone_transitions,
            orphaned = %self.orphaned_intervals,
            anomalies = %(self.idle_anomalies + self.unauthorized_anomalies),
            dropped = %self.batches_dropped,
            "pipeline_metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        let summary = metrics.peek();
        assert_eq!(summary.cycles_total, 0);
        assert_eq!(summary.batches_dropped, 0);
    }

    #[test]
    fn test_record_cycle() {
        let metrics = Metrics::new();

        metrics.record_cycle(100, 3);
        metrics.record_cycle(200, 2);
        assert_eq!(metrics.cycles_total.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.latency_sum_us.load(Ordering::Relaxed), 300);
        assert_eq!(metrics.detections_total.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn test_bucket_index() {
        assert_eq!(bucket_index(50), 0);
        assert_eq!(bucket_index(100), 0);
        assert_eq!(bucket_index(101), 1);
        assert_eq!(bucket_index(51200), 9);
        assert_eq!(bucket_index(99999), 10);
    }

    #[test]
    fn test_report_resets_periodic_counters() {
        let metrics = Metrics::new();
        metrics.record_cycle(150, 1);
        metrics.record_cycle(250, 1);

        let summary = metrics.report();
        assert_eq!(summary.cycles_total, 2);
        assert_eq!(summary.avg_cycle_latency_us, 200);
        assert_eq!(summary.max_cycle_latency_us, 250);
        assert_eq!(summary.lat_buckets.iter().sum::<u64>(), 2);

        let summary = metrics.report();
        assert_eq!(summary.cycles_total, 2);
        assert_eq!(summary.avg_cycle_latency_us, 0);
        assert_eq!(summary.lat_buckets.iter().sum::<u64>(), 0);
    }

    #[test]
    fn test_anomaly_and_eviction_counters() {
        let metrics = Metrics::new();
        metrics.record_anomaly(AnomalyKind::IdleTime);
        metrics.record_anomaly(AnomalyKind::UnauthorizedAccess);
        metrics.record_anomaly(AnomalyKind::UnauthorizedAccess);
        metrics.record_eviction(true);
        metrics.record_eviction(false);

        let summary = metrics.report();
        assert_eq!(summary.idle_anomalies, 1);
        assert_eq!(summary.unauthorized_anomalies, 2);
        assert_eq!(summary.evictions_total, 2);
        assert_eq!(summary.orphaned_intervals, 1);
    }

    #[test]
    fn test_peek_does_not_reset() {
        let metrics = Metrics::new();
        metrics.record_cycle(150, 1);

        assert_eq!(metrics.peek().lat_buckets.iter().sum::<u64>(), 1);
        assert_eq!(metrics.peek().max_cycle_latency_us, 150);
        assert_eq!(metrics.report().lat_buckets.iter().sum::<u64>(), 1);
    }

    #[test]
    fn test_percentile_empty() {
        let buckets = [0u64; NUM_BUCKETS];
        assert_eq!(percentile_from_buckets(&buckets, 0.99), 0);
    }
}

//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for hot-path operations to avoid mutex contention.
//! All counter updates are lock-free; reporting is the only operation
//! that needs synchronization (via atomic swap).
//!
//! NOTE: All atomics use Relaxed ordering intentionally; these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use crate::services::navigator::NavReason;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Event processing latency bucket boundaries (microseconds)
/// Buckets: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200
const BUCKET_BOUNDS: [u64; 10] = [100, 200, 400, 800, 1600, 3200, 6400, 12800, 25600, 51200];
const NUM_BUCKETS: usize = 11;

/// Media load time bucket boundaries (milliseconds)
/// Buckets: ≤25, ≤50, ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, >12800 ms
const MEDIA_LOAD_BOUNDS: [u64; 10] = [25, 50, 100, 200, 400, 800, 1600, 3200, 6400, 12800];

#[inline]
fn bucket_index(latency_us: u64) -> usize {
    BUCKET_BOUNDS.partition_point(|&bound| bound < latency_us)
}

#[inline]
fn media_load_bucket_index(load_ms: u64) -> usize {
    MEDIA_LOAD_BOUNDS.partition_point(|&bound| bound < load_ms)
}

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(current_max, new_value, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

#[inline]
fn swap_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    std::array::from_fn(|i| buckets[i].swap(0, Ordering::Relaxed))
}

#[inline]
fn load_buckets(buckets: &[AtomicU64; NUM_BUCKETS]) -> [u64; NUM_BUCKETS] {
    std::array::from_fn(|i| buckets[i].load(Ordering::Relaxed))
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

/// Lock-free metrics collector
///
/// All recording operations are lock-free using atomics.
/// The `report()` method atomically swaps counters to get a consistent snapshot.
pub struct Metrics {
    /// Total events ever processed by the tour loop (monotonic)
    events_total: AtomicU64,
    /// Events since last report (reset on report)
    events_since_report: AtomicU64,
    /// Sum of latencies in microseconds (reset on report)
    latency_sum_us: AtomicU64,
    /// Max latency in microseconds (reset on report)
    latency_max_us: AtomicU64,
    /// Event processing latency histogram buckets (reset on report)
    latency_buckets: [AtomicU64; NUM_BUCKETS],
    fixes_received: AtomicU64,
    /// Fixes dropped by the fix filter
    fixes_filtered: AtomicU64,
    position_errors: AtomicU64,
    /// Accepted transitions, indexed manual / geofence / auto-advance
    transitions: [AtomicU64; 3],
    /// Geofence candidates refused (busy, cooling down, already active)
    geofence_suppressed: AtomicU64,
    navigation_ignored: AtomicU64,
    media_loads: AtomicU64,
    media_errors: AtomicU64,
    /// Media results that arrived for a superseded transition
    media_stale: AtomicU64,
    simulated_playbacks: AtomicU64,
    /// Media load time histogram (ms, monotonic)
    media_load_buckets: [AtomicU64; NUM_BUCKETS],
    media_load_sum_ms: AtomicU64,
    ui_events_published: AtomicU64,
    /// UI events dropped due to channel full
    ui_events_dropped: AtomicU64,
    commands_received: AtomicU64,
    /// Control commands dropped due to channel full
    commands_dropped: AtomicU64,
    tours_completed: AtomicU64,
    /// Current tour event queue depth (updated by sampler)
    event_queue_depth: AtomicU64,
    /// Last report time (only accessed from reporter)
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            events_total: AtomicU64::new(0),
            events_since_report: AtomicU64::new(0),
            latency_sum_us: AtomicU64::new(0),
            latency_max_us: AtomicU64::new(0),
            latency_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            fixes_received: AtomicU64::new(0),
            fixes_filtered: AtomicU64::new(0),
            position_errors: AtomicU64::new(0),
            transitions: std::array::from_fn(|_| AtomicU64::new(0)),
            geofence_suppressed: AtomicU64::new(0),
            navigation_ignored: AtomicU64::new(0),
            media_loads: AtomicU64::new(0),
            media_errors: AtomicU64::new(0),
            media_stale: AtomicU64::new(0),
            simulated_playbacks: AtomicU64::new(0),
            media_load_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            media_load_sum_ms: AtomicU64::new(0),
            ui_events_published: AtomicU64::new(0),
            ui_events_dropped: AtomicU64::new(0),
            commands_received: AtomicU64::new(0),
            commands_dropped: AtomicU64::new(0),
            tours_completed: AtomicU64::new(0),
            event_queue_depth: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    /// Record an event was processed with given latency (lock-free)
    #[inline]
    pub fn record_event_processed(&self, latency_us: u64) {
        self.events_total.fetch_add(1, Ordering::Relaxed);
        self.events_since_report.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        self.latency_buckets[bucket_index(latency_us)].fetch_add(1, Ordering::Relaxed);
        update_atomic_max(&self.latency_max_us, latency_us);
    }

    #[inline]
    pub fn record_fix_received(&self) {
        self.fixes_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_fix_filtered(&self) {
        self.fixes_filtered.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_position_error(&self) {
        self.position_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_transition(&self, reason: NavReason) {
        let idx = match reason {
            NavReason::Manual => 0,
            NavReason::Geofence => 1,
            NavReason::AutoAdvance => 2,
        };
        self.transitions[idx].fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_geofence_suppressed(&self) {
        self.geofence_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_navigation_ignored(&self) {
        self.navigation_ignored.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a resolved media load and how long it took
    #[inline]
    pub fn record_media_load(&self, load_ms: u64, ok: bool) {
        self.media_loads.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.media_errors.fetch_add(1, Ordering::Relaxed);
        }
        self.media_load_buckets[media_load_bucket_index(load_ms)].fetch_add(1, Ordering::Relaxed);
        self.media_load_sum_ms.fetch_add(load_ms, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_media_stale(&self) {
        self.media_stale.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_simulated_playback(&self) {
        self.simulated_playbacks.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_ui_event_published(&self) {
        self.ui_events_published.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_ui_event_dropped(&self) {
        self.ui_events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_command_received(&self) {
        self.commands_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_command_dropped(&self) {
        self.commands_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_tour_completed(&self) {
        self.tours_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Set current event queue depth (called by sampler)
    #[inline]
    pub fn set_event_queue_depth(&self, depth: u64) {
        self.event_queue_depth.store(depth, Ordering::Relaxed);
    }

    #[inline]
    pub fn events_total(&self) -> u64 {
        self.events_total.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn fixes_filtered(&self) -> u64 {
        self.fixes_filtered.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn media_stale(&self) -> u64 {
        self.media_stale.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn geofence_suppressed(&self) -> u64 {
        self.geofence_suppressed.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn ui_events_dropped(&self) -> u64 {
        self.ui_events_dropped.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn commands_dropped(&self) -> u64 {
        self.commands_dropped.load(Ordering::Relaxed)
    }

    pub fn transitions(&self, reason: NavReason) -> u64 {
        let idx = match reason {
            NavReason::Manual => 0,
            NavReason::Geofence => 1,
            NavReason::AutoAdvance => 2,
        };
        self.transitions[idx].load(Ordering::Relaxed)
    }

    /// Monotonic counters and histograms, for the Prometheus endpoint.
    /// Does not reset anything.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            events_total: self.events_total.load(Ordering::Relaxed),
            fixes_received: self.fixes_received.load(Ordering::Relaxed),
            fixes_filtered: self.fixes_filtered.load(Ordering::Relaxed),
            position_errors: self.position_errors.load(Ordering::Relaxed),
            transitions_manual: self.transitions[0].load(Ordering::Relaxed),
            transitions_geofence: self.transitions[1].load(Ordering::Relaxed),
            transitions_auto_advance: self.transitions[2].load(Ordering::Relaxed),
            geofence_suppressed: self.geofence_suppressed.load(Ordering::Relaxed),
            navigation_ignored: self.navigation_ignored.load(Ordering::Relaxed),
            media_loads: self.media_loads.load(Ordering::Relaxed),
            media_errors: self.media_errors.load(Ordering::Relaxed),
            media_stale: self.media_stale.load(Ordering::Relaxed),
            simulated_playbacks: self.simulated_playbacks.load(Ordering::Relaxed),
            media_load_buckets: load_buckets(&self.media_load_buckets),
            media_load_sum_ms: self.media_load_sum_ms.load(Ordering::Relaxed),
            ui_events_published: self.ui_events_published.load(Ordering::Relaxed),
            ui_events_dropped: self.ui_events_dropped.load(Ordering::Relaxed),
            commands_received: self.commands_received.load(Ordering::Relaxed),
            commands_dropped: self.commands_dropped.load(Ordering::Relaxed),
            tours_completed: self.tours_completed.load(Ordering::Relaxed),
            event_queue_depth: self.event_queue_depth.load(Ordering::Relaxed),
            latency_buckets: load_buckets(&self.latency_buckets),
        }
    }

    /// Calculate and return metrics summary, then reset periodic counters
    ///
    /// This is the only method that resets counters. It uses atomic swap
    /// to get a consistent snapshot while allowing concurrent updates.
    pub fn report(&self) -> MetricsSummary {
        let events_count = self.events_since_report.swap(0, Ordering::Relaxed);
        let latency_sum = self.latency_sum_us.swap(0, Ordering::Relaxed);
        let max_latency = self.latency_max_us.swap(0, Ordering::Relaxed);
        let lat_buckets = swap_buckets(&self.latency_buckets);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };

        let events_per_sec = if elapsed.as_secs_f64() > 0.0 {
            events_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };
        let avg_latency = if events_count > 0 { latency_sum / events_count } else { 0 };

        let snapshot = self.snapshot();
        MetricsSummary {
            events_total: snapshot.events_total,
            events_per_sec,
            avg_process_latency_us: avg_latency,
            max_process_latency_us: max_latency,
            lat_buckets,
            lat_p50_us: percentile_from_buckets(&lat_buckets, 0.50),
            lat_p95_us: percentile_from_buckets(&lat_buckets, 0.95),
            lat_p99_us: percentile_from_buckets(&lat_buckets, 0.99),
            fixes_received: snapshot.fixes_received,
            fixes_filtered: snapshot.fixes_filtered,
            position_errors: snapshot.position_errors,
            transitions: snapshot.transitions_manual
                + snapshot.transitions_geofence
                + snapshot.transitions_auto_advance,
            geofence_suppressed: snapshot.geofence_suppressed,
            media_errors: snapshot.media_errors,
            media_stale: snapshot.media_stale,
            ui_events_dropped: snapshot.ui_events_dropped,
            commands_dropped: snapshot.commands_dropped,
            event_queue_depth: snapshot.event_queue_depth,
        }
    }
}

/// Exported bucket bounds for Prometheus formatting
pub const METRICS_NUM_BUCKETS: usize = NUM_BUCKETS;
pub const METRICS_BUCKET_BOUNDS: [u64; 10] = BUCKET_BOUNDS;
pub const METRICS_MEDIA_LOAD_BOUNDS: [u64; 10] = MEDIA_LOAD_BOUNDS;

/// Point-in-time view of the monotonic counters
#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub events_total: u64,
    pub fixes_received: u64,
    pub fixes_filtered: u64,
    pub position_errors: u64,
    pub transitions_manual: u64,
    pub transitions_geofence: u64,
    pub transitions_auto_advance: u64,
    pub geofence_suppressed: u64,
    pub navigation_ignored: u64,
    pub media_loads: u64,
    pub media_errors: u64,
    pub media_stale: u64,
    pub simulated_playbacks: u64,
    pub media_load_buckets: [u64; NUM_BUCKETS],
    pub media_load_sum_ms: u64,
    pub ui_events_published: u64,
    pub ui_events_dropped: u64,
    pub commands_received: u64,
    pub commands_dropped: u64,
    pub tours_completed: u64,
    pub event_queue_depth: u64,
    /// Event latency histogram since the last report
    pub latency_buckets: [u64; NUM_BUCKETS],
}

#[derive(Debug)]
pub struct MetricsSummary {
    pub events_total: u64,
    pub events_per_sec: f64,
    pub avg_process_latency_us: u64,
    pub max_process_latency_us: u64,
    /// Event processing latency histogram buckets
    /// Bounds: ≤100, ≤200, ≤400, ≤800, ≤1600, ≤3200, ≤6400, ≤12800, ≤25600, ≤51200, >51200 µs
    pub lat_buckets: [u64; NUM_BUCKETS],
    pub lat_p50_us: u64,
    pub lat_p95_us: u64,
    pub lat_p99_us: u64,
    pub fixes_received: u64,
    pub fixes_filtered: u64,
    pub position_errors: u64,
    /// Accepted transitions, all reasons
    pub transitions: u64,
    pub geofence_suppressed: u64,
    pub media_errors: u64,
    pub media_stale: u64,
    pub ui_events_dropped: u64,
    pub commands_dropped: u64,
    pub event_queue_depth: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            events_total = %self.events_total,
            events_per_sec = format!("{:.1}", self.events_per_sec),
            avg_latency_us = %self.avg_process_latency_us,
            max_latency_us = %self.max_process_latency_us,
            p99_us = %self.lat_p99_us,
            fixes = %self.fixes_received,
            fixes_filtered = %self.fixes_filtered,
            position_errors = %self.position_errors,
            transitions = %self.transitions,
            geofence_suppressed = %self.geofence_suppressed,
            media_errors = %self.media_errors,
            media_stale = %self.media_stale,
            ui_dropped = %self.ui_events_dropped,
            queue_depth = %self.event_queue_depth,
            "metrics"
        );
    }
}

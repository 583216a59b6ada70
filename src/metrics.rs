// Synchronization metrics
//
// Lightweight counters for monitoring the engine; summarized on shutdown

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Engine counters
///
/// Uses atomic operations so the engine, client and ingress can record
/// without locks. Separate from the activity log, which is the operator-facing
/// audit trail.
#[derive(Debug)]
pub struct Metrics {
    /// Notifications accepted into the event channel
    pub events_received: AtomicU64,

    /// Notifications rejected (bad quantity, malformed JSON, channel full)
    pub events_rejected: AtomicU64,

    /// Synchronizations where every write was acknowledged
    pub syncs_succeeded: AtomicU64,

    /// Synchronizations where some writes failed
    pub syncs_partial: AtomicU64,

    /// Synchronizations that failed before applying any write
    pub syncs_failed: AtomicU64,

    /// Events skipped because the system was disabled
    pub syncs_skipped: AtomicU64,

    /// Events for variants outside every group
    pub events_unmapped: AtomicU64,

    /// Events dropped because a newer event for the same group won
    pub events_superseded: AtomicU64,

    /// Inventory writes attempted (after retries, one per level)
    pub writes_issued: AtomicU64,

    /// Inventory writes that ultimately failed
    pub writes_failed: AtomicU64,

    /// Transient failures that were retried
    pub retries: AtomicU64,

    /// Total synchronization time in milliseconds
    pub total_sync_time_ms: AtomicU64,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            events_received: AtomicU64::new(0),
            events_rejected: AtomicU64::new(0),
            syncs_succeeded: AtomicU64::new(0),
            syncs_partial: AtomicU64::new(0),
            syncs_failed: AtomicU64::new(0),
            syncs_skipped: AtomicU64::new(0),
            events_unmapped: AtomicU64::new(0),
            events_superseded: AtomicU64::new(0),
            writes_issued: AtomicU64::new(0),
            writes_failed: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            total_sync_time_ms: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_event_received(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event_rejected(&self) {
        self.events_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sync_succeeded(&self) {
        self.syncs_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sync_partial(&self) {
        self.syncs_partial.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sync_failed(&self) {
        self.syncs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sync_skipped(&self) {
        self.syncs_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unmapped(&self) {
        self.events_unmapped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_superseded(&self) {
        self.events_superseded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write_issued(&self) {
        self.writes_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write_failed(&self) {
        self.writes_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sync_time(&self, duration: Duration) {
        self.total_sync_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Completed synchronizations of any result
    pub fn syncs_completed(&self) -> u64 {
        self.syncs_succeeded.load(Ordering::Relaxed)
            + self.syncs_partial.load(Ordering::Relaxed)
            + self.syncs_failed.load(Ordering::Relaxed)
    }

    /// Average synchronization time in milliseconds
    pub fn avg_sync_time_ms(&self) -> f64 {
        let total = self.total_sync_time_ms.load(Ordering::Relaxed);
        let count = self.syncs_completed();
        if count > 0 {
            total as f64 / count as f64
        } else {
            0.0
        }
    }

    /// Log metrics summary
    pub fn log_summary(&self) {
        tracing::info!("=== Sync Metrics Summary ===");
        tracing::info!("Uptime: {:.2}s", self.uptime().as_secs_f64());
        tracing::info!(
            "Events: {} received, {} rejected, {} unmapped, {} superseded",
            self.events_received.load(Ordering::Relaxed),
            self.events_rejected.load(Ordering::Relaxed),
            self.events_unmapped.load(Ordering::Relaxed),
            self.events_superseded.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Syncs: {} succeeded, {} partial, {} failed, {} skipped (avg {:.2}ms)",
            self.syncs_succeeded.load(Ordering::Relaxed),
            self.syncs_partial.load(Ordering::Relaxed),
            self.syncs_failed.load(Ordering::Relaxed),
            self.syncs_skipped.load(Ordering::Relaxed),
            self.avg_sync_time_ms()
        );
        tracing::info!(
            "Writes: {} issued, {} failed, {} retries",
            self.writes_issued.load(Ordering::Relaxed),
            self.writes_failed.load(Ordering::Relaxed),
            self.retries.load(Ordering::Relaxed)
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

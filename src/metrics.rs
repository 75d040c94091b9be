// Reload metrics
//
// Lock-free counters describing what the reload manager and the change
// notifier did since startup.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Reload activity counters.
///
/// Uses atomic operations so the sequencers, the notifier timers and callers
/// can all record without locking. Shared behind an `Arc` by the manager; read
/// it through [`ReloadManager::metrics`](crate::reload::ReloadManager::metrics).
#[derive(Debug)]
pub struct ReloadMetrics {
    /// Calls to `request_state`
    pub requests: AtomicU64,

    /// Requests answered from the cached state without queueing
    pub fast_path: AtomicU64,

    /// Queued requests satisfied by a load another request triggered
    pub queued_reuse: AtomicU64,

    /// Bootstrap loads run to discover a resource's files
    pub bootstraps: AtomicU64,

    /// Individual `Loader::load` calls
    pub loader_invocations: AtomicU64,

    /// Load attempts restarted because of a retry request or a file change
    pub retries: AtomicU64,

    /// New states published
    pub publications: AtomicU64,

    /// Requests that completed with an error other than cancellation
    pub failures: AtomicU64,

    /// Requests cancelled by their caller
    pub cancellations: AtomicU64,

    /// Listener calls made by the notifier
    pub events_delivered: AtomicU64,

    /// Updates folded into an already pending delivery
    pub events_coalesced: AtomicU64,

    start_time: Instant,
}

impl ReloadMetrics {
    pub fn new() -> Self {
        Self {
            requests: AtomicU64::new(0),
            fast_path: AtomicU64::new(0),
            queued_reuse: AtomicU64::new(0),
            bootstraps: AtomicU64::new(0),
            loader_invocations: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            publications: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            cancellations: AtomicU64::new(0),
            events_delivered: AtomicU64::new(0),
            events_coalesced: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fast_path(&self) {
        self.fast_path.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_queued_reuse(&self) {
        self.queued_reuse.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_bootstrap(&self) {
        self.bootstraps.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_loader_invocation(&self) {
        self.loader_invocations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_publication(&self) {
        self.publications.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancellation(&self) {
        self.cancellations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event_delivered(&self) {
        self.events_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_event_coalesced(&self) {
        self.events_coalesced.fetch_add(1, Ordering::Relaxed);
    }

    /// Convenience reader for a counter.
    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Share of requests answered without running the pipeline.
    pub fn fast_path_ratio(&self) -> f64 {
        let requests = self.requests.load(Ordering::Relaxed);
        if requests > 0 {
            self.fast_path.load(Ordering::Relaxed) as f64 / requests as f64
        } else {
            0.0
        }
    }

    pub fn log_summary(&self) {
        tracing::info!("=== Reload Metrics Summary ===");
        tracing::info!("Uptime: {:.2}s", self.uptime().as_secs_f64());
        tracing::info!(
            "Requests: {} ({} fast path, {:.0}%), {} reused a queued load",
            self.requests.load(Ordering::Relaxed),
            self.fast_path.load(Ordering::Relaxed),
            self.fast_path_ratio() * 100.0,
            self.queued_reuse.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Loads: {} loader calls, {} bootstraps, {} retries, {} publications",
            self.loader_invocations.load(Ordering::Relaxed),
            self.bootstraps.load(Ordering::Relaxed),
            self.retries.load(Ordering::Relaxed),
            self.publications.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Outcomes: {} failures, {} cancellations",
            self.failures.load(Ordering::Relaxed),
            self.cancellations.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Change events: {} delivered, {} coalesced",
            self.events_delivered.load(Ordering::Relaxed),
            self.events_coalesced.load(Ordering::Relaxed)
        );
    }
}

impl Default for ReloadMetrics {
    fn default() -> Self {
        Self::new()
    }
}

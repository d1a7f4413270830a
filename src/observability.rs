//! Process-wide structured logging setup and the in-memory `Metrics`
//! registry, constructed once at startup and held in `AppState`.

use std::sync::atomic::{AtomicU64, Ordering};

use tracing_subscriber::EnvFilter;

/// Initialise the global `tracing` subscriber from `RUST_LOG` (default
/// `info`). Call once at process start.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

/// Metrics handle for recording counters. Exposed read-only through the
/// admin health/status endpoint; no external exporter is wired up.
#[derive(Debug, Default)]
pub struct Metrics {
    jobs_accepted: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_evictions: AtomicU64,
    autodownload_admitted: AtomicU64,
    autodownload_rejected: AtomicU64,
    upstream_requests: AtomicU64,
    upstream_failures: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_accepted(&self) {
        self.jobs_accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_completed(&self) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn job_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cache_eviction(&self, count: u64) {
        self.cache_evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn autodownload_admitted(&self) {
        self.autodownload_admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn autodownload_rejected(&self) {
        self.autodownload_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn upstream_request(&self, ok: bool) {
        self.upstream_requests.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.upstream_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_accepted: self.jobs_accepted.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            cache_evictions: self.cache_evictions.load(Ordering::Relaxed),
            autodownload_admitted: self.autodownload_admitted.load(Ordering::Relaxed),
            autodownload_rejected: self.autodownload_rejected.load(Ordering::Relaxed),
            upstream_requests: self.upstream_requests.load(Ordering::Relaxed),
            upstream_failures: self.upstream_failures.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    pub jobs_accepted: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_evictions: u64,
    pub autodownload_admitted: u64,
    pub autodownload_rejected: u64,
    pub upstream_requests: u64,
    pub upstream_failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_snapshot_reflects_increments() {
        let metrics = Metrics::new();
        metrics.job_accepted();
        metrics.job_completed();
        metrics.cache_hit();
        metrics.upstream_request(false);

        let snap = metrics.snapshot();
        assert_eq!(snap.jobs_accepted, 1);
        assert_eq!(snap.jobs_completed, 1);
        assert_eq!(snap.cache_hits, 1);
        assert_eq!(snap.upstream_requests, 1);
        assert_eq!(snap.upstream_failures, 1);
    }
}

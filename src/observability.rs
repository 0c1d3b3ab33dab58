//! Observability stubs (metrics, tracing)

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Metrics handle for recording counters
#[derive(Debug, Default)]
pub struct Metrics {
    batches_started: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    download_timeouts: AtomicU64,
    stale_signals: AtomicU64,
    artifacts_released: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch_started(&self) {
        self.batches_started.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "batches_started", "Metric incremented");
    }

    pub fn job_completed(&self) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "jobs_completed", "Metric incremented");
    }

    pub fn job_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "jobs_failed", "Metric incremented");
    }

    pub fn download_timeout(&self) {
        self.download_timeouts.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "download_timeouts", "Metric incremented");
    }

    pub fn stale_signal(&self) {
        self.stale_signals.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "stale_signals", "Metric incremented");
    }

    pub fn artifact_released(&self) {
        self.artifacts_released.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "artifacts_released", "Metric incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            batches_started: self.batches_started.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            download_timeouts: self.download_timeouts.load(Ordering::Relaxed),
            stale_signals: self.stale_signals.load(Ordering::Relaxed),
            artifacts_released: self.artifacts_released.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub batches_started: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub download_timeouts: u64,
    pub stale_signals: u64,
    pub artifacts_released: u64,
}

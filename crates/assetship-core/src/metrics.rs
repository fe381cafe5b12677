//! Global atomic counters for Assetship observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a pipeline run).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters. No allocations, no locking.
pub struct Metrics {
    pipelines_run: AtomicU64,
    deploys_decided: AtomicU64,
    deploys_suppressed: AtomicU64,
    notification_failures: AtomicU64,
    retries: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            pipelines_run: AtomicU64::new(0),
            deploys_decided: AtomicU64::new(0),
            deploys_suppressed: AtomicU64::new(0),
            notification_failures: AtomicU64::new(0),
            retries: AtomicU64::new(0),
        }
    }

    pub fn inc_pipelines_run(&self) {
        self.pipelines_run.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "pipelines_run", "counter incremented");
    }

    /// Record a gate decision.
    pub fn record_decision(&self, deploy: bool) {
        if deploy {
            self.deploys_decided.fetch_add(1, Ordering::Relaxed);
        } else {
            self.deploys_suppressed.fetch_add(1, Ordering::Relaxed);
        }
        tracing::trace!(metric = "gate_decision", deploy, "counter incremented");
    }

    pub fn inc_notification_failures(&self) {
        self.notification_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "notification_failures", "counter incremented");
    }

    pub fn inc_retries(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "retries", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            pipelines_run = self.pipelines_run(),
            deploys_decided = self.deploys_decided(),
            deploys_suppressed = self.deploys_suppressed(),
            notification_failures = self.notification_failures(),
            retries = self.retries(),
        );
    }

    pub fn pipelines_run(&self) -> u64 {
        self.pipelines_run.load(Ordering::Relaxed)
    }

    pub fn deploys_decided(&self) -> u64 {
        self.deploys_decided.load(Ordering::Relaxed)
    }

    pub fn deploys_suppressed(&self) -> u64 {
        self.deploys_suppressed.load(Ordering::Relaxed)
    }

    pub fn notification_failures(&self) -> u64 {
        self.notification_failures.load(Ordering::Relaxed)
    }

    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.pipelines_run.store(0, Ordering::Relaxed);
        self.deploys_decided.store(0, Ordering::Relaxed);
        self.deploys_suppressed.store(0, Ordering::Relaxed);
        self.notification_failures.store(0, Ordering::Relaxed);
        self.retries.store(0, Ordering::Relaxed);
    }
}

//! Metrics for the page batcher.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters describing batcher activity over its lifetime
#[derive(Debug, Default)]
pub struct BatcherMetrics {
    /// Continuations accepted by `register`
    pub registrations: AtomicU64,

    /// Registrations refused because the batcher was closed
    pub rejected_registrations: AtomicU64,

    /// Continuations invoked (with content or failure)
    pub continuations_dispatched: AtomicU64,

    /// Continuations that panicked while running
    pub continuations_panicked: AtomicU64,

    /// Outbound batch calls started, retries included
    pub batches_sent: AtomicU64,

    /// Batches that exhausted their retries
    pub batches_failed: AtomicU64,

    /// Retries scheduled after a failed attempt
    pub retries: AtomicU64,

    /// Titles resolved to content
    pub pages_found: AtomicU64,

    /// Titles resolved as not found
    pub pages_missing: AtomicU64,

    /// Drain-fetch-dispatch rounds
    pub flush_passes: AtomicU64,

    /// Continuations resolved with a cancellation
    pub cancelled: AtomicU64,

    /// Total titles across distinct batches (for batch size averaging)
    pub total_batch_titles: AtomicU64,

    /// Distinct batches (first attempts only)
    pub distinct_batches: AtomicU64,
}

impl BatcherMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_registered(&self) {
        self.registrations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected_registrations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dispatched(&self) {
        self.continuations_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_panicked(&self) {
        self.continuations_panicked.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an outbound call; `attempt` is 1 for the first try
    pub fn record_sent(&self, titles: usize, attempt: u32) {
        self.batches_sent.fetch_add(1, Ordering::Relaxed);
        if attempt == 1 {
            self.distinct_batches.fetch_add(1, Ordering::Relaxed);
            self.total_batch_titles
                .fetch_add(titles as u64, Ordering::Relaxed);
        }
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_batch_failed(&self) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_resolved(&self, found: usize, missing: usize) {
        self.pages_found.fetch_add(found as u64, Ordering::Relaxed);
        self.pages_missing.fetch_add(missing as u64, Ordering::Relaxed);
    }

    pub fn record_pass(&self) {
        self.flush_passes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancelled(&self, count: usize) {
        self.cancelled.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Continuations accepted but not yet invoked
    pub fn outstanding(&self) -> u64 {
        let registered = self.registrations.load(Ordering::Relaxed);
        let dispatched = self.continuations_dispatched.load(Ordering::Relaxed);
        registered.saturating_sub(dispatched)
    }

    /// Calculate average titles per distinct batch
    pub fn avg_batch_size(&self) -> f64 {
        let batches = self.distinct_batches.load(Ordering::Relaxed);
        if batches == 0 {
            return 0.0;
        }
        let titles = self.total_batch_titles.load(Ordering::Relaxed);
        titles as f64 / batches as f64
    }

    /// Get a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            registrations: self.registrations.load(Ordering::Relaxed),
            rejected_registrations: self.rejected_registrations.load(Ordering::Relaxed),
            continuations_dispatched: self.continuations_dispatched.load(Ordering::Relaxed),
            continuations_panicked: self.continuations_panicked.load(Ordering::Relaxed),
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            pages_found: self.pages_found.load(Ordering::Relaxed),
            pages_missing: self.pages_missing.load(Ordering::Relaxed),
            flush_passes: self.flush_passes.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            avg_batch_size: self.avg_batch_size(),
        }
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub registrations: u64,
    pub rejected_registrations: u64,
    pub continuations_dispatched: u64,
    pub continuations_panicked: u64,
    pub batches_sent: u64,
    pub batches_failed: u64,
    pub retries: u64,
    pub pages_found: u64,
    pub pages_missing: u64,
    pub flush_passes: u64,
    pub cancelled: u64,
    pub avg_batch_size: f64,
}

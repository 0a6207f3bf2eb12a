//! Counters for the batching engine.

use std::sync::atomic::{AtomicU64, Ordering};

/// Metrics for monitoring engine throughput
#[derive(Debug, Default)]
pub struct EngineMetrics {
    /// Requests accepted by `submit`
    pub requests_submitted: AtomicU64,

    /// Requests refused by `submit` because the engine was closing
    pub requests_rejected: AtomicU64,

    /// Requests settled with a response
    pub requests_completed: AtomicU64,

    /// Queued requests settled with `Cancelled` at shutdown
    pub requests_cancelled: AtomicU64,

    /// Batches handed to the transport
    pub batches_dispatched: AtomicU64,

    /// Batches that came back with an error
    pub batches_failed: AtomicU64,

    /// Total requests in dispatched batches (for batch size averaging)
    pub total_batch_requests: AtomicU64,

    /// Largest batch dispatched so far
    pub max_batch_size: AtomicU64,
}

impl EngineMetrics {
    /// Create new metrics instance
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_submitted(&self) {
        self.requests_submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.requests_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self, count: usize) {
        self.requests_completed.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_cancelled(&self, count: usize) {
        self.requests_cancelled.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_failed_batch(&self) {
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a batch being handed to the transport
    pub fn record_batch(&self, batch_size: usize) {
        let size = batch_size as u64;
        self.batches_dispatched.fetch_add(1, Ordering::Relaxed);
        self.total_batch_requests.fetch_add(size, Ordering::Relaxed);

        let mut current_max = self.max_batch_size.load(Ordering::Relaxed);
        while size > current_max {
            match self.max_batch_size.compare_exchange_weak(
                current_max,
                size,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(x) => current_max = x,
            }
        }
    }

    /// Calculate average batch size
    pub fn avg_batch_size(&self) -> f64 {
        let batches = self.batches_dispatched.load(Ordering::Relaxed);
        if batches == 0 {
            return 0.0;
        }
        let total_requests = self.total_batch_requests.load(Ordering::Relaxed);
        total_requests as f64 / batches as f64
    }

    /// Get a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_submitted: self.requests_submitted.load(Ordering::Relaxed),
            requests_rejected: self.requests_rejected.load(Ordering::Relaxed),
            requests_completed: self.requests_completed.load(Ordering::Relaxed),
            requests_cancelled: self.requests_cancelled.load(Ordering::Relaxed),
            batches_dispatched: self.batches_dispatched.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            max_batch_size: self.max_batch_size.load(Ordering::Relaxed),
            avg_batch_size: self.avg_batch_size(),
        }
    }
}

/// Snapshot of metrics at a point in time
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub requests_submitted: u64,
    pub requests_rejected: u64,
    pub requests_completed: u64,
    pub requests_cancelled: u64,
    pub batches_dispatched: u64,
    pub batches_failed: u64,
    pub max_batch_size: u64,
    pub avg_batch_size: f64,
}

//! Engine metrics
//!
//! Atomic counters plus a fixed-bucket latency histogram for admission
//! latency (entry into `submit_order` until order-queue enqueue). Exposed as
//! a snapshot struct for scrapes.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Upper bounds, in seconds, of the admission latency buckets. A final
/// overflow bucket catches everything above the last bound.
pub const LATENCY_BUCKET_BOUNDS: [f64; 9] =
    [0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0];

/// Fixed-bucket histogram with an overflow bucket.
#[derive(Debug, Default)]
pub struct LatencyHistogram {
    buckets: [AtomicU64; 10],
    count: AtomicU64,
    sum_nanos: AtomicU64,
}

impl LatencyHistogram {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&self, latency: Duration) {
        let seconds = latency.as_secs_f64();
        let idx = LATENCY_BUCKET_BOUNDS
            .iter()
            .position(|bound| seconds <= *bound)
            .unwrap_or(LATENCY_BUCKET_BOUNDS.len());
        self.buckets[idx].fetch_add(1, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_nanos.fetch_add(latency.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Cumulative counts per bucket bound, plus the overflow bucket last.
    pub fn cumulative_buckets(&self) -> [u64; 10] {
        let mut out = [0u64; 10];
        let mut running = 0;
        for (i, bucket) in self.buckets.iter().enumerate() {
            running += bucket.load(Ordering::Relaxed);
            out[i] = running;
        }
        out
    }

    pub fn sum(&self) -> Duration {
        Duration::from_nanos(self.sum_nanos.load(Ordering::Relaxed))
    }
}

/// Core engine metrics.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    pub orders_total: AtomicU64,
    pub trades_total: AtomicU64,
    pub orders_rejected_total: AtomicU64,
    pub backpressure_total: AtomicU64,
    pub fanout_dead_letters: AtomicU64,
    pub order_latency_seconds: LatencyHistogram,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_order_admitted(&self, latency: Duration) {
        self.orders_total.fetch_add(1, Ordering::Relaxed);
        self.order_latency_seconds.observe(latency);
    }

    pub fn record_trade(&self) {
        self.trades_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejection(&self) {
        self.orders_rejected_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_backpressure(&self) {
        self.backpressure_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dead_letter(&self) {
        self.fanout_dead_letters.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            orders_total: self.orders_total.load(Ordering::Relaxed),
            trades_total: self.trades_total.load(Ordering::Relaxed),
            orders_rejected_total: self.orders_rejected_total.load(Ordering::Relaxed),
            backpressure_total: self.backpressure_total.load(Ordering::Relaxed),
            fanout_dead_letters: self.fanout_dead_letters.load(Ordering::Relaxed),
            order_latency_count: self.order_latency_seconds.count(),
            order_latency_buckets: self.order_latency_seconds.cumulative_buckets(),
        }
    }
}

/// Point-in-time metric values.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub orders_total: u64,
    pub trades_total: u64,
    pub orders_rejected_total: u64,
    pub backpressure_total: u64,
    pub fanout_dead_letters: u64,
    pub order_latency_count: u64,
    pub order_latency_buckets: [u64; 10],
}

//! In-process counters for the CyberOracle backend, served from `/status`.
//!
//! All counters are atomics; share them as `Arc<Metrics>`.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub struct Metrics {
    /// `POST /oracle` calls that passed the router.
    pub oracle_requests: AtomicU64,
    /// Fortunes generated (any mode).
    pub fortunes_generated: AtomicU64,
    /// cNFTs minted and recorded with `fulfill_oracle`.
    pub requests_fulfilled: AtomicU64,
    /// Oracle or mint calls that ended in an error.
    pub requests_failed: AtomicU64,
    /// Metadata records accepted by `POST /upload`.
    pub metadata_uploads: AtomicU64,
    /// Requests finished by startup reconciliation.
    pub reconciled: AtomicU64,
    pub latency_sum_ms: AtomicU64,
    pub latency_count: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_oracle_request(&self) {
        self.oracle_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fortune(&self) {
        self.fortunes_generated.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed mint-and-fulfill with its end-to-end latency.
    pub fn record_fulfillment(&self, latency_ms: u64) {
        self.requests_fulfilled.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.latency_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_upload(&self) {
        self.metadata_uploads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconciled(&self, count: u64) {
        self.reconciled.fetch_add(count, Ordering::Relaxed);
    }

    /// Average fulfillment latency in milliseconds, or 0 if none.
    pub fn avg_latency_ms(&self) -> u64 {
        let count = self.latency_count.load(Ordering::Relaxed);
        if count == 0 {
            return 0;
        }
        self.latency_sum_ms.load(Ordering::Relaxed) / count
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "oracle_requests": self.oracle_requests.load(Ordering::Relaxed),
            "fortunes_generated": self.fortunes_generated.load(Ordering::Relaxed),
            "requests_fulfilled": self.requests_fulfilled.load(Ordering::Relaxed),
            "requests_failed": self.requests_failed.load(Ordering::Relaxed),
            "metadata_uploads": self.metadata_uploads.load(Ordering::Relaxed),
            "reconciled": self.reconciled.load(Ordering::Relaxed),
            "avg_fulfillment_latency_ms": self.avg_latency_ms(),
        })
    }
}

//! Registry-wide call metrics.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// API registry metrics
#[derive(Default)]
pub struct RegistryMetrics {
    // Call counters
    pub calls_total: AtomicU64,
    pub calls_success: AtomicU64,
    pub calls_error: AtomicU64,
    pub async_calls: AtomicU64,

    // Failure breakdown
    pub retries: AtomicU64,
    pub timeouts: AtomicU64,
    pub circuit_rejections: AtomicU64,
    pub auth_failures: AtomicU64,
    pub validation_failures: AtomicU64,

    // Latency tracking
    pub total_latency_ms: AtomicU64,
}

impl RegistryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a finished call
    pub fn record_call(&self, success: bool, latency_ms: u64) {
        self.calls_total.fetch_add(1, Ordering::Relaxed);
        if success {
            self.calls_success.fetch_add(1, Ordering::Relaxed);
        } else {
            self.calls_error.fetch_add(1, Ordering::Relaxed);
        }
        self.total_latency_ms.fetch_add(latency_ms, Ordering::Relaxed);
    }

    pub fn record_async(&self) {
        self.async_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_circuit_rejection(&self) {
        self.circuit_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_auth_failure(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_validation_failure(&self) {
        self.validation_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let calls_total = self.calls_total.load(Ordering::Relaxed);
        let total_latency_ms = self.total_latency_ms.load(Ordering::Relaxed);
        MetricsSnapshot {
            calls_total,
            calls_success: self.calls_success.load(Ordering::Relaxed),
            calls_error: self.calls_error.load(Ordering::Relaxed),
            async_calls: self.async_calls.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            circuit_rejections: self.circuit_rejections.load(Ordering::Relaxed),
            auth_failures: self.auth_failures.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            average_latency_ms: if calls_total == 0 {
                0.0
            } else {
                total_latency_ms as f64 / calls_total as f64
            },
        }
    }
}

/// Point-in-time copy of the registry metrics
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub calls_total: u64,
    pub calls_success: u64,
    pub calls_error: u64,
    pub async_calls: u64,
    pub retries: u64,
    pub timeouts: u64,
    pub circuit_rejections: u64,
    pub auth_failures: u64,
    pub validation_failures: u64,
    pub average_latency_ms: f64,
}

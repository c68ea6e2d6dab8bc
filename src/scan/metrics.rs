//! Counters for the DNS adapter: lookups, failures, timeouts and latency.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct LookupMetrics {
    total_lookups: AtomicU64,
    empty_answers: AtomicU64,
    total_errors: AtomicU64,
    total_timeouts: AtomicU64,
    total_latency_ns: AtomicU64,
}

impl LookupMetrics {
    pub fn record_answer(&self, latency: Duration, records: usize) {
        self.total_lookups.fetch_add(1, Ordering::Relaxed);
        if records == 0 {
            self.empty_answers.fetch_add(1, Ordering::Relaxed);
        }
        self.add_latency(latency);
    }

    pub fn record_failure(&self, latency: Duration) {
        self.total_lookups.fetch_add(1, Ordering::Relaxed);
        self.total_errors.fetch_add(1, Ordering::Relaxed);
        self.add_latency(latency);
    }

    pub fn record_timeout(&self, latency: Duration) {
        self.record_failure(latency);
        self.total_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    fn add_latency(&self, latency: Duration) {
        self.total_latency_ns
            .fetch_add(latency.as_nanos() as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> LookupMetricsSnapshot {
        let total_lookups = self.total_lookups.load(Ordering::Relaxed);
        let total_errors = self.total_errors.load(Ordering::Relaxed);
        let total_latency_ns = self.total_latency_ns.load(Ordering::Relaxed);

        let average_latency_ms = if total_lookups == 0 {
            0.0
        } else {
            (total_latency_ns as f64 / total_lookups as f64) / 1_000_000.0
        };

        let error_rate = if total_lookups == 0 {
            0.0
        } else {
            total_errors as f64 / total_lookups as f64
        };

        LookupMetricsSnapshot {
            total_lookups,
            empty_answers: self.empty_answers.load(Ordering::Relaxed),
            total_errors,
            total_timeouts: self.total_timeouts.load(Ordering::Relaxed),
            average_latency_ms,
            error_rate,
        }
    }
}

#[derive(Debug, Copy, Clone)]
pub struct LookupMetricsSnapshot {
    pub total_lookups: u64,
    pub empty_answers: u64,
    pub total_errors: u64,
    pub total_timeouts: u64,
    pub average_latency_ms: f64,
    pub error_rate: f64,
}

//! Engine-level counters.
//!
//! Thread-safe counters using atomic operations. Mutated on every request
//! completion; read by the resource monitor and by external callers; live for
//! the process lifetime and reset only on restart.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::request::InferenceResponse;

#[derive(Debug, Default)]
pub struct EngineMetrics {
    total_requests: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    /// Sum of completion latencies, for the running average.
    latency_total_ms: AtomicU64,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a finished request. Called exactly once per completed request,
    /// whichever path produced the response.
    pub fn record_completion(&self, response: &InferenceResponse) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if response.is_ok() {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
        self.latency_total_ms
            .fetch_add(response.processing_time_ms, Ordering::Relaxed);
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn cache_misses(&self) -> u64 {
        self.cache_misses.load(Ordering::Relaxed)
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Running average completion latency in milliseconds.
    pub fn avg_latency_ms(&self) -> f64 {
        let total = self.total_requests.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            self.latency_total_ms.load(Ordering::Relaxed) as f64 / total as f64
        }
    }

    /// Fraction of completed requests that succeeded, in [0, 1].
    pub fn success_rate(&self) -> f64 {
        let total = self.total_requests.load(Ordering::Relaxed);
        if total == 0 {
            1.0
        } else {
            self.succeeded.load(Ordering::Relaxed) as f64 / total as f64
        }
    }

    /// Point-in-time view, combined with live queue depths by the engine.
    pub fn snapshot(&self, queue_depths: BTreeMap<String, usize>) -> MetricsSnapshot {
        MetricsSnapshot {
            total_requests: self.total_requests(),
            succeeded: self.succeeded(),
            failed: self.failed(),
            cache_hits: self.cache_hits(),
            cache_misses: self.cache_misses(),
            avg_latency_ms: self.avg_latency_ms(),
            success_rate: self.success_rate(),
            queue_depths,
        }
    }
}

/// Serializable snapshot returned by `Engine::metrics`.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub avg_latency_ms: f64,
    pub success_rate: f64,
    /// Live occupancy per priority level.
    pub queue_depths: BTreeMap<String, usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{InferenceResponse, Prediction};
    use serde_json::json;

    fn ok_response(latency_ms: u64) -> InferenceResponse {
        InferenceResponse::success(
            "r",
            "m",
            Prediction {
                values: json!(1),
                confidence: 1.0,
            },
            latency_ms,
        )
    }

    #[test]
    fn test_completion_counters() {
        let metrics = EngineMetrics::new();
        metrics.record_completion(&ok_response(10));
        metrics.record_completion(&InferenceResponse::failure("r", "m", "err", 30));

        assert_eq!(metrics.total_requests(), 2);
        assert_eq!(metrics.succeeded(), 1);
        assert_eq!(metrics.failed(), 1);
        assert!((metrics.avg_latency_ms() - 20.0).abs() < f64::EPSILON);
        assert!((metrics.success_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_hit_miss_counters_are_independent() {
        let metrics = EngineMetrics::new();
        metrics.record_cache_miss();
        metrics.record_cache_hit();
        metrics.record_cache_hit();

        assert_eq!(metrics.cache_hits(), 2);
        assert_eq!(metrics.cache_misses(), 1);
        assert_eq!(metrics.total_requests(), 0);
    }

    #[test]
    fn test_empty_snapshot() {
        let metrics = EngineMetrics::new();
        let snap = metrics.snapshot(BTreeMap::new());
        assert_eq!(snap.total_requests, 0);
        assert_eq!(snap.avg_latency_ms, 0.0);
        assert_eq!(snap.success_rate, 1.0);
    }
}

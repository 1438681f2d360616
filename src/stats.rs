//! Running request statistics.
//!
//! Tracks request counts, cache-hit rate, total cost, and total latency.
//! All operations are lock-free via atomics. Costs are stored as
//! micro-dollars (1 USD = 1 000 000 micro-dollars) to avoid floating-point
//! drift in long-running aggregations.

use std::sync::atomic::{AtomicU64, Ordering};

/// How a handled request concluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The planned pipeline (or cache) produced the answer.
    Success,
    /// The one-shot fallback produced the answer.
    Fallback,
    /// Both paths failed; the caller received the fixed degraded response.
    Degraded,
}

/// Lock-free running statistics for one orchestrator instance.
#[derive(Debug, Default)]
pub struct OrchestratorStats {
    total: AtomicU64,
    answered: AtomicU64,
    cache_hits: AtomicU64,
    fallbacks: AtomicU64,
    degraded: AtomicU64,
    cost_micro: AtomicU64,
    latency_ms_total: AtomicU64,
}

/// Point-in-time snapshot of request statistics.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsSnapshot {
    /// Requests handled.
    pub total_requests: u64,
    /// Fraction of requests that received a real answer (pipeline, cache,
    /// or fallback).
    pub success_rate: f64,
    /// Fraction of requests served from the cache.
    pub cache_hit_rate: f64,
    /// Mean handling latency, ms.
    pub avg_latency_ms: f64,
    /// Mean estimated cost per request, USD.
    pub avg_cost_usd: f64,
    /// Requests answered by the fallback path.
    pub fallback_requests: u64,
    /// Requests that ended in the degraded response.
    pub degraded_requests: u64,
}

impl OrchestratorStats {
    /// Create zeroed statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one handled request.
    ///
    /// # Arguments
    ///
    /// * `outcome` — How the request concluded.
    /// * `cache_hit` — Whether the cache served the answer.
    /// * `cost_usd` — Estimated cost of producing the response.
    /// * `latency_ms` — Wall-clock handling time.
    pub fn record(&self, outcome: RequestOutcome, cache_hit: bool, cost_usd: f64, latency_ms: u64) {
        self.total.fetch_add(1, Ordering::Relaxed);
        match outcome {
            RequestOutcome::Success => {
                self.answered.fetch_add(1, Ordering::Relaxed);
            }
            RequestOutcome::Fallback => {
                self.answered.fetch_add(1, Ordering::Relaxed);
                self.fallbacks.fetch_add(1, Ordering::Relaxed);
            }
            RequestOutcome::Degraded => {
                self.degraded.fetch_add(1, Ordering::Relaxed);
            }
        }
        if cache_hit {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
        }
        self.cost_micro
            .fetch_add(usd_to_micro(cost_usd), Ordering::Relaxed);
        self.latency_ms_total.fetch_add(latency_ms, Ordering::Relaxed);
    }

    /// Return a snapshot of current statistics.
    pub fn snapshot(&self) -> StatsSnapshot {
        let total = self.total.load(Ordering::Relaxed);
        let answered = self.answered.load(Ordering::Relaxed);
        let cache_hits = self.cache_hits.load(Ordering::Relaxed);
        let cost_micro = self.cost_micro.load(Ordering::Relaxed);
        let latency_total = self.latency_ms_total.load(Ordering::Relaxed);

        let ratio = |num: u64| {
            if total == 0 {
                0.0
            } else {
                num as f64 / total as f64
            }
        };

        StatsSnapshot {
            total_requests: total,
            success_rate: ratio(answered),
            cache_hit_rate: ratio(cache_hits),
            avg_latency_ms: if total == 0 {
                0.0
            } else {
                latency_total as f64 / total as f64
            },
            avg_cost_usd: if total == 0 {
                0.0
            } else {
                micro_to_usd(cost_micro) / total as f64
            },
            fallback_requests: self.fallbacks.load(Ordering::Relaxed),
            degraded_requests: self.degraded.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        self.total.store(0, Ordering::Relaxed);
        self.answered.store(0, Ordering::Relaxed);
        self.cache_hits.store(0, Ordering::Relaxed);
        self.fallbacks.store(0, Ordering::Relaxed);
        self.degraded.store(0, Ordering::Relaxed);
        self.cost_micro.store(0, Ordering::Relaxed);
        self.latency_ms_total.store(0, Ordering::Relaxed);
    }
}

// ── Helpers ────────────────────────────────────────────────────────────

/// Convert USD to micro-dollars.
fn usd_to_micro(usd: f64) -> u64 {
    (usd * 1_000_000.0).max(0.0) as u64
}

/// Convert micro-dollars to USD.
fn micro_to_usd(micro: u64) -> f64 {
    micro as f64 / 1_000_000.0
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    #[test]
    fn test_initial_snapshot_is_zeroed() {
        let snap = OrchestratorStats::new().snapshot();
        assert_eq!(snap.total_requests, 0);
        assert!(snap.success_rate.abs() < f64::EPSILON);
        assert!(snap.cache_hit_rate.abs() < f64::EPSILON);
        assert!(snap.avg_latency_ms.abs() < f64::EPSILON);
        assert!(snap.avg_cost_usd.abs() < f64::EPSILON);
    }

    #[test]
    fn test_success_counts_toward_success_rate() {
        let stats = OrchestratorStats::new();
        stats.record(RequestOutcome::Success, false, 0.01, 100);
        stats.record(RequestOutcome::Degraded, false, 0.0, 50);
        let snap = stats.snapshot();
        assert_eq!(snap.total_requests, 2);
        assert!((snap.success_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(snap.degraded_requests, 1);
    }

    #[test]
    fn test_fallback_counts_as_answered() {
        let stats = OrchestratorStats::new();
        stats.record(RequestOutcome::Fallback, false, 0.01, 100);
        let snap = stats.snapshot();
        assert!((snap.success_rate - 1.0).abs() < f64::EPSILON);
        assert_eq!(snap.fallback_requests, 1);
    }

    #[test]
    fn test_cache_hit_rate() {
        let stats = OrchestratorStats::new();
        stats.record(RequestOutcome::Success, true, 0.0, 5);
        stats.record(RequestOutcome::Success, false, 0.01, 200);
        stats.record(RequestOutcome::Success, true, 0.0, 5);
        stats.record(RequestOutcome::Success, false, 0.01, 200);
        let snap = stats.snapshot();
        assert!((snap.cache_hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_average_latency_and_cost() {
        let stats = OrchestratorStats::new();
        stats.record(RequestOutcome::Success, false, 0.02, 100);
        stats.record(RequestOutcome::Success, false, 0.04, 300);
        let snap = stats.snapshot();
        assert!((snap.avg_latency_ms - 200.0).abs() < f64::EPSILON);
        assert!((snap.avg_cost_usd - 0.03).abs() < 1e-9);
    }

    #[test]
    fn test_micro_dollar_accounting_avoids_drift() {
        let stats = OrchestratorStats::new();
        for _ in 0..1000 {
            stats.record(RequestOutcome::Success, false, 0.000001, 1);
        }
        let snap = stats.snapshot();
        assert!((snap.avg_cost_usd - 0.000001).abs() < 1e-12);
    }

    #[test]
    fn test_negative_cost_is_clamped() {
        let stats = OrchestratorStats::new();
        stats.record(RequestOutcome::Success, false, -1.0, 1);
        assert!(stats.snapshot().avg_cost_usd.abs() < f64::EPSILON);
    }

    #[test]
    fn test_reset_zeroes_everything() {
        let stats = OrchestratorStats::new();
        stats.record(RequestOutcome::Fallback, true, 0.01, 100);
        stats.reset();
        let snap = stats.snapshot();
        assert_eq!(snap.total_requests, 0);
        assert_eq!(snap.fallback_requests, 0);
        assert!(snap.avg_cost_usd.abs() < f64::EPSILON);
    }
}

//! Orchestrator configuration.
//!
//! Consumed as a pre-validated, immutable struct — the process owner builds
//! it once (from whatever source it likes) and hands it to
//! [`Orchestrator::new`](crate::orchestrator::Orchestrator::new). No
//! environment-variable loading happens here.
//!
//! Every field has a documented default, so `OrchestratorConfig::default()`
//! yields a runnable configuration for tests and demos.

use crate::planner::ProcessingProfile;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ── Default value functions ──────────────────────────────────────────────

/// Default per-request cost ceiling: $0.05.
fn default_cost_ceiling() -> f64 {
    0.05
}

/// Default complexity score above which decomposition is required.
fn default_decomposition_threshold() -> f64 {
    0.7
}

/// Default cosine similarity required for a cache hit.
fn default_similarity_threshold() -> f64 {
    0.97
}

/// Default cache capacity: 1 000 entries.
fn default_cache_max_size() -> usize {
    1000
}

/// Default cache entry TTL: 1 hour. Zero disables TTL expiry.
fn default_cache_ttl_secs() -> u64 {
    3600
}

/// Default minimal response length worth caching.
fn default_min_cache_payload_len() -> usize {
    24
}

/// Default fingerprint dimensionality.
fn default_fingerprint_dim() -> usize {
    64
}

/// Default base cost per request: $0.01.
fn default_base_cost() -> f64 {
    0.01
}

/// Default marginal cost per 1 000 estimated tokens: $0.002.
fn default_per_token_rate() -> f64 {
    0.002
}

/// Default consecutive failures before a breaker opens.
fn default_breaker_failure_threshold() -> usize {
    5
}

/// Default breaker cooldown before a recovery probe: 30s.
fn default_breaker_timeout_secs() -> u64 {
    30
}

/// Default idle lifetime of a pooled connection: 5 minutes.
fn default_connection_max_idle_secs() -> u64 {
    300
}

/// Default idle-sweep interval: 60s.
fn default_sweep_interval_secs() -> u64 {
    60
}

/// Default per-backend-call ceiling: 10s.
fn default_per_call_timeout_ms() -> u64 {
    10_000
}

/// Default whole-request ceiling: 30s.
fn default_request_timeout_ms() -> u64 {
    30_000
}

/// Default bound on concurrent decomposition sub-queries.
fn default_max_parallelism() -> usize {
    4
}

/// Default resource sampling interval: 5s.
fn default_monitor_interval_secs() -> u64 {
    5
}

/// Default process memory ceiling: 1 GiB.
fn default_max_memory_mb() -> f64 {
    1024.0
}

/// Default process CPU ceiling: 85%.
fn default_max_cpu_percent() -> f32 {
    85.0
}

/// Default runtime worker-thread ceiling.
fn default_max_threads() -> usize {
    256
}

// ── Config sections ──────────────────────────────────────────────────────

/// Process resource ceilings checked by the resource monitor.
///
/// Each limit is evaluated independently on every sampling tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Maximum resident memory, MB.
    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: f64,
    /// Maximum process CPU usage, percent.
    #[serde(default = "default_max_cpu_percent")]
    pub max_cpu_percent: f32,
    /// Maximum active runtime threads.
    #[serde(default = "default_max_threads")]
    pub max_threads: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_memory_mb: default_max_memory_mb(),
            max_cpu_percent: default_max_cpu_percent(),
            max_threads: default_max_threads(),
        }
    }
}

/// Root configuration for one orchestrator instance.
///
/// Immutable once constructed; components copy the fields they need.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Accuracy/cost/latency trade-off profile driving plan synthesis.
    #[serde(default)]
    pub profile: ProcessingProfile,
    /// Per-request cost ceiling, USD. The degradation ladder strips plan
    /// options until the estimate fits under this.
    #[serde(default = "default_cost_ceiling")]
    pub cost_ceiling: f64,
    /// Complexity score above which a request requires decomposition.
    #[serde(default = "default_decomposition_threshold")]
    pub decomposition_threshold: f64,
    /// Cosine similarity a stored fingerprint must reach to count as a hit.
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
    /// Maximum number of cached responses (count-based LRU).
    #[serde(default = "default_cache_max_size")]
    pub cache_max_size: usize,
    /// Cache entry time-to-live in seconds; 0 disables TTL expiry.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Responses shorter than this are not cached.
    #[serde(default = "default_min_cache_payload_len")]
    pub min_cache_payload_len: usize,
    /// Dimensionality of request fingerprints.
    #[serde(default = "default_fingerprint_dim")]
    pub fingerprint_dim: usize,
    /// Base cost per request, USD, before complexity multipliers.
    #[serde(default = "default_base_cost")]
    pub base_cost: f64,
    /// Marginal cost per 1 000 estimated tokens, USD.
    #[serde(default = "default_per_token_rate")]
    pub per_token_rate: f64,
    /// Consecutive failures before a dependency's breaker opens.
    #[serde(default = "default_breaker_failure_threshold")]
    pub breaker_failure_threshold: usize,
    /// Seconds an open breaker waits before allowing a recovery probe.
    #[serde(default = "default_breaker_timeout_secs")]
    pub breaker_timeout_secs: u64,
    /// Seconds a pooled connection may sit idle before the sweep closes it.
    #[serde(default = "default_connection_max_idle_secs")]
    pub connection_max_idle_secs: u64,
    /// Interval of the idle-connection sweep task, seconds.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Ceiling for a single backend call, milliseconds.
    #[serde(default = "default_per_call_timeout_ms")]
    pub per_call_timeout_ms: u64,
    /// Wall-clock ceiling for a whole request, milliseconds. When it
    /// elapses the fallback path runs even if a backend call is still
    /// outstanding.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Maximum concurrent decomposition sub-queries.
    #[serde(default = "default_max_parallelism")]
    pub max_parallelism: usize,
    /// Resource sampling interval, seconds.
    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,
    /// Process resource ceilings.
    #[serde(default)]
    pub limits: ResourceLimits,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            profile: ProcessingProfile::default(),
            cost_ceiling: default_cost_ceiling(),
            decomposition_threshold: default_decomposition_threshold(),
            similarity_threshold: default_similarity_threshold(),
            cache_max_size: default_cache_max_size(),
            cache_ttl_secs: default_cache_ttl_secs(),
            min_cache_payload_len: default_min_cache_payload_len(),
            fingerprint_dim: default_fingerprint_dim(),
            base_cost: default_base_cost(),
            per_token_rate: default_per_token_rate(),
            breaker_failure_threshold: default_breaker_failure_threshold(),
            breaker_timeout_secs: default_breaker_timeout_secs(),
            connection_max_idle_secs: default_connection_max_idle_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
            per_call_timeout_ms: default_per_call_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            max_parallelism: default_max_parallelism(),
            monitor_interval_secs: default_monitor_interval_secs(),
            limits: ResourceLimits::default(),
        }
    }
}

impl OrchestratorConfig {
    /// Per-backend-call ceiling as a [`Duration`].
    pub fn per_call_timeout(&self) -> Duration {
        Duration::from_millis(self.per_call_timeout_ms)
    }

    /// Whole-request ceiling as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Breaker cooldown as a [`Duration`].
    pub fn breaker_timeout(&self) -> Duration {
        Duration::from_secs(self.breaker_timeout_secs)
    }

    /// Idle-connection lifetime as a [`Duration`].
    pub fn connection_max_idle(&self) -> Duration {
        Duration::from_secs(self.connection_max_idle_secs)
    }

    /// Idle-sweep interval as a [`Duration`].
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    /// Resource sampling interval as a [`Duration`].
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }
}

//! # adaptive-orchestrator
//!
//! An adaptive request-processing orchestrator for expensive, unreliable
//! backend pipelines.
//!
//! ## Architecture
//!
//! For each request the orchestrator analyses its characteristics, synthesizes
//! a processing plan under a cost/latency/accuracy budget, and executes it with
//! caching and fault isolation:
//!
//! ```text
//! Request → Analyzer → [cache probe] → Planner → decomposition → primary → verification
//!                           │                     (through pooled, breaker-guarded
//!                           └── hit: verified reply    backend connections)
//! ```
//!
//! Background tasks sample process resources and sweep idle connections;
//! every backend dependency is guarded by its own circuit breaker.

// ── Lint policy (aerospace-grade) ─────────────────────────────────────────
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(missing_docs)]

use std::collections::HashMap;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub mod analyzer;
pub mod backend;
pub mod breaker;
pub mod cache;
pub mod config;
pub mod metrics;
pub mod monitor;
pub mod orchestrator;
pub mod planner;
pub mod pool;
pub mod stats;

// Re-exports for convenience
pub use analyzer::{ComplexityClass, Intent, RequestAnalyzer, RequestCharacteristics};
pub use backend::{
    DecompositionPipeline, EchoPrimary, MultimodalPipeline, Payload, PrimaryPipeline,
    VerificationPipeline,
};
pub use breaker::{BreakerState, CircuitBreaker};
pub use cache::{Fingerprinter, HashProjectionFingerprinter, ResponseCache};
pub use config::OrchestratorConfig;
pub use monitor::{ResourceMonitor, ResourceSnapshot, ResourceViolation};
pub use orchestrator::{Backends, Orchestrator};
pub use planner::{
    FeatureHealth, FeatureStatus, PlanSynthesizer, ProcessingPlan, ProcessingProfile,
};

/// Initialise the global tracing subscriber.
///
/// Reads the `LOG_FORMAT` environment variable to choose output format:
/// - `"json"` — structured JSON output for production log aggregators
/// - anything else (including unset) — human-readable pretty output
///
/// Filter level is controlled by `RUST_LOG` (e.g. `RUST_LOG=info`).
///
/// # Errors
///
/// Returns [`OrchestratorError::Other`] if the global subscriber has already
/// been set (e.g. by a previous call or a test harness).
pub fn init_tracing() -> Result<(), OrchestratorError> {
    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let result = match format.as_str() {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .with_current_span(true)
            .with_span_list(true)
            .try_init(),
        _ => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init(),
    };

    result.map_err(|e| OrchestratorError::Other(format!("tracing init failed: {e}")))
}

/// Top-level orchestrator errors.
///
/// Every failure surface is mapped to a variant here. The [`kind`] label is
/// the only error detail ever echoed to callers in degraded responses — raw
/// messages stay in logs.
///
/// [`kind`]: OrchestratorError::kind
#[derive(Error, Debug)]
pub enum OrchestratorError {
    /// The request was empty or malformed and was rejected before any
    /// backend call.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The dependency's circuit breaker is open; the call was rejected
    /// without touching the backend.
    #[error("circuit open for dependency `{dependency}`")]
    CircuitOpen {
        /// Dependency id whose breaker rejected the call.
        dependency: String,
    },

    /// A backend call failed (network, protocol, or internal backend error).
    #[error("backend failure: {0}")]
    Backend(String),

    /// A per-call or per-request ceiling elapsed before completion.
    #[error("{scope} timed out after {waited_ms}ms")]
    Timeout {
        /// What timed out (`"backend call"` or `"request"`).
        scope: &'static str,
        /// How long was waited, in milliseconds.
        waited_ms: u64,
    },

    /// The response cache hit unusable state (poisoned lock, malformed
    /// fingerprint). Always treated as a miss, never propagated.
    #[error("cache corruption: {0}")]
    CacheCorruption(String),

    /// Catch-all for errors that do not fit a specific variant.
    #[error("{0}")]
    Other(String),
}

impl OrchestratorError {
    /// Stable, non-sensitive label for this error class.
    ///
    /// Safe to embed in caller-facing degraded responses and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid-input",
            Self::CircuitOpen { .. } => "circuit-open",
            Self::Backend(_) => "backend-error",
            Self::Timeout { .. } => "timeout",
            Self::CacheCorruption(_) => "cache-corruption",
            Self::Other(_) => "internal",
        }
    }
}

/// Verdict returned by the consistency-verification pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Verdict {
    /// The answer is consistent with the request.
    Consistent,
    /// The verifier could not decide either way.
    Uncertain,
    /// The verifier judged the answer inconsistent.
    Rejected,
}

/// An incoming request submitted by a client.
#[derive(Debug, Clone)]
pub struct Request {
    /// Unique identifier for this request, used for trace correlation.
    pub id: String,
    /// The raw user-supplied request text.
    pub text: String,
    /// References to media attached to or named by the request.
    pub media_refs: Vec<String>,
    /// Arbitrary key-value metadata (e.g., `client`, `timestamp`).
    pub meta: HashMap<String, String>,
}

impl Request {
    /// Create a request with a fresh id and no media or metadata.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            text: text.into(),
            media_refs: Vec::new(),
            meta: HashMap::new(),
        }
    }

    /// Attach media references.
    pub fn with_media(mut self, refs: Vec<String>) -> Self {
        self.media_refs = refs;
        self
    }
}

/// Where a response was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ResponseSource {
    /// Served from the similarity cache.
    Cache,
    /// Produced by the planned backend pipeline.
    Pipeline,
    /// Produced by the one-shot fallback path.
    Fallback,
    /// Fixed degraded response after both paths failed.
    Degraded,
}

impl ResponseSource {
    /// Lowercase label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Pipeline => "pipeline",
            Self::Fallback => "fallback",
            Self::Degraded => "degraded",
        }
    }
}

/// The orchestrator's reply. Always produced — the orchestrator never
/// surfaces an error to the caller.
#[derive(Debug, Clone)]
pub struct Response {
    /// Id of the request this responds to.
    pub request_id: String,
    /// Answer text. For degraded responses, a fixed explanatory message.
    pub text: String,
    /// Confidence reported by the producing backend (or cache entry).
    pub confidence: f64,
    /// Which path produced this response.
    pub source: ResponseSource,
    /// Reliability and degradation notes accumulated while processing.
    pub notes: Vec<String>,
    /// Verification verdict, when the verification pipeline ran.
    pub verdict: Option<Verdict>,
    /// Estimated cost of producing this response, USD.
    pub cost_usd: f64,
    /// Wall-clock time spent handling the request, milliseconds.
    pub latency_ms: u64,
}

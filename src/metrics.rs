//! Prometheus metrics for the orchestrator.
//!
//! ## Usage
//!
//! Call [`init_metrics`] once at process startup. The helper functions
//! (`inc_request`, `observe_request_duration`, …) are no-ops if
//! `init_metrics` was never called, so the orchestrator is always safe to
//! run — observability simply degrades gracefully.
//!
//! ## Metrics Exposed
//!
//! | Name | Type | Labels |
//! |------|------|--------|
//! | `orchestrator_requests_total` | Counter | `source` |
//! | `orchestrator_cache_events_total` | Counter | `event` |
//! | `orchestrator_resource_violations_total` | Counter | `kind` |
//! | `orchestrator_request_duration_seconds` | Histogram | `source` |

use crate::OrchestratorError;
use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;
use std::time::Duration;

/// All Prometheus metrics for the orchestrator, bundled together so they
/// can be stored in a single [`OnceLock`] and initialised atomically.
pub struct Metrics {
    /// Prometheus registry that owns all metric descriptors.
    pub registry: Registry,
    /// Requests handled, by response source.
    pub requests_total: CounterVec,
    /// Cache events (`hit`, `miss`, `insert`).
    pub cache_events: CounterVec,
    /// Resource limit violations, by kind.
    pub resource_violations: CounterVec,
    /// Request handling latency, by response source.
    pub request_duration: HistogramVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Initialise all Prometheus metrics and register them with a private
/// registry.
///
/// Calling it a second time is a no-op (returns `Ok(())`).
///
/// # Errors
///
/// Returns [`OrchestratorError::Other`] if metric construction or registry
/// registration fails (e.g., duplicate descriptor names).
pub fn init_metrics() -> Result<(), OrchestratorError> {
    if METRICS.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let requests_total = CounterVec::new(
        Opts::new("orchestrator_requests_total", "Requests handled"),
        &["source"],
    )
    .map_err(init_err)?;
    registry
        .register(Box::new(requests_total.clone()))
        .map_err(reg_err)?;

    let cache_events = CounterVec::new(
        Opts::new("orchestrator_cache_events_total", "Response cache events"),
        &["event"],
    )
    .map_err(init_err)?;
    registry
        .register(Box::new(cache_events.clone()))
        .map_err(reg_err)?;

    let resource_violations = CounterVec::new(
        Opts::new(
            "orchestrator_resource_violations_total",
            "Resource limit violations",
        ),
        &["kind"],
    )
    .map_err(init_err)?;
    registry
        .register(Box::new(resource_violations.clone()))
        .map_err(reg_err)?;

    let request_duration = HistogramVec::new(
        HistogramOpts::new(
            "orchestrator_request_duration_seconds",
            "Request handling latency",
        ),
        &["source"],
    )
    .map_err(init_err)?;
    registry
        .register(Box::new(request_duration.clone()))
        .map_err(reg_err)?;

    let _ = METRICS.set(Metrics {
        registry,
        requests_total,
        cache_events,
        resource_violations,
        request_duration,
    });

    Ok(())
}

fn init_err(e: prometheus::Error) -> OrchestratorError {
    OrchestratorError::Other(format!("metrics init failed: {e}"))
}

fn reg_err(e: prometheus::Error) -> OrchestratorError {
    OrchestratorError::Other(format!("metrics registration failed: {e}"))
}

/// Count one handled request by response source. No-op before init.
pub fn inc_request(source: &str) {
    if let Some(m) = METRICS.get() {
        m.requests_total.with_label_values(&[source]).inc();
    }
}

/// Count one cache event (`"hit"`, `"miss"`, `"insert"`). No-op before init.
pub fn inc_cache_event(event: &str) {
    if let Some(m) = METRICS.get() {
        m.cache_events.with_label_values(&[event]).inc();
    }
}

/// Count one resource violation by kind. No-op before init.
pub fn inc_resource_violation(kind: &str) {
    if let Some(m) = METRICS.get() {
        m.resource_violations.with_label_values(&[kind]).inc();
    }
}

/// Record request handling latency by response source. No-op before init.
pub fn observe_request_duration(source: &str, duration: Duration) {
    if let Some(m) = METRICS.get() {
        m.request_duration
            .with_label_values(&[source])
            .observe(duration.as_secs_f64());
    }
}

/// Render all metrics in Prometheus text exposition format.
///
/// Returns an empty string before [`init_metrics`].
pub fn gather() -> String {
    let Some(m) = METRICS.get() else {
        return String::new();
    };
    let families = m.registry.gather();
    let mut buffer = Vec::new();
    let encoder = TextEncoder::new();
    if encoder.encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

//! Top-level request orchestration.
//!
//! [`Orchestrator::handle`] is the single entry point: it analyses the
//! request, probes the similarity cache, synthesizes a processing plan
//! under the cost ceiling, executes the selected backends through pooled,
//! breaker-guarded connections, verifies the answer, updates the cache and
//! statistics, and falls back when anything on the primary path breaks.
//!
//! It fails closed but never throws to the caller — every internal failure
//! is converted into a degraded [`Response`] with an explanatory note, and
//! degraded responses carry only stable error-kind labels, never raw
//! exception text or backend identifiers.
//!
//! Construction is explicit dependency injection: build the orchestrator
//! once at process start, call [`start`](Orchestrator::start) to launch the
//! background monitor and sweep tasks, and [`shutdown`](Orchestrator::shutdown)
//! to stop them. No global state.

use crate::analyzer::{RequestAnalyzer, RequestCharacteristics};
use crate::backend::{
    DecompositionPipeline, MultimodalPipeline, Payload, PrimaryPipeline, VerificationPipeline,
};
use crate::breaker::{BreakerSnapshot, BreakerState};
use crate::cache::{Fingerprinter, HashProjectionFingerprinter, ResponseCache};
use crate::config::OrchestratorConfig;
use crate::metrics;
use crate::monitor::{ResourceMonitor, ResourceSnapshot};
use crate::planner::{
    FeatureHealth, FeatureStatus, PlanSynthesizer, ProcessingPlan, VerificationSettings,
};
use crate::pool::ConnectionManager;
use crate::stats::{OrchestratorStats, RequestOutcome, StatsSnapshot};
use crate::{OrchestratorError, Request, Response, ResponseSource, Verdict};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const DEP_PRIMARY: &str = "primary";
const DEP_DECOMPOSITION: &str = "decomposition";
const DEP_MULTIMODAL: &str = "multimodal";
const DEP_VERIFICATION: &str = "verification";

/// Fixed text of the degraded response. Failure kinds are appended as
/// notes; no internal detail is ever echoed.
const DEGRADED_TEXT: &str =
    "The service could not produce an answer for this request right now. \
     Both the planned processing path and the simplified fallback were \
     unavailable. Please retry later.";

/// The backend pipelines the orchestrator runs against.
///
/// Only the primary pipeline is mandatory; each optional pipeline that is
/// absent is reported as a disabled feature to the planner.
#[derive(Clone)]
pub struct Backends {
    /// Single-shot answer generation.
    pub primary: Arc<dyn PrimaryPipeline>,
    /// Optional decomposition/aggregation pipeline.
    pub decomposition: Option<Arc<dyn DecompositionPipeline>>,
    /// Optional cross-modal pipeline.
    pub multimodal: Option<Arc<dyn MultimodalPipeline>>,
    /// Optional consistency-verification pipeline.
    pub verification: Option<Arc<dyn VerificationPipeline>>,
}

impl Backends {
    /// Backends with only the primary pipeline configured.
    pub fn new(primary: Arc<dyn PrimaryPipeline>) -> Self {
        Self {
            primary,
            decomposition: None,
            multimodal: None,
            verification: None,
        }
    }

    /// Add the decomposition pipeline.
    pub fn with_decomposition(mut self, pipeline: Arc<dyn DecompositionPipeline>) -> Self {
        self.decomposition = Some(pipeline);
        self
    }

    /// Add the cross-modal pipeline.
    pub fn with_multimodal(mut self, pipeline: Arc<dyn MultimodalPipeline>) -> Self {
        self.multimodal = Some(pipeline);
        self
    }

    /// Add the verification pipeline.
    pub fn with_verification(mut self, pipeline: Arc<dyn VerificationPipeline>) -> Self {
        self.verification = Some(pipeline);
        self
    }
}

/// A pooled handle to one backend dependency.
#[derive(Clone)]
enum BackendConn {
    Primary(Arc<dyn PrimaryPipeline>),
    Decomposition(Arc<dyn DecompositionPipeline>),
    Multimodal(Arc<dyn MultimodalPipeline>),
    Verification(Arc<dyn VerificationPipeline>),
}

impl BackendConn {
    async fn ping(&self) -> Result<(), OrchestratorError> {
        match self {
            Self::Primary(p) => p.ping().await,
            Self::Decomposition(d) => d.ping().await,
            Self::Multimodal(m) => m.ping().await,
            Self::Verification(v) => v.ping().await,
        }
    }
}

/// Per-request context owned by the task handling that request.
struct RequestContext {
    chars: RequestCharacteristics,
    plan: ProcessingPlan,
    started: Instant,
}

/// Overall service condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    /// All breakers closed.
    Healthy,
    /// At least one optional dependency's breaker is open.
    Degraded,
    /// The primary dependency's breaker is open.
    Unhealthy,
}

/// Snapshot of service health.
#[derive(Debug, Clone)]
pub struct HealthReport {
    /// Overall condition.
    pub status: HealthStatus,
    /// State of every breaker created so far.
    pub breakers: Vec<BreakerSnapshot>,
    /// Most recent resource snapshot, if the monitor has sampled yet.
    pub resource: Option<ResourceSnapshot>,
}

/// Top-level coordinator. See the module docs for the processing algorithm.
pub struct Orchestrator {
    config: OrchestratorConfig,
    analyzer: RequestAnalyzer,
    planner: PlanSynthesizer,
    fingerprinter: Arc<dyn Fingerprinter>,
    cache: Arc<ResponseCache>,
    pool: Arc<ConnectionManager<BackendConn>>,
    monitor: Arc<ResourceMonitor>,
    stats: Arc<OrchestratorStats>,
    backends: Backends,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Build an orchestrator with the default hash-projection fingerprinter.
    pub fn new(config: OrchestratorConfig, backends: Backends) -> Self {
        let fingerprinter = Arc::new(HashProjectionFingerprinter::new(config.fingerprint_dim));
        Self::with_fingerprinter(config, backends, fingerprinter)
    }

    /// Build an orchestrator with a custom fingerprint source.
    pub fn with_fingerprinter(
        config: OrchestratorConfig,
        backends: Backends,
        fingerprinter: Arc<dyn Fingerprinter>,
    ) -> Self {
        let cache = Arc::new(ResponseCache::new(
            config.cache_max_size,
            config.cache_ttl_secs,
            config.similarity_threshold,
        ));
        let pool = Arc::new(ConnectionManager::new(
            config.breaker_failure_threshold,
            config.breaker_timeout(),
            config.connection_max_idle(),
        ));
        let monitor = Arc::new(ResourceMonitor::new(config.limits, config.monitor_interval()));

        // Wire the monitor to the structures it can reclaim from.
        {
            let cache = Arc::clone(&cache);
            monitor.register_reclaim_hook(Arc::new(move || cache.purge_expired()));
        }
        {
            let pool = Arc::clone(&pool);
            monitor.register_reclaim_hook(Arc::new(move || {
                pool.sweep_now();
            }));
        }
        {
            let pool = Arc::clone(&pool);
            monitor.set_connection_gauge(Arc::new(move || pool.len()));
        }

        Self {
            analyzer: RequestAnalyzer::new(
                config.decomposition_threshold,
                config.base_cost,
                config.per_token_rate,
            ),
            planner: PlanSynthesizer::new(config.cost_ceiling),
            fingerprinter,
            cache,
            pool,
            monitor,
            stats: Arc::new(OrchestratorStats::new()),
            backends,
            shutdown: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
            config,
        }
    }

    /// Launch the background resource monitor and idle-connection sweep.
    ///
    /// Idempotent: calling it again while running is a no-op.
    pub fn start(&self) {
        let Ok(mut shutdown_slot) = self.shutdown.lock() else {
            return;
        };
        if shutdown_slot.is_some() {
            return;
        }
        let (tx, rx) = watch::channel(false);
        let monitor_task = self.monitor.start(rx.clone());
        let sweep_task = self.pool.start_sweep(self.config.sweep_interval(), rx);
        *shutdown_slot = Some(tx);
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(monitor_task);
            tasks.push(sweep_task);
        }
        info!("orchestrator background tasks started");
    }

    /// Stop background tasks and drain the connection pool.
    pub async fn shutdown(&self) {
        let sender = self.shutdown.lock().ok().and_then(|mut slot| slot.take());
        if let Some(sender) = sender {
            let _ = sender.send(true);
        }
        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .map(|mut tasks| tasks.drain(..).collect())
            .unwrap_or_default();
        for task in tasks {
            let _ = task.await;
        }
        self.pool.drain();
        info!("orchestrator shut down");
    }

    /// Handle one request. Never returns an error: all internal failures
    /// become a degraded [`Response`].
    pub async fn handle(&self, request: Request) -> Response {
        let started = Instant::now();

        let chars = match self.analyzer.analyze(&request.text) {
            Ok(chars) => chars,
            Err(e) => {
                warn!(request_id = %request.id, error = %e, "request rejected before processing");
                return self.finish(
                    Response {
                        request_id: request.id,
                        text: "The request could not be processed: the input was empty or \
                               malformed."
                            .to_string(),
                        confidence: 0.0,
                        source: ResponseSource::Degraded,
                        notes: vec![format!("request rejected: {}", e.kind())],
                        verdict: None,
                        cost_usd: 0.0,
                        latency_ms: elapsed_ms(started),
                    },
                    RequestOutcome::Degraded,
                    false,
                );
            }
        };

        let fingerprint = self.fingerprinter.fingerprint(&request.text);

        if let Some((payload, confidence)) = self.cache.get(&fingerprint) {
            metrics::inc_cache_event("hit");
            return self.serve_cache_hit(request, payload, confidence, started).await;
        }
        metrics::inc_cache_event("miss");

        let health = self.feature_health().await;
        let plan = self.planner.synthesize(&chars, self.config.profile, &health);
        let ctx = RequestContext {
            chars,
            plan,
            started,
        };

        let attempt = tokio::time::timeout(
            self.config.request_timeout(),
            self.execute_plan(&request, &ctx),
        )
        .await;

        let planned_failure = match attempt {
            Ok(Ok((payload, notes, verdict))) => {
                if ctx.plan.use_cache && payload.text.len() > self.config.min_cache_payload_len {
                    self.cache
                        .put(fingerprint, payload.clone(), payload.confidence);
                    metrics::inc_cache_event("insert");
                }
                return self.finish(
                    Response {
                        request_id: request.id,
                        text: payload.text,
                        confidence: payload.confidence,
                        source: ResponseSource::Pipeline,
                        notes,
                        verdict,
                        cost_usd: ctx.plan.estimated_cost,
                        latency_ms: elapsed_ms(ctx.started),
                    },
                    RequestOutcome::Success,
                    false,
                );
            }
            Ok(Err(e)) => e,
            // The outstanding backend call is abandoned, not killed;
            // accounting for it happens in its drop guards.
            Err(_) => OrchestratorError::Timeout {
                scope: "request",
                waited_ms: self.config.request_timeout_ms,
            },
        };

        warn!(
            request_id = %request.id,
            error = %planned_failure,
            "planned execution failed, attempting fallback"
        );

        match self.execute_fallback(&request).await {
            Ok(payload) => self.finish(
                Response {
                    request_id: request.id,
                    text: payload.text,
                    confidence: payload.confidence,
                    source: ResponseSource::Fallback,
                    notes: vec![format!(
                        "planned path failed: {}; answered by simplified fallback",
                        planned_failure.kind()
                    )],
                    verdict: None,
                    cost_usd: ctx.chars.estimated_cost,
                    latency_ms: elapsed_ms(ctx.started),
                },
                RequestOutcome::Fallback,
                false,
            ),
            Err(fallback_failure) => {
                warn!(
                    request_id = %request.id,
                    error = %fallback_failure,
                    "fallback failed, returning degraded response"
                );
                self.finish(
                    Response {
                        request_id: request.id,
                        text: DEGRADED_TEXT.to_string(),
                        confidence: 0.0,
                        source: ResponseSource::Degraded,
                        notes: vec![
                            format!("planned path failed: {}", planned_failure.kind()),
                            format!("fallback failed: {}", fallback_failure.kind()),
                        ],
                        verdict: None,
                        cost_usd: 0.0,
                        latency_ms: elapsed_ms(ctx.started),
                    },
                    RequestOutcome::Degraded,
                    false,
                )
            }
        }
    }

    /// Current request statistics.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Current cache counters.
    pub fn cache_stats(&self) -> crate::cache::CacheStats {
        self.cache.stats()
    }

    /// Current service health.
    pub async fn health(&self) -> HealthReport {
        let breakers = self.pool.breaker_states().await;
        let primary_open = breakers
            .iter()
            .any(|b| b.dependency == DEP_PRIMARY && b.state == BreakerState::Open);
        let any_open = breakers.iter().any(|b| b.state == BreakerState::Open);
        let status = if primary_open {
            HealthStatus::Unhealthy
        } else if any_open {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        HealthReport {
            status,
            breakers,
            resource: self.monitor.latest(),
        }
    }

    /// The resource monitor, for registering additional violation handlers.
    pub fn monitor(&self) -> &Arc<ResourceMonitor> {
        &self.monitor
    }

    // ── Internal paths ──────────────────────────────────────────────────

    /// A cache hit is optionally re-verified with relaxed settings, then
    /// returned. It never re-invokes the generation backends.
    async fn serve_cache_hit(
        &self,
        request: Request,
        payload: Payload,
        confidence: f64,
        started: Instant,
    ) -> Response {
        let mut notes = Vec::new();
        let mut verdict = None;

        if self.backends.verification.is_some() {
            let settings = VerificationSettings::for_profile(self.config.profile).relaxed();
            match self
                .call_verification(&request.text, &payload, &settings)
                .await
            {
                Ok((v, _)) => {
                    if matches!(v, Verdict::Rejected | Verdict::Uncertain) {
                        notes.push(
                            "reliability warning: cached answer did not fully verify".to_string(),
                        );
                    }
                    verdict = Some(v);
                }
                Err(e) => {
                    debug!(error = %e, "cache-hit verification unavailable");
                    notes.push("verification unavailable for cached answer".to_string());
                }
            }
        }

        self.finish(
            Response {
                request_id: request.id,
                text: payload.text,
                confidence,
                source: ResponseSource::Cache,
                notes,
                verdict,
                cost_usd: 0.0,
                latency_ms: elapsed_ms(started),
            },
            RequestOutcome::Success,
            true,
        )
    }

    /// Execute the plan's selected backends in sequence:
    /// multimodal/decomposition → primary → verification.
    ///
    /// Optional-component errors degrade to notes; primary-path errors
    /// propagate and trigger the fallback.
    async fn execute_plan(
        &self,
        request: &Request,
        ctx: &RequestContext,
    ) -> Result<(Payload, Vec<String>, Option<Verdict>), OrchestratorError> {
        let mut notes = Vec::new();
        let mut payload = None;

        if ctx.plan.use_multimodal {
            match self
                .call_multimodal(&request.text, &request.media_refs)
                .await
            {
                Ok(answer) => payload = Some(answer),
                Err(e) => {
                    debug!(error = %e, "multimodal pipeline unavailable, continuing text-only");
                    notes.push("media processing unavailable; answered from text only".to_string());
                }
            }
        }

        let payload = match payload {
            Some(answer) => answer,
            None if ctx.plan.use_decomposition => {
                self.decompose_and_aggregate(&request.text).await?
            }
            None => self.call_primary(&request.text).await?,
        };

        let mut verdict = None;
        if ctx.plan.use_verification {
            match self
                .call_verification(&request.text, &payload, &ctx.plan.verification)
                .await
            {
                Ok((v, _)) => {
                    if matches!(v, Verdict::Rejected | Verdict::Uncertain) {
                        notes.push(
                            "reliability warning: the answer did not fully verify".to_string(),
                        );
                    }
                    verdict = Some(v);
                }
                Err(e) => {
                    debug!(error = %e, "verification unavailable");
                    notes.push("verification unavailable".to_string());
                }
            }
        }

        Ok((payload, notes, verdict))
    }

    /// One-shot fallback: the simplest viable plan, primary backend only.
    async fn execute_fallback(&self, request: &Request) -> Result<Payload, OrchestratorError> {
        info!(request_id = %request.id, "running fallback with simplest plan");
        self.call_primary(&request.text).await
    }

    /// Decompose, fan sub-queries out to the primary backend bounded by the
    /// configured parallelism, join, and aggregate.
    async fn decompose_and_aggregate(&self, text: &str) -> Result<Payload, OrchestratorError> {
        let sub_texts = self.call_decompose(text).await?;
        debug!(sub_queries = sub_texts.len(), "request decomposed");

        let semaphore = Arc::new(Semaphore::new(self.config.max_parallelism.max(1)));
        let sub_futures = sub_texts.iter().map(|sub| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let _permit = semaphore.acquire().await.map_err(|_| {
                    OrchestratorError::Other("parallelism limiter closed".to_string())
                })?;
                self.call_primary(sub).await
            }
        });
        let results = futures::future::join_all(sub_futures).await;

        let mut parts = Vec::with_capacity(results.len());
        for result in results {
            parts.push(result?);
        }
        self.call_aggregate(parts).await
    }

    /// Feature health as seen by the planner: a feature is enabled when its
    /// backend is configured and its breaker is not open.
    async fn feature_health(&self) -> FeatureHealth {
        let breakers = self.pool.breaker_states().await;
        let open = |dep: &str| {
            breakers
                .iter()
                .any(|b| b.dependency == dep && b.state == BreakerState::Open)
        };
        let status = |configured: bool, dep: &str| {
            if !configured {
                FeatureStatus::Disabled
            } else if open(dep) {
                FeatureStatus::Degraded {
                    reason: "circuit open".to_string(),
                }
            } else {
                FeatureStatus::Enabled
            }
        };
        FeatureHealth {
            decomposition: status(self.backends.decomposition.is_some(), DEP_DECOMPOSITION),
            multimodal: status(self.backends.multimodal.is_some(), DEP_MULTIMODAL),
            verification: status(self.backends.verification.is_some(), DEP_VERIFICATION),
        }
    }

    // ── Backend calls (pooled, breaker-guarded, deadline-bounded) ───────

    async fn call_primary(&self, text: &str) -> Result<Payload, OrchestratorError> {
        let pipeline = Arc::clone(&self.backends.primary);
        let deadline = self.config.per_call_timeout();
        self.pool
            .with_connection(
                DEP_PRIMARY,
                move || async move { Ok(BackendConn::Primary(pipeline)) },
                |conn: BackendConn| async move { conn.ping().await },
                move |conn| async move {
                    let BackendConn::Primary(pipeline) = conn else {
                        return Err(handle_mismatch());
                    };
                    with_deadline(deadline, pipeline.generate(text)).await
                },
            )
            .await
    }

    async fn call_decompose(&self, text: &str) -> Result<Vec<String>, OrchestratorError> {
        let Some(pipeline) = self.backends.decomposition.as_ref().map(Arc::clone) else {
            return Err(OrchestratorError::Other(
                "decomposition pipeline not configured".to_string(),
            ));
        };
        let deadline = self.config.per_call_timeout();
        self.pool
            .with_connection(
                DEP_DECOMPOSITION,
                move || async move { Ok(BackendConn::Decomposition(pipeline)) },
                |conn: BackendConn| async move { conn.ping().await },
                move |conn| async move {
                    let BackendConn::Decomposition(pipeline) = conn else {
                        return Err(handle_mismatch());
                    };
                    with_deadline(deadline, pipeline.decompose(text)).await
                },
            )
            .await
    }

    async fn call_aggregate(&self, parts: Vec<Payload>) -> Result<Payload, OrchestratorError> {
        let Some(pipeline) = self.backends.decomposition.as_ref().map(Arc::clone) else {
            return Err(OrchestratorError::Other(
                "decomposition pipeline not configured".to_string(),
            ));
        };
        let deadline = self.config.per_call_timeout();
        self.pool
            .with_connection(
                DEP_DECOMPOSITION,
                move || async move { Ok(BackendConn::Decomposition(pipeline)) },
                |conn: BackendConn| async move { conn.ping().await },
                move |conn| async move {
                    let BackendConn::Decomposition(pipeline) = conn else {
                        return Err(handle_mismatch());
                    };
                    with_deadline(deadline, pipeline.aggregate(parts)).await
                },
            )
            .await
    }

    async fn call_multimodal(
        &self,
        text: &str,
        media_refs: &[String],
    ) -> Result<Payload, OrchestratorError> {
        let Some(pipeline) = self.backends.multimodal.as_ref().map(Arc::clone) else {
            return Err(OrchestratorError::Other(
                "multimodal pipeline not configured".to_string(),
            ));
        };
        let deadline = self.config.per_call_timeout();
        self.pool
            .with_connection(
                DEP_MULTIMODAL,
                move || async move { Ok(BackendConn::Multimodal(pipeline)) },
                |conn: BackendConn| async move { conn.ping().await },
                move |conn| async move {
                    let BackendConn::Multimodal(pipeline) = conn else {
                        return Err(handle_mismatch());
                    };
                    with_deadline(deadline, pipeline.process(text, media_refs)).await
                },
            )
            .await
    }

    async fn call_verification(
        &self,
        text: &str,
        payload: &Payload,
        settings: &VerificationSettings,
    ) -> Result<(Verdict, f64), OrchestratorError> {
        let Some(pipeline) = self.backends.verification.as_ref().map(Arc::clone) else {
            return Err(OrchestratorError::Other(
                "verification pipeline not configured".to_string(),
            ));
        };
        let deadline =
            Duration::from_millis(settings.timeout_ms).min(self.config.per_call_timeout());
        self.pool
            .with_connection(
                DEP_VERIFICATION,
                move || async move { Ok(BackendConn::Verification(pipeline)) },
                |conn: BackendConn| async move { conn.ping().await },
                move |conn| async move {
                    let BackendConn::Verification(pipeline) = conn else {
                        return Err(handle_mismatch());
                    };
                    with_deadline(deadline, pipeline.verify(text, payload, settings)).await
                },
            )
            .await
    }

    /// Record statistics and metrics for a finished request.
    fn finish(&self, response: Response, outcome: RequestOutcome, cache_hit: bool) -> Response {
        self.stats
            .record(outcome, cache_hit, response.cost_usd, response.latency_ms);
        metrics::inc_request(response.source.as_str());
        metrics::observe_request_duration(
            response.source.as_str(),
            Duration::from_millis(response.latency_ms),
        );
        debug!(
            request_id = %response.request_id,
            source = response.source.as_str(),
            latency_ms = response.latency_ms,
            "request finished"
        );
        response
    }
}

fn handle_mismatch() -> OrchestratorError {
    OrchestratorError::Other("connection handle mismatch".to_string())
}

/// Bound a backend call by `limit`, mapping elapsed deadlines to
/// [`OrchestratorError::Timeout`].
async fn with_deadline<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, OrchestratorError>>,
) -> Result<T, OrchestratorError> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(OrchestratorError::Timeout {
            scope: "backend call",
            waited_ms: limit.as_millis() as u64,
        }),
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use crate::backend::{EchoPrimary, LenientVerification, SplitDecomposition};
    use crate::planner::ProcessingProfile;

    fn test_config() -> OrchestratorConfig {
        OrchestratorConfig {
            min_cache_payload_len: 4,
            ..OrchestratorConfig::default()
        }
    }

    fn echo_orchestrator() -> Orchestrator {
        Orchestrator::new(
            test_config(),
            Backends::new(Arc::new(EchoPrimary::with_delay(0)))
                .with_decomposition(Arc::new(SplitDecomposition))
                .with_verification(Arc::new(LenientVerification)),
        )
    }

    #[tokio::test]
    async fn test_handle_produces_pipeline_response() {
        let orchestrator = echo_orchestrator();
        let response = orchestrator.handle(Request::new("What is AI?")).await;
        assert_eq!(response.source, ResponseSource::Pipeline);
        assert_eq!(response.text, "echo: What is AI?");
        assert_eq!(response.verdict, Some(Verdict::Consistent));
    }

    #[tokio::test]
    async fn test_empty_request_yields_degraded_response_without_backend_calls() {
        let orchestrator = echo_orchestrator();
        let response = orchestrator.handle(Request::new("   ")).await;
        assert_eq!(response.source, ResponseSource::Degraded);
        assert!(response.notes.iter().any(|n| n.contains("invalid-input")));
        // No connection was ever made.
        assert!(orchestrator.health().await.breakers.is_empty());
    }

    #[tokio::test]
    async fn test_feature_health_reflects_configuration() {
        let orchestrator = Orchestrator::new(
            test_config(),
            Backends::new(Arc::new(EchoPrimary::with_delay(0))),
        );
        let health = orchestrator.feature_health().await;
        assert_eq!(health.decomposition, FeatureStatus::Disabled);
        assert_eq!(health.multimodal, FeatureStatus::Disabled);
        assert_eq!(health.verification, FeatureStatus::Disabled);
    }

    #[tokio::test]
    async fn test_stats_accumulate_over_requests() {
        let orchestrator = echo_orchestrator();
        for _ in 0..3 {
            let _ = orchestrator.handle(Request::new("Hello there friend")).await;
        }
        let stats = orchestrator.stats();
        assert_eq!(stats.total_requests, 3);
        assert!((stats.success_rate - 1.0).abs() < f64::EPSILON);
        // Identical text: the second and third requests hit the cache.
        assert!(stats.cache_hit_rate > 0.5);
    }

    #[tokio::test]
    async fn test_health_is_healthy_after_successful_requests() {
        let orchestrator = echo_orchestrator();
        let _ = orchestrator.handle(Request::new("Hello there")).await;
        let health = orchestrator.health().await;
        assert_eq!(health.status, HealthStatus::Healthy);
        assert!(!health.breakers.is_empty());
    }

    #[tokio::test]
    async fn test_start_and_shutdown_lifecycle() {
        let orchestrator = echo_orchestrator();
        orchestrator.start();
        // Second start is a no-op.
        orchestrator.start();
        tokio::time::sleep(Duration::from_millis(20)).await;
        orchestrator.shutdown().await;
    }

    #[tokio::test]
    async fn test_high_accuracy_profile_uses_decomposition() {
        let config = OrchestratorConfig {
            profile: ProcessingProfile::HighAccuracy,
            cost_ceiling: 10.0,
            min_cache_payload_len: 4,
            ..OrchestratorConfig::default()
        };
        let orchestrator = Orchestrator::new(
            config,
            Backends::new(Arc::new(EchoPrimary::with_delay(0)))
                .with_decomposition(Arc::new(SplitDecomposition)),
        );
        let response = orchestrator
            .handle(Request::new("What is A? What is B?"))
            .await;
        assert_eq!(response.source, ResponseSource::Pipeline);
        // Two sub-answers joined by the aggregator.
        assert!(response.text.contains('\n'));
    }
}

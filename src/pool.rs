//! Pooled backend connections.
//!
//! ## Responsibility
//! Lazily create, health-check, and evict pooled backend handles. Creation
//! and use of every dependency run through that dependency's own
//! [`CircuitBreaker`] — breakers are created lazily and live for the
//! process lifetime, connections are evicted on probe failure or by the
//! idle sweep.
//!
//! ## Guarantees
//! - At most one live pooled connection per dependency id
//! - Checkout/checkin metrics are updated on every use, success or failure
//!   (checkin happens via a drop guard on all exit paths)
//! - The idle sweep runs on its own background task, never on the request
//!   path
//!
//! ## NOT Responsible For
//! - Deciding which backends to call (see: orchestrator.rs)
//! - Per-call timeouts (the orchestrator wraps operations)

use crate::breaker::{BreakerSnapshot, CircuitBreaker, CircuitBreakerError};
use crate::OrchestratorError;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A pooled backend handle with its usage metrics.
#[derive(Debug, Clone)]
struct PooledConnection<H> {
    handle: H,
    created_at: Instant,
    last_used_at: Instant,
    use_count: u64,
    busy_total: Duration,
}

impl<H> PooledConnection<H> {
    fn new(handle: H) -> Self {
        let now = Instant::now();
        Self {
            handle,
            created_at: now,
            last_used_at: now,
            use_count: 0,
            busy_total: Duration::ZERO,
        }
    }
}

/// Usage metrics of one pooled connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionMetrics {
    /// Dependency id this connection serves.
    pub id: String,
    /// Times the connection has been checked out.
    pub use_count: u64,
    /// Age since creation.
    pub age: Duration,
    /// Time since the last checkout or checkin.
    pub idle: Duration,
    /// Cumulative time spent inside operations.
    pub busy_total: Duration,
}

/// Manages one pooled connection and one circuit breaker per dependency id.
pub struct ConnectionManager<H: Clone + Send + Sync + 'static> {
    pool: Arc<Mutex<HashMap<String, PooledConnection<H>>>>,
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
    breaker_failure_threshold: usize,
    breaker_timeout: Duration,
    max_idle: Duration,
}

impl<H: Clone + Send + Sync + 'static> ConnectionManager<H> {
    /// Create a manager.
    ///
    /// # Arguments
    ///
    /// * `breaker_failure_threshold` — Consecutive failures before a
    ///   dependency's breaker opens.
    /// * `breaker_timeout` — Breaker cooldown before a recovery probe.
    /// * `max_idle` — Idle lifetime after which the sweep closes a
    ///   connection.
    pub fn new(
        breaker_failure_threshold: usize,
        breaker_timeout: Duration,
        max_idle: Duration,
    ) -> Self {
        Self {
            pool: Arc::new(Mutex::new(HashMap::new())),
            breakers: Mutex::new(HashMap::new()),
            breaker_failure_threshold,
            breaker_timeout,
            max_idle,
        }
    }

    /// Run `op` against a live connection for `id`.
    ///
    /// Reuses the pooled handle when the health probe passes; otherwise
    /// evicts it and creates a fresh one via `factory`. The whole exchange
    /// runs through the dependency's circuit breaker, so an open breaker
    /// rejects the call before any backend work, and both creation and
    /// operation failures feed the breaker's failure counter.
    ///
    /// # Errors
    ///
    /// [`OrchestratorError::CircuitOpen`] when the breaker rejects the
    /// call; otherwise whatever `factory` or `op` returned.
    pub async fn with_connection<F, CFut, P, PFut, OF, OFut, T>(
        &self,
        id: &str,
        factory: F,
        probe: P,
        op: OF,
    ) -> Result<T, OrchestratorError>
    where
        F: FnOnce() -> CFut,
        CFut: Future<Output = Result<H, OrchestratorError>>,
        P: FnOnce(H) -> PFut,
        PFut: Future<Output = Result<(), OrchestratorError>>,
        OF: FnOnce(H) -> OFut,
        OFut: Future<Output = Result<T, OrchestratorError>>,
    {
        let breaker = self.breaker_for(id);
        let outcome = breaker
            .call(|| async move {
                let handle = self.checkout(id, factory, probe).await?;
                let _checkin = CheckinGuard {
                    pool: Arc::clone(&self.pool),
                    id: id.to_string(),
                    started: Instant::now(),
                };
                op(handle).await
            })
            .await;

        match outcome {
            Ok(value) => Ok(value),
            Err(CircuitBreakerError::Open) => Err(OrchestratorError::CircuitOpen {
                dependency: id.to_string(),
            }),
            Err(CircuitBreakerError::Failed(e)) => Err(e),
        }
    }

    /// Fetch the pooled handle for `id`, probing it first; create one
    /// through `factory` when absent or unhealthy.
    async fn checkout<F, CFut, P, PFut>(
        &self,
        id: &str,
        factory: F,
        probe: P,
    ) -> Result<H, OrchestratorError>
    where
        F: FnOnce() -> CFut,
        CFut: Future<Output = Result<H, OrchestratorError>>,
        P: FnOnce(H) -> PFut,
        PFut: Future<Output = Result<(), OrchestratorError>>,
    {
        let existing = self
            .pool
            .lock()
            .ok()
            .and_then(|pool| pool.get(id).map(|c| c.handle.clone()));

        if let Some(handle) = existing {
            if probe(handle.clone()).await.is_ok() {
                self.touch(id);
                return Ok(handle);
            }
            warn!(dependency = id, "pooled connection failed health check, evicting");
            if let Ok(mut pool) = self.pool.lock() {
                pool.remove(id);
            }
        }

        let handle = factory().await?;
        if let Ok(mut pool) = self.pool.lock() {
            pool.insert(id.to_string(), PooledConnection::new(handle.clone()));
        }
        self.touch(id);
        debug!(dependency = id, "connection created");
        Ok(handle)
    }

    /// Record a checkout on the pooled entry.
    fn touch(&self, id: &str) {
        if let Ok(mut pool) = self.pool.lock() {
            if let Some(conn) = pool.get_mut(id) {
                conn.use_count += 1;
                conn.last_used_at = Instant::now();
            }
        }
    }

    /// The breaker guarding `id`, created lazily on first use.
    pub fn breaker_for(&self, id: &str) -> CircuitBreaker {
        match self.breakers.lock() {
            Ok(mut breakers) => breakers
                .entry(id.to_string())
                .or_insert_with(|| {
                    CircuitBreaker::new(id, self.breaker_failure_threshold, self.breaker_timeout)
                })
                .clone(),
            Err(_) => {
                warn!(dependency = id, "breaker registry poisoned, using detached breaker");
                CircuitBreaker::new(id, self.breaker_failure_threshold, self.breaker_timeout)
            }
        }
    }

    /// Close and remove connections idle longer than the configured
    /// lifetime. Returns how many were removed.
    ///
    /// Also registered as a reclaim hook with the resource monitor.
    pub fn sweep_now(&self) -> usize {
        let max_idle = self.max_idle;
        if let Ok(mut pool) = self.pool.lock() {
            let before = pool.len();
            pool.retain(|id, conn| {
                let keep = conn.last_used_at.elapsed() <= max_idle;
                if !keep {
                    debug!(dependency = id.as_str(), "closing idle connection");
                }
                keep
            });
            let removed = before - pool.len();
            if removed > 0 {
                info!(removed = removed, "idle connection sweep");
            }
            removed
        } else {
            0
        }
    }

    /// Spawn the periodic idle sweep.
    ///
    /// Runs until the shutdown signal flips; a single long-lived task, not
    /// a timer chain.
    pub fn start_sweep(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        manager.sweep_now();
                    }
                    _ = shutdown.changed() => {
                        info!("connection sweep shutdown signal received");
                        break;
                    }
                }
            }
        })
    }

    /// Number of live pooled connections.
    pub fn len(&self) -> usize {
        self.pool.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// `true` when no connections are pooled.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Metrics of every pooled connection.
    pub fn connection_metrics(&self) -> Vec<ConnectionMetrics> {
        self.pool
            .lock()
            .map(|pool| {
                pool.iter()
                    .map(|(id, conn)| ConnectionMetrics {
                        id: id.clone(),
                        use_count: conn.use_count,
                        age: conn.created_at.elapsed(),
                        idle: conn.last_used_at.elapsed(),
                        busy_total: conn.busy_total,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Snapshots of every breaker created so far.
    pub async fn breaker_states(&self) -> Vec<BreakerSnapshot> {
        let breakers: Vec<CircuitBreaker> = self
            .breakers
            .lock()
            .map(|b| b.values().cloned().collect())
            .unwrap_or_default();
        let mut snapshots = Vec::with_capacity(breakers.len());
        for breaker in breakers {
            snapshots.push(breaker.snapshot().await);
        }
        snapshots
    }

    /// Drop every pooled connection (used at shutdown).
    pub fn drain(&self) {
        if let Ok(mut pool) = self.pool.lock() {
            let drained = pool.len();
            pool.clear();
            if drained > 0 {
                info!(drained = drained, "connection pool drained");
            }
        }
    }
}

/// Records checkin accounting when an operation finishes — on success,
/// failure, or cancellation alike.
struct CheckinGuard<H> {
    pool: Arc<Mutex<HashMap<String, PooledConnection<H>>>>,
    id: String,
    started: Instant,
}

impl<H> Drop for CheckinGuard<H> {
    fn drop(&mut self) {
        if let Ok(mut pool) = self.pool.lock() {
            if let Some(conn) = pool.get_mut(&self.id) {
                conn.busy_total += self.started.elapsed();
                conn.last_used_at = Instant::now();
            }
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────

//! Circuit breaker.
//!
//! Prevents cascading failures by refusing to call a dependency that is
//! known to be failing.
//!
//! ## States
//! - **Closed**: normal operation, calls flow through
//! - **Open**: dependency failing, calls rejected immediately
//! - **HalfOpen**: cooldown elapsed, one probe allowed through
//!
//! Transitions: Closed opens after `failure_threshold` *consecutive*
//! failures; Open becomes HalfOpen once the cooldown elapses; a HalfOpen
//! probe success closes the breaker and zeroes the counter, a probe failure
//! re-opens it without resetting the counter. One breaker guards exactly
//! one dependency id; breakers are never shared across ids.
//!
//! ## Usage
//!
//! ```no_run
//! use std::time::Duration;
//! use adaptive_orchestrator::breaker::{CircuitBreaker, CircuitBreakerError};
//! # #[tokio::main]
//! # async fn main() {
//! let breaker = CircuitBreaker::new("primary", 5, Duration::from_secs(30));
//!
//! match breaker.call(|| async {
//!     // Your backend call — replace with a real async call
//!     Ok::<&str, &str>("generated answer")
//! }).await {
//!     Ok(result) => println!("{result}"),
//!     Err(CircuitBreakerError::Open) => {
//!         // Fail fast, dependency known-bad
//!     }
//!     Err(CircuitBreakerError::Failed(e)) => {
//!         eprintln!("backend failed: {e}");
//!     }
//! }
//! # }
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Current state of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum BreakerState {
    /// Requests flow through normally.
    Closed,
    /// Requests are rejected without calling the dependency.
    Open,
    /// One probe request is allowed through to test recovery.
    HalfOpen,
}

impl BreakerState {
    /// Lowercase label for logs and health reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::Open => "open",
            Self::HalfOpen => "half-open",
        }
    }
}

/// Circuit breaker errors.
#[derive(Debug)]
pub enum CircuitBreakerError<E> {
    /// Circuit is open; the wrapped operation was not invoked.
    Open,
    /// The wrapped operation ran and failed.
    Failed(E),
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: usize,
    opened_at: Option<Instant>,
}

/// Point-in-time breaker state, for health reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerSnapshot {
    /// Dependency this breaker guards.
    pub dependency: String,
    /// Current state.
    pub state: BreakerState,
    /// Consecutive failures recorded since the last success.
    pub consecutive_failures: usize,
}

/// Per-dependency circuit breaker.
///
/// Cheap to clone — clones share state.
#[derive(Clone)]
pub struct CircuitBreaker {
    dependency: Arc<str>,
    inner: Arc<RwLock<BreakerInner>>,
    failure_threshold: usize,
    timeout: Duration,
}

impl CircuitBreaker {
    /// Create a breaker for one dependency.
    ///
    /// # Arguments
    ///
    /// * `dependency` — Id of the dependency this breaker guards.
    /// * `failure_threshold` — Consecutive failures before opening.
    /// * `timeout` — Cooldown before a recovery probe is allowed.
    pub fn new(dependency: impl Into<String>, failure_threshold: usize, timeout: Duration) -> Self {
        Self {
            dependency: Arc::from(dependency.into()),
            inner: Arc::new(RwLock::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            })),
            failure_threshold,
            timeout,
        }
    }

    /// Execute an operation through the breaker.
    ///
    /// In `Open` state with the cooldown still running, fails immediately
    /// with [`CircuitBreakerError::Open`] — no backend call is attempted.
    /// That is the point of the pattern: fail fast instead of piling up
    /// timeouts on a known-bad dependency.
    pub async fn call<F, Fut, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        {
            let mut inner = self.inner.write().await;
            if inner.state == BreakerState::Open {
                let cooled_down = inner
                    .opened_at
                    .map(|t| t.elapsed() > self.timeout)
                    .unwrap_or(true);
                if cooled_down {
                    inner.state = BreakerState::HalfOpen;
                    info!(
                        dependency = %self.dependency,
                        "circuit breaker: transitioning to half-open"
                    );
                } else {
                    debug!(
                        dependency = %self.dependency,
                        "circuit breaker: request rejected (open)"
                    );
                    return Err(CircuitBreakerError::Open);
                }
            }
        }

        let result = f().await;

        match &result {
            Ok(_) => self.record_success().await,
            Err(_) => self.record_failure().await,
        }

        result.map_err(CircuitBreakerError::Failed)
    }

    async fn record_success(&self) {
        let mut inner = self.inner.write().await;
        match inner.state {
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Closed;
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                info!(
                    dependency = %self.dependency,
                    "circuit breaker: closing (dependency recovered)"
                );
            }
            BreakerState::Closed => {
                if inner.consecutive_failures > 0 {
                    inner.consecutive_failures = 0;
                }
            }
            BreakerState::Open => {}
        }
    }

    async fn record_failure(&self) {
        let mut inner = self.inner.write().await;
        inner.consecutive_failures += 1;

        warn!(
            dependency = %self.dependency,
            state = inner.state.as_str(),
            failures = inner.consecutive_failures,
            threshold = self.failure_threshold,
            "circuit breaker: failure recorded"
        );

        match inner.state {
            BreakerState::Closed => {
                if inner.consecutive_failures >= self.failure_threshold {
                    inner.state = BreakerState::Open;
                    inner.opened_at = Some(Instant::now());
                    warn!(
                        dependency = %self.dependency,
                        failures = inner.consecutive_failures,
                        "circuit breaker: opening (threshold exceeded)"
                    );
                }
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(Instant::now());
                warn!(
                    dependency = %self.dependency,
                    "circuit breaker: reopening (recovery probe failed)"
                );
            }
            BreakerState::Open => {
                inner.opened_at = Some(Instant::now());
            }
        }
    }

    /// Id of the dependency this breaker guards.
    pub fn dependency(&self) -> &str {
        &self.dependency
    }

    /// Current state.
    pub async fn state(&self) -> BreakerState {
        self.inner.read().await.state
    }

    /// Point-in-time snapshot for health reporting.
    pub async fn snapshot(&self) -> BreakerSnapshot {
        let inner = self.inner.read().await;
        BreakerSnapshot {
            dependency: self.dependency.to_string(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
        }
    }

    /// Manually reset to closed (for maintenance).
    pub async fn reset(&self) {
        let mut inner = self.inner.write().await;
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        info!(dependency = %self.dependency, "circuit breaker: manually reset to closed");
    }

    /// Force open (for testing/maintenance).
    pub async fn trip(&self) {
        let mut inner = self.inner.write().await;
        inner.state = BreakerState::Open;
        inner.opened_at = Some(Instant::now());
        warn!(dependency = %self.dependency, "circuit breaker: manually tripped to open");
    }
}

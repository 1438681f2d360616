//! Background resource monitoring.
//!
//! ## Responsibility
//! Sample process resource usage on a fixed interval, keep a bounded
//! history, and invoke registered violation callbacks when a configured
//! limit is exceeded. Near-limit memory pressure triggers a best-effort
//! reclaim pass (cache expiry purge, idle-connection sweep).
//!
//! ## Guarantees
//! - Periodic: sampling runs at a configurable interval
//! - Non-blocking: monitoring runs in a single background tokio task
//! - Bounded: the snapshot history never exceeds 100 entries
//! - Independent: each limit (memory, CPU, threads) is checked on its own,
//!   so one tick can report several violations
//!
//! ## NOT Responsible For
//! - Acting on violations beyond the reclaim hooks (owners register
//!   callbacks and decide)
//! - Request-path work of any kind

use crate::config::ResourceLimits;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use sysinfo::{Pid, System};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Maximum retained snapshots.
const HISTORY_LIMIT: usize = 100;
/// Fraction of the memory limit above which reclaim hooks run.
const RECLAIM_FRACTION: f64 = 0.9;

/// Point-in-time process resource usage.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ResourceSnapshot {
    /// Resident memory, MB.
    pub memory_mb: f64,
    /// Process CPU usage, percent.
    pub cpu_percent: f32,
    /// Active runtime worker threads.
    pub active_threads: usize,
    /// Live pooled backend connections.
    pub active_connections: usize,
}

/// A limit exceeded by one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceViolation {
    /// Memory above the configured ceiling.
    Memory {
        /// Observed resident memory, MB.
        used_mb: f64,
        /// Configured ceiling, MB.
        limit_mb: f64,
    },
    /// CPU above the configured ceiling.
    Cpu {
        /// Observed CPU usage, percent.
        used_percent: f32,
        /// Configured ceiling, percent.
        limit_percent: f32,
    },
    /// Thread count above the configured ceiling.
    Threads {
        /// Observed thread count.
        used: usize,
        /// Configured ceiling.
        limit: usize,
    },
}

impl std::fmt::Display for ResourceViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory { used_mb, limit_mb } => {
                write!(f, "memory {used_mb:.1}MB over limit {limit_mb:.1}MB")
            }
            Self::Cpu {
                used_percent,
                limit_percent,
            } => write!(f, "cpu {used_percent:.1}% over limit {limit_percent:.1}%"),
            Self::Threads { used, limit } => {
                write!(f, "threads {used} over limit {limit}")
            }
        }
    }
}

/// Callback invoked once per violated limit per tick.
pub type ViolationHandler = Arc<dyn Fn(&ResourceViolation) + Send + Sync>;
/// Best-effort reclaim action run under memory pressure.
pub type ReclaimHook = Arc<dyn Fn() + Send + Sync>;
/// Supplies the live pooled-connection count for snapshots.
pub type ConnectionGauge = Arc<dyn Fn() -> usize + Send + Sync>;

/// Samples the running process via `sysinfo`.
struct SystemSampler {
    system: System,
    pid: Option<Pid>,
}

impl SystemSampler {
    fn new() -> Self {
        let mut system = System::new_all();
        system.refresh_all();
        Self {
            system,
            pid: sysinfo::get_current_pid().ok(),
        }
    }

    fn sample(&mut self) -> (f64, f32) {
        self.system.refresh_all();
        match self.pid.and_then(|pid| self.system.process(pid)) {
            Some(process) => (
                process.memory() as f64 / (1024.0 * 1024.0),
                process.cpu_usage(),
            ),
            None => (0.0, self.system.global_cpu_usage()),
        }
    }
}

/// Monitors process resources against configured limits.
pub struct ResourceMonitor {
    limits: ResourceLimits,
    interval: Duration,
    history: Mutex<VecDeque<ResourceSnapshot>>,
    handlers: RwLock<Vec<ViolationHandler>>,
    reclaim_hooks: RwLock<Vec<ReclaimHook>>,
    connection_gauge: RwLock<Option<ConnectionGauge>>,
    sampler: Mutex<SystemSampler>,
}

impl ResourceMonitor {
    /// Create a monitor. Call [`start`](Self::start) to begin sampling.
    pub fn new(limits: ResourceLimits, interval: Duration) -> Self {
        Self {
            limits,
            interval,
            history: Mutex::new(VecDeque::with_capacity(HISTORY_LIMIT)),
            handlers: RwLock::new(Vec::new()),
            reclaim_hooks: RwLock::new(Vec::new()),
            connection_gauge: RwLock::new(None),
            sampler: Mutex::new(SystemSampler::new()),
        }
    }

    /// Register a callback invoked once per violated limit per tick.
    pub fn register_violation_handler(&self, handler: ViolationHandler) {
        if let Ok(mut handlers) = self.handlers.write() {
            handlers.push(handler);
        }
    }

    /// Register a best-effort reclaim action run when memory exceeds 90%
    /// of its limit.
    pub fn register_reclaim_hook(&self, hook: ReclaimHook) {
        if let Ok(mut hooks) = self.reclaim_hooks.write() {
            hooks.push(hook);
        }
    }

    /// Wire in the pooled-connection gauge.
    pub fn set_connection_gauge(&self, gauge: ConnectionGauge) {
        if let Ok(mut slot) = self.connection_gauge.write() {
            *slot = Some(gauge);
        }
    }

    /// Take one sample of the running process.
    pub fn sample(&self) -> ResourceSnapshot {
        let (memory_mb, cpu_percent) = match self.sampler.lock() {
            Ok(mut sampler) => sampler.sample(),
            Err(_) => (0.0, 0.0),
        };
        let active_threads = tokio::runtime::Handle::try_current()
            .map(|h| h.metrics().num_workers())
            .unwrap_or(0);
        let active_connections = self
            .connection_gauge
            .read()
            .ok()
            .and_then(|g| g.as_ref().map(|gauge| gauge()))
            .unwrap_or(0);

        ResourceSnapshot {
            memory_mb,
            cpu_percent,
            active_threads,
            active_connections,
        }
    }

    /// Record a snapshot: append it to the bounded history, check every
    /// limit independently, fire handlers for each violation, and run
    /// reclaim hooks under memory pressure.
    ///
    /// Public so tests (and external samplers) can inject synthetic
    /// snapshots.
    pub fn observe(&self, snapshot: ResourceSnapshot) {
        if let Ok(mut history) = self.history.lock() {
            if history.len() >= HISTORY_LIMIT {
                history.pop_front();
            }
            history.push_back(snapshot.clone());
        }

        let mut violations = Vec::new();
        if snapshot.memory_mb > self.limits.max_memory_mb {
            violations.push(ResourceViolation::Memory {
                used_mb: snapshot.memory_mb,
                limit_mb: self.limits.max_memory_mb,
            });
        }
        if snapshot.cpu_percent > self.limits.max_cpu_percent {
            violations.push(ResourceViolation::Cpu {
                used_percent: snapshot.cpu_percent,
                limit_percent: self.limits.max_cpu_percent,
            });
        }
        if snapshot.active_threads > self.limits.max_threads {
            violations.push(ResourceViolation::Threads {
                used: snapshot.active_threads,
                limit: self.limits.max_threads,
            });
        }

        if !violations.is_empty() {
            if let Ok(handlers) = self.handlers.read() {
                for violation in &violations {
                    warn!(violation = %violation, "resource limit exceeded");
                    crate::metrics::inc_resource_violation(violation_kind(violation));
                    for handler in handlers.iter() {
                        handler(violation);
                    }
                }
            }
        }

        if snapshot.memory_mb > self.limits.max_memory_mb * RECLAIM_FRACTION {
            debug!(
                memory_mb = snapshot.memory_mb,
                "memory pressure, running reclaim hooks"
            );
            if let Ok(hooks) = self.reclaim_hooks.read() {
                for hook in hooks.iter() {
                    hook();
                }
            }
        }
    }

    /// The most recent snapshot, if any.
    pub fn latest(&self) -> Option<ResourceSnapshot> {
        self.history
            .lock()
            .ok()
            .and_then(|h| h.back().cloned())
    }

    /// Copy of the retained history, oldest first.
    pub fn history(&self) -> Vec<ResourceSnapshot> {
        self.history
            .lock()
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Spawn the sampling loop.
    ///
    /// A single long-lived task; runs until the shutdown signal flips.
    pub fn start(
        self: &Arc<Self>,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        let interval = self.interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let snapshot = monitor.sample();
                        monitor.observe(snapshot);
                    }
                    _ = shutdown.changed() => {
                        info!("resource monitor shutdown signal received");
                        break;
                    }
                }
            }
        })
    }
}

fn violation_kind(violation: &ResourceViolation) -> &'static str {
    match violation {
        ResourceViolation::Memory { .. } => "memory",
        ResourceViolation::Cpu { .. } => "cpu",
        ResourceViolation::Threads { .. } => "threads",
    }
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn limits() -> ResourceLimits {
        ResourceLimits {
            max_memory_mb: 1000.0,
            max_cpu_percent: 80.0,
            max_threads: 64,
        }
    }

    fn snapshot(memory_mb: f64, cpu_percent: f32, threads: usize) -> ResourceSnapshot {
        ResourceSnapshot {
            memory_mb,
            cpu_percent,
            active_threads: threads,
            active_connections: 0,
        }
    }

    #[test]
    fn test_within_limits_fires_no_handler() {
        let monitor = ResourceMonitor::new(limits(), Duration::from_secs(5));
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        monitor.register_violation_handler(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        monitor.observe(snapshot(100.0, 10.0, 8));
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_memory_violation_fires_handler_once_per_tick() {
        let monitor = ResourceMonitor::new(limits(), Duration::from_secs(5));
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        monitor.register_violation_handler(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        monitor.observe(snapshot(1500.0, 10.0, 8));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_multiple_violations_each_fire_handlers() {
        let monitor = ResourceMonitor::new(limits(), Duration::from_secs(5));
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        monitor.register_violation_handler(Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        // Memory, CPU, and threads all over their limits in one tick.
        monitor.observe(snapshot(1500.0, 95.0, 128));
        assert_eq!(fired.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_each_registered_handler_sees_the_violation() {
        let monitor = ResourceMonitor::new(limits(), Duration::from_secs(5));
        let a = Arc::new(AtomicUsize::new(0));
        let b = Arc::new(AtomicUsize::new(0));
        for counter in [&a, &b] {
            let counter = Arc::clone(counter);
            monitor.register_violation_handler(Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }

        monitor.observe(snapshot(1500.0, 10.0, 8));
        assert_eq!(a.load(Ordering::SeqCst), 1);
        assert_eq!(b.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reclaim_hooks_run_above_90_percent_memory() {
        let monitor = ResourceMonitor::new(limits(), Duration::from_secs(5));
        let reclaimed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&reclaimed);
        monitor.register_reclaim_hook(Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        // 95% of the limit: pressure but no violation.
        monitor.observe(snapshot(950.0, 10.0, 8));
        assert_eq!(reclaimed.load(Ordering::SeqCst), 1);

        // 50%: no pressure.
        monitor.observe(snapshot(500.0, 10.0, 8));
        assert_eq!(reclaimed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_history_is_bounded() {
        let monitor = ResourceMonitor::new(limits(), Duration::from_secs(5));
        for i in 0..150 {
            monitor.observe(snapshot(i as f64, 1.0, 1));
        }
        let history = monitor.history();
        assert_eq!(history.len(), 100);
        // Oldest entries were dropped.
        assert!((history[0].memory_mb - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_latest_returns_most_recent_snapshot() {
        let monitor = ResourceMonitor::new(limits(), Duration::from_secs(5));
        assert!(monitor.latest().is_none());
        monitor.observe(snapshot(1.0, 1.0, 1));
        monitor.observe(snapshot(2.0, 1.0, 1));
        assert!((monitor.latest().unwrap().memory_mb - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_violation_display() {
        let v = ResourceViolation::Memory {
            used_mb: 1500.0,
            limit_mb: 1000.0,
        };
        assert!(v.to_string().contains("1500.0MB"));
        let v = ResourceViolation::Threads { used: 70, limit: 64 };
        assert!(v.to_string().contains("70"));
    }

    #[tokio::test]
    async fn test_sample_uses_connection_gauge() {
        let monitor = ResourceMonitor::new(limits(), Duration::from_secs(5));
        monitor.set_connection_gauge(Arc::new(|| 7));
        let snapshot = monitor.sample();
        assert_eq!(snapshot.active_connections, 7);
    }

    #[tokio::test]
    async fn test_background_loop_records_history_and_stops() {
        let monitor = Arc::new(ResourceMonitor::new(limits(), Duration::from_millis(10)));
        let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
        let handle = monitor.start(shutdown_rx);

        tokio::time::sleep(Duration::from_millis(60)).await;
        let _ = shutdown_tx.send(true);
        let result = tokio::time::timeout(Duration::from_secs(5), handle).await;
        assert!(result.is_ok());
        assert!(!monitor.history().is_empty());
    }
}

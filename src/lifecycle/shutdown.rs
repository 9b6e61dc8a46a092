//! Shutdown coordination.
//!
//! # Responsibilities
//! - Broadcast the shutdown signal to long-running loops
//! - Run registered cleanups once, highest priority first
//! - Bound each cleanup by its own timeout and report every outcome
//!
//! # Design Decisions
//! - A failing, panicking or hung cleanup never stops the sequence
//! - Concurrent callers share one run and one report
//! - The sequence runs on its own task, so a caller that stops waiting
//!   does not abandon it
//! - Never exits the process; the caller decides the exit code

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{broadcast, watch};

use crate::observability::metrics;

/// Coordinator for graceful shutdown.
///
/// Provides a broadcast channel that all long-running tasks can subscribe to.
#[derive(Debug, Clone)]
pub struct Shutdown {
    tx: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Trigger the shutdown signal.
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// Boxed cleanup future.
pub type CleanupFuture = Pin<Box<dyn Future<Output = Result<(), String>> + Send>>;

type Cleanup = Box<dyn FnOnce() -> CleanupFuture + Send>;

#[derive(Debug, Clone, Copy)]
pub struct RegisterOptions {
    /// Higher runs first.
    pub priority: i32,
    pub timeout: Duration,
}

impl RegisterOptions {
    pub fn new(priority: i32, timeout: Duration) -> Self {
        Self { priority, timeout }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistrationError {
    #[error("resource '{0}' is already registered")]
    Duplicate(String),

    #[error("cannot register '{0}': shutdown already started")]
    ShuttingDown(String),
}

struct Registration {
    name: String,
    priority: i32,
    timeout: Duration,
    cleanup: Cleanup,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupStatus {
    Succeeded,
    Failed(String),
    TimedOut(Duration),
}

impl CleanupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed(_) => "failed",
            Self::TimedOut(_) => "timed_out",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupOutcome {
    pub name: String,
    pub priority: i32,
    pub status: CleanupStatus,
    pub elapsed: Duration,
}

/// Result of one shutdown sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub reason: String,
    /// In execution order.
    pub outcomes: Vec<CleanupOutcome>,
    pub elapsed: Duration,
}

impl ShutdownReport {
    pub fn failed_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.status != CleanupStatus::Succeeded)
            .count()
    }

    pub fn is_clean(&self) -> bool {
        self.failed_count() == 0
    }
}

impl fmt::Display for ShutdownReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "shutdown ({}) ran {} cleanups in {:?}, {} failed",
            self.reason,
            self.outcomes.len(),
            self.elapsed,
            self.failed_count()
        )
    }
}

/// Registry of cleanups run once at shutdown.
pub struct ShutdownOrchestrator {
    registry: Mutex<Vec<Registration>>,
    shutting_down: AtomicBool,
    report: watch::Sender<Option<ShutdownReport>>,
    signal: Shutdown,
}

impl ShutdownOrchestrator {
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(Vec::new()),
            shutting_down: AtomicBool::new(false),
            report: watch::channel(None).0,
            signal: Shutdown::new(),
        }
    }

    fn registry(&self) -> MutexGuard<'_, Vec<Registration>> {
        self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register a cleanup under a unique name.
    pub fn register<F, Fut>(
        &self,
        name: &str,
        options: RegisterOptions,
        cleanup: F,
    ) -> Result<(), RegistrationError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        let mut registry = self.registry();
        // Checked under the registry lock; shutdown drains under the same lock.
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(RegistrationError::ShuttingDown(name.to_string()));
        }
        if registry.iter().any(|r| r.name == name) {
            return Err(RegistrationError::Duplicate(name.to_string()));
        }

        registry.push(Registration {
            name: name.to_string(),
            priority: options.priority,
            timeout: options.timeout,
            cleanup: Box::new(move || Box::pin(cleanup()) as CleanupFuture),
        });
        tracing::debug!(
            resource = name,
            priority = options.priority,
            timeout_ms = options.timeout.as_millis() as u64,
            "Registered shutdown cleanup"
        );
        Ok(())
    }

    /// Registered names in execution order.
    pub fn registered(&self) -> Vec<String> {
        let registry = self.registry();
        let mut entries: Vec<(&String, i32)> =
            registry.iter().map(|r| (&r.name, r.priority)).collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1));
        entries.into_iter().map(|(name, _)| name.clone()).collect()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Signal fired when shutdown starts.
    pub fn signal(&self) -> &Shutdown {
        &self.signal
    }

    /// Run every cleanup once. Later and concurrent callers get the report of
    /// the first run.
    ///
    /// The first call starts the sequence on a spawned task; dropping any
    /// caller's future only stops that caller from waiting.
    pub async fn shutdown(self: &Arc<Self>, reason: &str) -> ShutdownReport {
        let mut done = self.report.subscribe();
        if !self.shutting_down.swap(true, Ordering::AcqRel) {
            let orchestrator = Arc::clone(self);
            let reason = reason.to_string();
            tokio::spawn(async move {
                let report = orchestrator.run(reason).await;
                orchestrator.report.send_replace(Some(report));
            });
        }

        let report = done
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|report| (*report).clone());
        report.unwrap_or_else(|| ShutdownReport {
            reason: reason.to_string(),
            outcomes: Vec::new(),
            elapsed: Duration::ZERO,
        })
    }

    async fn run(&self, reason: String) -> ShutdownReport {
        let started = Instant::now();
        // Registrations that won the race with `shutting_down` are drained here.
        let mut registrations = std::mem::take(&mut *self.registry());
        // Stable: equal priorities keep registration order.
        registrations.sort_by(|a, b| b.priority.cmp(&a.priority));

        tracing::info!(
            reason = %reason,
            resources = registrations.len(),
            "Shutdown started"
        );
        self.signal.trigger();

        let mut outcomes = Vec::with_capacity(registrations.len());
        for registration in registrations {
            outcomes.push(run_cleanup(registration).await);
        }

        let report = ShutdownReport {
            reason,
            outcomes,
            elapsed: started.elapsed(),
        };
        if report.is_clean() {
            tracing::info!(elapsed_ms = report.elapsed.as_millis() as u64, "Shutdown complete");
        } else {
            tracing::warn!(
                failed = report.failed_count(),
                elapsed_ms = report.elapsed.as_millis() as u64,
                "Shutdown complete with failures"
            );
        }
        report
    }
}

impl Default for ShutdownOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_cleanup(registration: Registration) -> CleanupOutcome {
    let Registration {
        name,
        priority,
        timeout,
        cleanup,
    } = registration;
    let started = Instant::now();
    tracing::debug!(resource = %name, priority, "Running cleanup");

    // Own task: a panic is contained and a hung cleanup can be aborted.
    let mut task = tokio::spawn(async move { cleanup().await });
    let status = match tokio::time::timeout(timeout, &mut task).await {
        Ok(Ok(Ok(()))) => CleanupStatus::Succeeded,
        Ok(Ok(Err(message))) => CleanupStatus::Failed(message),
        Ok(Err(join_error)) => CleanupStatus::Failed(format!("cleanup panicked: {join_error}")),
        Err(_) => {
            task.abort();
            CleanupStatus::TimedOut(timeout)
        }
    };
    let elapsed = started.elapsed();

    match &status {
        CleanupStatus::Succeeded => {
            tracing::info!(resource = %name, elapsed_ms = elapsed.as_millis() as u64, "Cleanup done")
        }
        CleanupStatus::Failed(error) => {
            tracing::error!(resource = %name, error = %error, "Cleanup failed")
        }
        CleanupStatus::TimedOut(limit) => tracing::error!(
            resource = %name,
            timeout_ms = limit.as_millis() as u64,
            "Cleanup timed out"
        ),
    }
    metrics::record_cleanup(&name, status.as_str(), elapsed);

    CleanupOutcome {
        name,
        priority,
        status,
        elapsed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn options(priority: i32) -> RegisterOptions {
        RegisterOptions::new(priority, Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_runs_by_descending_priority() {
        let orchestrator = Arc::new(ShutdownOrchestrator::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        for (name, priority) in [("store", 10), ("conn", 100), ("monitor", 60), ("conn-2", 100)] {
            let order = order.clone();
            orchestrator
                .register(name, options(priority), move || async move {
                    order.lock().unwrap().push(name);
                    Ok(())
                })
                .unwrap();
        }
        assert_eq!(orchestrator.registered(), vec!["conn", "conn-2", "monitor", "store"]);

        let report = orchestrator.shutdown("test").await;
        assert!(report.is_clean());
        assert_eq!(*order.lock().unwrap(), vec!["conn", "conn-2", "monitor", "store"]);
    }

    #[tokio::test]
    async fn test_registration_errors() {
        let orchestrator = Arc::new(ShutdownOrchestrator::new());
        orchestrator.register("a", options(1), || async { Ok(()) }).unwrap();
        assert_eq!(
            orchestrator.register("a", options(2), || async { Ok(()) }),
            Err(RegistrationError::Duplicate("a".to_string()))
        );

        orchestrator.shutdown("test").await;
        assert!(orchestrator.is_shutting_down());
        assert_eq!(
            orchestrator.register("b", options(1), || async { Ok(()) }),
            Err(RegistrationError::ShuttingDown("b".to_string()))
        );
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let orchestrator = Arc::new(ShutdownOrchestrator::new());
        orchestrator
            .register("fails", options(3), || async { Err("disk full".to_string()) })
            .unwrap();
        orchestrator
            .register("panics", options(2), || async {
                if true {
                    panic!("boom");
                }
                Ok(())
            })
            .unwrap();
        orchestrator.register("ok", options(1), || async { Ok(()) }).unwrap();

        let report = orchestrator.shutdown("test").await;
        let statuses: Vec<&str> = report.outcomes.iter().map(|o| o.status.as_str()).collect();
        assert_eq!(statuses, vec!["failed", "failed", "succeeded"]);
        assert_eq!(report.failed_count(), 2);
    }

    #[tokio::test]
    async fn test_abandoned_caller_does_not_cancel_sequence() {
        let orchestrator = Arc::new(ShutdownOrchestrator::new());
        let ran = Arc::new(Mutex::new(Vec::new()));

        for (name, priority) in [("slow", 2), ("last", 1)] {
            let ran = ran.clone();
            orchestrator
                .register(name, options(priority), move || async move {
                    if name == "slow" {
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                    ran.lock().unwrap().push(name);
                    Ok(())
                })
                .unwrap();
        }

        // The first caller gives up mid-sequence.
        let first = tokio::time::timeout(
            Duration::from_millis(20),
            orchestrator.shutdown("sigterm"),
        )
        .await;
        assert!(first.is_err());

        let report = orchestrator.shutdown("again").await;
        assert_eq!(report.reason, "sigterm");
        assert_eq!(report.outcomes.len(), 2);
        assert!(report.is_clean());
        assert_eq!(*ran.lock().unwrap(), vec!["slow", "last"]);
    }

    #[tokio::test]
    async fn test_signal_fires_on_start() {
        let orchestrator = Arc::new(ShutdownOrchestrator::new());
        let mut rx = orchestrator.signal().subscribe();
        orchestrator.shutdown("test").await;
        assert!(rx.try_recv().is_ok());
    }
}

//! Connection manager: one driver task owns the session's state machine.
//!
//! # Data Flow
//! ```text
//! start()
//!     → driver task
//!         → Connecting: load identity, transport.open (deadline)
//!         → Authenticating: wait for Authenticated event (deadline)
//!         → Connected: consume transport events until disconnect
//!         → Reconnecting: classify reason, purge if needed, backoff
//!         → CircuitOpen: idle for the cool-down
//!     → Closed
//! close()
//!     → cancel signal → driver unwinds → live handle closed → Closed
//! ```
//!
//! Transitions happen only on the driver task (or in `close` when no driver
//! ever ran), so they are totally ordered. Every transition is published on
//! a watch channel (current state) and a broadcast channel (history).

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::config::{CircuitBreakerConfig, ReconnectConfig, SessionConfig};
use crate::connection::event::{
    DisconnectEvent, EventReceiver, EventSink, ReasonCode, TransportEvent,
};
use crate::connection::policy::{Decision, ReconnectPolicy};
use crate::connection::state::{ConnectionState, StateChange};
use crate::connection::transport::{AuthState, Identity, Transport};
use crate::credentials::{CredentialStore, CREDS_KEY};
use crate::health::{ConnectionHealth, HealthSnapshot};
use crate::observability::metrics;
use crate::resilience::timeouts::{with_timeout, TimeoutError};

const STATE_HISTORY: usize = 64;

/// Settings for one manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub reconnect: ReconnectConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    /// Deadline for `Transport::open`, also used for `close`.
    pub connect_timeout: Duration,
    /// Deadline for first-time authentication after a handshake.
    pub auth_timeout: Duration,
}

impl ManagerConfig {
    pub fn from_session(config: &SessionConfig) -> Self {
        Self {
            reconnect: config.reconnect.clone(),
            circuit_breaker: config.circuit_breaker.clone(),
            connect_timeout: Duration::from_secs(config.transport.connect_timeout_secs),
            auth_timeout: Duration::from_secs(config.transport.auth_timeout_secs),
        }
    }
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::from_session(&SessionConfig::default())
    }
}

/// Why the manager reached `Closed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// `close` was called.
    Shutdown,
    /// The server logged the session out; no reconnect is possible.
    LoggedOut,
    /// An unrecoverable local failure, such as credentials that could not
    /// be persisted.
    Fatal(String),
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shutdown => "shutdown",
            Self::LoggedOut => "logged_out",
            Self::Fatal(_) => "fatal",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fatal(message) => write!(f, "fatal: {message}"),
            other => f.write_str(other.as_str()),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connection manager already started")]
    AlreadyStarted,

    #[error("connection manager is closed")]
    Closed,
}

/// How a connection phase ended.
enum Outcome {
    Lost(DisconnectEvent),
    Cancelled,
    Fatal(String),
}

/// Owns the lifecycle of one session connection.
pub struct ConnectionManager<T: Transport> {
    shared: Arc<Shared<T>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

struct Shared<T: Transport> {
    transport: Arc<T>,
    store: Arc<CredentialStore>,
    config: ManagerConfig,
    state: watch::Sender<ConnectionState>,
    changes: broadcast::Sender<StateChange>,
    cancel: watch::Sender<bool>,
    closed: watch::Sender<Option<CloseReason>>,
    live: Mutex<Option<T::Handle>>,
    health: ConnectionHealth,
    started: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    // A dropped sender also counts as cancellation.
    let _ = cancel.wait_for(|cancelled| *cancelled).await;
}

impl<T: Transport> ConnectionManager<T> {
    pub fn new(transport: Arc<T>, store: Arc<CredentialStore>, config: ManagerConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (changes, _) = broadcast::channel(STATE_HISTORY);
        let (cancel, _) = watch::channel(false);
        let (closed, _) = watch::channel(None);

        Self {
            shared: Arc::new(Shared {
                transport,
                store,
                config,
                state,
                changes,
                cancel,
                closed,
                live: Mutex::new(None),
                health: ConnectionHealth::new(),
                started: AtomicBool::new(false),
            }),
            driver: Mutex::new(None),
        }
    }

    /// Spawn the driver task. The first attempt starts immediately.
    pub fn start(&self) -> Result<(), ConnectionError> {
        if self.shared.closed.borrow().is_some() || *self.shared.cancel.borrow() {
            return Err(ConnectionError::Closed);
        }
        if self.shared.started.swap(true, Ordering::AcqRel) {
            return Err(ConnectionError::AlreadyStarted);
        }

        let shared = Arc::clone(&self.shared);
        let driver = tokio::spawn(async move {
            let reason = shared.run().await;
            shared.finish(reason).await;
        });
        *lock(&self.driver) = Some(driver);
        tracing::info!("Connection manager started");
        Ok(())
    }

    /// Cancel any in-flight attempt or wait, close the live connection and
    /// land in `Closed`. Idempotent; returns the final close reason.
    pub async fn close(&self) -> CloseReason {
        self.shared.cancel.send_replace(true);

        let driver = lock(&self.driver).take();
        match driver {
            Some(driver) => {
                if let Err(e) = driver.await {
                    tracing::error!(error = %e, "Connection driver task failed");
                    self.shared
                        .finish(CloseReason::Fatal(format!("driver task failed: {e}")))
                        .await;
                }
            }
            None if !self.shared.started.swap(true, Ordering::AcqRel) => {
                self.shared.finish(CloseReason::Shutdown).await;
            }
            None => {}
        }

        self.wait_closed().await
    }

    /// Resolve once the manager is `Closed`.
    pub async fn wait_closed(&self) -> CloseReason {
        let mut closed = self.shared.closed.subscribe();
        let reason = closed
            .wait_for(Option::is_some)
            .await
            .map(|reason| reason.clone())
            .ok()
            .flatten();
        reason.unwrap_or(CloseReason::Shutdown)
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.shared.closed.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Current state, updated on every transition.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Every transition from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.shared.changes.subscribe()
    }

    /// The live connection, present only while `Connected`.
    pub fn live_handle(&self) -> Option<T::Handle> {
        lock(&self.shared.live).clone()
    }

    pub fn health(&self) -> HealthSnapshot {
        self.shared.health.snapshot(self.state())
    }
}

impl<T: Transport> Shared<T> {
    fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    fn transition(&self, to: ConnectionState) {
        let from = self.state();
        if !from.can_transition_to(to) {
            tracing::error!(from = %from, to = %to, "Invalid connection state transition ignored");
            return;
        }

        self.state.send_replace(to);
        match (from, to) {
            (_, ConnectionState::Connected) => self.health.record_connected(),
            (ConnectionState::Connected, _) => self.health.record_disconnected(),
            _ => {}
        }
        let _ = self.changes.send(StateChange {
            from,
            to,
            at: Instant::now(),
        });
        metrics::record_state_transition(from.as_str(), to.as_str());
        tracing::info!(from = %from, to = %to, "Connection state changed");
    }

    async fn run(&self) -> CloseReason {
        let mut policy = ReconnectPolicy::new(&self.config.reconnect, &self.config.circuit_breaker);
        let mut cancel = self.cancel.subscribe();
        let (mut sink, mut events) = EventSink::channel(0);

        loop {
            if *cancel.borrow() {
                return CloseReason::Shutdown;
            }

            sink = sink.next(sink.generation() + 1);
            let generation = sink.generation();
            self.transition(ConnectionState::Connecting);

            let outcome = match self.connect(&sink, &mut events, &mut cancel).await {
                // Teardown began while the attempt was finishing.
                Ok(handle) if *cancel.borrow() => {
                    self.close_handle(handle).await;
                    Outcome::Cancelled
                }
                Ok(handle) => {
                    policy.record_success();
                    *lock(&self.live) = Some(handle.clone());
                    self.transition(ConnectionState::Connected);

                    let outcome = self.serve(generation, &mut events, &mut cancel).await;
                    lock(&self.live).take();
                    self.close_handle(handle).await;
                    outcome
                }
                Err(outcome) => outcome,
            };

            let event = match outcome {
                Outcome::Lost(event) => event,
                Outcome::Cancelled => return CloseReason::Shutdown,
                Outcome::Fatal(message) => {
                    tracing::error!(error = %message, "Connection manager stopping on fatal error");
                    return CloseReason::Fatal(message);
                }
            };

            let reason = event.reason;
            metrics::record_disconnect(reason.as_str());
            tracing::info!(
                reason = %reason,
                detail = event.detail.as_deref().unwrap_or(""),
                generation,
                "Connection ended"
            );

            if reason == ReasonCode::LoggedOut {
                self.logged_out().await;
                return CloseReason::LoggedOut;
            }

            self.transition(ConnectionState::Reconnecting);
            self.health.record_failure();

            let mut purge = reason.purges_session();
            if reason.is_session_error() {
                let verdict = self.store.record_error(reason.as_str());
                if verdict.should_clear && !purge {
                    tracing::warn!(
                        errors = verdict.count,
                        "Too many session errors; purging session records"
                    );
                    purge = true;
                }
            }
            if purge {
                match self.store.clear_session().await {
                    Ok(removed) => {
                        tracing::warn!(reason = %reason, removed, "Session records purged")
                    }
                    Err(e) => tracing::error!(reason = %reason, error = %e, "Session purge failed"),
                }
            }

            let decision = if reason == ReasonCode::RestartRequired {
                policy.record_restart(Instant::now())
            } else {
                policy.record_failure(Instant::now())
            };
            match decision {
                Decision::Retry(delay) => {
                    metrics::record_reconnect_delay(delay);
                    tracing::info!(
                        attempt = policy.attempt(),
                        delay_ms = delay.as_millis() as u64,
                        "Scheduling reconnect"
                    );
                    if !sleep_or_cancel(delay, &mut cancel).await {
                        return CloseReason::Shutdown;
                    }
                }
                Decision::OpenCircuit(cooldown) => {
                    self.transition(ConnectionState::CircuitOpen);
                    metrics::record_circuit_open();
                    tracing::warn!(
                        failures = policy.consecutive_failures(),
                        cooldown_ms = cooldown.as_millis() as u64,
                        "Reconnects suspended"
                    );
                    if !sleep_or_cancel(cooldown, &mut cancel).await {
                        return CloseReason::Shutdown;
                    }
                    policy.resume(Instant::now());
                    self.transition(ConnectionState::Reconnecting);
                }
            }
        }
    }

    /// Connecting and, for a new identity, Authenticating.
    async fn connect(
        &self,
        sink: &EventSink,
        events: &mut EventReceiver,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<T::Handle, Outcome> {
        let creds = self
            .store
            .get(CREDS_KEY)
            .await
            .map_err(|e| Outcome::Fatal(format!("failed to load credentials: {e}")))?;
        let auth = AuthState::from_creds(creds);
        tracing::debug!(
            generation = sink.generation(),
            registered = auth.creds().is_some(),
            "Opening transport"
        );

        let open = with_timeout(
            self.config.connect_timeout,
            self.transport.open(auth, sink.clone()),
        );
        let opened = tokio::select! {
            biased;
            _ = cancelled(cancel) => return Err(Outcome::Cancelled),
            result = open => result,
        };

        let handshake = match opened {
            Ok(handshake) => handshake,
            Err(TimeoutError::Elapsed(limit)) => {
                metrics::record_connect_attempt("timeout");
                tracing::warn!(timeout_ms = limit.as_millis() as u64, "Transport open timed out");
                return Err(Outcome::Lost(
                    DisconnectEvent::new(ReasonCode::Timeout).with_detail("open timed out"),
                ));
            }
            Err(TimeoutError::Inner(e)) => {
                metrics::record_connect_attempt("failed");
                tracing::warn!(error = %e, "Transport open failed");
                return Err(Outcome::Lost(
                    DisconnectEvent::new(e.reason()).with_detail(e.to_string()),
                ));
            }
        };
        metrics::record_connect_attempt("ok");

        if handshake.identity == Identity::Known {
            return Ok(handshake.handle);
        }

        self.transition(ConnectionState::Authenticating);
        match self.authenticate(sink.generation(), events, cancel).await {
            Ok(()) => Ok(handshake.handle),
            Err(outcome) => {
                self.close_handle(handshake.handle).await;
                Err(outcome)
            }
        }
    }

    async fn authenticate(
        &self,
        generation: u64,
        events: &mut EventReceiver,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<(), Outcome> {
        let deadline = tokio::time::sleep(self.config.auth_timeout);
        tokio::pin!(deadline);

        loop {
            let event = tokio::select! {
                biased;
                _ = cancelled(cancel) => return Err(Outcome::Cancelled),
                event = next_event(generation, events) => event,
                _ = &mut deadline => {
                    return Err(Outcome::Lost(
                        DisconnectEvent::new(ReasonCode::Timeout)
                            .with_detail("authentication timed out"),
                    ));
                }
            };

            match event? {
                TransportEvent::Authenticated(creds) => {
                    self.persist_creds(creds).await?;
                    tracing::info!("New identity authenticated");
                    return Ok(());
                }
                TransportEvent::CredentialsRotated(creds) => self.persist_creds(creds).await?,
                TransportEvent::Disconnected(event) => return Err(Outcome::Lost(event)),
            }
        }
    }

    /// Connected: consume events until the connection ends.
    async fn serve(
        &self,
        generation: u64,
        events: &mut EventReceiver,
        cancel: &mut watch::Receiver<bool>,
    ) -> Outcome {
        loop {
            let event = tokio::select! {
                biased;
                _ = cancelled(cancel) => return Outcome::Cancelled,
                event = next_event(generation, events) => event,
            };

            let result = match event {
                Ok(TransportEvent::Disconnected(event)) => return Outcome::Lost(event),
                Ok(TransportEvent::Authenticated(creds))
                | Ok(TransportEvent::CredentialsRotated(creds)) => self.persist_creds(creds).await,
                Err(outcome) => Err(outcome),
            };
            if let Err(outcome) = result {
                return outcome;
            }
        }
    }

    /// Credentials must be durable before the session moves on.
    async fn persist_creds(&self, creds: Vec<u8>) -> Result<(), Outcome> {
        match self.store.set(CREDS_KEY, creds).await {
            Ok(()) => {
                tracing::debug!("Credentials persisted");
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to persist credentials");
                Err(Outcome::Fatal(format!("failed to persist credentials: {e}")))
            }
        }
    }

    async fn logged_out(&self) {
        tracing::warn!("Session logged out; re-authentication required");
        if !self.config.reconnect.clear_on_logout {
            return;
        }
        match self.store.clear().await {
            Ok(removed) => tracing::info!(removed, "Credentials cleared after logout"),
            Err(e) => tracing::error!(error = %e, "Failed to clear credentials after logout"),
        }
    }

    async fn close_handle(&self, handle: T::Handle) {
        let limit = self.config.connect_timeout;
        if tokio::time::timeout(limit, self.transport.close(handle)).await.is_err() {
            tracing::warn!(timeout_ms = limit.as_millis() as u64, "Transport close timed out");
        }
    }

    async fn finish(&self, reason: CloseReason) {
        let live = lock(&self.live).take();
        if let Some(handle) = live {
            self.close_handle(handle).await;
        }
        self.transition(ConnectionState::Closed);

        let first = self.closed.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason.clone());
            true
        });
        if first {
            tracing::info!(reason = %reason, "Connection manager closed");
        }
    }
}

/// Next event of the current connection; earlier generations are dropped.
async fn next_event(
    generation: u64,
    events: &mut EventReceiver,
) -> Result<TransportEvent, Outcome> {
    loop {
        let Some((from, event)) = events.recv().await else {
            return Err(Outcome::Fatal("transport event channel closed".to_string()));
        };
        if from == generation {
            return Ok(event);
        }
        tracing::debug!(stale = from, current = generation, "Ignoring event from an earlier connection");
    }
}

async fn sleep_or_cancel(delay: Duration, cancel: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        biased;
        _ = cancelled(cancel) => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::connection::transport::{Handshake, TransportError};
    use crate::credentials::SqliteBackend;
    use async_trait::async_trait;

    /// Opens that never complete.
    struct Stalled;

    #[async_trait]
    impl Transport for Stalled {
        type Handle = ();

        async fn open(
            &self,
            _auth: AuthState,
            _events: EventSink,
        ) -> Result<Handshake<()>, TransportError> {
            std::future::pending().await
        }

        async fn close(&self, _handle: ()) {}
    }

    fn manager() -> ConnectionManager<Stalled> {
        let backend = Arc::new(SqliteBackend::open_in_memory().unwrap());
        let store = Arc::new(CredentialStore::with_backend(backend, &StoreConfig::default()));
        ConnectionManager::new(Arc::new(Stalled), store, ManagerConfig::default())
    }

    #[tokio::test]
    async fn test_close_without_start() {
        let manager = manager();
        assert_eq!(manager.close().await, CloseReason::Shutdown);
        assert_eq!(manager.state(), ConnectionState::Closed);
        assert!(matches!(manager.start(), Err(ConnectionError::Closed)));
    }

    #[tokio::test]
    async fn test_close_cancels_pending_open() {
        let manager = manager();
        let mut changes = manager.subscribe();
        manager.start().unwrap();
        assert!(matches!(manager.start(), Err(ConnectionError::AlreadyStarted)));

        let connecting = changes.recv().await.unwrap();
        assert_eq!(connecting.to, ConnectionState::Connecting);

        let reason = tokio::time::timeout(Duration::from_secs(2), manager.close())
            .await
            .unwrap();
        assert_eq!(reason, CloseReason::Shutdown);
        assert_eq!(manager.state(), ConnectionState::Closed);
        assert_eq!(manager.close().await, CloseReason::Shutdown);
    }

    #[test]
    fn test_close_reason_display() {
        assert_eq!(CloseReason::LoggedOut.to_string(), "logged_out");
        assert_eq!(CloseReason::Fatal("disk".into()).to_string(), "fatal: disk");
    }
}

//! Startup orchestration.
//!
//! # Responsibilities
//! - Open the credential store and start its background tasks
//! - Construct the connection manager and health monitor
//! - Register every resource with the shutdown orchestrator
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Each resource is registered as soon as it exists, so a later startup
//!   failure still cleans up what was built
//! - The connection starts last, after everything it depends on is ready

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::config::SessionConfig;
use crate::connection::{ConnectionError, ConnectionManager, ManagerConfig, Transport};
use crate::credentials::{CredentialError, CredentialStore};
use crate::health::HealthMonitor;
use crate::lifecycle::shutdown::{RegisterOptions, RegistrationError, ShutdownOrchestrator};

/// Cleanup priorities; higher runs first.
pub const CONNECTION_PRIORITY: i32 = 100;
pub const HEALTH_PRIORITY: i32 = 60;
pub const STORE_PRIORITY: i32 = 10;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("credential store: {0}")]
    Store(#[from] CredentialError),

    #[error("resource registration: {0}")]
    Registration(#[from] RegistrationError),

    #[error("connection: {0}")]
    Connection(#[from] ConnectionError),
}

/// Everything one running session needs, built once at startup.
pub struct SessionContext<T: Transport> {
    pub config: SessionConfig,
    pub store: Arc<CredentialStore>,
    pub manager: Arc<ConnectionManager<T>>,
    pub orchestrator: Arc<ShutdownOrchestrator>,
}

impl<T: Transport> SessionContext<T> {
    /// Open the configured database and wire up the session.
    pub fn build(
        config: SessionConfig,
        transport: Arc<T>,
        orchestrator: Arc<ShutdownOrchestrator>,
    ) -> Result<Self, StartupError> {
        let store = Arc::new(CredentialStore::open(&config.store)?);
        tracing::info!(db_path = %config.store.db_path, "Credential database opened");
        Self::with_store(config, transport, store, orchestrator)
    }

    /// Wire up the session around an already-open store.
    pub fn with_store(
        config: SessionConfig,
        transport: Arc<T>,
        store: Arc<CredentialStore>,
        orchestrator: Arc<ShutdownOrchestrator>,
    ) -> Result<Self, StartupError> {
        let timeout = Duration::from_millis(config.shutdown.cleanup_timeout_ms);

        let closing = Arc::clone(&store);
        orchestrator.register(
            "credential-store",
            RegisterOptions::new(STORE_PRIORITY, timeout),
            move || async move { closing.close().await.map_err(|e| e.to_string()) },
        )?;
        store.spawn_background();

        let manager = Arc::new(ConnectionManager::new(
            transport,
            Arc::clone(&store),
            ManagerConfig::from_session(&config),
        ));
        let closing = Arc::clone(&manager);
        orchestrator.register(
            "connection-manager",
            RegisterOptions::new(CONNECTION_PRIORITY, timeout),
            move || async move {
                let reason = closing.close().await;
                tracing::debug!(reason = %reason, "Connection manager stopped");
                Ok(())
            },
        )?;

        if config.health.enabled {
            let monitor = HealthMonitor::new(manager.clone(), config.health.clone());
            let task = tokio::spawn(monitor.run(orchestrator.signal().subscribe()));
            orchestrator.register(
                "health-monitor",
                RegisterOptions::new(HEALTH_PRIORITY, timeout),
                move || async move { task.await.map_err(|e| e.to_string()) },
            )?;
        }

        Ok(Self {
            config,
            store,
            manager,
            orchestrator,
        })
    }

    /// Begin connecting.
    pub fn start(&self) -> Result<(), StartupError> {
        self.manager.start()?;
        Ok(())
    }
}

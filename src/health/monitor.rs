//! Periodic health reporting.
//!
//! # Responsibilities
//! - Snapshot connection health on an interval
//! - Publish health gauges
//! - Warn when the session has been offline too long

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time;

use crate::config::HealthConfig;
use crate::connection::{ConnectionManager, Transport};
use crate::health::HealthSnapshot;
use crate::observability::metrics;

/// Anything that can report session health.
pub trait HealthSource: Send + Sync + 'static {
    fn health(&self) -> HealthSnapshot;
}

impl<T: Transport> HealthSource for ConnectionManager<T> {
    fn health(&self) -> HealthSnapshot {
        ConnectionManager::health(self)
    }
}

pub struct HealthMonitor {
    source: Arc<dyn HealthSource>,
    config: HealthConfig,
}

impl HealthMonitor {
    pub fn new(source: Arc<dyn HealthSource>, config: HealthConfig) -> Self {
        Self { source, config }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if !self.config.enabled {
            tracing::info!("Health monitor disabled");
            return;
        }

        tracing::info!(interval = self.config.interval_secs, "Health monitor starting");

        let interval = Duration::from_secs(self.config.interval_secs);
        let mut ticker = time::interval(interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check();
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// Take one snapshot and report it. Returns whether the session counts
    /// as stale.
    pub fn check(&self) -> bool {
        let snapshot = self.source.health();
        metrics::record_health(&snapshot);

        let stale_after = Duration::from_secs(self.config.stale_after_secs);
        let stale = !snapshot.state.is_terminal()
            && snapshot.offline_for.is_some_and(|offline| offline >= stale_after);

        if stale {
            tracing::warn!(
                state = %snapshot.state,
                offline_secs = snapshot.offline_for.map(|d| d.as_secs()).unwrap_or_default(),
                consecutive_failures = snapshot.consecutive_failures,
                "Session offline longer than expected"
            );
        } else {
            tracing::debug!(
                state = %snapshot.state,
                reconnects = snapshot.reconnects,
                total_failures = snapshot.total_failures,
                uptime_secs = snapshot.uptime.map(|d| d.as_secs()).unwrap_or_default(),
                "Health check"
            );
        }
        stale
    }
}

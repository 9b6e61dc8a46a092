//! Connection health counters.
//!
//! # Design Decisions
//! - Counters are atomics; timestamps sit behind a short std mutex
//! - The manager's driver task is the only writer

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::connection::ConnectionState;

#[derive(Debug)]
struct Timestamps {
    created_at: Instant,
    connected_at: Option<Instant>,
    disconnected_at: Option<Instant>,
}

/// Running health record for one session.
#[derive(Debug)]
pub struct ConnectionHealth {
    successful_connects: AtomicU64,
    total_failures: AtomicU64,
    consecutive_failures: AtomicU64,
    times: Mutex<Timestamps>,
}

/// Point-in-time health view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthSnapshot {
    pub state: ConnectionState,
    pub connected: bool,
    pub successful_connects: u64,
    /// Successful connects after the first one.
    pub reconnects: u64,
    pub total_failures: u64,
    pub consecutive_failures: u64,
    /// Time since the current connection was established.
    pub uptime: Option<Duration>,
    /// Time since the last successful connect, whether or not it is still live.
    pub since_last_connect: Option<Duration>,
    /// Time spent without a live connection.
    pub offline_for: Option<Duration>,
}

impl ConnectionHealth {
    pub fn new() -> Self {
        Self {
            successful_connects: AtomicU64::new(0),
            total_failures: AtomicU64::new(0),
            consecutive_failures: AtomicU64::new(0),
            times: Mutex::new(Timestamps {
                created_at: Instant::now(),
                connected_at: None,
                disconnected_at: None,
            }),
        }
    }

    fn times(&self) -> std::sync::MutexGuard<'_, Timestamps> {
        self.times.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record_connected(&self) {
        self.successful_connects.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.store(0, Ordering::Relaxed);
        let mut times = self.times();
        times.connected_at = Some(Instant::now());
        times.disconnected_at = None;
    }

    pub fn record_disconnected(&self) {
        self.times().disconnected_at = Some(Instant::now());
    }

    pub fn record_failure(&self) {
        self.total_failures.fetch_add(1, Ordering::Relaxed);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, state: ConnectionState) -> HealthSnapshot {
        let now = Instant::now();
        let connected = state == ConnectionState::Connected;
        let successful_connects = self.successful_connects.load(Ordering::Relaxed);
        let times = self.times();

        let since_last_connect = times.connected_at.map(|at| now.duration_since(at));
        let offline_for = if connected {
            None
        } else {
            Some(now.duration_since(times.disconnected_at.unwrap_or(times.created_at)))
        };

        HealthSnapshot {
            state,
            connected,
            successful_connects,
            reconnects: successful_connects.saturating_sub(1),
            total_failures: self.total_failures.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Relaxed),
            uptime: if connected { since_last_connect } else { None },
            since_last_connect,
            offline_for,
        }
    }
}

impl Default for ConnectionHealth {
    fn default() -> Self {
        Self::new()
    }
}

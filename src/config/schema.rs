//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the session
//! keeper. All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the session keeper.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct SessionConfig {
    /// Credential store settings (database path, cache, flushing).
    pub store: StoreConfig,

    /// Reconnect backoff settings.
    pub reconnect: ReconnectConfig,

    /// Circuit breaker guarding reconnect attempts.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Transport endpoint and handshake timeouts.
    pub transport: TransportConfig,

    /// Shutdown sequencing settings.
    pub shutdown: ShutdownConfig,

    /// Connection health reporting.
    pub health: HealthConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Credential store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path to the SQLite database holding credential records.
    pub db_path: String,

    /// Maximum number of records kept in the in-memory LRU cache.
    pub cache_capacity: usize,

    /// Interval between background flushes of buffered writes.
    pub flush_interval_ms: u64,

    /// Buffered writes that trigger an immediate flush.
    pub max_batch: usize,

    /// Attempts for a durable write before the error is surfaced.
    pub write_retries: u32,

    /// Base delay between durable write attempts.
    pub retry_base_delay_ms: u64,

    /// Upper bound for the delay between durable write attempts.
    pub retry_max_delay_ms: u64,

    /// Key kinds written durably before `set` returns.
    pub critical_kinds: Vec<String>,

    /// Interval between maintenance passes.
    pub maintenance_interval_secs: u64,

    /// Non-critical records untouched for this long are pruned.
    pub retention_days: u64,

    /// Session errors within the window that trigger a session purge.
    pub session_error_threshold: u32,

    /// Window for counting session errors, in seconds.
    pub session_error_window_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: "./data/session/auth.db".to_string(),
            cache_capacity: 512,
            flush_interval_ms: 50,
            max_batch: 32,
            write_retries: 3,
            retry_base_delay_ms: 50,
            retry_max_delay_ms: 1000,
            critical_kinds: vec![
                "creds".to_string(),
                "app-state-sync-key".to_string(),
                "sender-key".to_string(),
            ],
            maintenance_interval_secs: 12 * 60 * 60,
            retention_days: 15,
            session_error_threshold: 5,
            session_error_window_secs: 180,
        }
    }
}

impl StoreConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance_interval_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_days.saturating_mul(24 * 60 * 60))
    }

    pub fn session_error_window(&self) -> Duration {
        Duration::from_secs(self.session_error_window_secs)
    }
}

/// Reconnect backoff configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReconnectConfig {
    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,

    /// Uniform jitter applied to each delay, as a fraction (0.2 = ±20%).
    pub jitter: f64,

    /// Fixed delay before reconnecting on a server restart request, in
    /// milliseconds. Restarts still count toward the circuit breaker.
    pub restart_delay_ms: u64,

    /// Clear every stored credential when the session is logged out.
    pub clear_on_logout: bool,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 2000,
            max_delay_ms: 60_000,
            jitter: 0.2,
            restart_delay_ms: 2000,
            clear_on_logout: true,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,

    /// Rolling window in which the failures must occur, in seconds.
    pub window_secs: u64,

    /// Time the circuit stays open before attempts resume, in milliseconds.
    pub cooldown_ms: u64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window_secs: 3600,
            cooldown_ms: 60_000,
        }
    }
}

/// Transport configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    /// WebSocket endpoint of the messaging gateway.
    pub url: String,

    /// Timeout for opening a connection and completing the handshake.
    pub connect_timeout_secs: u64,

    /// Timeout for a new identity to be accepted (pairing window).
    pub auth_timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:7400/session".to_string(),
            connect_timeout_secs: 20,
            auth_timeout_secs: 120,
        }
    }
}

/// Shutdown configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Default timeout for a single resource cleanup, in milliseconds.
    pub cleanup_timeout_ms: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            cleanup_timeout_ms: 5000,
        }
    }
}

/// Health reporting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Enable the periodic health monitor.
    pub enabled: bool,

    /// Health snapshot interval in seconds.
    pub interval_secs: u64,

    /// Warn when the session has not been connected for this long.
    pub stale_after_secs: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            stale_after_secs: 300,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

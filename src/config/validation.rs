//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, jitter within [0, 1))
//! - Validate addresses and endpoint URLs
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: SessionConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::SessionConfig;

/// Longest accepted retention period.
pub const MAX_RETENTION_DAYS: u64 = 3650;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &SessionConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let store = &config.store;
    if store.db_path.trim().is_empty() {
        errors.push(ValidationError::new("store.db_path", "must not be empty"));
    }
    if store.cache_capacity == 0 {
        errors.push(ValidationError::new("store.cache_capacity", "must be greater than 0"));
    }
    if store.max_batch == 0 {
        errors.push(ValidationError::new("store.max_batch", "must be greater than 0"));
    }
    if store.write_retries == 0 {
        errors.push(ValidationError::new("store.write_retries", "must be at least 1"));
    }
    if store.flush_interval_ms == 0 {
        errors.push(ValidationError::new("store.flush_interval_ms", "must be greater than 0"));
    }
    if store.retry_base_delay_ms > store.retry_max_delay_ms {
        errors.push(ValidationError::new(
            "store.retry_base_delay_ms",
            "must not exceed store.retry_max_delay_ms",
        ));
    }
    if store.maintenance_interval_secs == 0 {
        errors.push(ValidationError::new(
            "store.maintenance_interval_secs",
            "must be greater than 0",
        ));
    }
    if store.retention_days == 0 || store.retention_days > MAX_RETENTION_DAYS {
        errors.push(ValidationError::new(
            "store.retention_days",
            format!("must be between 1 and {MAX_RETENTION_DAYS}"),
        ));
    }
    if store.session_error_threshold == 0 {
        errors.push(ValidationError::new(
            "store.session_error_threshold",
            "must be greater than 0",
        ));
    }
    if store.session_error_window_secs == 0 {
        errors.push(ValidationError::new(
            "store.session_error_window_secs",
            "must be greater than 0",
        ));
    }
    if !store.critical_kinds.iter().any(|k| k == "creds") {
        errors.push(ValidationError::new(
            "store.critical_kinds",
            "must include \"creds\" so identity rotation is always durable",
        ));
    }

    let reconnect = &config.reconnect;
    if reconnect.base_delay_ms == 0 {
        errors.push(ValidationError::new("reconnect.base_delay_ms", "must be greater than 0"));
    }
    if reconnect.base_delay_ms > reconnect.max_delay_ms {
        errors.push(ValidationError::new(
            "reconnect.base_delay_ms",
            "must not exceed reconnect.max_delay_ms",
        ));
    }
    if !(0.0..1.0).contains(&reconnect.jitter) {
        errors.push(ValidationError::new("reconnect.jitter", "must be in [0.0, 1.0)"));
    }
    if reconnect.restart_delay_ms == 0 {
        errors.push(ValidationError::new(
            "reconnect.restart_delay_ms",
            "must be greater than 0",
        ));
    }

    let breaker = &config.circuit_breaker;
    if breaker.failure_threshold == 0 {
        errors.push(ValidationError::new(
            "circuit_breaker.failure_threshold",
            "must be at least 1",
        ));
    }
    if breaker.window_secs == 0 {
        errors.push(ValidationError::new("circuit_breaker.window_secs", "must be greater than 0"));
    }

    let transport = &config.transport;
    match url::Url::parse(&transport.url) {
        Ok(url) if url.scheme() == "ws" || url.scheme() == "wss" => {}
        Ok(url) => errors.push(ValidationError::new(
            "transport.url",
            format!("unsupported scheme '{}', expected ws or wss", url.scheme()),
        )),
        Err(e) => errors.push(ValidationError::new("transport.url", e.to_string())),
    }
    if transport.connect_timeout_secs == 0 {
        errors.push(ValidationError::new(
            "transport.connect_timeout_secs",
            "must be greater than 0",
        ));
    }
    if transport.auth_timeout_secs == 0 {
        errors.push(ValidationError::new("transport.auth_timeout_secs", "must be greater than 0"));
    }

    if config.shutdown.cleanup_timeout_ms == 0 {
        errors.push(ValidationError::new(
            "shutdown.cleanup_timeout_ms",
            "must be greater than 0",
        ));
    }

    if config.health.enabled && config.health.interval_secs == 0 {
        errors.push(ValidationError::new("health.interval_secs", "must be greater than 0"));
    }

    let observability = &config.observability;
    if observability.metrics_enabled
        && observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

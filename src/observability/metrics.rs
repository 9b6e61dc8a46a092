//! Metrics collection and exposition.
//!
//! # Metrics
//! - `session_state_transitions_total` (counter): by `from`, `to`
//! - `session_connect_attempts_total` (counter): by `outcome`
//! - `session_disconnects_total` (counter): by `reason`
//! - `session_reconnect_delay_seconds` (histogram)
//! - `session_circuit_open_total` (counter)
//! - `credential_reads_total` (counter): by `result` (hit, miss)
//! - `credential_writes_total` (counter): by `mode` (durable, buffered)
//! - `credential_flush_records` (histogram), `credential_flush_duration_seconds` (histogram)
//! - `credential_errors_total` (counter): by `op`
//! - `shutdown_cleanup_total` (counter): by `resource`, `status`
//! - `session_health_*` (gauges): connected, reconnects, consecutive failures, offline time
//!
//! # Design Decisions
//! - Recording without an installed recorder is a no-op, so library code
//!   records unconditionally

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::health::HealthSnapshot;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_state_transition(from: &'static str, to: &'static str) {
    counter!("session_state_transitions_total", "from" => from, "to" => to).increment(1);
}

pub fn record_connect_attempt(outcome: &'static str) {
    counter!("session_connect_attempts_total", "outcome" => outcome).increment(1);
}

pub fn record_disconnect(reason: &'static str) {
    counter!("session_disconnects_total", "reason" => reason).increment(1);
}

pub fn record_reconnect_delay(delay: Duration) {
    histogram!("session_reconnect_delay_seconds").record(delay.as_secs_f64());
}

pub fn record_circuit_open() {
    counter!("session_circuit_open_total").increment(1);
}

pub fn record_store_read(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("credential_reads_total", "result" => result).increment(1);
}

pub fn record_store_write(durable: bool) {
    record_store_writes(durable, 1);
}

pub fn record_store_writes(durable: bool, count: usize) {
    let mode = if durable { "durable" } else { "buffered" };
    counter!("credential_writes_total", "mode" => mode).increment(count as u64);
}

pub fn record_store_flush(records: usize, elapsed: Duration) {
    histogram!("credential_flush_records").record(records as f64);
    histogram!("credential_flush_duration_seconds").record(elapsed.as_secs_f64());
}

pub fn record_store_error(op: &'static str) {
    counter!("credential_errors_total", "op" => op).increment(1);
}

pub fn record_cleanup(resource: &str, status: &'static str, elapsed: Duration) {
    counter!("shutdown_cleanup_total", "resource" => resource.to_string(), "status" => status)
        .increment(1);
    histogram!("shutdown_cleanup_duration_seconds", "resource" => resource.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn record_health(snapshot: &HealthSnapshot) {
    gauge!("session_health_connected").set(if snapshot.connected { 1.0 } else { 0.0 });
    gauge!("session_health_reconnects").set(snapshot.reconnects as f64);
    gauge!("session_health_consecutive_failures").set(snapshot.consecutive_failures as f64);
    if let Some(offline) = snapshot.offline_for {
        gauge!("session_health_offline_seconds").set(offline.as_secs_f64());
    }
}

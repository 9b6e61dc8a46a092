//! Reconnect policy: jittered exponential backoff plus the circuit breaker.

use std::time::{Duration, Instant};

use crate::config::{CircuitBreakerConfig, ReconnectConfig};
use crate::resilience::backoff::calculate_backoff;
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitState};

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Wait this long, then connect again.
    Retry(Duration),
    /// The breaker tripped; stay idle for the cool-down.
    OpenCircuit(Duration),
}

/// Reconnect bookkeeping owned by the connection manager.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter: f64,
    restart_delay: Duration,
    attempt: u32,
    breaker: CircuitBreaker,
}

impl ReconnectPolicy {
    pub fn new(reconnect: &ReconnectConfig, breaker: &CircuitBreakerConfig) -> Self {
        Self {
            base_delay_ms: reconnect.base_delay_ms,
            max_delay_ms: reconnect.max_delay_ms,
            jitter: reconnect.jitter,
            restart_delay: Duration::from_millis(reconnect.restart_delay_ms),
            attempt: 0,
            breaker: CircuitBreaker::new(breaker),
        }
    }

    /// Failed attempts since the last successful connect.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.breaker.consecutive_failures()
    }

    pub fn circuit_opened_at(&self) -> Option<Instant> {
        self.breaker.opened_at()
    }

    pub fn record_failure(&mut self, now: Instant) -> Decision {
        let delay = calculate_backoff(
            self.attempt,
            self.base_delay_ms,
            self.max_delay_ms,
            self.jitter,
        );
        self.attempt = self.attempt.saturating_add(1);

        match self.breaker.record_failure(now) {
            CircuitState::Open => Decision::OpenCircuit(self.breaker.cooldown_remaining(now)),
            CircuitState::Closed => Decision::Retry(delay),
        }
    }

    /// The server asked for a reconnect. The delay is fixed, but the
    /// restart counts toward the breaker so a repeating request still trips it.
    pub fn record_restart(&mut self, now: Instant) -> Decision {
        match self.breaker.record_failure(now) {
            CircuitState::Open => Decision::OpenCircuit(self.breaker.cooldown_remaining(now)),
            CircuitState::Closed => Decision::Retry(self.restart_delay),
        }
    }

    /// Cool-down elapsed: allow attempts again with a reduced failure count.
    pub fn resume(&mut self, now: Instant) {
        self.breaker.resume(now);
    }

    pub fn record_success(&mut self) {
        self.attempt = 0;
        self.breaker.record_success();
    }
}

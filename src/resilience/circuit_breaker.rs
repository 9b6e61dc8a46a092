//! Circuit breaker guarding reconnect attempts.
//!
//! # States
//! - Closed: attempts pass through, failures are counted
//! - Open: attempts suspended until the cool-down elapses
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= threshold within window
//! Open → Closed: cool-down elapsed (failures reduced, not cleared)
//! any → Closed: success (failures cleared)
//! ```
//!
//! # Design Decisions
//! - One breaker per session (there is a single connection to protect)
//! - Failures older than the window start a new streak
//! - After cool-down the streak resumes at half the threshold, so one more
//!   failure does not re-trip immediately but a few more do

use std::time::{Duration, Instant};

use crate::config::CircuitBreakerConfig;

/// Breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    threshold: u32,
    window: Duration,
    cooldown: Duration,
    consecutive_failures: u32,
    streak_started_at: Option<Instant>,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(config: &CircuitBreakerConfig) -> Self {
        Self {
            threshold: config.failure_threshold.max(1),
            window: Duration::from_secs(config.window_secs),
            cooldown: Duration::from_millis(config.cooldown_ms),
            consecutive_failures: 0,
            streak_started_at: None,
            opened_at: None,
        }
    }

    pub fn state(&self) -> CircuitState {
        if self.opened_at.is_some() {
            CircuitState::Open
        } else {
            CircuitState::Closed
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn opened_at(&self) -> Option<Instant> {
        self.opened_at
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Record a failure at `now`. Returns the resulting state.
    pub fn record_failure(&mut self, now: Instant) -> CircuitState {
        let streak_expired = self
            .streak_started_at
            .is_some_and(|started| now.saturating_duration_since(started) > self.window);

        if streak_expired || self.consecutive_failures == 0 {
            self.consecutive_failures = 0;
            self.streak_started_at = Some(now);
        }
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);

        if self.opened_at.is_none() && self.consecutive_failures >= self.threshold {
            self.opened_at = Some(now);
            tracing::warn!(
                failures = self.consecutive_failures,
                threshold = self.threshold,
                cooldown_ms = self.cooldown.as_millis() as u64,
                "Circuit breaker: closed -> open"
            );
        }

        self.state()
    }

    /// Record a success: the streak is cleared and the circuit closes.
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.streak_started_at = None;
        self.opened_at = None;
    }

    /// Time left before attempts may resume; zero when closed.
    pub fn cooldown_remaining(&self, now: Instant) -> Duration {
        match self.opened_at {
            Some(opened) => self
                .cooldown
                .saturating_sub(now.saturating_duration_since(opened)),
            None => Duration::ZERO,
        }
    }

    /// Close the circuit after the cool-down, keeping a reduced failure count.
    pub fn resume(&mut self, now: Instant) {
        if self.opened_at.take().is_some() {
            self.consecutive_failures = self.threshold / 2;
            self.streak_started_at = Some(now);
            tracing::info!(
                failures = self.consecutive_failures,
                "Circuit breaker: open -> closed after cool-down"
            );
        }
    }
}

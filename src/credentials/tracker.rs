//! Sliding-window count of session errors.
//!
//! When too many errors land inside the window the session records are
//! presumed corrupt and the caller purges them. Unlike the circuit breaker,
//! errors here are not consecutive: a success in between does not reset the
//! count, only age does.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Result of recording one error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorVerdict {
    /// Errors inside the window, including this one.
    pub count: usize,
    /// The threshold was reached.
    pub should_clear: bool,
}

#[derive(Debug, Clone)]
pub struct ErrorTracker {
    window: Duration,
    threshold: usize,
    errors: VecDeque<Instant>,
}

impl ErrorTracker {
    pub fn new(threshold: u32, window: Duration) -> Self {
        Self {
            window,
            threshold: threshold.max(1) as usize,
            errors: VecDeque::new(),
        }
    }

    pub fn record(&mut self, now: Instant) -> ErrorVerdict {
        self.expire(now);
        self.errors.push_back(now);
        let count = self.errors.len();
        ErrorVerdict {
            count,
            should_clear: count >= self.threshold,
        }
    }

    /// Errors still inside the window at `now`.
    pub fn count(&mut self, now: Instant) -> usize {
        self.expire(now);
        self.errors.len()
    }

    pub fn reset(&mut self) {
        self.errors.clear();
    }

    fn expire(&mut self, now: Instant) {
        while self
            .errors
            .front()
            .is_some_and(|at| now.saturating_duration_since(*at) > self.window)
        {
            self.errors.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_threshold_within_window() {
        let mut tracker = ErrorTracker::new(3, Duration::from_secs(60));
        let t0 = Instant::now();

        assert!(!tracker.record(t0).should_clear);
        assert!(!tracker.record(t0 + Duration::from_secs(10)).should_clear);
        let verdict = tracker.record(t0 + Duration::from_secs(20));
        assert_eq!(verdict, ErrorVerdict { count: 3, should_clear: true });

        tracker.reset();
        assert_eq!(tracker.count(t0 + Duration::from_secs(20)), 0);
    }

    #[test]
    fn test_old_errors_age_out() {
        let mut tracker = ErrorTracker::new(2, Duration::from_secs(60));
        let t0 = Instant::now();

        tracker.record(t0);
        let verdict = tracker.record(t0 + Duration::from_secs(61));
        assert_eq!(verdict.count, 1);
        assert!(!verdict.should_clear);
        assert_eq!(tracker.count(t0 + Duration::from_secs(200)), 0);
    }
}

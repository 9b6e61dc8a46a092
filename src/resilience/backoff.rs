//! Exponential backoff with jitter.

use std::time::Duration;
use rand::Rng;

/// Un-jittered delay for `attempt`: `min(base * 2^attempt, max)`.
pub fn nominal_backoff(attempt: u32, base_ms: u64, max_ms: u64) -> Duration {
    let exponential_base = 2u64.saturating_pow(attempt);
    let delay_ms = base_ms.saturating_mul(exponential_base);
    Duration::from_millis(delay_ms.min(max_ms))
}

/// Calculate exponential backoff delay with jitter.
///
/// The nominal delay is scaled by a uniform factor in `[1 - jitter, 1 + jitter]`.
pub fn calculate_backoff(attempt: u32, base_ms: u64, max_ms: u64, jitter: f64) -> Duration {
    let capped_delay = nominal_backoff(attempt, base_ms, max_ms);

    let jitter = jitter.clamp(0.0, 1.0);
    if jitter == 0.0 || capped_delay.is_zero() {
        return capped_delay;
    }

    let factor = rand::thread_rng().gen_range((1.0 - jitter)..=(1.0 + jitter));
    capped_delay.mul_f64(factor)
}

/// Bounds of the jitter band around the nominal delay for `attempt`.
pub fn jitter_band(attempt: u32, base_ms: u64, max_ms: u64, jitter: f64) -> (Duration, Duration) {
    let nominal = nominal_backoff(attempt, base_ms, max_ms);
    let jitter = jitter.clamp(0.0, 1.0);
    (nominal.mul_f64(1.0 - jitter), nominal.mul_f64(1.0 + jitter))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_calculation() {
        let b0 = calculate_backoff(0, 100, 2000, 0.0);
        assert_eq!(b0.as_millis(), 100);

        let b1 = calculate_backoff(1, 100, 2000, 0.0);
        assert_eq!(b1.as_millis(), 200);

        let max = calculate_backoff(10, 100, 1000, 0.0);
        assert_eq!(max.as_millis(), 1000);
    }

    #[test]
    fn test_nominal_delay_is_monotonic() {
        let mut previous = Duration::ZERO;
        for attempt in 0..40 {
            let delay = nominal_backoff(attempt, 2000, 60_000);
            assert!(delay >= previous, "attempt {attempt} decreased");
            assert!(delay <= Duration::from_millis(60_000));
            previous = delay;
        }
    }

    #[test]
    fn test_jittered_delay_stays_in_band() {
        for attempt in 0..12 {
            let (low, high) = jitter_band(attempt, 100, 5000, 0.2);
            for _ in 0..50 {
                let delay = calculate_backoff(attempt, 100, 5000, 0.2);
                assert!(delay >= low && delay <= high, "{delay:?} outside {low:?}..{high:?}");
            }
        }
    }

    #[test]
    fn test_huge_attempt_saturates() {
        assert_eq!(nominal_backoff(u32::MAX, 100, 1000), Duration::from_millis(1000));
    }
}

//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Connection attempt:
//!     → timeouts.rs (connect/auth deadline)
//!     → On failure: circuit_breaker.rs (count failures, open after threshold)
//!     → backoff.rs (jittered exponential delay before the next attempt)
//!
//! Durable credential write:
//!     → retries.rs (bounded retries with backoff, then surface the error)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every external call has a deadline
//! - Jitter prevents synchronized retry storms across sessions
//! - Circuit breaker bounds retry aggressiveness independent of backoff growth

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;

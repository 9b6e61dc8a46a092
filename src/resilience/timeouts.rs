//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap external calls (transport open, cleanups) with a deadline
//! - Keep timeout errors distinct from the operation's own errors
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Dropping the wrapped future is the cancellation

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// Error from an operation run under a deadline.
#[derive(Debug, Error)]
pub enum TimeoutError<E> {
    #[error("timed out after {0:?}")]
    Elapsed(Duration),

    #[error(transparent)]
    Inner(E),
}

/// Run a fallible future with a deadline.
pub async fn with_timeout<T, E, F>(limit: Duration, fut: F) -> Result<T, TimeoutError<E>>
where
    F: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(TimeoutError::Inner(e)),
        Err(_) => Err(TimeoutError::Elapsed(limit)),
    }
}

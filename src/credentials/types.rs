//! Credential record types and error definitions.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Key of the identity record. Survives a session purge.
pub const CREDS_KEY: &str = "creds";

/// Longest accepted key, in bytes.
pub const MAX_KEY_LEN: usize = 512;

/// A persisted piece of credential material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// Logical identifier, `kind` or `kind:id`.
    pub key: String,
    /// Opaque payload produced by the protocol library.
    pub value: Vec<u8>,
    /// Last write time, unix milliseconds.
    pub updated_at: i64,
}

impl CredentialRecord {
    pub fn new(key: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            value,
            updated_at: now_millis(),
        }
    }

    pub fn kind(&self) -> &str {
        key_kind(&self.key)
    }
}

/// Build a `kind:id` key.
pub fn make_key(kind: &str, id: &str) -> String {
    format!("{kind}:{id}")
}

/// The kind of a key: the text before the first `:`, or the whole key.
pub fn key_kind(key: &str) -> &str {
    key.split_once(':').map_or(key, |(kind, _)| kind)
}

/// Reject keys the durable store cannot hold.
pub fn validate_key(key: &str) -> Result<(), CredentialError> {
    if key.is_empty() || key.len() >= MAX_KEY_LEN || key.contains('\0') {
        return Err(CredentialError::InvalidKey(key.chars().take(64).collect()));
    }
    Ok(())
}

pub(crate) fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

/// Errors that can occur during credential store operations.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// Key is empty, too long, or contains NUL.
    #[error("invalid credential key '{0}'")]
    InvalidKey(String),

    /// Durable storage rejected an operation.
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Durable write still failing after bounded retries.
    #[error("failed to persist '{key}' after {attempts} attempts: {message}")]
    Persist {
        key: String,
        attempts: u32,
        message: String,
    },

    /// Buffered writes could not be flushed.
    #[error("flush of {pending} buffered records failed after {attempts} attempts: {message}")]
    Flush {
        pending: usize,
        attempts: u32,
        message: String,
    },

    /// The store has been closed.
    #[error("credential store is closed")]
    Closed,

    /// A blocking storage task panicked or was cancelled.
    #[error("storage task failed: {0}")]
    Task(String),

    /// Creating the database directory failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CredentialResult<T> = Result<T, CredentialError>;

/// Point-in-time counters for the store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub reads: u64,
    pub writes: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub flushes: u64,
    pub errors: u64,
    /// Session errors inside the tracking window.
    pub recent_errors: usize,
    pub cache_len: usize,
    pub cache_capacity: usize,
    pub pending_writes: usize,
}

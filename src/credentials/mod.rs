//! Credential persistence subsystem.
//!
//! # Data Flow
//! ```text
//! Protocol layer / connection manager
//!     → store.rs (per-key locking, cache, write buffer, retries)
//!     → cache.rs (bounded LRU of hot records)
//!     → backend.rs (SQLite, one row per key)
//!
//! Connection manager → store.record_error → tracker.rs (error window)
//! ```
//!
//! # Key Space
//! - `creds`: the identity record, the only key a session purge keeps
//! - `kind:id`: everything else (`session:<jid>`, `pre-key:<n>`, ...)
//!
//! # Design Decisions
//! - Identity and key-distribution material is persisted before a write
//!   returns; bulk session material is buffered and flushed in batches
//! - Values are opaque bytes and never logged

pub mod backend;
pub mod cache;
pub mod store;
pub mod tracker;
pub mod types;

pub use backend::{CredentialBackend, SqliteBackend};
pub use store::CredentialStore;
pub use tracker::{ErrorTracker, ErrorVerdict};
pub use types::{
    key_kind, make_key, validate_key, CredentialError, CredentialRecord, CredentialResult,
    StoreStats, CREDS_KEY,
};

//! Transport capability consumed by the connection manager.

use async_trait::async_trait;
use thiserror::Error;

use crate::connection::event::{EventSink, ReasonCode};

/// Authentication material offered on open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    /// A stored identity record exists.
    Registered(Vec<u8>),
    /// No identity yet; the transport must run first-time authentication.
    Unregistered,
}

impl AuthState {
    pub fn from_creds(creds: Option<Vec<u8>>) -> Self {
        match creds {
            Some(creds) if !creds.is_empty() => Self::Registered(creds),
            _ => Self::Unregistered,
        }
    }

    pub fn creds(&self) -> Option<&[u8]> {
        match self {
            Self::Registered(creds) => Some(creds),
            Self::Unregistered => None,
        }
    }
}

/// Whether the server recognized the offered identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity {
    Known,
    /// Authentication continues; an `Authenticated` event follows.
    Unknown,
}

/// Result of a successful open.
#[derive(Debug, Clone)]
pub struct Handshake<H> {
    pub handle: H,
    pub identity: Identity,
}

#[derive(Debug, Error)]
pub enum TransportError {
    /// The server refused the connection with a protocol reason.
    #[error("connection rejected: {0}")]
    Rejected(ReasonCode),

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// The disconnect reason this failure counts as.
    pub fn reason(&self) -> ReasonCode {
        match self {
            Self::Rejected(reason) => *reason,
            Self::Connect(_) | Self::Protocol(_) => ReasonCode::ConnectionLost,
        }
    }
}

/// A session transport.
///
/// `open` returns once the handshake is done; everything after that is
/// reported through `events`. A live connection ends with a `Disconnected`
/// event; events emitted after the manager moved on are ignored.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Live connection handle handed to the dispatch layer.
    type Handle: Clone + Send + Sync + 'static;

    async fn open(
        &self,
        auth: AuthState,
        events: EventSink,
    ) -> Result<Handshake<Self::Handle>, TransportError>;

    async fn close(&self, handle: Self::Handle);
}

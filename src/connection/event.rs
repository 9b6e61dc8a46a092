//! Disconnect reasons and transport events.
//!
//! Transports never call into the manager. They push events into an
//! [`EventSink`], and the manager's driver task consumes them in order.

use std::fmt;
use std::time::SystemTime;

use serde::Serialize;
use tokio::sync::mpsc;

/// Normalized disconnect reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    /// The account was logged out; credentials are void.
    LoggedOut,
    /// Another client took over the session.
    Replaced,
    /// The server asked for an immediate reconnect.
    RestartRequired,
    ConnectionLost,
    /// The server rejected the session material.
    BadSession,
    Timeout,
    Unknown,
}

impl ReasonCode {
    /// Map a protocol disconnect status.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 | 405 | 411 => Self::LoggedOut,
            440 => Self::Replaced,
            500 => Self::BadSession,
            515 => Self::RestartRequired,
            408 => Self::Timeout,
            428 | 503 => Self::ConnectionLost,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LoggedOut => "logged_out",
            Self::Replaced => "replaced",
            Self::RestartRequired => "restart_required",
            Self::ConnectionLost => "connection_lost",
            Self::BadSession => "bad_session",
            Self::Timeout => "timeout",
            Self::Unknown => "unknown",
        }
    }

    /// Session records must be purged before reconnecting.
    pub fn purges_session(&self) -> bool {
        matches!(self, Self::Replaced | Self::BadSession)
    }

    /// Counts toward the store's session error window. Network loss and
    /// server restarts say nothing about the session records.
    pub fn is_session_error(&self) -> bool {
        matches!(self, Self::Replaced | Self::BadSession | Self::Unknown)
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisconnectEvent {
    pub reason: ReasonCode,
    pub timestamp: SystemTime,
    /// Free-form detail from the transport, for logs only.
    pub detail: Option<String>,
}

impl DisconnectEvent {
    pub fn new(reason: ReasonCode) -> Self {
        Self {
            reason,
            timestamp: SystemTime::now(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The live connection ended.
    Disconnected(DisconnectEvent),
    /// A new identity was established; payload is the identity record.
    Authenticated(Vec<u8>),
    /// The protocol rotated credential material that must be persisted.
    CredentialsRotated(Vec<u8>),
}

/// Receiving half of an event channel.
pub type EventReceiver = mpsc::UnboundedReceiver<(u64, TransportEvent)>;

/// Per-connection handle a transport uses to report events.
///
/// Every event is tagged with the generation of the connection attempt that
/// produced it, so events from an earlier connection are recognizable.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<(u64, TransportEvent)>,
}

impl EventSink {
    /// A sink and the receiver it feeds.
    pub fn channel(generation: u64) -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { generation, tx }, rx)
    }

    /// Another sink on the same channel for a later connection.
    pub fn next(&self, generation: u64) -> Self {
        Self {
            generation,
            tx: self.tx.clone(),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns `false` once the consumer is gone.
    pub fn emit(&self, event: TransportEvent) -> bool {
        self.tx.send((self.generation, event)).is_ok()
    }

    pub fn disconnected(&self, reason: ReasonCode) -> bool {
        self.emit(TransportEvent::Disconnected(DisconnectEvent::new(reason)))
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        for status in [401, 403, 405, 411] {
            assert_eq!(ReasonCode::from_status(status), ReasonCode::LoggedOut);
        }
        assert_eq!(ReasonCode::from_status(440), ReasonCode::Replaced);
        assert_eq!(ReasonCode::from_status(500), ReasonCode::BadSession);
        assert_eq!(ReasonCode::from_status(515), ReasonCode::RestartRequired);
        assert_eq!(ReasonCode::from_status(408), ReasonCode::Timeout);
        assert_eq!(ReasonCode::from_status(428), ReasonCode::ConnectionLost);
        assert_eq!(ReasonCode::from_status(503), ReasonCode::ConnectionLost);
        assert_eq!(ReasonCode::from_status(999), ReasonCode::Unknown);
    }

    #[test]
    fn test_session_error_classes() {
        assert!(ReasonCode::Unknown.is_session_error());
        assert!(ReasonCode::BadSession.is_session_error());
        assert!(!ReasonCode::ConnectionLost.is_session_error());
        assert!(!ReasonCode::RestartRequired.is_session_error());
        assert!(!ReasonCode::Unknown.purges_session());
    }

    #[tokio::test]
    async fn test_sink_tags_generation() {
        let (first, mut rx) = EventSink::channel(1);
        let second = first.next(2);

        assert!(first.disconnected(ReasonCode::Timeout));
        assert!(second.emit(TransportEvent::Authenticated(vec![1])));

        let (generation, event) = rx.recv().await.unwrap();
        assert_eq!(generation, 1);
        assert!(matches!(event, TransportEvent::Disconnected(e) if e.reason == ReasonCode::Timeout));
        assert_eq!(rx.recv().await.unwrap().0, 2);

        drop(rx);
        assert!(first.is_closed());
        assert!(!first.disconnected(ReasonCode::Unknown));
    }
}

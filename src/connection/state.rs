//! Connection state machine.
//!
//! # State Transitions
//! ```text
//! Disconnected → Connecting
//! Connecting → Authenticating | Connected | Reconnecting
//! Authenticating → Connected | Reconnecting
//! Connected → Reconnecting
//! Reconnecting → Connecting | CircuitOpen
//! CircuitOpen → Reconnecting
//! any → Closed (terminal)
//! ```

use std::fmt;
use std::time::Instant;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Authenticating,
    Connected,
    Reconnecting,
    CircuitOpen,
    Closed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Authenticating => "authenticating",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::CircuitOpen => "circuit_open",
            Self::Closed => "closed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed)
    }

    /// Whether `self → next` is an edge of the state machine.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Disconnected, Connecting) => true,
            (Connecting, Authenticating | Connected | Reconnecting) => true,
            (Authenticating, Connected | Reconnecting) => true,
            (Connected, Reconnecting) => true,
            (Reconnecting, Connecting | CircuitOpen) => true,
            (CircuitOpen, Reconnecting) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observed transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateChange {
    pub from: ConnectionState,
    pub to: ConnectionState,
    pub at: Instant,
}

#[cfg(test)]
mod tests {
    use super::ConnectionState::*;
    use super::*;

    const ALL: [ConnectionState; 7] = [
        Disconnected,
        Connecting,
        Authenticating,
        Connected,
        Reconnecting,
        CircuitOpen,
        Closed,
    ];

    #[test]
    fn test_closed_is_terminal() {
        for next in ALL {
            assert!(!Closed.can_transition_to(next));
        }
        for state in ALL.into_iter().filter(|s| *s != Closed) {
            assert!(state.can_transition_to(Closed), "{state} -> closed");
        }
    }

    #[test]
    fn test_no_shortcuts_around_reconnecting() {
        assert!(!Connected.can_transition_to(Connecting));
        assert!(!CircuitOpen.can_transition_to(Connecting));
        assert!(!Disconnected.can_transition_to(Connected));
        assert!(!Authenticating.can_transition_to(CircuitOpen));
        assert!(Reconnecting.can_transition_to(CircuitOpen));
        assert!(CircuitOpen.can_transition_to(Reconnecting));
    }
}

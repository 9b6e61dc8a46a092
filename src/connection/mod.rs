//! Connection management subsystem.
//!
//! # Data Flow
//! ```text
//! transport.rs (capability: open / close)
//!     → event.rs (EventSink: disconnects, authentication, rotations)
//!     → manager.rs (single driver task, state.rs transitions)
//!         → policy.rs (backoff + circuit breaker)
//!         → credentials (load identity, persist rotations, purge)
//!         → health (connect/failure counters)
//! ```
//!
//! # Design Decisions
//! - One driver task per session; nothing else mutates connection state
//! - Transports report through a channel instead of callbacks
//! - Events carry a connection generation; stale ones are dropped
//! - `websocket.rs` is a reference transport; the manager only sees the trait

pub mod event;
pub mod manager;
pub mod policy;
pub mod state;
pub mod transport;
pub mod websocket;

pub use event::{DisconnectEvent, EventReceiver, EventSink, ReasonCode, TransportEvent};
pub use manager::{CloseReason, ConnectionError, ConnectionManager, ManagerConfig};
pub use policy::{Decision, ReconnectPolicy};
pub use state::{ConnectionState, StateChange};
pub use transport::{AuthState, Handshake, Identity, Transport, TransportError};
pub use websocket::{WsHandle, WsTransport};

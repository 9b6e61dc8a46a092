//! Session lifecycle core for a long-lived messaging client.
//!
//! # Architecture Overview
//!
//! ```text
//!                 ┌──────────────────────────────────────────────────────┐
//!                 │                    SESSION KEEPER                     │
//!                 │                                                       │
//!   gateway ◀────▶│  ┌───────────┐   events   ┌──────────────────────┐   │
//!   (transport)   │  │ transport │──────────▶ │  connection manager  │   │
//!                 │  │ (ws, ...) │◀────────── │  (one driver task)   │   │
//!                 │  └───────────┘ open/close └──────────┬───────────┘   │
//!                 │                                      │ load/persist  │
//!                 │                                      ▼ purge         │
//!                 │                           ┌──────────────────────┐   │
//!                 │                           │  credential store    │   │
//!                 │                           │  cache → buffer → db │   │
//!                 │                           └──────────────────────┘   │
//!                 │                                                       │
//!                 │  ┌─────────────────────────────────────────────────┐ │
//!                 │  │              Cross-Cutting Concerns              │ │
//!                 │  │  config · observability · resilience · health    │ │
//!                 │  │  lifecycle (startup, ordered shutdown, signals)  │ │
//!                 │  └─────────────────────────────────────────────────┘ │
//!                 └──────────────────────────────────────────────────────┘
//! ```

// Core subsystems
pub mod config;
pub mod connection;
pub mod credentials;

// Cross-cutting concerns
pub mod health;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::SessionConfig;
pub use connection::{ConnectionManager, ConnectionState};
pub use credentials::CredentialStore;
pub use lifecycle::{SessionContext, ShutdownOrchestrator};

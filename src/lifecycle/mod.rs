//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Open store → Build manager → Register cleanups → Connect
//!
//! Shutdown (shutdown.rs):
//!     Reason (signal, logout, fatal error)
//!     → broadcast signal to background loops
//!     → cleanups by priority: connection → health monitor → store
//!     → ShutdownReport
//!
//! Signals (signals.rs):
//!     SIGINT / SIGTERM → shutdown → exit 130 / 143
//! ```
//!
//! # Design Decisions
//! - The credential store closes last so nothing writes after its final flush
//! - Every cleanup has a deadline; one stuck resource cannot block exit

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{
    CleanupOutcome, CleanupStatus, RegisterOptions, RegistrationError, Shutdown,
    ShutdownOrchestrator, ShutdownReport,
};
pub use signals::{wait_for_signal, Signal};
pub use startup::{SessionContext, StartupError};

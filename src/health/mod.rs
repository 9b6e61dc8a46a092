//! Health tracking subsystem.
//!
//! # Data Flow
//! ```text
//! Connection manager transitions
//!     → state.rs (connect / failure counters, timestamps)
//!
//! Periodic timer (monitor.rs)
//!     → snapshot state.rs
//!     → metrics gauges, offline warning
//! ```
//!
//! # Design Decisions
//! - Health is observed, never acted on: the monitor does not reconnect
//! - One record per session

pub mod monitor;
pub mod state;

pub use monitor::{HealthMonitor, HealthSource};
pub use state::{ConnectionHealth, HealthSnapshot};

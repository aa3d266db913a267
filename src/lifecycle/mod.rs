//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Shutdown (shutdown.rs):
//!     trigger → accept loop stops / client sessions stop between round trips
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → operator stop for either binary
//! ```
//!
//! # Design Decisions
//! - Ordered shutdown: stop accept, force-close live connections, join handlers
//! - Stop is level-triggered (watch), not an event that can be missed

pub mod shutdown;
pub mod signals;

pub use shutdown::{Shutdown, ShutdownSignal};

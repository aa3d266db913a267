//! Client fleet.
//!
//! # Data Flow
//! ```text
//! ClientFleet::connect (N sessions, handshakes up front)
//!     → ClientFleet::start (one task per session)
//!         → ClientSession::run: pick payload → write → read echo → verify
//!     → RunningFleet::wait / stop → FleetReport
//! ```
//!
//! # Design Decisions
//! - A failed connect or handshake is fatal to fleet setup
//! - Server-side close is a normal end of a session, not an error
//! - Stop is observed between round trips; in-flight trips may be abandoned

pub mod fleet;
pub mod payload;
pub mod session;

use std::io;

use thiserror::Error;
use tokio::task::JoinError;

use crate::net::tls::TlsError;

pub use fleet::{ClientFleet, FleetReport, RunningFleet};
pub use payload::PayloadPool;
pub use session::{ClientSession, SessionOutcome, SessionReport};

/// Client-side errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("cannot connect to {endpoint}: {source}")]
    Connect { endpoint: String, source: io::Error },

    #[error("connecting to {0} timed out")]
    ConnectTimeout(String),

    #[error("TLS handshake with {endpoint} failed: {source}")]
    Handshake { endpoint: String, source: io::Error },

    #[error(transparent)]
    Tls(#[from] TlsError),

    #[error("echo of a {len}-byte payload did not match")]
    EchoMismatch { len: usize },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("session task failed: {0}")]
    Task(#[from] JoinError),
}

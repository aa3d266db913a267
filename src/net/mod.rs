//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept, connection limits)
//!     → tls.rs (mutual TLS handshake)
//!     → connection.rs (handle, lifecycle state)
//!     → Hand off to the echo handler
//!
//! Connection States:
//!     Registered → Looping → Draining → Closed
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each connection is closable by the shutdown path through its handle
//! - Client certificates are mandatory on the server

pub mod connection;
pub mod listener;
pub mod tls;

use std::io;

/// Errors that mean "the other side went away". Both the server handler and
/// the client session treat these as a normal end of the connection.
pub fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
    )
}

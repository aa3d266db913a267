//! Connection identity, state machine and close handle.
//!
//! A [`ConnectionHandle`] is what the registry stores: enough to name a
//! connection in logs, report where its handler is in
//! Registered → Looping → Draining → Closed, and close it from outside.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use tokio::sync::watch;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection number, shown as `conn-N` in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Echo handler lifecycle.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Handshake done, inserted into the registry.
    Registered = 0,
    /// Echoing data.
    Looping = 1,
    /// Loop exited; closing, merging statistics, leaving the registry.
    Draining = 2,
    /// Terminal.
    Closed = 3,
}

impl From<u8> for ConnectionState {
    fn from(val: u8) -> Self {
        match val {
            0 => ConnectionState::Registered,
            1 => ConnectionState::Looping,
            2 => ConnectionState::Draining,
            _ => ConnectionState::Closed,
        }
    }
}

/// Shared reference to a live connection.
///
/// The stream itself stays owned by its handler task. The handle carries
/// what others need: identity, current state, and a close flag the handler
/// races against every blocking read and write.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    peer: SocketAddr,
    state: AtomicU8,
    close_tx: watch::Sender<bool>,
}

impl ConnectionHandle {
    pub fn new(peer: SocketAddr) -> Self {
        let (close_tx, _) = watch::channel(false);
        Self {
            id: ConnectionId::new(),
            peer,
            state: AtomicU8::new(ConnectionState::Registered as u8),
            close_tx,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote endpoint, the registry key.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::from(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: ConnectionState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Request closure. Idempotent; returns `true` only for the call that
    /// actually closed the connection.
    pub fn close(&self) -> bool {
        self.close_tx.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        })
    }

    pub fn is_closed(&self) -> bool {
        *self.close_tx.borrow()
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub async fn closed(&self) {
        let mut rx = self.close_tx.subscribe();
        // The sender lives in `self`, so this cannot observe a dropped channel.
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

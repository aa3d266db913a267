//! Registry of live server-side connections.
//!
//! Exists so shutdown can reach connections whose handlers are parked on a
//! read: closing the listener alone would leave them running until their idle
//! deadline.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::net::connection::ConnectionHandle;

/// Live connections keyed by remote endpoint.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<SocketAddr, Arc<ConnectionHandle>>,
    sealed: AtomicBool,
}

impl ConnectionRegistry {
    /// Empty, unsealed registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a connection. On a sealed registry the handle is closed right
    /// away so its handler drains instead of starting to echo.
    pub fn add(&self, handle: Arc<ConnectionHandle>) {
        let peer = handle.peer();
        self.connections.insert(peer, Arc::clone(&handle));
        // Pairs with the store in `seal`: either close_all sees this entry
        // or we see the seal.
        if self.sealed.load(Ordering::SeqCst) {
            handle.close();
        }
        tracing::debug!(peer_addr = %peer, connection_id = %handle.id(), clients = self.count(), "Client registered");
    }

    /// Remove `handle` if it is still the entry for its peer. A newer
    /// connection that reused the same remote address stays registered.
    pub fn remove(&self, handle: &ConnectionHandle) -> Option<Arc<ConnectionHandle>> {
        let id = handle.id();
        self.connections
            .remove_if(&handle.peer(), |_, current| current.id() == id)
            .map(|(_, removed)| removed)
    }

    /// Close every registered connection. Already-closed handles are skipped.
    /// Returns how many this call closed.
    pub fn close_all(&self) -> usize {
        self.snapshot().iter().filter(|handle| handle.close()).count()
    }

    /// Refuse new entries from now on (they are closed on insert).
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::SeqCst);
    }

    /// Whether [`seal`](Self::seal) has been called.
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::SeqCst)
    }

    /// Number of live connections.
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// True when no connection is registered.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Handle registered for `peer`, if any.
    pub fn get(&self, peer: &SocketAddr) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(peer).map(|entry| Arc::clone(entry.value()))
    }

    /// Copy of the current entries. Shard locks are released before return.
    pub fn snapshot(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections.iter().map(|entry| Arc::clone(entry.value())).collect()
    }
}

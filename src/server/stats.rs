//! Echo statistics.
//!
//! Handlers count into a private [`LocalStats`] and fold it into the shared
//! [`Statistics`] once, at teardown. The hot loop never touches shared state.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Per-connection counters, owned by one handler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LocalStats {
    pub read_operations: u64,
    pub write_operations: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
}

impl LocalStats {
    pub fn record_read(&mut self, bytes: usize) {
        self.read_operations += 1;
        self.bytes_received += bytes as u64;
    }

    pub fn record_write(&mut self, bytes: usize) {
        self.write_operations += 1;
        self.bytes_sent += bytes as u64;
    }
}

/// Process-wide aggregate, shared by all handlers of one server.
#[derive(Debug, Default)]
pub struct Statistics {
    read_operations: AtomicU64,
    write_operations: AtomicU64,
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a finished connection's counters.
    pub fn merge(&self, local: &LocalStats) {
        self.read_operations.fetch_add(local.read_operations, Ordering::Relaxed);
        self.write_operations.fetch_add(local.write_operations, Ordering::Relaxed);
        self.bytes_received.fetch_add(local.bytes_received, Ordering::Relaxed);
        self.bytes_sent.fetch_add(local.bytes_sent, Ordering::Relaxed);
    }

    /// Each counter is read atomically; the four together are not.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            read_operations: self.read_operations.load(Ordering::Relaxed),
            write_operations: self.write_operations.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`Statistics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub read_operations: u64,
    pub write_operations: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
}

impl std::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "read operations: {}, write operations: {}, bytes received: {}, bytes sent: {}",
            self.read_operations, self.write_operations, self.bytes_received, self.bytes_sent
        )
    }
}

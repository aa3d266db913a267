//! Per-connection echo loop.
//!
//! # States
//! ```text
//! Registered → Looping → Draining → Closed
//! ```
//! Every exit from `Looping` (EOF, I/O error, idle deadline, forced close)
//! goes through [`ConnectionGuard`]'s drop, which closes the handle, merges
//! the local counters and leaves the registry. That includes panics and task
//! cancellation.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;

use crate::net::connection::{ConnectionHandle, ConnectionState};
use crate::net::is_disconnect;
use crate::observability::metrics;
use crate::server::registry::ConnectionRegistry;
use crate::server::stats::{LocalStats, Statistics};

/// Upper bound on sending close_notify during teardown.
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// Knobs for one handler.
#[derive(Debug, Clone)]
pub struct HandlerSettings {
    pub idle_timeout: Duration,
    pub buffer_size: usize,
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self {
            idle_timeout: Duration::from_secs(240),
            buffer_size: 1024,
        }
    }
}

/// Why a handler left its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Clean end of stream.
    PeerClosed,
    /// No progress within the idle window.
    IdleTimeout,
    /// Closed through the registry (server shutdown).
    ForcedClose,
    /// Reset, broken pipe or truncated stream.
    Disconnected,
    /// Any other I/O failure.
    Error(io::ErrorKind),
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloseReason::PeerClosed => "peer_closed",
            CloseReason::IdleTimeout => "idle_timeout",
            CloseReason::ForcedClose => "forced_close",
            CloseReason::Disconnected => "disconnected",
            CloseReason::Error(_) => "error",
        }
    }

    fn from_io(err: io::Error, peer: SocketAddr) -> Self {
        if is_disconnect(&err) {
            CloseReason::Disconnected
        } else {
            tracing::debug!(peer_addr = %peer, error = %err, "Connection I/O error");
            CloseReason::Error(err.kind())
        }
    }
}

/// Run the echo state machine over an established stream until it ends.
///
/// Registers the connection for the duration of the call.
pub async fn serve<S>(
    mut stream: S,
    peer: SocketAddr,
    registry: &ConnectionRegistry,
    stats: &Statistics,
    settings: &HandlerSettings,
) -> CloseReason
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut guard = ConnectionGuard::register(Arc::new(ConnectionHandle::new(peer)), registry, stats);

    let reason = echo_loop(&mut stream, &guard.handle, &mut guard.local, settings).await;
    guard.reason = Some(reason);

    guard.handle.set_state(ConnectionState::Draining);
    guard.handle.close();
    let _ = tokio::time::timeout(CLOSE_GRACE, stream.shutdown()).await;
    drop(stream);

    reason
}

async fn echo_loop<S>(
    stream: &mut S,
    handle: &ConnectionHandle,
    local: &mut LocalStats,
    settings: &HandlerSettings,
) -> CloseReason
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; settings.buffer_size];
    let mut deadline = Instant::now() + settings.idle_timeout;
    handle.set_state(ConnectionState::Looping);

    loop {
        let n = match guarded(handle, deadline, stream.read(&mut buf)).await {
            Ok(0) => return CloseReason::PeerClosed,
            Ok(n) => n,
            Err(reason) => return reason,
        };
        local.record_read(n);
        deadline = Instant::now() + settings.idle_timeout;

        let echo = async {
            stream.write_all(&buf[..n]).await?;
            stream.flush().await
        };
        if let Err(reason) = guarded(handle, deadline, echo).await {
            return reason;
        }
        local.record_write(n);
        deadline = Instant::now() + settings.idle_timeout;
    }
}

/// Race one blocking operation against the idle deadline and forced close.
async fn guarded<T, F>(handle: &ConnectionHandle, deadline: Instant, op: F) -> Result<T, CloseReason>
where
    F: Future<Output = io::Result<T>>,
{
    tokio::select! {
        biased;
        _ = handle.closed() => Err(CloseReason::ForcedClose),
        res = tokio::time::timeout_at(deadline, op) => match res {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(CloseReason::from_io(e, handle.peer())),
            Err(_) => Err(CloseReason::IdleTimeout),
        },
    }
}

/// Registry membership plus local counters for one connection.
/// Dropping it performs the `Draining → Closed` teardown.
struct ConnectionGuard<'a> {
    handle: Arc<ConnectionHandle>,
    registry: &'a ConnectionRegistry,
    stats: &'a Statistics,
    local: LocalStats,
    reason: Option<CloseReason>,
}

impl<'a> ConnectionGuard<'a> {
    fn register(handle: Arc<ConnectionHandle>, registry: &'a ConnectionRegistry, stats: &'a Statistics) -> Self {
        registry.add(Arc::clone(&handle));
        metrics::record_connection_opened();
        tracing::info!(
            peer_addr = %handle.peer(),
            connection_id = %handle.id(),
            clients = registry.count(),
            "Client accepted"
        );
        Self {
            handle,
            registry,
            stats,
            local: LocalStats::default(),
            reason: None,
        }
    }
}

impl Drop for ConnectionGuard<'_> {
    fn drop(&mut self) {
        self.handle.set_state(ConnectionState::Draining);
        self.handle.close();
        self.stats.merge(&self.local);
        self.registry.remove(&self.handle);
        self.handle.set_state(ConnectionState::Closed);

        // No reason means the loop never returned: panic or cancellation.
        let reason = self.reason.map_or("aborted", |r| r.as_str());
        metrics::record_connection_closed(reason, self.local.bytes_received, self.local.bytes_sent);
        tracing::info!(
            peer_addr = %self.handle.peer(),
            connection_id = %self.handle.id(),
            reason,
            read_operations = self.local.read_operations,
            bytes_received = self.local.bytes_received,
            clients = self.registry.count(),
            "Client disconnected"
        );
    }
}

//! Echo server coordinator.
//!
//! # Data Flow
//! ```text
//! EchoServer::start (Idle → Listening)
//!     → accept loop task
//!         → per connection task: TLS handshake → handler::serve
//! RunningServer::shutdown (Listening → ShuttingDown → Stopped)
//!     → stop accept loop (listener dropped)
//!     → seal registry, force-close live connections
//!     → join every connection task
//!     → final statistics snapshot
//! ```
//!
//! # Design Decisions
//! - A failed handshake only discards that connection
//! - Accept errors are logged and the loop continues
//! - Shared state is owned by the server instance, not process globals

pub mod handler;
pub mod registry;
pub mod stats;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio_rustls::TlsAcceptor;

use crate::config::ServerConfig;
use crate::lifecycle::{Shutdown, ShutdownSignal};
use crate::net::listener::{ConnectionPermit, Listener, ListenerError};
use crate::net::tls::HandshakeInfo;
use crate::observability::metrics;

use handler::HandlerSettings;
use registry::ConnectionRegistry;
use stats::{Statistics, StatsSnapshot};

/// Pause after a failed accept so a persistent error (e.g. fd exhaustion)
/// does not spin the loop.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Server errors surfaced to the operator.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Listener(#[from] ListenerError),

    #[error("accept loop failed: {0}")]
    AcceptLoop(#[from] JoinError),
}

/// Coordinator lifecycle.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Idle = 0,
    Listening = 1,
    ShuttingDown = 2,
    Stopped = 3,
}

impl From<u8> for ServerState {
    fn from(val: u8) -> Self {
        match val {
            0 => ServerState::Idle,
            1 => ServerState::Listening,
            2 => ServerState::ShuttingDown,
            _ => ServerState::Stopped,
        }
    }
}

/// State shared between the coordinator and connection tasks.
#[derive(Debug)]
struct Shared {
    registry: ConnectionRegistry,
    stats: Statistics,
    state: AtomicU8,
    accepted: AtomicU64,
    handshake_failures: AtomicU64,
}

impl Shared {
    fn set_state(&self, state: ServerState) {
        self.state.store(state as u8, Ordering::Release);
    }

    fn state(&self) -> ServerState {
        ServerState::from(self.state.load(Ordering::Acquire))
    }
}

/// Read-only view of a server that stays valid after
/// [`RunningServer::shutdown`] consumes the server.
#[derive(Debug, Clone)]
pub struct ServerMonitor {
    shared: Arc<Shared>,
}

impl ServerMonitor {
    /// Current lifecycle state.
    pub fn state(&self) -> ServerState {
        self.shared.state()
    }

    /// Live connection registry.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.shared.registry
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.shared.registry.count()
    }

    /// Current statistics totals.
    pub fn statistics(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }
}

/// A configured server that has not started listening yet.
pub struct EchoServer {
    config: ServerConfig,
    tls: Arc<rustls::ServerConfig>,
}

impl EchoServer {
    /// `tls` must come from [`crate::net::tls::server_config`] or be
    /// equivalently strict (client certificates required).
    pub fn new(config: ServerConfig, tls: Arc<rustls::ServerConfig>) -> Self {
        Self { config, tls }
    }

    /// Bind and start accepting in a background task.
    pub async fn start(self) -> Result<RunningServer, ServerError> {
        let listener = Listener::bind(&self.config).await?;
        let local_addr = listener.local_addr();

        let shared = Arc::new(Shared {
            registry: ConnectionRegistry::new(),
            stats: Statistics::new(),
            state: AtomicU8::new(ServerState::Idle as u8),
            accepted: AtomicU64::new(0),
            handshake_failures: AtomicU64::new(0),
        });
        let shutdown = Shutdown::new();
        let ctx = AcceptContext {
            acceptor: TlsAcceptor::from(self.tls),
            shared: Arc::clone(&shared),
            settings: Arc::new(HandlerSettings {
                idle_timeout: self.config.idle_timeout(),
                buffer_size: self.config.buffer_size,
            }),
            handshake_timeout: self.config.handshake_timeout(),
        };

        shared.set_state(ServerState::Listening);
        let accept_task = tokio::spawn(accept_loop(listener, ctx, shutdown.subscribe()));

        tracing::info!(
            address = %local_addr,
            idle_timeout_ms = self.config.idle_timeout_ms,
            "Echo server listening"
        );

        Ok(RunningServer {
            local_addr,
            shared,
            shutdown,
            accept_task,
        })
    }
}

/// A listening server. Dropping it without [`shutdown`](Self::shutdown)
/// releases the stop signal, so accepting ends, but live connections are
/// left to their idle deadline.
pub struct RunningServer {
    local_addr: SocketAddr,
    shared: Arc<Shared>,
    shutdown: Shutdown,
    accept_task: JoinHandle<JoinSet<()>>,
}

impl RunningServer {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ServerState {
        self.shared.state()
    }

    /// Live connection registry.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.shared.registry
    }

    /// Observer that outlives [`shutdown`](Self::shutdown).
    pub fn monitor(&self) -> ServerMonitor {
        ServerMonitor {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.shared.registry.count()
    }

    /// Live view; only authoritative after [`shutdown`](Self::shutdown).
    pub fn statistics(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Connections that completed the handshake.
    pub fn accepted(&self) -> u64 {
        self.shared.accepted.load(Ordering::Relaxed)
    }

    /// Handshakes that failed or timed out.
    pub fn handshake_failures(&self) -> u64 {
        self.shared.handshake_failures.load(Ordering::Relaxed)
    }

    /// Stop accepting, close every connection, wait for all handlers, and
    /// return the final statistics.
    pub async fn shutdown(self) -> Result<StatsSnapshot, ServerError> {
        let shared = self.shared;
        shared.set_state(ServerState::ShuttingDown);
        tracing::info!(clients = shared.registry.count(), "Server shutting down");

        self.shutdown.trigger();
        let mut connections = self.accept_task.await?;

        shared.registry.seal();
        let forced = shared.registry.close_all();
        tracing::debug!(forced, pending = connections.len(), "Closed live connections");

        while let Some(res) = connections.join_next().await {
            if let Err(e) = res {
                if e.is_panic() {
                    tracing::error!(error = %e, "Connection task panicked");
                }
            }
        }

        // Every handler has run its teardown by now; this only catches a
        // handle that outlived its task.
        let residual = shared.registry.close_all();
        if residual > 0 {
            tracing::warn!(residual, "Residual registry entries closed after join");
        }

        shared.set_state(ServerState::Stopped);
        let snapshot = shared.stats.snapshot();
        tracing::info!(
            read_operations = snapshot.read_operations,
            write_operations = snapshot.write_operations,
            bytes_received = snapshot.bytes_received,
            bytes_sent = snapshot.bytes_sent,
            "Server stopped"
        );
        Ok(snapshot)
    }
}

struct AcceptContext {
    acceptor: TlsAcceptor,
    shared: Arc<Shared>,
    settings: Arc<HandlerSettings>,
    handshake_timeout: Duration,
}

/// Accept until told to stop; returns the still-running connection tasks.
async fn accept_loop(listener: Listener, ctx: AcceptContext, mut stop: ShutdownSignal) -> JoinSet<()> {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            biased;
            _ = stop.recv() => break,
            Some(res) = connections.join_next(), if !connections.is_empty() => {
                if let Err(e) = res {
                    if e.is_panic() {
                        tracing::error!(error = %e, "Connection task panicked");
                    }
                }
            }
            accepted = listener.accept() => match accepted {
                Ok((tcp, peer, permit)) => {
                    connections.spawn(handle_connection(
                        tcp,
                        peer,
                        permit,
                        ctx.acceptor.clone(),
                        Arc::clone(&ctx.shared),
                        Arc::clone(&ctx.settings),
                        ctx.handshake_timeout,
                        stop.clone(),
                    ));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Accept failed");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            },
        }
    }

    drop(listener);
    tracing::debug!(pending = connections.len(), "Accept loop stopped");
    connections
}

#[allow(clippy::too_many_arguments)]
async fn handle_connection(
    tcp: TcpStream,
    peer: SocketAddr,
    _permit: ConnectionPermit,
    acceptor: TlsAcceptor,
    shared: Arc<Shared>,
    settings: Arc<HandlerSettings>,
    handshake_timeout: Duration,
    mut stop: ShutdownSignal,
) {
    let _ = tcp.set_nodelay(true);

    let handshake = tokio::select! {
        _ = stop.recv() => {
            tracing::debug!(peer_addr = %peer, "Handshake abandoned on shutdown");
            return;
        }
        res = tokio::time::timeout(handshake_timeout, acceptor.accept(tcp)) => res,
    };

    let stream = match handshake {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            shared.handshake_failures.fetch_add(1, Ordering::Relaxed);
            metrics::record_handshake_failure();
            tracing::warn!(peer_addr = %peer, error = %e, "TLS handshake failed");
            return;
        }
        Err(_) => {
            shared.handshake_failures.fetch_add(1, Ordering::Relaxed);
            metrics::record_handshake_failure();
            tracing::warn!(peer_addr = %peer, timeout = ?handshake_timeout, "TLS handshake timed out");
            return;
        }
    };

    shared.accepted.fetch_add(1, Ordering::Relaxed);
    metrics::record_accepted();
    HandshakeInfo::from_state(stream.get_ref().1).log(&peer);

    handler::serve(stream, peer, &shared.registry, &shared.stats, &settings).await;
}

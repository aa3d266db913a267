//! Bounded TCP listener for the echo server.
//!
//! Admission is capped by `max_connections`: a slot is taken before each
//! accept and travels with the connection until its task ends.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::config::ServerConfig;

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("cannot listen on {address}: {source}")]
    Bind { address: String, source: io::Error },

    #[error("accept failed: {0}")]
    Accept(io::Error),
}

/// Listening socket plus its admission limiter.
pub struct Listener {
    socket: TcpListener,
    local_addr: SocketAddr,
    slots: Arc<Semaphore>,
}

impl Listener {
    pub async fn bind(config: &ServerConfig) -> Result<Self, ListenerError> {
        let bind_error = |source| ListenerError::Bind {
            address: config.bind_address.clone(),
            source,
        };
        let addr: SocketAddr = config
            .bind_address
            .parse()
            .map_err(|e| bind_error(io::Error::new(io::ErrorKind::InvalidInput, e)))?;

        let socket = TcpListener::bind(addr).await.map_err(bind_error)?;
        let local_addr = socket.local_addr().map_err(bind_error)?;

        tracing::debug!(
            address = %local_addr,
            max_connections = config.max_connections,
            "Listener bound"
        );

        Ok(Self {
            socket,
            local_addr,
            slots: Arc::new(Semaphore::new(config.max_connections)),
        })
    }

    /// Wait for a free slot, then for the next connection.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionPermit), ListenerError> {
        let slot = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::Accept(io::Error::other("connection limiter closed")))?;

        let (stream, peer) = self.socket.accept().await.map_err(ListenerError::Accept)?;
        tracing::debug!(
            peer_addr = %peer,
            free_slots = self.available_permits(),
            "TCP connection accepted"
        );

        Ok((stream, peer, ConnectionPermit { _slot: slot }))
    }

    /// Bound address; resolves an ephemeral port requested with `:0`.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Admission slots not currently held by a connection.
    pub fn available_permits(&self) -> usize {
        self.slots.available_permits()
    }
}

/// One admission slot. Released on drop, including when the connection task
/// panics or is aborted.
#[derive(Debug)]
pub struct ConnectionPermit {
    _slot: OwnedSemaphorePermit,
}

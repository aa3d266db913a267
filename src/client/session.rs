//! One mutually-authenticated client connection and its echo loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::client::payload::PayloadPool;
use crate::client::ClientError;
use crate::lifecycle::ShutdownSignal;
use crate::net::is_disconnect;
use crate::net::tls::HandshakeInfo;

/// Upper bound on sending close_notify when a session ends.
const CLOSE_GRACE: Duration = Duration::from_millis(500);

/// How a session's loop ended, when it ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionOutcome {
    /// Reached its configured number of round trips.
    Completed,
    /// Stop was signalled.
    Stopped,
    /// Server closed the connection (EOF, reset, broken pipe).
    PeerClosed,
}

/// Per-session totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionReport {
    pub index: usize,
    pub round_trips: u64,
    /// Round trips whose payload was empty; nothing goes on the wire for these.
    pub empty_round_trips: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub outcome: SessionOutcome,
}

/// An established client connection.
pub struct ClientSession {
    index: usize,
    stream: TlsStream<TcpStream>,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    handshake: HandshakeInfo,
}

impl ClientSession {
    /// Connect and complete the TLS handshake. Any failure is fatal to this
    /// session.
    pub async fn connect(
        index: usize,
        endpoint: &str,
        server_name: ServerName<'static>,
        connector: &TlsConnector,
        connect_timeout: Duration,
    ) -> Result<Self, ClientError> {
        let establish = async {
            let tcp = TcpStream::connect(endpoint).await.map_err(|source| ClientError::Connect {
                endpoint: endpoint.to_string(),
                source,
            })?;
            tcp.set_nodelay(true)?;
            let local_addr = tcp.local_addr()?;
            let peer_addr = tcp.peer_addr()?;
            let stream = connector
                .connect(server_name, tcp)
                .await
                .map_err(|source| ClientError::Handshake {
                    endpoint: endpoint.to_string(),
                    source,
                })?;
            Ok::<_, ClientError>((stream, local_addr, peer_addr))
        };

        let (stream, local_addr, peer_addr) = tokio::time::timeout(connect_timeout, establish)
            .await
            .map_err(|_| ClientError::ConnectTimeout(endpoint.to_string()))??;

        let handshake = HandshakeInfo::from_state(stream.get_ref().1);
        handshake.log(&peer_addr);
        tracing::debug!(index, local_addr = %local_addr, "Connected to server");

        Ok(Self {
            index,
            stream,
            local_addr,
            peer_addr,
            handshake,
        })
    }

    /// Position of this session within its fleet.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Client side of the TCP connection.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Server address this session is connected to.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Negotiated TLS parameters.
    pub fn handshake(&self) -> &HandshakeInfo {
        &self.handshake
    }

    /// Send a payload and read the echo back, one round trip at a time, until
    /// `stop` fires, the server goes away, or `iterations` round trips are done.
    ///
    /// A stop may abandon a round trip in flight.
    pub async fn run(
        mut self,
        payloads: Arc<PayloadPool>,
        iterations: Option<u64>,
        mut stop: ShutdownSignal,
    ) -> Result<SessionReport, ClientError> {
        let mut report = SessionReport {
            index: self.index,
            round_trips: 0,
            empty_round_trips: 0,
            bytes_sent: 0,
            bytes_received: 0,
            outcome: SessionOutcome::Completed,
        };
        let mut echo = vec![0u8; payloads.max_len()];

        loop {
            if iterations.is_some_and(|max| report.round_trips >= max) {
                break;
            }

            let payload = payloads.pick();
            let received = &mut echo[..payload.len()];
            let trip = tokio::select! {
                biased;
                _ = stop.recv() => {
                    report.outcome = SessionOutcome::Stopped;
                    break;
                }
                res = round_trip(&mut self.stream, payload, received) => res,
            };

            match trip {
                Ok(()) => {}
                Err(e) if is_disconnect(&e) => {
                    tracing::debug!(index = self.index, error = %e, "Server closed connection");
                    report.outcome = SessionOutcome::PeerClosed;
                    break;
                }
                Err(e) => return Err(ClientError::Io(e)),
            }

            if echo[..payload.len()] != *payload {
                return Err(ClientError::EchoMismatch { len: payload.len() });
            }

            report.round_trips += 1;
            if payload.is_empty() {
                report.empty_round_trips += 1;
                // Nothing touched the socket; let the stop signal and other
                // tasks run.
                tokio::task::yield_now().await;
            }
            report.bytes_sent += payload.len() as u64;
            report.bytes_received += payload.len() as u64;
        }

        if report.outcome != SessionOutcome::PeerClosed {
            let _ = tokio::time::timeout(CLOSE_GRACE, self.stream.shutdown()).await;
        }

        tracing::debug!(
            index = report.index,
            round_trips = report.round_trips,
            outcome = ?report.outcome,
            "Session finished"
        );
        Ok(report)
    }
}

/// Write `payload`, then read exactly as many bytes back. The server may
/// return them split across several reads.
async fn round_trip(stream: &mut TlsStream<TcpStream>, payload: &[u8], received: &mut [u8]) -> std::io::Result<()> {
    if payload.is_empty() {
        return Ok(());
    }
    stream.write_all(payload).await?;
    stream.flush().await?;
    stream.read_exact(received).await?;
    Ok(())
}

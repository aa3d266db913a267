//! Fleet of concurrent client sessions.

use std::sync::Arc;

use futures_util::future::try_join_all;
use serde::Serialize;
use tokio::task::{JoinError, JoinSet};
use tokio_rustls::TlsConnector;

use crate::client::payload::PayloadPool;
use crate::client::session::{ClientSession, SessionReport};
use crate::client::ClientError;
use crate::config::ClientConfig;
use crate::lifecycle::Shutdown;
use crate::net::tls;

/// All sessions connected, none echoing yet.
pub struct ClientFleet {
    sessions: Vec<ClientSession>,
}

impl ClientFleet {
    /// Open `config.clients` sessions concurrently. Handshakes are paid for
    /// here, before any echo traffic. The first failure aborts setup.
    pub async fn connect(config: &ClientConfig, tls_config: Arc<rustls::ClientConfig>) -> Result<Self, ClientError> {
        let connector = TlsConnector::from(tls_config);
        let server_name = tls::server_name(&config.server_address, config.server_name.as_deref())?;

        let sessions = try_join_all((0..config.clients).map(|index| {
            ClientSession::connect(
                index,
                &config.server_address,
                server_name.clone(),
                &connector,
                config.connect_timeout(),
            )
        }))
        .await?;

        tracing::info!(
            server = %config.server_address,
            sessions = sessions.len(),
            "Fleet connected"
        );
        Ok(Self { sessions })
    }

    /// Number of connected sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// True when the fleet holds no sessions.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Connected sessions in index order.
    pub fn sessions(&self) -> &[ClientSession] {
        &self.sessions
    }

    /// Take the sessions out to drive them individually.
    pub fn into_sessions(self) -> Vec<ClientSession> {
        self.sessions
    }

    /// Start every session's echo loop as its own task.
    pub fn start(self, payloads: Arc<PayloadPool>, iterations: Option<u64>) -> RunningFleet {
        let stop = Shutdown::new();
        let mut tasks = JoinSet::new();
        for session in self.sessions {
            tasks.spawn(session.run(Arc::clone(&payloads), iterations, stop.subscribe()));
        }
        tracing::info!(sessions = tasks.len(), "Fleet started");

        RunningFleet {
            tasks,
            stop,
            reports: Vec::new(),
            failed: 0,
        }
    }
}

/// Sessions echoing in the background.
pub struct RunningFleet {
    tasks: JoinSet<Result<SessionReport, ClientError>>,
    stop: Shutdown,
    reports: Vec<SessionReport>,
    failed: usize,
}

impl RunningFleet {
    /// Sessions still running.
    pub fn active(&self) -> usize {
        self.tasks.len()
    }

    /// Wait for every session to end on its own. Cancel-safe: reports of
    /// sessions that finished are kept if this future is dropped.
    pub async fn wait(&mut self) {
        while let Some(res) = self.tasks.join_next().await {
            self.collect(res);
        }
    }

    /// Signal every session to stop and gather the results.
    pub async fn stop(mut self) -> FleetReport {
        self.stop.trigger();
        self.wait().await;

        let report = FleetReport::from_sessions(&self.reports, self.failed);
        tracing::info!(
            sessions = report.sessions,
            failed = report.failed,
            round_trips = report.round_trips,
            bytes_sent = report.bytes_sent,
            "Fleet stopped"
        );
        report
    }

    fn collect(&mut self, res: Result<Result<SessionReport, ClientError>, JoinError>) {
        match res {
            Ok(Ok(report)) => self.reports.push(report),
            Ok(Err(e)) => {
                self.failed += 1;
                tracing::warn!(error = %e, "Session failed");
            }
            Err(e) => {
                self.failed += 1;
                tracing::error!(error = %e, "Session task failed");
            }
        }
    }
}

/// Aggregate over all sessions of a fleet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FleetReport {
    pub sessions: usize,
    pub failed: usize,
    pub round_trips: u64,
    pub empty_round_trips: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl FleetReport {
    pub fn from_sessions(reports: &[SessionReport], failed: usize) -> Self {
        reports.iter().fold(
            FleetReport {
                sessions: reports.len() + failed,
                failed,
                ..FleetReport::default()
            },
            |mut acc, r| {
                acc.round_trips += r.round_trips;
                acc.empty_round_trips += r.empty_round_trips;
                acc.bytes_sent += r.bytes_sent;
                acc.bytes_received += r.bytes_received;
                acc
            },
        )
    }
}

impl std::fmt::Display for FleetReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "sessions: {} ({} failed), round trips: {}, bytes sent: {}, bytes received: {}",
            self.sessions, self.failed, self.round_trips, self.bytes_sent, self.bytes_received
        )
    }
}

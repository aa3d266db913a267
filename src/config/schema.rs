//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the echo
//! server and client fleet. All types derive Serde traits for deserialization
//! from config files.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration shared by the `echo-server` and `echo-client` binaries.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct EchoConfig {
    /// Server listener and per-connection settings.
    pub server: ServerConfig,

    /// Client fleet settings.
    pub client: ClientConfig,

    /// Credential material and protocol floor.
    pub tls: TlsConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "127.0.0.1:8080").
    pub bind_address: String,

    /// Maximum concurrent connections (backpressure).
    pub max_connections: usize,

    /// Idle window after which a silent connection is closed, in milliseconds.
    pub idle_timeout_ms: u64,

    /// Upper bound on a single TLS handshake, in milliseconds.
    pub handshake_timeout_ms: u64,

    /// Per-connection read buffer size in bytes.
    pub buffer_size: usize,
}

impl ServerConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:8080".to_string(),
            max_connections: 10_000,
            idle_timeout_ms: 240_000,
            handshake_timeout_ms: 10_000,
            buffer_size: 1024,
        }
    }
}

/// Client fleet configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server endpoint to connect to (host:port).
    pub server_address: String,

    /// Name presented for server certificate verification.
    /// Defaults to the host part of `server_address`.
    pub server_name: Option<String>,

    /// Verify that the server certificate matches `server_name`.
    ///
    /// Disabling this keeps chain verification against the trusted roots and
    /// only skips the name check. Meant for bare-IP deployments whose
    /// certificates carry no IP subject-alternative-name.
    pub verify_hostname: bool,

    /// Number of concurrent sessions.
    pub clients: usize,

    /// Number of payloads in the shared pool. Payload `i` is `i` bytes long.
    pub payload_count: usize,

    /// Round trips per session before it ends on its own. Unbounded if unset.
    pub iterations: Option<u64>,

    /// Upper bound on TCP connect plus handshake, in milliseconds.
    pub connect_timeout_ms: u64,
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1:8080".to_string(),
            server_name: None,
            verify_hostname: true,
            clients: 64,
            payload_count: 100,
            iterations: None,
            connect_timeout_ms: 10_000,
        }
    }
}

/// Minimum TLS protocol version accepted by either side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, clap::ValueEnum)]
pub enum TlsVersion {
    #[default]
    #[serde(rename = "1.2")]
    #[value(name = "1.2")]
    Tls12,
    #[serde(rename = "1.3")]
    #[value(name = "1.3")]
    Tls13,
}

impl std::fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TlsVersion::Tls12 => write!(f, "TLSv1.2"),
            TlsVersion::Tls13 => write!(f, "TLSv1.3"),
        }
    }
}

/// Credential file locations (PEM).
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TlsConfig {
    /// Trusted root bundle used to verify the peer.
    pub root_ca: Option<PathBuf>,

    /// Local certificate chain.
    pub cert: Option<PathBuf>,

    /// Local private key.
    pub key: Option<PathBuf>,

    /// Protocol floor.
    pub min_version: TlsVersion,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Default tracing filter directive. `RUST_LOG` takes precedence.
    pub log_filter: String,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: "tls_echo=info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

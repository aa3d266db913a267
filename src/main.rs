//! Mutual-TLS echo server (v1)
//!
//! # Architecture Overview
//!
//! ```text
//!                      ┌──────────────────────────────────────────────┐
//!                      │                 ECHO SERVER                   │
//!                      │                                               │
//!   Client (mTLS)      │  ┌──────────┐   ┌──────────┐   ┌───────────┐  │
//!   ───────────────────┼─▶│   net    │──▶│   tls    │──▶│  handler  │  │
//!                      │  │ listener │   │handshake │   │ echo loop │  │
//!   ◀──────────────────┼──└──────────┘   └──────────┘   └─────┬─────┘  │
//!                      │                                      │        │
//!                      │                 ┌──────────┐   ┌─────▼─────┐  │
//!                      │                 │ registry │◀──│   stats   │  │
//!                      │                 └──────────┘   └───────────┘  │
//!                      │                                               │
//!                      │  lifecycle (signals, shutdown) · observability│
//!                      └──────────────────────────────────────────────┘
//! ```

use std::path::PathBuf;

use clap::Parser;

use tls_echo::config::{load_config, validate_config, EchoConfig, TlsVersion};
use tls_echo::lifecycle::signals::wait_for_stop;
use tls_echo::net::tls;
use tls_echo::observability::{logging, metrics};
use tls_echo::EchoServer;

#[derive(Parser)]
#[command(name = "echo-server")]
#[command(about = "Mutual-TLS echo server", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, e.g. 0.0.0.0:8080
    #[arg(short, long)]
    bind: Option<String>,

    /// Trusted root bundle for client certificates (PEM)
    #[arg(long)]
    root_ca: Option<PathBuf>,

    /// Server certificate chain (PEM)
    #[arg(long)]
    cert: Option<PathBuf>,

    /// Server private key (PEM)
    #[arg(long)]
    key: Option<PathBuf>,

    #[arg(long)]
    idle_timeout_ms: Option<u64>,

    #[arg(long)]
    max_connections: Option<usize>,

    /// Minimum TLS version
    #[arg(long, value_enum)]
    min_tls: Option<TlsVersion>,

    /// Default log filter; RUST_LOG takes precedence
    #[arg(long)]
    log_filter: Option<String>,

    /// Print the final statistics as JSON on stdout
    #[arg(long)]
    report_json: bool,
}

impl Cli {
    fn apply(self, config: &mut EchoConfig) -> bool {
        if let Some(bind) = self.bind {
            config.server.bind_address = bind;
        }
        if let Some(path) = self.root_ca {
            config.tls.root_ca = Some(path);
        }
        if let Some(path) = self.cert {
            config.tls.cert = Some(path);
        }
        if let Some(path) = self.key {
            config.tls.key = Some(path);
        }
        if let Some(ms) = self.idle_timeout_ms {
            config.server.idle_timeout_ms = ms;
        }
        if let Some(max) = self.max_connections {
            config.server.max_connections = max;
        }
        if let Some(version) = self.min_tls {
            config.tls.min_version = version;
        }
        if let Some(filter) = self.log_filter {
            config.observability.log_filter = filter;
        }
        self.report_json
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => EchoConfig::default(),
    };
    let report_json = cli.apply(&mut config);
    validate_config(&config).map_err(tls_echo::config::ConfigError::Validation)?;

    logging::init(&config.observability.log_filter);
    tracing::info!("echo-server v{} starting", env!("CARGO_PKG_VERSION"));

    if config.observability.metrics_enabled {
        metrics::init_metrics(config.observability.metrics_address.parse()?);
    }

    let (identity, client_roots) = tls::load_credentials(&config.tls)?;
    let tls_config = tls::server_config(identity, client_roots, config.tls.min_version)?;

    tracing::info!(
        bind_address = %config.server.bind_address,
        max_connections = config.server.max_connections,
        idle_timeout_ms = config.server.idle_timeout_ms,
        min_tls = %config.tls.min_version,
        "Configuration loaded"
    );

    let server = EchoServer::new(config.server, tls_config).start().await?;

    wait_for_stop().await?;

    let snapshot = server.shutdown().await?;
    if report_json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        tracing::info!(%snapshot, "Shutdown complete");
    }
    Ok(())
}

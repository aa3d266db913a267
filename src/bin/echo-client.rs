use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use tls_echo::client::{ClientFleet, PayloadPool};
use tls_echo::config::{load_config, validate_config, ConfigError, EchoConfig, TlsVersion};
use tls_echo::lifecycle::signals::wait_for_stop;
use tls_echo::net::tls;
use tls_echo::observability::logging;

#[derive(Parser)]
#[command(name = "echo-client")]
#[command(about = "Client fleet for the mutual-TLS echo server", long_about = None)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Server endpoint (host:port)
    #[arg(short, long)]
    server: Option<String>,

    /// Name used to verify the server certificate
    #[arg(long)]
    server_name: Option<String>,

    /// Skip matching the server certificate against the server name
    #[arg(long)]
    no_verify_hostname: bool,

    /// Number of concurrent sessions
    #[arg(short = 'n', long)]
    clients: Option<usize>,

    /// Number of payloads in the shared pool
    #[arg(long)]
    payloads: Option<usize>,

    /// Round trips per session; runs until stopped if unset
    #[arg(short, long)]
    iterations: Option<u64>,

    /// Trusted root bundle for the server certificate (PEM)
    #[arg(long)]
    root_ca: Option<PathBuf>,

    /// Client certificate chain (PEM)
    #[arg(long)]
    cert: Option<PathBuf>,

    /// Client private key (PEM)
    #[arg(long)]
    key: Option<PathBuf>,

    /// Minimum TLS version
    #[arg(long, value_enum)]
    min_tls: Option<TlsVersion>,

    /// Default log filter; RUST_LOG takes precedence
    #[arg(long)]
    log_filter: Option<String>,

    /// Print the fleet report as JSON on stdout
    #[arg(long)]
    report_json: bool,
}

impl Cli {
    fn apply(self, config: &mut EchoConfig) -> bool {
        if let Some(server) = self.server {
            config.client.server_address = server;
        }
        if let Some(name) = self.server_name {
            config.client.server_name = Some(name);
        }
        if self.no_verify_hostname {
            config.client.verify_hostname = false;
        }
        if let Some(clients) = self.clients {
            config.client.clients = clients;
        }
        if let Some(count) = self.payloads {
            config.client.payload_count = count;
        }
        if let Some(iterations) = self.iterations {
            config.client.iterations = Some(iterations);
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
    validate_config(&config).map_err(ConfigError::Validation)?;

    logging::init(&config.observability.log_filter);
    tracing::info!("echo-client v{} starting", env!("CARGO_PKG_VERSION"));

    let (identity, server_roots) = tls::load_credentials(&config.tls)?;
    let tls_config = tls::client_config(
        identity,
        server_roots,
        config.tls.min_version,
        config.client.verify_hostname,
    )?;

    let payloads = Arc::new(PayloadPool::random(config.client.payload_count));
    let fleet = ClientFleet::connect(&config.client, tls_config).await?;
    let mut running = fleet.start(payloads, config.client.iterations);

    tokio::select! {
        res = wait_for_stop() => res?,
        _ = running.wait() => tracing::info!("All sessions ended"),
    }

    let report = running.stop().await;
    if report_json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        tracing::info!(%report, "Client finished");
    }
    Ok(())
}

//! Metrics collection and exposition.
//!
//! # Metrics
//! - `echo_connections_accepted_total` (counter): successful handshakes
//! - `echo_handshake_failures_total` (counter): rejected handshakes
//! - `echo_active_connections` (gauge): registry size, kept by relative updates
//! - `echo_connections_closed_total` (counter, `reason`): handler exits
//! - `echo_bytes_received_total` / `echo_bytes_sent_total` (counters)
//!
//! Recording is a no-op until [`init_metrics`] installs the exporter, so the
//! library can be used without it.

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Start the Prometheus scrape endpoint. Must run inside a tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_accepted() {
    metrics::counter!("echo_connections_accepted_total").increment(1);
}

pub fn record_handshake_failure() {
    metrics::counter!("echo_handshake_failures_total").increment(1);
}

/// A connection joined the registry.
pub fn record_connection_opened() {
    metrics::gauge!("echo_active_connections").increment(1.0);
}

/// A connection left the registry. Pairs with [`record_connection_opened`].
pub fn record_connection_closed(reason: &'static str, bytes_received: u64, bytes_sent: u64) {
    metrics::gauge!("echo_active_connections").decrement(1.0);
    metrics::counter!("echo_connections_closed_total", "reason" => reason).increment(1);
    metrics::counter!("echo_bytes_received_total").increment(bytes_received);
    metrics::counter!("echo_bytes_sent_total").increment(bytes_sent);
}

//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Server and client produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges)
//!
//! Consumers:
//!     → stdout
//!     → Metrics endpoint (Prometheus scrape, optional)
//! ```
//!
//! The authoritative per-run totals live in `server::stats`; metrics mirror
//! them for scraping while the server runs.

pub mod logging;
pub mod metrics;

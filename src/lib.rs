//! Mutual-TLS echo server and client fleet library

pub mod client;
pub mod config;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod server;

pub use client::{ClientFleet, FleetReport, PayloadPool};
pub use config::schema::EchoConfig;
pub use lifecycle::Shutdown;
pub use server::{EchoServer, RunningServer, ServerMonitor, ServerState};

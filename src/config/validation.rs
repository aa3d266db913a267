//! Configuration validation.
//!
//! Serde handles syntax; this module checks value ranges and addresses.
//! All violations are collected so the operator sees every problem at once.

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::EchoConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: '{value}' is not a valid socket address")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("{field} must not be empty")]
    Empty { field: &'static str },
}

/// Check a loaded configuration.
pub fn validate_config(config: &EchoConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "server.bind_address",
            value: config.server.bind_address.clone(),
        });
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }
    // Clients may name a host, so only require host:port shape.
    if config.client.server_address.rsplit_once(':').is_none() {
        errors.push(ValidationError::InvalidAddress {
            field: "client.server_address",
            value: config.client.server_address.clone(),
        });
    }
    if matches!(config.client.server_name.as_deref(), Some("")) {
        errors.push(ValidationError::Empty { field: "client.server_name" });
    }

    let positive = [
        ("server.max_connections", config.server.max_connections as u64),
        ("server.idle_timeout_ms", config.server.idle_timeout_ms),
        ("server.handshake_timeout_ms", config.server.handshake_timeout_ms),
        ("server.buffer_size", config.server.buffer_size as u64),
        ("client.clients", config.client.clients as u64),
        ("client.payload_count", config.client.payload_count as u64),
        ("client.connect_timeout_ms", config.client.connect_timeout_ms),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::Zero { field });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

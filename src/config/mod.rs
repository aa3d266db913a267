//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML, optional)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → CLI flag overrides (binaries)
//!     → EchoConfig (validated, immutable)
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - The core never reads files; binaries resolve credentials and hand
//!   in-memory rustls configs to the server and fleet

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{ClientConfig, EchoConfig, ObservabilityConfig, ServerConfig, TlsConfig, TlsVersion};
pub use validation::{validate_config, ValidationError};

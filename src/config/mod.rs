//! Configuration management for Estuary.
//!
//! TOML configuration with `${VAR}` substitution, `ESTUARY_*` overrides,
//! defaults for every optional setting, and validation on load.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use estuary::config::load_config;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("estuary.toml")?;
//! println!("Store backend: {:?}", config.engine.store_backend);
//! for job in &config.jobs {
//!     println!("{} <- {}", job.name, job.source.connector);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration Structure
//!
//! - [`ApplicationConfig`] - name, log level, dry-run
//! - [`EngineConfig`] - store backend, loop pacing, shutdown grace period
//! - [`PostgreSQLConfig`] - connection pool settings
//! - [`MappingsConfig`] - mapping repository directory
//! - [`ConceptsConfig`] - thresholds, vocabulary, embedding and reasoning backends
//! - [`JobConfig`] - one entry per `[[jobs]]` table
//! - [`LoggingConfig`] - local JSON file logging
//!
//! # Example Configuration
//!
//! ```toml
//! [engine]
//! store_backend = "postgresql"
//!
//! [postgresql]
//! connection_string = "${ESTUARY_PG_URL}"
//!
//! [[jobs]]
//! name = "patients"
//! resource_type = "Patient"
//! mapping_ref = "patients_v1"
//!
//! [jobs.source]
//! type = "tabular-file"
//! path = "data/patients.csv"
//! ```

pub mod loader;
pub mod schema;
pub mod secret;

// Re-export commonly used types
pub use loader::{load_config, parse_config};
pub use schema::{
    ApplicationConfig, ConceptsConfig, EmbeddingConfig, EmbeddingProviderKind, EngineConfig,
    EstuaryConfig, JobConfig, LoggingConfig, MappingsConfig, PostgreSQLConfig, ReasoningConfig,
    StoreBackend,
};
pub use secret::{secret_string, secret_string_opt, SecretString, SecretValue};

//! External system integrations for Estuary.
//!
//! This module provides adapters for the systems the pipeline talks to:
//!
//! - [`source`] - Source connectors (tabular files, TCP message streams,
//!   document files, remote resource APIs) behind a runtime registry
//! - [`mapping`] - Approved mapping list repositories
//! - [`database`] - Destination and concept store abstraction (trait-based)
//! - [`postgresql`] - PostgreSQL implementation of the stores and vocabulary
//! - [`vocabulary`] - Standard vocabulary lookup
//!
//! # Design Pattern
//!
//! Adapters follow the **Adapter Pattern** to isolate external dependencies and
//! enable testing with in-memory implementations. Every seam is an
//! `async_trait` object, so the engine only ever holds `Arc<dyn Trait>`.
//!
//! # Stores
//!
//! ```rust,no_run
//! use estuary::adapters::database::create_stores;
//! use estuary::config::load_config;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("estuary.toml")?;
//! let stores = create_stores(&config).await?;
//! println!("Writing to {}", stores.documents.backend_name());
//! # Ok(())
//! # }
//! ```

pub mod database;
pub mod mapping;
pub mod postgresql;
pub mod source;
pub mod vocabulary;

// Estuary - Clinical ingestion pipeline
// Copyright (c) 2025 Estuary Contributors
// Licensed under the MIT License

//! # Estuary - Clinical Ingestion Pipeline
//!
//! Estuary pulls records from heterogeneous sources, maps them into canonical
//! clinical resources, assigns deterministic identities, and fans them out to
//! staging, canonical and analytic destinations while resolving source codes
//! to standard concepts.
//!
//! ## Overview
//!
//! This library provides the core functionality for:
//! - **Ingesting** flat records from tabular files, TCP message streams,
//!   document files and remote resource APIs
//! - **Transforming** them with approved field mappings into resource trees
//! - **Identifying** resources with stable hashes so re-ingestion converges
//! - **Persisting** to staging, canonical (last write wins) and analytic stores
//! - **Resolving** codes through cache, vocabulary, semantic and reasoning stages
//!
//! ## Architecture
//!
//! Estuary follows a layered architecture:
//!
//! - [`cli`] - Command-line interface and argument parsing
//! - [`core`] - Business logic (orchestrator, transform, identity, persistence, concepts)
//! - [`adapters`] - External integrations (sources, stores, vocabulary, mappings)
//! - [`domain`] - Core domain types and models
//! - [`config`] - Configuration management
//! - [`logging`] - Structured logging and observability
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use estuary::config::load_config;
//! use estuary::core::orchestrator::{Engine, EngineContext};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = load_config("estuary.toml")?;
//!     let engine = Engine::new(Arc::new(EngineContext::from_config(&config).await?));
//!
//!     for job in &config.jobs {
//!         let id = engine.create(job.to_spec(false)?).await?;
//!         engine.start(&id).await?;
//!     }
//!
//!     for status in engine.list_jobs().await {
//!         let status = engine.wait(&status.job_id).await?;
//!         println!("{} -> {}", status.name, status.state);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Job Lifecycle
//!
//! Jobs move through `CREATED → RUNNING ⇄ PAUSED → STOPPED`, may be restarted
//! from `STOPPED`, and end in `FAILED` when their source cannot be opened or
//! breaks mid-stream. Record-level problems never fail a job: the record is
//! written to the job's dead-letter collection with the reason and the loop
//! moves on.
//!
//! ## Concept Resolution
//!
//! ```rust,no_run
//! use estuary::core::concept::ConceptRequest;
//! use estuary::domain::ConceptDomain;
//!
//! # async fn example(engine: &estuary::core::orchestrator::Engine) {
//! let request = ConceptRequest::new("http://loinc.org", "8480-6", Some("Systolic BP".to_string()), ConceptDomain::Measurement);
//! let resolved = engine.context().concepts.resolve_and_apply(&request).await;
//! println!("{:?} -> {}", resolved.decision, resolved.concept_id());
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Estuary uses the [`domain::EstuaryError`] type for all library errors:
//!
//! ```rust,no_run
//! use estuary::domain::EstuaryError;
//!
//! fn example() -> Result<(), EstuaryError> {
//!     let config = estuary::config::load_config("estuary.toml")?;
//!     Ok(())
//! }
//! ```
//!
//! ## Logging
//!
//! Estuary uses structured logging with the `tracing` crate:
//!
//! ```rust,no_run
//! use tracing::{info, warn};
//!
//! info!(job_id = "7f3c", "Job started");
//! warn!(collection = "canonical_patient", "Canonical upsert failed");
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod logging;

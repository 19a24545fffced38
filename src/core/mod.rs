//! Core business logic for Estuary.
//!
//! # Modules
//!
//! - [`orchestrator`] - Job lifecycle, worker loops and the shared engine context
//! - [`transform`] - Mapping-driven record → resource transformation
//! - [`identity`] - Deterministic resource and person/visit identities
//! - [`persist`] - Fan-out to staging, canonical and analytic destinations
//! - [`concept`] - Staged concept resolution and the review queue
//! - [`analytic`] - Canonical resource → analytic row derivation
//!
//! # Record Workflow
//!
//! For every unit a job pulls from its source:
//!
//! 1. **Transform**: apply the approved mapping list to build a resource tree
//! 2. **Identify**: assign the deterministic id and `lastUpdated` stamp
//! 3. **Stage**: insert into `staging_<job>`; failures go to the dead-letter collection
//! 4. **Canonicalize**: upsert into `canonical_<type>`, last write wins
//! 5. **Cascade** (optional): derive and upsert the analytic row, resolving codes
//!
//! # Example
//!
//! ```rust,no_run
//! use estuary::config::load_config;
//! use estuary::core::orchestrator::{Engine, EngineContext};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("estuary.toml")?;
//! let engine = Engine::new(Arc::new(EngineContext::from_config(&config).await?));
//!
//! let spec = config.jobs[0].to_spec(false)?;
//! let id = engine.create(spec).await?;
//! engine.start(&id).await?;
//!
//! let status = engine.wait(&id).await?;
//! println!("{}: {} processed", status.state, status.metrics.processed);
//! # Ok(())
//! # }
//! ```

pub mod analytic;
pub mod concept;
pub mod identity;
pub mod orchestrator;
pub mod persist;
pub mod transform;

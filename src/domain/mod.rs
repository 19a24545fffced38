//! Domain models and types for Estuary.
//!
//! This module contains the core domain models, types, and business rules.
//!
//! # Overview
//!
//! The domain layer provides:
//! - **Strongly-typed identifiers** ([`JobId`], [`ResourceId`], [`ReviewId`])
//! - **Pipeline models** ([`FlatRecord`], [`Resource`], [`FieldMapping`], [`JobSpec`])
//! - **Concept models** ([`ConceptSuggestion`], [`CachedConceptMapping`], [`ReviewItem`])
//! - **Error types** ([`EstuaryError`], [`SourceError`], [`StoreError`])
//! - **Result type alias** ([`Result`])
//!
//! # Error Handling
//!
//! All fallible library operations return [`Result<T, EstuaryError>`]:
//!
//! ```rust,no_run
//! use estuary::domain::Result;
//!
//! fn example() -> Result<()> {
//!     let config = estuary::config::load_config("estuary.toml")?;
//!     println!("{} jobs configured", config.jobs.len());
//!     Ok(())
//! }
//! ```
//!
//! # Builder Pattern
//!
//! ```rust
//! use estuary::domain::{JobSpec, ResourceType, SourceSpec};
//!
//! let spec = JobSpec::builder()
//!     .name("patients")
//!     .resource_type(ResourceType::Patient)
//!     .mapping_ref("patients_v1")
//!     .source(SourceSpec::new("tabular-file").with("path", "patients.csv"))
//!     .build()
//!     .unwrap();
//! assert!(spec.destination.canonical);
//! ```

pub mod concept;
pub mod context;
pub mod errors;
pub mod ids;
pub mod job;
pub mod mapping;
pub mod record;
pub mod resource;
pub mod result;

// Re-export commonly used types for convenience
pub use concept::{
    CachedConceptMapping, Concept, ConceptCandidate, ConceptDomain, ConceptSuggestion,
    ConfidencePolicy, Decision, MappingKey, ResolutionStage, ReviewItem, ReviewStatus,
};
pub use errors::{EstuaryError, FailureDetail, SourceError, StoreError};
pub use ids::{JobId, ResourceId, ReviewId};
pub use job::{AutoSync, DestinationConfig, JobMetrics, JobSpec, JobState, JobStatus, SourceSpec};
pub use mapping::{CustomFunction, FieldMapping, MappingSet, RawFieldMapping, Transform};
pub use record::FlatRecord;
pub use resource::{Resource, ResourceType};
pub use result::Result;

//! Store abstraction layer
//!
//! This module provides a trait-based abstraction for persistence, allowing
//! Estuary to run against an in-memory backend or PostgreSQL.

pub mod factory;
pub mod memory;
pub mod traits;

pub use factory::{create_stores, Stores};
pub use memory::{MemoryConceptStore, MemoryDocumentStore};
pub use traits::{
    validate_collection_name, ConceptStore, DocumentStore, UpsertOutcome, CONCEPT_MAPPING_CACHE,
    CONCEPT_REVIEW_QUEUE,
};

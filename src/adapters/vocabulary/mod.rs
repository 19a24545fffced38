//! Standard vocabulary lookup
//!
//! The concept resolver's direct and semantic stages query a
//! [`VocabularyStore`]. Two backends exist: an in-memory index loaded from an
//! OMOP-style CONCEPT file, and the PostgreSQL `concept` table.

pub mod memory;

use crate::adapters::postgresql::client::PostgreSQLClient;
use crate::adapters::postgresql::vocabulary::PostgreSQLVocabulary;
use crate::config::schema::{EstuaryConfig, StoreBackend};
use crate::domain::concept::{Concept, ConceptDomain};
use crate::domain::Result;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

pub use memory::MemoryVocabulary;

/// Read-only vocabulary access
#[async_trait]
pub trait VocabularyStore: Send + Sync {
    /// Concepts whose code equals `code` (case-insensitive)
    ///
    /// Standard concepts in `domain` sort first when a domain is given.
    async fn search_by_code(&self, code: &str, domain: Option<ConceptDomain>) -> Result<Vec<Concept>>;

    /// Up to `limit` concepts in `domain` whose name shares words with `text`
    async fn search_by_name(&self, text: &str, domain: ConceptDomain, limit: usize) -> Result<Vec<Concept>>;

    /// Concept by id
    async fn get_by_id(&self, concept_id: i64) -> Result<Option<Concept>>;
}

/// Orders concepts: standard ones in the requested domain first
pub(crate) fn rank_code_matches(concepts: &mut [Concept], domain: Option<ConceptDomain>) {
    concepts.sort_by_key(|c| {
        let in_domain = domain.map_or(true, |d| d.matches(&c.domain_id));
        (!(c.is_standard && in_domain), !in_domain, c.concept_id)
    });
}

/// Create the vocabulary store for a configuration
///
/// `concepts.vocabulary_file` wins when set; otherwise the PostgreSQL backend
/// reads the configured concept table and the memory backend starts empty.
///
/// # Errors
///
/// Returns an error if the vocabulary file cannot be read or the PostgreSQL
/// client cannot be created.
pub async fn create_vocabulary(config: &EstuaryConfig) -> Result<Arc<dyn VocabularyStore>> {
    if let Some(file) = &config.concepts.vocabulary_file {
        let vocabulary = MemoryVocabulary::from_file(Path::new(file))?;
        tracing::info!(file = %file, concepts = vocabulary.len(), "Loaded vocabulary file");
        return Ok(Arc::new(vocabulary));
    }

    match (config.engine.store_backend, &config.postgresql) {
        (StoreBackend::PostgreSQL, Some(pg_config)) => {
            let client = PostgreSQLClient::new(pg_config.clone())?;
            Ok(Arc::new(PostgreSQLVocabulary::new(Arc::new(client))))
        }
        _ => {
            tracing::warn!("No vocabulary configured; direct and semantic concept stages will find nothing");
            Ok(Arc::new(MemoryVocabulary::default()))
        }
    }
}

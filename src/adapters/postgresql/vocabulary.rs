//! PostgreSQL vocabulary backed by an OMOP `concept` table

use super::client::PostgreSQLClient;
use super::models::concept_from_row;
use crate::adapters::vocabulary::{rank_code_matches, VocabularyStore};
use crate::domain::concept::{Concept, ConceptDomain};
use crate::domain::Result;
use async_trait::async_trait;
use std::sync::Arc;

const CONCEPT_COLUMNS: &str =
    "concept_id, concept_name, concept_code, vocabulary_id, domain_id, standard_concept";

/// Vocabulary lookups against the configured concept table
pub struct PostgreSQLVocabulary {
    client: Arc<PostgreSQLClient>,
}

impl PostgreSQLVocabulary {
    pub fn new(client: Arc<PostgreSQLClient>) -> Self {
        Self { client }
    }

    fn table(&self) -> &str {
        self.client.concept_table()
    }
}

/// Escapes `LIKE` wildcards in user text
fn like_pattern(text: &str) -> String {
    let escaped = text
        .trim()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{escaped}%")
}

#[async_trait]
impl VocabularyStore for PostgreSQLVocabulary {
    async fn search_by_code(&self, code: &str, domain: Option<ConceptDomain>) -> Result<Vec<Concept>> {
        let table = self.table();
        let query = format!(
            "SELECT {CONCEPT_COLUMNS} FROM {table}
             WHERE lower(concept_code) = lower($1) AND invalid_reason IS NULL
             LIMIT 50"
        );
        let code = code.trim();
        let rows = self.client.query(table, &query, &[&code]).await?;
        let mut concepts = rows.iter().map(concept_from_row).collect::<Result<Vec<_>>>()?;
        rank_code_matches(&mut concepts, domain);
        Ok(concepts)
    }

    async fn search_by_name(&self, text: &str, domain: ConceptDomain, limit: usize) -> Result<Vec<Concept>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let table = self.table();
        let query = format!(
            "SELECT {CONCEPT_COLUMNS} FROM {table}
             WHERE domain_id = $1 AND concept_name ILIKE $2 AND invalid_reason IS NULL
             ORDER BY (standard_concept = 'S') DESC NULLS LAST, length(concept_name)
             LIMIT $3"
        );
        let domain_id = domain.as_str();
        let pattern = like_pattern(text);
        let limit = limit as i64;
        let rows = self
            .client
            .query(table, &query, &[&domain_id, &pattern, &limit])
            .await?;
        rows.iter().map(concept_from_row).collect()
    }

    async fn get_by_id(&self, concept_id: i64) -> Result<Option<Concept>> {
        let table = self.table();
        let query = format!("SELECT {CONCEPT_COLUMNS} FROM {table} WHERE concept_id = $1");
        let rows = self.client.query(table, &query, &[&concept_id]).await?;
        rows.first().map(concept_from_row).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern(" blood pressure "), "%blood pressure%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
    }
}

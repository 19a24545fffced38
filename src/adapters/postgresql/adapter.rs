//! PostgreSQL adapter implementing the store traits
//!
//! One table per collection with a JSONB body. Tables are created lazily on
//! first use per process.

use super::client::PostgreSQLClient;
use super::models::{
    collection_ddl, mapping_cache_ddl, mapping_from_row, review_from_row, review_queue_ddl,
};
use crate::adapters::database::traits::{
    validate_collection_name, ConceptStore, DocumentStore, UpsertOutcome, CONCEPT_MAPPING_CACHE,
    CONCEPT_REVIEW_QUEUE,
};
use crate::domain::concept::{CachedConceptMapping, MappingKey, ReviewItem, ReviewStatus};
use crate::domain::errors::StoreError;
use crate::domain::ids::ReviewId;
use crate::domain::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// PostgreSQL implementation of [`DocumentStore`] and [`ConceptStore`]
pub struct PostgreSQLAdapter {
    client: Arc<PostgreSQLClient>,
    ensured: Mutex<HashSet<String>>,
}

impl PostgreSQLAdapter {
    /// Create a new PostgreSQL adapter with an Arc-wrapped client
    pub fn new_with_arc(client: Arc<PostgreSQLClient>) -> Self {
        Self {
            client,
            ensured: Mutex::new(HashSet::new()),
        }
    }

    fn is_ensured(&self, table: &str) -> bool {
        self.ensured
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(table)
    }

    fn mark_ensured(&self, table: &str) {
        self.ensured
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(table.to_string());
    }

    async fn ensure_table(&self, table: &str, ddl: String) -> Result<()> {
        if self.is_ensured(table) {
            return Ok(());
        }
        self.client.batch_execute(table, &ddl).await?;
        self.mark_ensured(table);
        tracing::debug!(collection = %table, "PostgreSQL table ensured");
        Ok(())
    }

    async fn ensure_concept_tables(&self) -> Result<()> {
        self.ensure_table(CONCEPT_MAPPING_CACHE, mapping_cache_ddl(CONCEPT_MAPPING_CACHE))
            .await?;
        self.ensure_table(CONCEPT_REVIEW_QUEUE, review_queue_ddl(CONCEPT_REVIEW_QUEUE))
            .await
    }
}

#[async_trait]
impl DocumentStore for PostgreSQLAdapter {
    fn backend_name(&self) -> &'static str {
        "postgresql"
    }

    async fn test_connection(&self) -> Result<()> {
        self.client.test_connection().await
    }

    async fn ensure_collection(&self, collection: &str) -> Result<()> {
        validate_collection_name(collection)?;
        self.ensure_table(collection, collection_ddl(collection)).await
    }

    async fn insert(&self, collection: &str, document: Value) -> Result<()> {
        self.ensure_collection(collection).await?;
        let statement = format!("INSERT INTO {collection} (body) VALUES ($1)");
        self.client
            .execute(collection, &statement, &[&document])
            .await?;
        Ok(())
    }

    async fn upsert(
        &self,
        collection: &str,
        key: &str,
        document: Value,
        last_updated: DateTime<Utc>,
    ) -> Result<UpsertOutcome> {
        self.ensure_collection(collection).await?;
        let statement = format!(
            r#"
            INSERT INTO {collection} (doc_key, body, last_updated)
            VALUES ($1, $2, $3)
            ON CONFLICT (doc_key) DO UPDATE SET
                body = EXCLUDED.body,
                last_updated = EXCLUDED.last_updated,
                stored_at = now()
            WHERE {collection}.last_updated IS NULL
               OR {collection}.last_updated <= EXCLUDED.last_updated
            RETURNING (xmax = 0) AS inserted
            "#
        );

        let rows = self
            .client
            .query(collection, &statement, &[&key, &document, &last_updated])
            .await?;

        match rows.first() {
            None => Ok(UpsertOutcome::Stale),
            Some(row) => {
                let inserted: bool = row.try_get("inserted").map_err(|e| StoreError::UpsertFailed {
                    collection: collection.to_string(),
                    message: e.to_string(),
                })?;
                Ok(if inserted {
                    UpsertOutcome::Inserted
                } else {
                    UpsertOutcome::Updated
                })
            }
        }
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>> {
        self.ensure_collection(collection).await?;
        let query = format!("SELECT body FROM {collection} WHERE doc_key = $1");
        let rows = self.client.query(collection, &query, &[&key]).await?;
        Ok(rows.first().and_then(|row| row.try_get::<_, Value>("body").ok()))
    }

    async fn count(&self, collection: &str) -> Result<u64> {
        self.ensure_collection(collection).await?;
        let query = format!("SELECT COUNT(*) AS n FROM {collection}");
        let rows = self.client.query(collection, &query, &[]).await?;
        let count: i64 = rows
            .first()
            .and_then(|row| row.try_get("n").ok())
            .unwrap_or(0);
        Ok(count.max(0) as u64)
    }

    async fn list(&self, collection: &str, limit: usize) -> Result<Vec<Value>> {
        self.ensure_collection(collection).await?;
        let query = format!("SELECT body FROM {collection} ORDER BY seq LIMIT $1");
        let limit = limit as i64;
        let rows = self.client.query(collection, &query, &[&limit]).await?;
        Ok(rows
            .iter()
            .filter_map(|row| row.try_get::<_, Value>("body").ok())
            .collect())
    }
}

#[async_trait]
impl ConceptStore for PostgreSQLAdapter {
    async fn get_mapping(&self, key: &MappingKey) -> Result<Option<CachedConceptMapping>> {
        self.ensure_concept_tables().await?;
        let query = format!(
            "SELECT * FROM {CONCEPT_MAPPING_CACHE}
             WHERE source_system = $1 AND source_code = $2 AND target_domain = $3"
        );
        let domain = key.target_domain.as_str();
        let rows = self
            .client
            .query(
                CONCEPT_MAPPING_CACHE,
                &query,
                &[&key.source_system, &key.source_code, &domain],
            )
            .await?;
        rows.first().map(mapping_from_row).transpose()
    }

    async fn upsert_mapping(&self, mapping: CachedConceptMapping) -> Result<CachedConceptMapping> {
        self.ensure_concept_tables().await?;
        let statement = format!(
            r#"
            INSERT INTO {CONCEPT_MAPPING_CACHE} (
                source_system, source_code, target_domain, concept_id, concept_name,
                vocabulary_id, confidence, stage, hits, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 1, $9, $10)
            ON CONFLICT (source_system, source_code, target_domain) DO UPDATE SET
                concept_id = EXCLUDED.concept_id,
                concept_name = EXCLUDED.concept_name,
                vocabulary_id = EXCLUDED.vocabulary_id,
                confidence = EXCLUDED.confidence,
                stage = EXCLUDED.stage,
                hits = {CONCEPT_MAPPING_CACHE}.hits + 1,
                updated_at = EXCLUDED.updated_at
            RETURNING *
            "#
        );
        let domain = mapping.key.target_domain.as_str();
        let stage = mapping.stage.as_str();
        let rows = self
            .client
            .query(
                CONCEPT_MAPPING_CACHE,
                &statement,
                &[
                    &mapping.key.source_system,
                    &mapping.key.source_code,
                    &domain,
                    &mapping.concept_id,
                    &mapping.concept_name,
                    &mapping.vocabulary_id,
                    &mapping.confidence,
                    &stage,
                    &mapping.created_at,
                    &mapping.updated_at,
                ],
            )
            .await?;

        let row = rows.first().ok_or_else(|| StoreError::UpsertFailed {
            collection: CONCEPT_MAPPING_CACHE.to_string(),
            message: "upsert returned no row".to_string(),
        })?;
        mapping_from_row(row)
    }

    async fn record_hit(&self, key: &MappingKey) -> Result<Option<CachedConceptMapping>> {
        self.ensure_concept_tables().await?;
        let statement = format!(
            "UPDATE {CONCEPT_MAPPING_CACHE} SET hits = hits + 1, updated_at = now()
             WHERE source_system = $1 AND source_code = $2 AND target_domain = $3
             RETURNING *"
        );
        let domain = key.target_domain.as_str();
        let rows = self
            .client
            .query(
                CONCEPT_MAPPING_CACHE,
                &statement,
                &[&key.source_system, &key.source_code, &domain],
            )
            .await?;
        rows.first().map(mapping_from_row).transpose()
    }

    async fn mapping_count(&self) -> Result<u64> {
        self.ensure_concept_tables().await?;
        let query = format!("SELECT COUNT(*) AS n FROM {CONCEPT_MAPPING_CACHE}");
        let rows = self.client.query(CONCEPT_MAPPING_CACHE, &query, &[]).await?;
        let count: i64 = rows.first().and_then(|r| r.try_get("n").ok()).unwrap_or(0);
        Ok(count.max(0) as u64)
    }

    async fn enqueue_review(&self, item: ReviewItem) -> Result<ReviewItem> {
        self.ensure_concept_tables().await?;
        let body = serde_json::to_value(&item)?;
        let domain = item.key.target_domain.as_str();
        let status = item.status.as_str();
        let id = item.id.as_uuid();

        let statement = format!(
            r#"
            INSERT INTO {CONCEPT_REVIEW_QUEUE} (
                id, source_system, source_code, target_domain, status, body, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (source_system, source_code, target_domain) WHERE status = 'pending'
            DO NOTHING
            "#
        );
        let inserted = self
            .client
            .execute(
                CONCEPT_REVIEW_QUEUE,
                &statement,
                &[
                    &id,
                    &item.key.source_system,
                    &item.key.source_code,
                    &domain,
                    &status,
                    &body,
                    &item.created_at,
                ],
            )
            .await?;

        if inserted > 0 {
            return Ok(item);
        }

        let query = format!(
            "SELECT body FROM {CONCEPT_REVIEW_QUEUE}
             WHERE source_system = $1 AND source_code = $2 AND target_domain = $3
               AND status = 'pending'
             LIMIT 1"
        );
        let rows = self
            .client
            .query(
                CONCEPT_REVIEW_QUEUE,
                &query,
                &[&item.key.source_system, &item.key.source_code, &domain],
            )
            .await?;
        match rows.first() {
            Some(row) => review_from_row(row),
            None => Ok(item),
        }
    }

    async fn get_review(&self, id: ReviewId) -> Result<Option<ReviewItem>> {
        self.ensure_concept_tables().await?;
        let query = format!("SELECT body FROM {CONCEPT_REVIEW_QUEUE} WHERE id = $1");
        let uuid = id.as_uuid();
        let rows = self
            .client
            .query(CONCEPT_REVIEW_QUEUE, &query, &[&uuid])
            .await?;
        rows.first().map(review_from_row).transpose()
    }

    async fn list_reviews(&self, status: Option<ReviewStatus>, limit: usize) -> Result<Vec<ReviewItem>> {
        self.ensure_concept_tables().await?;
        let limit = limit as i64;
        let rows = match status {
            Some(status) => {
                let query = format!(
                    "SELECT body FROM {CONCEPT_REVIEW_QUEUE}
                     WHERE status = $1 ORDER BY created_at LIMIT $2"
                );
                let status = status.as_str();
                self.client
                    .query(CONCEPT_REVIEW_QUEUE, &query, &[&status, &limit])
                    .await?
            }
            None => {
                let query = format!(
                    "SELECT body FROM {CONCEPT_REVIEW_QUEUE} ORDER BY created_at LIMIT $1"
                );
                self.client
                    .query(CONCEPT_REVIEW_QUEUE, &query, &[&limit])
                    .await?
            }
        };
        rows.iter().map(review_from_row).collect()
    }

    async fn update_review(&self, item: &ReviewItem) -> Result<()> {
        self.ensure_concept_tables().await?;
        let statement = format!(
            "UPDATE {CONCEPT_REVIEW_QUEUE} SET status = $2, body = $3, decided_at = $4
             WHERE id = $1"
        );
        let body = serde_json::to_value(item)?;
        let status = item.status.as_str();
        let id = item.id.as_uuid();
        let updated = self
            .client
            .execute(
                CONCEPT_REVIEW_QUEUE,
                &statement,
                &[&id, &status, &body, &item.decided_at],
            )
            .await?;
        if updated == 0 {
            return Err(StoreError::NotFound(format!("review item {}", item.id)).into());
        }
        Ok(())
    }

    async fn pending_review_count(&self) -> Result<u64> {
        self.ensure_concept_tables().await?;
        let query = format!("SELECT COUNT(*) AS n FROM {CONCEPT_REVIEW_QUEUE} WHERE status = 'pending'");
        let rows = self.client.query(CONCEPT_REVIEW_QUEUE, &query, &[]).await?;
        let count: i64 = rows.first().and_then(|r| r.try_get("n").ok()).unwrap_or(0);
        Ok(count.max(0) as u64)
    }
}

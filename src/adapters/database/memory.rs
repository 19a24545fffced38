//! In-memory store backend
//!
//! Used for embedding, dry runs and tests. All state lives behind
//! `tokio::sync::RwLock`s and disappears with the process.

use super::traits::{validate_collection_name, ConceptStore, DocumentStore, UpsertOutcome};
use crate::domain::concept::{CachedConceptMapping, MappingKey, ReviewItem, ReviewStatus};
use crate::domain::errors::StoreError;
use crate::domain::ids::ReviewId;
use crate::domain::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct Collection {
    documents: Vec<Value>,
    keyed: HashMap<String, (usize, DateTime<Utc>)>,
}

/// In-memory [`DocumentStore`]
///
/// Collections are created on first write as well as by
/// [`DocumentStore::ensure_collection`].
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    collections: RwLock<HashMap<String, Collection>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of all collections, sorted
    pub async fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn test_connection(&self) -> Result<()> {
        Ok(())
    }

    async fn ensure_collection(&self, collection: &str) -> Result<()> {
        validate_collection_name(collection)?;
        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default();
        Ok(())
    }

    async fn insert(&self, collection: &str, document: Value) -> Result<()> {
        validate_collection_name(collection)?;
        self.collections
            .write()
            .await
            .entry(collection.to_string())
            .or_default()
            .documents
            .push(document);
        Ok(())
    }

    async fn upsert(
        &self,
        collection: &str,
        key: &str,
        document: Value,
        last_updated: DateTime<Utc>,
    ) -> Result<UpsertOutcome> {
        validate_collection_name(collection)?;
        let mut collections = self.collections.write().await;
        let entry = collections.entry(collection.to_string()).or_default();

        match entry.keyed.get(key).copied() {
            None => {
                entry.documents.push(document);
                let position = entry.documents.len() - 1;
                entry.keyed.insert(key.to_string(), (position, last_updated));
                Ok(UpsertOutcome::Inserted)
            }
            Some((_, stored)) if stored > last_updated => Ok(UpsertOutcome::Stale),
            Some((position, _)) => {
                entry.documents[position] = document;
                entry.keyed.insert(key.to_string(), (position, last_updated));
                Ok(UpsertOutcome::Updated)
            }
        }
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>> {
        let collections = self.collections.read().await;
        Ok(collections.get(collection).and_then(|entry| {
            entry
                .keyed
                .get(key)
                .and_then(|(position, _)| entry.documents.get(*position).cloned())
        }))
    }

    async fn count(&self, collection: &str) -> Result<u64> {
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .map(|entry| entry.documents.len() as u64)
            .unwrap_or(0))
    }

    async fn list(&self, collection: &str, limit: usize) -> Result<Vec<Value>> {
        Ok(self
            .collections
            .read()
            .await
            .get(collection)
            .map(|entry| entry.documents.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

/// In-memory [`ConceptStore`]
#[derive(Debug, Default)]
pub struct MemoryConceptStore {
    mappings: RwLock<HashMap<MappingKey, CachedConceptMapping>>,
    reviews: RwLock<Vec<ReviewItem>>,
}

impl MemoryConceptStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConceptStore for MemoryConceptStore {
    async fn get_mapping(&self, key: &MappingKey) -> Result<Option<CachedConceptMapping>> {
        Ok(self.mappings.read().await.get(key).cloned())
    }

    async fn upsert_mapping(&self, mapping: CachedConceptMapping) -> Result<CachedConceptMapping> {
        let mut mappings = self.mappings.write().await;
        let stored = match mappings.get(&mapping.key) {
            Some(existing) => CachedConceptMapping {
                hits: existing.hits + 1,
                created_at: existing.created_at,
                ..mapping
            },
            None => CachedConceptMapping { hits: 1, ..mapping },
        };
        mappings.insert(stored.key.clone(), stored.clone());
        Ok(stored)
    }

    async fn record_hit(&self, key: &MappingKey) -> Result<Option<CachedConceptMapping>> {
        let mut mappings = self.mappings.write().await;
        Ok(mappings.get_mut(key).map(|entry| {
            entry.hits += 1;
            entry.updated_at = Utc::now();
            entry.clone()
        }))
    }

    async fn mapping_count(&self) -> Result<u64> {
        Ok(self.mappings.read().await.len() as u64)
    }

    async fn enqueue_review(&self, item: ReviewItem) -> Result<ReviewItem> {
        let mut reviews = self.reviews.write().await;
        if let Some(existing) = reviews
            .iter()
            .find(|r| r.status == ReviewStatus::Pending && r.key == item.key)
        {
            return Ok(existing.clone());
        }
        reviews.push(item.clone());
        Ok(item)
    }

    async fn get_review(&self, id: ReviewId) -> Result<Option<ReviewItem>> {
        Ok(self.reviews.read().await.iter().find(|r| r.id == id).cloned())
    }

    async fn list_reviews(&self, status: Option<ReviewStatus>, limit: usize) -> Result<Vec<ReviewItem>> {
        Ok(self
            .reviews
            .read()
            .await
            .iter()
            .filter(|r| status.map_or(true, |s| r.status == s))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn update_review(&self, item: &ReviewItem) -> Result<()> {
        let mut reviews = self.reviews.write().await;
        let slot = reviews
            .iter_mut()
            .find(|r| r.id == item.id)
            .ok_or_else(|| StoreError::NotFound(format!("review item {}", item.id)))?;
        *slot = item.clone();
        Ok(())
    }

    async fn pending_review_count(&self) -> Result<u64> {
        Ok(self
            .reviews
            .read()
            .await
            .iter()
            .filter(|r| r.status == ReviewStatus::Pending)
            .count() as u64)
    }
}

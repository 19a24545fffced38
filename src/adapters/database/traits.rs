//! Store abstraction traits
//!
//! This module defines the traits that storage backends must implement to
//! work with Estuary: a collection-oriented [`DocumentStore`] for staging,
//! canonical, dead-letter and analytic data, and a [`ConceptStore`] for the
//! concept mapping cache and the review queue.

use crate::domain::concept::{CachedConceptMapping, MappingKey, ReviewItem, ReviewStatus};
use crate::domain::errors::StoreError;
use crate::domain::ids::ReviewId;
use crate::domain::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Global concept mapping cache collection
pub const CONCEPT_MAPPING_CACHE: &str = "concept_mapping_cache";

/// Global review queue collection
pub const CONCEPT_REVIEW_QUEUE: &str = "concept_review_queue";

/// Longest accepted collection name (PostgreSQL identifier limit)
pub const MAX_COLLECTION_NAME_LEN: usize = 63;

/// Result of a keyed last-write-wins upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No document existed under the key
    Inserted,
    /// The incoming document was at least as recent and replaced the stored one
    Updated,
    /// The stored document is newer; nothing changed
    Stale,
}

impl UpsertOutcome {
    /// True when the store now holds the incoming document
    pub fn applied(&self) -> bool {
        !matches!(self, UpsertOutcome::Stale)
    }
}

/// Checks a collection name: lowercase ASCII letters, digits and `_`
///
/// # Errors
///
/// Returns [`StoreError::InvalidCollection`] for anything else.
pub fn validate_collection_name(collection: &str) -> std::result::Result<(), StoreError> {
    let valid = !collection.is_empty()
        && collection.len() <= MAX_COLLECTION_NAME_LEN
        && collection
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
        && collection
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');

    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidCollection(collection.to_string()))
    }
}

/// Collection-oriented document store
///
/// Collections hold JSON documents. Documents written with [`insert`] are
/// append-only; documents written with [`upsert`] are unique per key and
/// resolved last-write-wins on their timestamp.
///
/// [`insert`]: DocumentStore::insert
/// [`upsert`]: DocumentStore::upsert
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Backend name for logs (`memory`, `postgresql`)
    fn backend_name(&self) -> &'static str;

    /// Test the store connection
    ///
    /// # Errors
    ///
    /// Returns an error if the store is unreachable.
    async fn test_connection(&self) -> Result<()>;

    /// Ensure a collection (and its key index) exists, creating it if needed
    async fn ensure_collection(&self, collection: &str) -> Result<()>;

    /// Append a document
    async fn insert(&self, collection: &str, document: Value) -> Result<()>;

    /// Insert or replace the document stored under `key`
    ///
    /// The incoming document wins when `last_updated` is equal to or newer
    /// than the stored document's timestamp.
    async fn upsert(
        &self,
        collection: &str,
        key: &str,
        document: Value,
        last_updated: DateTime<Utc>,
    ) -> Result<UpsertOutcome>;

    /// Fetch a keyed document
    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>>;

    /// Number of documents in a collection (0 when it does not exist)
    async fn count(&self, collection: &str) -> Result<u64>;

    /// Up to `limit` documents in write order
    async fn list(&self, collection: &str, limit: usize) -> Result<Vec<Value>>;
}

/// Concept mapping cache and human review queue
#[async_trait]
pub trait ConceptStore: Send + Sync {
    /// Look up a cached mapping without touching its hit counter
    async fn get_mapping(&self, key: &MappingKey) -> Result<Option<CachedConceptMapping>>;

    /// Insert or replace a mapping, incrementing its hit counter
    ///
    /// A new entry starts at one hit. A replaced entry keeps its creation
    /// time and previous hit count plus one.
    async fn upsert_mapping(&self, mapping: CachedConceptMapping) -> Result<CachedConceptMapping>;

    /// Count a cache hit; returns the updated entry, or `None` if absent
    async fn record_hit(&self, key: &MappingKey) -> Result<Option<CachedConceptMapping>>;

    /// Number of cached mappings
    async fn mapping_count(&self) -> Result<u64>;

    /// Queue an item for review
    ///
    /// When a pending item for the same key already exists it is returned
    /// instead and nothing new is queued.
    async fn enqueue_review(&self, item: ReviewItem) -> Result<ReviewItem>;

    /// Fetch a review item
    async fn get_review(&self, id: ReviewId) -> Result<Option<ReviewItem>>;

    /// Items oldest first, optionally filtered by status
    async fn list_reviews(&self, status: Option<ReviewStatus>, limit: usize) -> Result<Vec<ReviewItem>>;

    /// Persist a decided item
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] when the item does not exist.
    async fn update_review(&self, item: &ReviewItem) -> Result<()>;

    /// Number of pending items
    async fn pending_review_count(&self) -> Result<u64>;
}

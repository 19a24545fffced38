//! PostgreSQL row models
//!
//! Table DDL and row ↔ domain conversions. Collection tables hold JSONB
//! bodies; the concept cache and review queue have typed key columns so
//! their uniqueness is enforced by the database.

use crate::domain::concept::{
    CachedConceptMapping, Concept, ConceptDomain, MappingKey, ResolutionStage, ReviewItem,
};
use crate::domain::{EstuaryError, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::str::FromStr;
use tokio_postgres::Row;

/// DDL for a document collection table
///
/// `doc_key` is unique but nullable: appended documents carry no key.
pub fn collection_ddl(collection: &str) -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS {collection} (
            seq BIGSERIAL PRIMARY KEY,
            doc_key TEXT UNIQUE,
            body JSONB NOT NULL,
            last_updated TIMESTAMPTZ,
            stored_at TIMESTAMPTZ NOT NULL DEFAULT now()
        );
        "#
    )
}

/// DDL for the concept mapping cache
pub fn mapping_cache_ddl(table: &str) -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            source_system TEXT NOT NULL,
            source_code TEXT NOT NULL,
            target_domain TEXT NOT NULL,
            concept_id BIGINT NOT NULL,
            concept_name TEXT NOT NULL,
            vocabulary_id TEXT NOT NULL,
            confidence DOUBLE PRECISION NOT NULL,
            stage TEXT NOT NULL,
            hits BIGINT NOT NULL DEFAULT 1,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            PRIMARY KEY (source_system, source_code, target_domain)
        );
        "#
    )
}

/// DDL for the review queue
pub fn review_queue_ddl(table: &str) -> String {
    format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            id UUID PRIMARY KEY,
            source_system TEXT NOT NULL,
            source_code TEXT NOT NULL,
            target_domain TEXT NOT NULL,
            status TEXT NOT NULL,
            body JSONB NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            decided_at TIMESTAMPTZ
        );
        CREATE INDEX IF NOT EXISTS {table}_status_idx ON {table} (status, created_at);
        CREATE UNIQUE INDEX IF NOT EXISTS {table}_pending_key_idx
            ON {table} (source_system, source_code, target_domain)
            WHERE status = 'pending';
        "#
    )
}

fn parse_stage(stage: &str) -> ResolutionStage {
    match stage {
        "cache" => ResolutionStage::Cache,
        "direct" => ResolutionStage::Direct,
        "semantic" => ResolutionStage::Semantic,
        "reasoning" => ResolutionStage::Reasoning,
        "human" => ResolutionStage::Human,
        _ => ResolutionStage::Fallback,
    }
}

/// Decodes a `concept_mapping_cache` row
pub fn mapping_from_row(row: &Row) -> Result<CachedConceptMapping> {
    let domain: String = row.try_get("target_domain").map_err(decode_error)?;
    let target_domain = ConceptDomain::from_str(&domain).map_err(EstuaryError::Serialization)?;
    let stage: String = row.try_get("stage").map_err(decode_error)?;
    let hits: i64 = row.try_get("hits").map_err(decode_error)?;

    Ok(CachedConceptMapping {
        key: MappingKey::new(
            row.try_get::<_, String>("source_system").map_err(decode_error)?,
            row.try_get::<_, String>("source_code").map_err(decode_error)?,
            target_domain,
        ),
        concept_id: row.try_get("concept_id").map_err(decode_error)?,
        concept_name: row.try_get("concept_name").map_err(decode_error)?,
        vocabulary_id: row.try_get("vocabulary_id").map_err(decode_error)?,
        confidence: row.try_get("confidence").map_err(decode_error)?,
        stage: parse_stage(&stage),
        hits: hits.max(0) as u64,
        created_at: row.try_get::<_, DateTime<Utc>>("created_at").map_err(decode_error)?,
        updated_at: row.try_get::<_, DateTime<Utc>>("updated_at").map_err(decode_error)?,
    })
}

/// Decodes a `concept_review_queue` row from its JSONB body
pub fn review_from_row(row: &Row) -> Result<ReviewItem> {
    let body: Value = row.try_get("body").map_err(decode_error)?;
    Ok(serde_json::from_value(body)?)
}

/// Decodes a vocabulary row
pub fn concept_from_row(row: &Row) -> Result<Concept> {
    let standard: Option<String> = row.try_get("standard_concept").map_err(decode_error)?;
    Ok(Concept {
        concept_id: row.try_get("concept_id").map_err(decode_error)?,
        concept_name: row.try_get("concept_name").map_err(decode_error)?,
        concept_code: row.try_get("concept_code").map_err(decode_error)?,
        vocabulary_id: row.try_get("vocabulary_id").map_err(decode_error)?,
        domain_id: row.try_get("domain_id").map_err(decode_error)?,
        is_standard: standard.as_deref().map(str::trim) == Some("S"),
    })
}

fn decode_error(e: tokio_postgres::Error) -> EstuaryError {
    EstuaryError::Serialization(format!("Failed to decode row: {e}"))
}

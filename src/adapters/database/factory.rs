//! Store factory
//!
//! This module provides factory functions to create stores based on configuration.

use crate::adapters::database::memory::{MemoryConceptStore, MemoryDocumentStore};
use crate::adapters::database::traits::{ConceptStore, DocumentStore};
use crate::adapters::postgresql::adapter::PostgreSQLAdapter;
use crate::adapters::postgresql::client::PostgreSQLClient;
use crate::config::schema::{EstuaryConfig, StoreBackend};
use crate::domain::{EstuaryError, Result};
use std::sync::Arc;

/// Document and concept stores sharing one backend
#[derive(Clone)]
pub struct Stores {
    pub documents: Arc<dyn DocumentStore>,
    pub concepts: Arc<dyn ConceptStore>,
}

impl Stores {
    /// Fresh in-memory stores
    pub fn in_memory() -> Self {
        Self {
            documents: Arc::new(MemoryDocumentStore::new()),
            concepts: Arc::new(MemoryConceptStore::new()),
        }
    }
}

/// Create the stores selected by `engine.store_backend`
///
/// The PostgreSQL backend shares one connection pool between both stores
/// and verifies connectivity before returning.
///
/// # Errors
///
/// Returns an error if the PostgreSQL section is missing, the connection
/// string is invalid or the database is unreachable.
pub async fn create_stores(config: &EstuaryConfig) -> Result<Stores> {
    match config.engine.store_backend {
        StoreBackend::Memory => {
            tracing::info!("Creating in-memory stores");
            Ok(Stores::in_memory())
        }
        StoreBackend::PostgreSQL => {
            let pg_config = config.postgresql.as_ref().ok_or_else(|| {
                EstuaryError::Configuration(
                    "store_backend is postgresql but the [postgresql] section is missing"
                        .to_string(),
                )
            })?;

            let client = Arc::new(PostgreSQLClient::new(pg_config.clone())?);
            tracing::info!(database = %client.connection_string_safe(), "Creating PostgreSQL stores");
            client.test_connection().await?;

            let adapter = Arc::new(PostgreSQLAdapter::new_with_arc(client));
            Ok(Stores {
                documents: adapter.clone() as Arc<dyn DocumentStore>,
                concepts: adapter as Arc<dyn ConceptStore>,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_backend_by_default() {
        let stores = create_stores(&EstuaryConfig::default()).await.unwrap();
        assert_eq!(stores.documents.backend_name(), "memory");
        assert_eq!(stores.concepts.mapping_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_postgresql_backend_requires_section() {
        let mut config = EstuaryConfig::default();
        config.engine.store_backend = StoreBackend::PostgreSQL;
        let err = create_stores(&config).await.err().unwrap();
        assert!(matches!(err, EstuaryError::Configuration(_)));
    }
}

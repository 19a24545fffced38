//! In-memory mapping repository

use super::MappingRepository;
use crate::domain::mapping::{FieldMapping, MappingSet, RawFieldMapping};
use crate::domain::{EstuaryError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Approved mapping sets held in memory
#[derive(Debug, Default)]
pub struct InMemoryMappingRepository {
    sets: RwLock<HashMap<String, MappingSet>>,
}

impl InMemoryMappingRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores already-validated mappings under a reference
    pub async fn insert(&self, reference: impl Into<String>, mappings: Vec<FieldMapping>) {
        let reference = reference.into();
        self.sets.write().await.insert(
            reference.clone(),
            MappingSet {
                reference,
                mappings,
            },
        );
    }

    /// Approves a raw list and stores it
    ///
    /// # Errors
    ///
    /// [`EstuaryError::Mapping`] when the list fails approval.
    pub async fn insert_raw(&self, reference: impl Into<String>, raw: &[RawFieldMapping]) -> Result<()> {
        let reference = reference.into();
        let set = MappingSet::approve(reference.clone(), raw).map_err(EstuaryError::Mapping)?;
        self.sets.write().await.insert(reference, set);
        Ok(())
    }
}

#[async_trait]
impl MappingRepository for InMemoryMappingRepository {
    async fn resolve(&self, reference: &str) -> Result<MappingSet> {
        let sets = self.sets.read().await;
        let set = sets
            .get(reference.trim())
            .ok_or_else(|| EstuaryError::Mapping(format!("mapping list '{reference}' not found")))?;
        if set.is_empty() {
            return Err(EstuaryError::Mapping(format!(
                "mapping list '{reference}' has no approved mappings"
            )));
        }
        Ok(set.clone())
    }
}

//! File-backed mapping repository
//!
//! `<directory>/<mapping_ref>.toml`:
//!
//! ```toml
//! [[mappings]]
//! source_field = "first_name"
//! target_field = "Patient.name[0].family"
//! transform_kind = "CONCAT"
//! transform_params = { fields = ["first_name", "last_name"], separator = " " }
//! ```
//!
//! or `<directory>/<mapping_ref>.json`, either a bare array of mappings or an
//! object with a `mappings` array.

use super::{validate_reference, MappingRepository};
use crate::domain::mapping::{MappingSet, RawFieldMapping};
use crate::domain::{EstuaryError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize)]
struct MappingFile {
    #[serde(default)]
    mappings: Vec<RawFieldMapping>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JsonMappingFile {
    List(Vec<RawFieldMapping>),
    Wrapped(MappingFile),
}

/// Mapping lists stored as TOML or JSON files in one directory
#[derive(Debug, Clone)]
pub struct FileMappingRepository {
    directory: PathBuf,
}

impl FileMappingRepository {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    /// Repository root
    pub fn directory(&self) -> &Path {
        &self.directory
    }

    async fn read_raw(&self, reference: &str) -> Result<Vec<RawFieldMapping>> {
        let toml_path = self.directory.join(format!("{reference}.toml"));
        if let Some(content) = read_optional(&toml_path).await? {
            let parsed: MappingFile = toml::from_str(&content).map_err(|e| {
                EstuaryError::Mapping(format!("{}: {e}", toml_path.display()))
            })?;
            return Ok(parsed.mappings);
        }

        let json_path = self.directory.join(format!("{reference}.json"));
        if let Some(content) = read_optional(&json_path).await? {
            let parsed: JsonMappingFile = serde_json::from_str(&content).map_err(|e| {
                EstuaryError::Mapping(format!("{}: {e}", json_path.display()))
            })?;
            return Ok(match parsed {
                JsonMappingFile::List(mappings) => mappings,
                JsonMappingFile::Wrapped(file) => file.mappings,
            });
        }

        Err(EstuaryError::Mapping(format!(
            "mapping list '{reference}' not found in {} (expected {reference}.toml or {reference}.json)",
            self.directory.display()
        )))
    }
}

async fn read_optional(path: &Path) -> Result<Option<String>> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(EstuaryError::Mapping(format!(
            "cannot read {}: {e}",
            path.display()
        ))),
    }
}

#[async_trait]
impl MappingRepository for FileMappingRepository {
    async fn resolve(&self, reference: &str) -> Result<MappingSet> {
        let reference = validate_reference(reference).map_err(EstuaryError::Mapping)?;
        let raw = self.read_raw(reference).await?;
        let set = MappingSet::approve(reference, &raw)
            .map_err(|e| EstuaryError::Mapping(format!("mapping list '{reference}': {e}")))?;

        tracing::debug!(
            mapping_ref = %reference,
            mappings = set.len(),
            "Resolved mapping list"
        );
        Ok(set)
    }
}

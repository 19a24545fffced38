//! Canonical resource domain model
//!
//! A [`Resource`] is the nested clinical record produced by the transformation
//! engine. Its body is an ordered JSON tree (`serde_json` is built with
//! `preserve_order`), where `Null` doubles as the list placeholder node.

use super::ids::ResourceId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Supported canonical resource types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ResourceType {
    /// Demographics
    Patient,
    /// Measurements, vitals, lab results
    Observation,
    /// Visits
    Encounter,
    /// Diagnoses and problems
    Condition,
    /// Procedures performed
    Procedure,
    /// Medication use
    MedicationStatement,
}

impl ResourceType {
    /// All supported types, in a stable order
    pub const ALL: [ResourceType; 6] = [
        ResourceType::Patient,
        ResourceType::Observation,
        ResourceType::Encounter,
        ResourceType::Condition,
        ResourceType::Procedure,
        ResourceType::MedicationStatement,
    ];

    /// Returns the canonical type name (e.g. `"Patient"`)
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Patient => "Patient",
            ResourceType::Observation => "Observation",
            ResourceType::Encounter => "Encounter",
            ResourceType::Condition => "Condition",
            ResourceType::Procedure => "Procedure",
            ResourceType::MedicationStatement => "MedicationStatement",
        }
    }

    /// Name of the canonical collection for this type
    pub fn canonical_collection(&self) -> String {
        format!("canonical_{}", self.as_str().to_ascii_lowercase())
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceType::ALL
            .iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .copied()
            .ok_or_else(|| {
                format!(
                    "Unknown resource type '{s}'. Must be one of: {}",
                    ResourceType::ALL
                        .iter()
                        .map(|t| t.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                )
            })
    }
}

/// Canonical nested resource
///
/// The body always carries `resourceType`. Before persistence the identity
/// resolver stamps a non-empty `id` and `meta.lastUpdated`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Type discriminator
    pub resource_type: ResourceType,

    /// Ordered tree body
    pub body: Value,
}

impl Resource {
    /// Creates the empty template for a type: `{"resourceType": "<type>"}`
    pub fn template(resource_type: ResourceType) -> Self {
        let mut body = Map::new();
        body.insert(
            "resourceType".to_string(),
            Value::String(resource_type.as_str().to_string()),
        );
        Self {
            resource_type,
            body: Value::Object(body),
        }
    }

    /// Wraps an existing body, checking its `resourceType` discriminator
    pub fn from_body(body: Value) -> Result<Self, String> {
        let type_name = body
            .get("resourceType")
            .and_then(Value::as_str)
            .ok_or("resource body has no resourceType")?;
        let resource_type = ResourceType::from_str(type_name)?;
        Ok(Self {
            resource_type,
            body,
        })
    }

    /// The resource id, if assigned and non-empty
    pub fn id(&self) -> Option<&str> {
        self.body
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
    }

    /// The `meta.lastUpdated` timestamp, if present and parseable
    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.body
            .get("meta")
            .and_then(|meta| meta.get("lastUpdated"))
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Stamps the identity and last-updated timestamp
    pub fn stamp(&mut self, id: &ResourceId, last_updated: DateTime<Utc>) {
        if !self.body.is_object() {
            self.body = Value::Object(Map::new());
        }
        if let Value::Object(map) = &mut self.body {
            map.insert("id".to_string(), Value::String(id.to_string()));
            let meta = map
                .entry("meta".to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !meta.is_object() {
                *meta = Value::Object(Map::new());
            }
            if let Value::Object(meta) = meta {
                meta.insert(
                    "lastUpdated".to_string(),
                    Value::String(last_updated.to_rfc3339()),
                );
            }
        }
    }

    /// True when the resource satisfies the pre-persistence invariant
    pub fn is_persistable(&self) -> bool {
        self.id().is_some() && self.last_updated().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resource_type_from_str_case_insensitive() {
        assert_eq!(
            ResourceType::from_str("patient").unwrap(),
            ResourceType::Patient
        );
        assert_eq!(
            ResourceType::from_str(" Observation ").unwrap(),
            ResourceType::Observation
        );
        assert!(ResourceType::from_str("Spaceship").is_err());
    }

    #[test]
    fn test_canonical_collection_name() {
        assert_eq!(
            ResourceType::MedicationStatement.canonical_collection(),
            "canonical_medicationstatement"
        );
    }

    #[test]
    fn test_template_carries_discriminator() {
        let resource = Resource::template(ResourceType::Encounter);
        assert_eq!(resource.body, json!({"resourceType": "Encounter"}));
        assert!(resource.id().is_none());
        assert!(!resource.is_persistable());
    }

    #[test]
    fn test_stamp_sets_id_and_last_updated() {
        let mut resource = Resource::template(ResourceType::Patient);
        let id = ResourceId::new("00112233aabbccdd").unwrap();
        let now = Utc::now();
        resource.stamp(&id, now);

        assert_eq!(resource.id(), Some("00112233aabbccdd"));
        assert_eq!(
            resource.last_updated().map(|t| t.timestamp()),
            Some(now.timestamp())
        );
        assert!(resource.is_persistable());
    }

    #[test]
    fn test_stamp_replaces_non_object_meta() {
        let mut resource = Resource::from_body(json!({
            "resourceType": "Patient",
            "meta": "garbage"
        }))
        .unwrap();
        resource.stamp(&ResourceId::new("00112233aabbccdd").unwrap(), Utc::now());
        assert!(resource.body["meta"]["lastUpdated"].is_string());
    }

    #[test]
    fn test_from_body_requires_type() {
        assert!(Resource::from_body(json!({"id": "x"})).is_err());
        assert!(Resource::from_body(json!({"resourceType": "Unknown"})).is_err());
    }
}

//! Transformation engine
//!
//! Turns a [`FlatRecord`] into a nested [`Resource`] by applying an approved
//! mapping list in order. The engine is deterministic and shares only the
//! normalization cache between jobs.
//!
//! # Example
//!
//! ```
//! use estuary::core::transform::TransformEngine;
//! use estuary::domain::{FieldMapping, FlatRecord, ResourceType, Transform};
//!
//! let engine = TransformEngine::default();
//! let record = FlatRecord::new().with("first_name", "John").with("last_name", "Doe");
//! let mappings = vec![FieldMapping::new(
//!     "first_name",
//!     "Patient.name[0].family",
//!     Transform::Concat {
//!         fields: vec!["first_name".into(), "last_name".into()],
//!         separator: " ".into(),
//!     },
//! )];
//!
//! let outcome = engine.build_resource(&record, &mappings, ResourceType::Patient);
//! assert_eq!(outcome.resource.body["name"][0]["family"], "John Doe");
//! ```

pub mod functions;
pub mod normalize;
pub mod path;

use crate::domain::mapping::FieldMapping;
use crate::domain::record::FlatRecord;
use crate::domain::resource::{Resource, ResourceType};
use functions::Applied;
use normalize::{is_coded_path, NormalizationCache};
use path::{write_path, ResourcePath, Segment};
use serde_json::Value;
use std::sync::Arc;

/// A built resource plus what happened along the way
#[derive(Debug, Clone)]
pub struct TransformOutcome {
    /// The resource (always carries `resourceType`)
    pub resource: Resource,
    /// Number of mappings that wrote a value
    pub written: usize,
    /// Number of mappings that wrote nothing (absent, empty or unusable source)
    pub skipped: usize,
    /// Why present values were unusable, one message per skipped mapping
    pub issues: Vec<String>,
}

/// Mapping-driven record → resource transformer
#[derive(Debug, Clone, Default)]
pub struct TransformEngine {
    normalization: Arc<NormalizationCache>,
}

impl TransformEngine {
    /// Engine sharing an existing normalization cache
    pub fn new(normalization: Arc<NormalizationCache>) -> Self {
        Self { normalization }
    }

    /// The shared normalization cache
    pub fn normalization(&self) -> &Arc<NormalizationCache> {
        &self.normalization
    }

    /// Records an approved normalization decision for a target path
    pub fn approve_normalization(
        &self,
        target_path: &str,
        resource_type: ResourceType,
        raw: &str,
        normalized: &str,
    ) {
        let path = ResourcePath::parse(target_path, Some(resource_type.as_str()));
        self.normalization.approve(&path, raw, normalized);
    }

    /// Builds a resource; never fails
    ///
    /// Missing source fields are skipped. Unusable values (e.g. an
    /// unparseable date) are skipped too and reported in
    /// [`TransformOutcome::issues`]. A record with no mapped column still
    /// yields the bare `{"resourceType": ...}` template.
    pub fn build_resource(
        &self,
        record: &FlatRecord,
        mappings: &[FieldMapping],
        resource_type: ResourceType,
    ) -> TransformOutcome {
        let mut resource = Resource::template(resource_type);
        let mut written = 0;
        let mut skipped = 0;
        let mut issues = Vec::new();

        for mapping in mappings {
            let path = ResourcePath::parse(&mapping.target_field, Some(resource_type.as_str()));
            if matches!(path.segments().first(), Some(Segment::Key(key)) if key == "resourceType") {
                skipped += 1;
                continue;
            }

            let value = match functions::apply(mapping, record) {
                Applied::Value(value) => value,
                Applied::Skip => {
                    skipped += 1;
                    continue;
                }
                Applied::Invalid(reason) => {
                    skipped += 1;
                    issues.push(format!("{} -> {}: {reason}", mapping.source_field, path));
                    continue;
                }
            };

            let value = self.normalize(&path, value);

            match write_path(&mut resource.body, &path, value) {
                Ok(()) => written += 1,
                Err(e) => {
                    skipped += 1;
                    issues.push(format!("{} -> {}: {e}", mapping.source_field, mapping.target_field));
                }
            }
        }

        TransformOutcome {
            resource,
            written,
            skipped,
            issues,
        }
    }

    fn normalize(&self, path: &ResourcePath, value: Value) -> Value {
        if !is_coded_path(path) {
            return value;
        }
        let Some(raw) = crate::domain::record::scalar_text(&value) else {
            return value;
        };
        match self.normalization.lookup(path, &raw) {
            Some(normalized) => Value::String(normalized),
            None => value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::mapping::{CustomFunction, Transform};
    use proptest::prelude::*;
    use serde_json::json;

    fn patient_mappings() -> Vec<FieldMapping> {
        vec![
            FieldMapping::new(
                "first_name",
                "Patient.name[0].family",
                Transform::Concat {
                    fields: vec!["first_name".into(), "last_name".into()],
                    separator: " ".into(),
                },
            ),
            FieldMapping::new("first_name", "name[0].given[0]", Transform::Trim),
            FieldMapping::new("mrn", "identifier[0].value", Transform::Direct),
            FieldMapping::new("dob", "birthDate", Transform::FormatDate { input_format: None }),
            FieldMapping::new("sex", "gender", Transform::Custom(CustomFunction::GenderCode)),
        ]
    }

    #[test]
    fn test_concat_into_family_name() {
        let engine = TransformEngine::default();
        let record = FlatRecord::new().with("first_name", "John").with("last_name", "Doe");

        let resource = engine
            .build_resource(&record, &patient_mappings(), ResourceType::Patient)
            .resource;

        assert_eq!(resource.body["name"][0]["family"], json!("John Doe"));
        assert_eq!(resource.body["resourceType"], json!("Patient"));
    }

    #[test]
    fn test_full_patient_shape() {
        let engine = TransformEngine::default();
        let record = FlatRecord::new()
            .with("MRN", "12345")
            .with("first_name", " John ")
            .with("last_name", "Doe")
            .with("dob", "1980-03-14T08:00:00Z")
            .with("sex", "M");

        let outcome = engine.build_resource(&record, &patient_mappings(), ResourceType::Patient);
        assert_eq!(outcome.written, 5);
        assert!(outcome.issues.is_empty());

        assert_eq!(
            outcome.resource.body,
            json!({
                "resourceType": "Patient",
                "name": [{"family": "John Doe", "given": ["John"]}],
                "identifier": [{"value": "12345"}],
                "birthDate": "1980-03-14",
                "gender": "male"
            })
        );
    }

    #[test]
    fn test_missing_fields_are_skipped() {
        let engine = TransformEngine::default();
        let record = FlatRecord::new().with("mrn", "1");
        let outcome = engine.build_resource(&record, &patient_mappings(), ResourceType::Patient);
        assert_eq!(outcome.written, 1);
        assert!(outcome.issues.is_empty());
    }

    #[test]
    fn test_unparseable_date_is_skipped_and_reported() {
        let engine = TransformEngine::default();
        let record = FlatRecord::new().with("mrn", "1").with("dob", "not a date");
        let outcome = engine.build_resource(&record, &patient_mappings(), ResourceType::Patient);

        assert_eq!(outcome.resource.body["identifier"][0]["value"], json!("1"));
        assert!(outcome.resource.body.get("birthDate").is_none());
        assert_eq!(outcome.written, 1);
        assert_eq!(outcome.skipped, 4);
        assert_eq!(outcome.issues.len(), 1);
        assert!(outcome.issues[0].contains("not a date"));
    }

    #[test]
    fn test_no_mapped_columns_yields_template() {
        let engine = TransformEngine::default();
        let outcome = engine.build_resource(
            &FlatRecord::new().with("unrelated", "x"),
            &patient_mappings(),
            ResourceType::Patient,
        );

        assert_eq!(outcome.resource.body, json!({"resourceType": "Patient"}));
        assert_eq!(outcome.written, 0);
        assert_eq!(outcome.skipped, 5);
        assert!(outcome.issues.is_empty());
    }

    #[test]
    fn test_discriminator_is_not_overwritten() {
        let engine = TransformEngine::default();
        let mappings = vec![FieldMapping::new("kind", "resourceType", Transform::Direct)];
        let outcome = engine.build_resource(
            &FlatRecord::new().with("kind", "Observation"),
            &mappings,
            ResourceType::Patient,
        );
        assert_eq!(outcome.resource.body["resourceType"], json!("Patient"));
    }

    #[test]
    fn test_normalization_replayed_on_coded_paths_only() {
        let engine = TransformEngine::default();
        engine.approve_normalization("Observation.status", ResourceType::Observation, "FIN", "final");
        engine.approve_normalization("Observation.note", ResourceType::Observation, "FIN", "final");

        let mappings = vec![
            FieldMapping::new("st", "status", Transform::Direct),
            FieldMapping::new("st", "note", Transform::Direct),
        ];
        let outcome = engine.build_resource(
            &FlatRecord::new().with("st", "FIN"),
            &mappings,
            ResourceType::Observation,
        );

        assert_eq!(outcome.resource.body["status"], json!("final"));
        assert_eq!(outcome.resource.body["note"], json!("FIN"));
    }

    #[test]
    fn test_mapping_order_last_write_wins() {
        let engine = TransformEngine::default();
        let mappings = vec![
            FieldMapping::new("a", "code.text", Transform::Direct),
            FieldMapping::new("b", "code.text", Transform::Direct),
        ];
        let outcome = engine.build_resource(
            &FlatRecord::new().with("a", "first").with("b", "second"),
            &mappings,
            ResourceType::Observation,
        );
        assert_eq!(outcome.resource.body["code"]["text"], json!("second"));
    }

    fn transform_strategy() -> impl Strategy<Value = Transform> {
        prop_oneof![
            Just(Transform::Direct),
            Just(Transform::Trim),
            Just(Transform::Upper),
            Just(Transform::Lower),
            Just(Transform::FormatDate { input_format: None }),
            (".{0,3}", 0usize..4).prop_map(|(separator, index)| Transform::Split {
                separator: if separator.is_empty() { " ".to_string() } else { separator },
                index
            }),
            proptest::collection::vec("[a-c]", 0..3).prop_map(|fields| Transform::Concat {
                fields,
                separator: "-".to_string()
            }),
            Just(Transform::Custom(CustomFunction::StripNonDigits)),
            Just(Transform::Custom(CustomFunction::GenderCode)),
        ]
    }

    proptest! {
        #[test]
        fn prop_build_resource_is_total(
            columns in proptest::collection::btree_map("[a-c]", ".{0,12}", 0..4),
            targets in proptest::collection::vec(("[a-c]", "[a-zA-Z\\[\\]0-9.]{0,16}", transform_strategy()), 0..6),
        ) {
            let record: FlatRecord = columns
                .into_iter()
                .map(|(k, v)| (k, Value::String(v)))
                .collect();
            let mappings: Vec<FieldMapping> = targets
                .into_iter()
                .map(|(source, target, transform)| FieldMapping::new(source, target, transform))
                .collect();

            let engine = TransformEngine::default();
            let outcome = engine.build_resource(&record, &mappings, ResourceType::Observation);

            prop_assert_eq!(&outcome.resource.body["resourceType"], &json!("Observation"));
            prop_assert_eq!(outcome.written + outcome.skipped, mappings.len());
            prop_assert!(outcome.issues.len() <= outcome.skipped);
        }
    }
}

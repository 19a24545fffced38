//! Identity resolution
//!
//! Every resource gets a stable id derived from its identifying fields, so
//! re-ingesting the same logical entity converges on the same canonical row.
//! Analytic person and visit ids are derived the same way, as 48-bit
//! integers.

pub mod hashing;

use crate::core::transform::path::read_str_path;
use crate::domain::ids::ResourceId;
use crate::domain::record::scalar_text;
use crate::domain::resource::{Resource, ResourceType};
use chrono::{DateTime, Utc};
use hashing::{canonical_hash, hash_key_parts, normalize_key_part};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::RwLock;

/// Hex characters used for analytic integer ids (48 bits)
pub const ANALYTIC_ID_HEX_LEN: usize = 12;

const ANALYTIC_ID_MASK: u64 = (1 << (ANALYTIC_ID_HEX_LEN * 4)) - 1;

/// Identifying field paths per resource type, in key order
pub fn identity_fields(resource_type: ResourceType) -> &'static [&'static str] {
    match resource_type {
        ResourceType::Patient => &[
            "identifier[0].value",
            "name[0].family",
            "name[0].given[0]",
            "birthDate",
        ],
        ResourceType::Observation => &[
            "code.coding[0].code",
            "subject.reference",
            "effectiveDateTime",
        ],
        ResourceType::Encounter => &["identifier[0].value", "subject.reference", "period.start"],
        ResourceType::Condition => &["code.coding[0].code", "subject.reference", "onsetDateTime"],
        ResourceType::Procedure => &[
            "code.coding[0].code",
            "subject.reference",
            "performedDateTime",
        ],
        ResourceType::MedicationStatement => &[
            "medicationCodeableConcept.coding[0].code",
            "subject.reference",
            "effectiveDateTime",
        ],
    }
}

/// How an identity was derived
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityBasis {
    /// From the type's identifying fields; `present` of them had values
    Key { present: usize },
    /// No identifying field present: hash of the whole record minus id/meta
    FullRecord,
}

/// A resolved identity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    pub id: ResourceId,
    pub basis: IdentityBasis,
}

/// Which analytic id space a key belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnalyticIdKind {
    Person,
    Visit,
}

impl AnalyticIdKind {
    fn namespace(&self) -> &'static str {
        match self {
            AnalyticIdKind::Person => "person",
            AnalyticIdKind::Visit => "visit",
        }
    }
}

/// Stateless hashing plus a concurrent cache of analytic ids
#[derive(Debug, Default)]
pub struct IdentityResolver {
    analytic_ids: RwLock<HashMap<(AnalyticIdKind, String), i64>>,
}

impl IdentityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves a resource's identity; total
    pub fn resolve(&self, resource: &Resource) -> ResolvedIdentity {
        let parts: Vec<String> = identity_fields(resource.resource_type)
            .iter()
            .map(|path| {
                read_str_path(&resource.body, path)
                    .and_then(scalar_text)
                    .unwrap_or_default()
            })
            .collect();
        let present = parts.iter().filter(|part| !part.trim().is_empty()).count();

        let (digest, basis) = if present > 0 {
            (hash_key_parts(&parts), IdentityBasis::Key { present })
        } else {
            let mut stripped = resource.body.clone();
            if let Value::Object(map) = &mut stripped {
                map.remove("id");
                map.remove("meta");
            }
            (canonical_hash(&stripped), IdentityBasis::FullRecord)
        };

        ResolvedIdentity {
            id: ResourceId::from_digest(&digest),
            basis,
        }
    }

    /// Stamps `id` and `meta.lastUpdated`
    ///
    /// A valid source-provided `meta.lastUpdated` is kept; otherwise `now` is
    /// used.
    pub fn assign_identity(&self, resource: &mut Resource, now: DateTime<Utc>) -> ResolvedIdentity {
        let identity = self.resolve(resource);
        let last_updated = resource.last_updated().unwrap_or(now);
        resource.stamp(&identity.id, last_updated);

        if identity.basis == IdentityBasis::FullRecord {
            tracing::debug!(
                resource_type = %resource.resource_type,
                id = %identity.id,
                "No identifying fields present; identity derived from full record"
            );
        }
        identity
    }

    /// 48-bit analytic id for a composite key; cached
    pub fn analytic_id(&self, kind: AnalyticIdKind, key: &str) -> i64 {
        let normalized = normalize_key_part(key);
        let cache_key = (kind, normalized);

        if let Some(id) = self
            .analytic_ids
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&cache_key)
        {
            return *id;
        }

        let digest = hash_key_parts(&[kind.namespace(), cache_key.1.as_str()]);
        let id = analytic_id_from_digest(&digest);

        self.analytic_ids
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(cache_key, id);
        id
    }

    /// Person id for a patient key or a subject reference
    ///
    /// `Patient/123` and `123` map to the same person.
    pub fn person_id(&self, reference: &str) -> i64 {
        let key = reference.trim();
        let key = key.strip_prefix("Patient/").unwrap_or(key);
        self.analytic_id(AnalyticIdKind::Person, key)
    }

    /// Visit id for an encounter key or reference
    pub fn visit_id(&self, reference: &str) -> i64 {
        let key = reference.trim();
        let key = key.strip_prefix("Encounter/").unwrap_or(key);
        self.analytic_id(AnalyticIdKind::Visit, key)
    }

    /// Number of cached analytic ids
    pub fn cache_len(&self) -> usize {
        self.analytic_ids
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }
}

/// First 48 bits of a hex SHA-256 digest
fn analytic_id_from_digest(digest: &str) -> i64 {
    let prefix = u64::from_str_radix(&digest[..ANALYTIC_ID_HEX_LEN], 16)
        .expect("sha-256 digests are hex encoded");
    // 48 bits always fit a positive i64
    (prefix & ANALYTIC_ID_MASK) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn patient(body: Value) -> Resource {
        Resource::from_body(body).unwrap()
    }

    #[test]
    fn test_same_key_same_identity() {
        let resolver = IdentityResolver::new();
        let a = patient(json!({
            "resourceType": "Patient",
            "identifier": [{"value": "MRN-1"}],
            "name": [{"family": "Doe", "given": ["John"]}],
            "birthDate": "1980-03-14",
            "gender": "male"
        }));
        let b = patient(json!({
            "resourceType": "Patient",
            "identifier": [{"value": " mrn-1 "}],
            "name": [{"family": "DOE", "given": ["john"]}],
            "birthDate": "1980-03-14",
            "gender": "unknown"
        }));

        let ia = resolver.resolve(&a);
        assert_eq!(ia, resolver.resolve(&b));
        assert_eq!(ia.basis, IdentityBasis::Key { present: 4 });
        assert_eq!(ia.id.as_str().len(), 16);
    }

    #[test]
    fn test_different_key_different_identity() {
        let resolver = IdentityResolver::new();
        let a = patient(json!({"resourceType": "Patient", "identifier": [{"value": "1"}]}));
        let b = patient(json!({"resourceType": "Patient", "identifier": [{"value": "2"}]}));
        assert_ne!(resolver.resolve(&a).id, resolver.resolve(&b).id);
    }

    #[test]
    fn test_full_record_fallback_ignores_id_and_meta() {
        let resolver = IdentityResolver::new();
        let a = patient(json!({"resourceType": "Patient", "gender": "female"}));
        let b = patient(json!({
            "resourceType": "Patient",
            "gender": "female",
            "id": "whatever",
            "meta": {"lastUpdated": "2024-01-01T00:00:00Z"}
        }));
        let ia = resolver.resolve(&a);
        assert_eq!(ia.basis, IdentityBasis::FullRecord);
        assert_eq!(ia, resolver.resolve(&b));
    }

    #[test]
    fn test_assign_identity_keeps_valid_last_updated() {
        let resolver = IdentityResolver::new();
        let mut resource = patient(json!({
            "resourceType": "Patient",
            "identifier": [{"value": "1"}],
            "meta": {"lastUpdated": "2020-05-01T12:00:00Z"}
        }));
        resolver.assign_identity(&mut resource, Utc::now());

        assert!(resource.is_persistable());
        assert_eq!(
            resource.body["meta"]["lastUpdated"],
            json!("2020-05-01T12:00:00+00:00")
        );
    }

    #[test]
    fn test_assign_identity_replaces_invalid_last_updated() {
        let resolver = IdentityResolver::new();
        let mut resource = patient(json!({
            "resourceType": "Patient",
            "meta": {"lastUpdated": "yesterday"}
        }));
        let now = Utc::now();
        resolver.assign_identity(&mut resource, now);
        assert_eq!(resource.last_updated().map(|t| t.timestamp()), Some(now.timestamp()));
    }

    #[test]
    fn test_person_id_is_positive_48_bit_and_cached() {
        let resolver = IdentityResolver::new();
        let id = resolver.person_id("Patient/12345");
        assert!(id >= 0);
        assert!(id < (1i64 << 48));
        assert_eq!(id, resolver.person_id("12345"));
        assert_eq!(resolver.cache_len(), 1);
    }

    #[test]
    fn test_analytic_id_takes_digest_prefix() {
        assert_eq!(analytic_id_from_digest(&"f".repeat(64)), (1i64 << 48) - 1);
        assert_eq!(analytic_id_from_digest(&format!("00000000002a{}", "9".repeat(52))), 42);

        let resolver = IdentityResolver::new();
        let digest = hash_key_parts(&[AnalyticIdKind::Person.namespace(), "12345"]);
        assert_eq!(
            resolver.analytic_id(AnalyticIdKind::Person, "12345"),
            i64::from_str_radix(&digest[..ANALYTIC_ID_HEX_LEN], 16).unwrap()
        );
    }

    #[test]
    fn test_person_and_visit_spaces_differ() {
        let resolver = IdentityResolver::new();
        assert_ne!(resolver.person_id("42"), resolver.visit_id("42"));
        assert_eq!(resolver.cache_len(), 2);
    }

    #[test]
    fn test_observation_identity_fields() {
        let resolver = IdentityResolver::new();
        let obs = |value: f64| {
            Resource::from_body(json!({
                "resourceType": "Observation",
                "code": {"coding": [{"code": "8480-6"}]},
                "subject": {"reference": "Patient/1"},
                "effectiveDateTime": "2024-01-01T10:00:00Z",
                "valueQuantity": {"value": value}
            }))
            .unwrap()
        };
        // A corrected value for the same measurement converges on one identity
        assert_eq!(resolver.resolve(&obs(120.0)).id, resolver.resolve(&obs(121.0)).id);
    }
}

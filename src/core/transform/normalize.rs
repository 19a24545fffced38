//! Coded-value normalization cache
//!
//! Enum-like target fields (genders, status codes, units) arrive in many
//! spellings. Approved normalization decisions are recorded per
//! (target path, raw value) and replayed on every later write to that path.

use super::path::ResourcePath;
use std::collections::HashMap;
use std::sync::RwLock;

/// Leaf-key fragments that mark a target path as coded
pub const CODED_KEYWORDS: [&str; 8] = [
    "code", "gender", "status", "system", "class", "category", "unit", "use",
];

/// True when the path's last key looks like a coded/enum field
pub fn is_coded_path(path: &ResourcePath) -> bool {
    path.leaf_key()
        .map(|leaf| {
            let leaf = leaf.to_ascii_lowercase();
            CODED_KEYWORDS.iter().any(|keyword| leaf.contains(keyword))
        })
        .unwrap_or(false)
}

/// Concurrent (path, raw) → normalized map
#[derive(Debug, Default)]
pub struct NormalizationCache {
    entries: RwLock<HashMap<(String, String), String>>,
}

impl NormalizationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an approved decision; later approvals for the same key win
    pub fn approve(&self, path: &ResourcePath, raw: &str, normalized: impl Into<String>) {
        let key = (path.to_string(), raw.trim().to_string());
        let normalized = normalized.into();
        tracing::debug!(path = %key.0, raw = %key.1, normalized = %normalized, "Normalization approved");
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key, normalized);
    }

    /// Replays a decision, if one was approved
    pub fn lookup(&self, path: &ResourcePath, raw: &str) -> Option<String> {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&(path.to_string(), raw.trim().to_string()))
            .cloned()
    }

    /// Number of recorded decisions
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("Patient.gender" => true)]
    #[test_case("code.coding[0].code" => true)]
    #[test_case("valueQuantity.unit" => true)]
    #[test_case("name[0].use" => true)]
    #[test_case("class.code" => true)]
    #[test_case("name[0].family" => false)]
    #[test_case("birthDate" => false)]
    #[test_case("code.coding[0].display" => false)]
    fn test_is_coded_path(path: &str) -> bool {
        is_coded_path(&ResourcePath::parse(path, Some("Patient")))
    }

    #[test]
    fn test_approve_and_replay_across_type_prefix() {
        let cache = NormalizationCache::new();
        cache.approve(&ResourcePath::parse("Patient.gender", Some("Patient")), " M ", "male");

        let path = ResourcePath::parse("gender", Some("Patient"));
        assert_eq!(cache.lookup(&path, "M"), Some("male".to_string()));
        assert_eq!(cache.lookup(&path, "F"), None);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_later_approval_wins() {
        let cache = NormalizationCache::new();
        let path = ResourcePath::parse("status", None);
        cache.approve(&path, "fin", "final");
        cache.approve(&path, "fin", "finished");
        assert_eq!(cache.lookup(&path, "fin"), Some("finished".to_string()));
    }
}

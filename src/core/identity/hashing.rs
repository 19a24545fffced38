//! Content hashing primitives
//!
//! SHA-256 over canonical (key-sorted, compact) JSON or over a `|`-joined
//! key tuple.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Hex SHA-256 of raw bytes (64 characters)
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Normalizes a key tuple value: trimmed and lower-cased
pub fn normalize_key_part(part: &str) -> String {
    part.trim().to_lowercase()
}

/// Hex SHA-256 of normalized key parts joined with `|`
pub fn hash_key_parts<S: AsRef<str>>(parts: &[S]) -> String {
    let joined = parts
        .iter()
        .map(|part| normalize_key_part(part.as_ref()))
        .collect::<Vec<_>>()
        .join("|");
    sha256_hex(joined.as_bytes())
}

/// Recursively sorts object keys so equal documents serialize identically
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<&String, Value> =
                map.iter().map(|(k, v)| (k, canonicalize(v))).collect();
            Value::Object(sorted.into_iter().map(|(k, v)| (k.clone(), v)).collect())
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        _ => value.clone(),
    }
}

/// Hex SHA-256 of the canonical serialization of `value`
pub fn canonical_hash(value: &Value) -> String {
    let canonical = canonicalize(value);
    // Serializing a Value cannot fail: keys are strings and numbers are finite
    let text = serde_json::to_string(&canonical).unwrap_or_default();
    sha256_hex(text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sha256_known_value() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_key_parts_normalized() {
        assert_eq!(
            hash_key_parts(&[" MRN-1 ", "DOE"]),
            hash_key_parts(&["mrn-1", "doe"])
        );
        assert_ne!(hash_key_parts(&["a", "bc"]), hash_key_parts(&["ab", "c"]));
    }

    #[test]
    fn test_canonical_hash_key_order_independent() {
        let a = json!({"a": 1, "b": {"y": 2, "x": [ {"q": 1, "p": 2} ]}});
        let b = json!({"b": {"x": [ {"p": 2, "q": 1} ], "y": 2}, "a": 1});
        assert_eq!(canonical_hash(&a), canonical_hash(&b));
    }

    #[test]
    fn test_canonical_hash_array_order_matters() {
        assert_ne!(canonical_hash(&json!([1, 2])), canonical_hash(&json!([2, 1])));
    }

    #[test]
    fn test_canonicalize_sorts_nested_keys() {
        let text = serde_json::to_string(&canonicalize(&json!({"z": {"b": 1, "a": 2}, "a": 0}))).unwrap();
        assert_eq!(text, r#"{"a":0,"z":{"a":2,"b":1}}"#);
    }
}

//! Flat source record
//!
//! One [`FlatRecord`] per source row: an ordered column → scalar mapping that
//! lives for a single pipeline iteration.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Ordered column → scalar mapping
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlatRecord {
    columns: Map<String, Value>,
}

impl FlatRecord {
    /// Creates an empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a column, keeping first-insertion order
    pub fn insert(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.columns.insert(column.into(), value.into());
    }

    /// Builder-style insert
    pub fn with(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(column, value);
        self
    }

    /// Exact column lookup
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }

    /// Exact lookup, then case-insensitive fallback
    pub fn lookup(&self, column: &str) -> Option<&Value> {
        self.columns.get(column).or_else(|| {
            self.columns
                .iter()
                .find(|(name, _)| name.eq_ignore_ascii_case(column))
                .map(|(_, value)| value)
        })
    }

    /// Looks up a column and renders it as text.
    ///
    /// Null and missing columns yield `None`; numbers and booleans are
    /// rendered with their JSON representation.
    pub fn text(&self, column: &str) -> Option<String> {
        self.lookup(column).and_then(scalar_text)
    }

    /// Number of columns
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// True when the record has no columns
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Iterates columns in source order
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.columns.iter()
    }

    /// The record as a JSON object (used for dead-letter payloads)
    pub fn to_value(&self) -> Value {
        Value::Object(self.columns.clone())
    }
}

impl From<Map<String, Value>> for FlatRecord {
    fn from(columns: Map<String, Value>) -> Self {
        Self { columns }
    }
}

impl FromIterator<(String, Value)> for FlatRecord {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            columns: iter.into_iter().collect(),
        }
    }
}

/// Renders a scalar JSON value as text; containers and null yield `None`
pub fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Flattens a nested JSON document into dotted/indexed columns.
///
/// `{"name": [{"family": "Doe"}]}` becomes `{"name[0].family": "Doe"}`.
/// Used by document-oriented source adapters.
pub fn flatten_document(document: &Value) -> FlatRecord {
    let mut record = FlatRecord::new();
    flatten_into(document, String::new(), &mut record);
    record
}

fn flatten_into(value: &Value, prefix: String, record: &mut FlatRecord) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                flatten_into(child, path, record);
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                flatten_into(child, format!("{prefix}[{index}]"), record);
            }
        }
        scalar => {
            if !prefix.is_empty() {
                record.insert(prefix, scalar.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup_case_insensitive_fallback() {
        let record = FlatRecord::new().with("First_Name", "John");
        assert_eq!(record.lookup("first_name"), Some(&json!("John")));
        assert_eq!(record.get("first_name"), None);
    }

    #[test]
    fn test_exact_match_wins_over_fallback() {
        let record = FlatRecord::new().with("MRN", "upper").with("mrn", "lower");
        assert_eq!(record.lookup("mrn"), Some(&json!("lower")));
    }

    #[test]
    fn test_text_renders_scalars() {
        let record = FlatRecord::new()
            .with("age", 42)
            .with("active", true)
            .with("note", Value::Null);
        assert_eq!(record.text("age"), Some("42".to_string()));
        assert_eq!(record.text("active"), Some("true".to_string()));
        assert_eq!(record.text("note"), None);
        assert_eq!(record.text("missing"), None);
    }

    #[test]
    fn test_columns_keep_source_order() {
        let record = FlatRecord::new().with("z", 1).with("a", 2).with("m", 3);
        let names: Vec<&str> = record.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(names, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_flatten_document() {
        let doc = json!({
            "id": "p1",
            "name": [{"family": "Doe", "given": ["John"]}],
            "active": true
        });
        let record = flatten_document(&doc);
        assert_eq!(record.get("id"), Some(&json!("p1")));
        assert_eq!(record.get("name[0].family"), Some(&json!("Doe")));
        assert_eq!(record.get("name[0].given[0]"), Some(&json!("John")));
        assert_eq!(record.get("active"), Some(&json!(true)));
    }
}

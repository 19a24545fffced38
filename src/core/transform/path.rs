//! Path-addressed reads and writes on resource trees
//!
//! Paths use dotted keys with bracketed list indices:
//! `name[0].given[1]`, `code.coding[0].code`. A numeric dotted segment
//! (`name.0.family`) is read as an index too.

use serde_json::{Map, Value};
use std::fmt;

/// Largest list index a write will grow a list to
pub const MAX_LIST_INDEX: usize = 1024;

/// One step of a path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// Parsed path
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResourcePath {
    segments: Vec<Segment>,
}

impl ResourcePath {
    /// Parses a path, dropping a leading segment equal to `resource_type`
    ///
    /// `Patient.name[0].family` and `name[0].family` parse identically for
    /// `resource_type = "Patient"`.
    pub fn parse(path: &str, resource_type: Option<&str>) -> Self {
        let mut segments: Vec<Segment> = path
            .split(['.', '[', ']'])
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(|token| {
                if token.bytes().all(|b| b.is_ascii_digit()) {
                    token
                        .parse()
                        .map(Segment::Index)
                        .unwrap_or_else(|_| Segment::Key(token.to_string()))
                } else {
                    Segment::Key(token.to_string())
                }
            })
            .collect();

        if let (Some(type_name), Some(Segment::Key(first))) = (resource_type, segments.first()) {
            if segments.len() > 1 && first.eq_ignore_ascii_case(type_name) {
                segments.remove(0);
            }
        }

        Self { segments }
    }

    /// The parsed segments
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// True when nothing is addressed
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Last key segment, if any
    pub fn leaf_key(&self) -> Option<&str> {
        self.segments.iter().rev().find_map(|segment| match segment {
            Segment::Key(key) => Some(key.as_str()),
            Segment::Index(_) => None,
        })
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (position, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Key(key) if position == 0 => write!(f, "{key}")?,
                Segment::Key(key) => write!(f, ".{key}")?,
                Segment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

/// Why a write was skipped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathWriteError {
    /// The path addresses nothing
    Empty,
    /// An index exceeds [`MAX_LIST_INDEX`]
    IndexTooLarge(usize),
}

impl fmt::Display for PathWriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathWriteError::Empty => f.write_str("path is empty"),
            PathWriteError::IndexTooLarge(index) => {
                write!(f, "list index {index} exceeds maximum {MAX_LIST_INDEX}")
            }
        }
    }
}

/// Writes `value` at `path`, creating intermediate nodes.
///
/// Intermediate nodes become lists when the next segment is an index and
/// maps otherwise; lists grow with `Null` placeholders. A node whose shape
/// conflicts with the path (e.g. indexing into a string) is replaced.
pub fn write_path(root: &mut Value, path: &ResourcePath, value: Value) -> Result<(), PathWriteError> {
    if path.is_empty() {
        return Err(PathWriteError::Empty);
    }
    if let Some(index) = path.segments.iter().find_map(|segment| match segment {
        Segment::Index(index) if *index > MAX_LIST_INDEX => Some(*index),
        _ => None,
    }) {
        return Err(PathWriteError::IndexTooLarge(index));
    }

    write_node(root, &path.segments, value);
    Ok(())
}

fn write_node(node: &mut Value, segments: &[Segment], value: Value) {
    let Some((first, rest)) = segments.split_first() else {
        *node = value;
        return;
    };

    match first {
        Segment::Key(key) => {
            if !node.is_object() {
                *node = Value::Object(Map::new());
            }
            if let Value::Object(map) = node {
                write_node(map.entry(key.clone()).or_insert(Value::Null), rest, value);
            }
        }
        Segment::Index(index) => {
            if !node.is_array() {
                *node = Value::Array(Vec::new());
            }
            if let Value::Array(items) = node {
                if items.len() <= *index {
                    items.resize(*index + 1, Value::Null);
                }
                write_node(&mut items[*index], rest, value);
            }
        }
    }
}

/// Reads the value at `path`; `Null` placeholders read as absent
pub fn read_path<'a>(root: &'a Value, path: &ResourcePath) -> Option<&'a Value> {
    let mut node = root;
    for segment in &path.segments {
        node = match (segment, node) {
            (Segment::Key(key), Value::Object(map)) => map.get(key)?,
            (Segment::Index(index), Value::Array(items)) => items.get(*index)?,
            _ => return None,
        };
    }
    if node.is_null() {
        None
    } else {
        Some(node)
    }
}

/// Convenience: parse and read in one step
pub fn read_str_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let resource_type = root.get("resourceType").and_then(Value::as_str);
    read_path(root, &ResourcePath::parse(path, resource_type))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn write(root: &mut Value, path: &str, value: Value) {
        write_path(root, &ResourcePath::parse(path, Some("Patient")), value).unwrap();
    }

    #[test]
    fn test_parse_drops_leading_type() {
        let a = ResourcePath::parse("Patient.name[0].family", Some("Patient"));
        let b = ResourcePath::parse("name[0].family", Some("Patient"));
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "name[0].family");
    }

    #[test]
    fn test_parse_keeps_type_named_single_segment() {
        let path = ResourcePath::parse("Patient", Some("Patient"));
        assert_eq!(path.segments(), &[Segment::Key("Patient".to_string())]);
    }

    #[test]
    fn test_parse_numeric_dotted_segment_is_index() {
        let path = ResourcePath::parse("name.0.family", None);
        assert_eq!(path.segments()[1], Segment::Index(0));
    }

    #[test]
    fn test_write_creates_lists_with_placeholders() {
        let mut root = json!({"resourceType": "Patient"});
        write(&mut root, "name[2].given[1]", json!("Ann"));

        assert_eq!(
            root,
            json!({
                "resourceType": "Patient",
                "name": [null, null, {"given": [null, "Ann"]}]
            })
        );
    }

    #[test]
    fn test_write_replaces_conflicting_scalar() {
        let mut root = json!({"name": "flat"});
        write(&mut root, "name[0].family", json!("Doe"));
        assert_eq!(root, json!({"name": [{"family": "Doe"}]}));
    }

    #[test]
    fn test_write_preserves_siblings() {
        let mut root = json!({});
        write(&mut root, "name[0].family", json!("Doe"));
        write(&mut root, "name[0].given[0]", json!("John"));
        assert_eq!(root, json!({"name": [{"family": "Doe", "given": ["John"]}]}));
    }

    #[test]
    fn test_write_rejects_empty_and_huge_index() {
        let mut root = json!({});
        assert_eq!(
            write_path(&mut root, &ResourcePath::parse("..", None), json!(1)),
            Err(PathWriteError::Empty)
        );
        assert_eq!(
            write_path(&mut root, &ResourcePath::parse("a[5000]", None), json!(1)),
            Err(PathWriteError::IndexTooLarge(5000))
        );
        assert_eq!(root, json!({}));
    }

    #[test]
    fn test_read_treats_placeholder_as_absent() {
        let root = json!({"name": [null, {"family": "Doe"}]});
        assert_eq!(read_str_path(&root, "name[0]"), None);
        assert_eq!(read_str_path(&root, "name[1].family"), Some(&json!("Doe")));
        assert_eq!(read_str_path(&root, "name[1].family.x"), None);
    }

    fn segment_strategy() -> impl Strategy<Value = String> {
        prop_oneof![
            "[a-z]{1,8}".prop_map(|key| format!(".{key}")),
            (0usize..6).prop_map(|index| format!("[{index}]")),
        ]
    }

    proptest! {
        #[test]
        fn prop_write_then_read_round_trips(
            first in "[a-z]{1,8}",
            rest in proptest::collection::vec(segment_strategy(), 0..6),
            value in "[ -~]{1,20}",
        ) {
            let path_text = format!("{first}{}", rest.concat());
            let path = ResourcePath::parse(&path_text, Some("Patient"));
            let mut root = json!({"resourceType": "Patient"});

            write_path(&mut root, &path, json!(value.clone())).unwrap();

            prop_assert_eq!(read_path(&root, &path), Some(&json!(value)));
        }
    }
}

//! Field mapping domain model
//!
//! Mapping lists arrive from the (external) mapping-suggestion workflow as
//! [`RawFieldMapping`]s with stringly-typed parameters. [`MappingSet::approve`]
//! validates them once into [`FieldMapping`]s whose [`Transform`] carries only
//! the fields each kind needs, so the transformation engine never has to
//! re-check parameters while applying them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Mapping as produced by the suggestion workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFieldMapping {
    /// Source column name
    pub source_field: String,

    /// Target path inside the resource (e.g. `Patient.name[0].family`)
    pub target_field: String,

    /// DIRECT, CONCAT, SPLIT, FORMAT_DATE, TRIM, UPPER, LOWER or CUSTOM
    #[serde(default = "default_transform_kind")]
    pub transform_kind: String,

    /// Kind-specific parameters
    #[serde(default)]
    pub transform_params: BTreeMap<String, Value>,

    /// Suggestion confidence in [0, 1]
    #[serde(default = "default_confidence")]
    pub confidence: f64,

    /// Whether a reviewer approved the mapping
    #[serde(default = "default_true")]
    pub approved: bool,
}

fn default_transform_kind() -> String {
    "DIRECT".to_string()
}

fn default_confidence() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

/// Built-in custom transform functions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CustomFunction {
    /// Keep only ASCII digits (phone numbers, MRNs)
    StripNonDigits,
    /// Map free-text sex/gender values onto `male`/`female`/`other`/`unknown`
    GenderCode,
    /// Substitute a constant when the source value is blank
    Default(String),
    /// Prepend a constant (e.g. `Patient/` for references)
    Prefix(String),
}

/// Validated transform, one variant per kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transform {
    /// Copy the value as-is
    Direct,
    /// Join several source fields, skipping empty ones
    Concat { fields: Vec<String>, separator: String },
    /// Take token `index` after splitting on `separator`
    Split { separator: String, index: usize },
    /// Truncate a date/time to `YYYY-MM-DD`
    FormatDate { input_format: Option<String> },
    /// Strip surrounding whitespace
    Trim,
    /// Upper-case
    Upper,
    /// Lower-case
    Lower,
    /// Named built-in function
    Custom(CustomFunction),
}

/// Approved, validated mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    /// Source column name
    pub source_field: String,

    /// Target path inside the resource
    pub target_field: String,

    /// Validated transform
    pub transform: Transform,

    /// Suggestion confidence in [0, 1]
    pub confidence: f64,
}

impl FieldMapping {
    /// Convenience constructor for a validated mapping
    pub fn new(
        source_field: impl Into<String>,
        target_field: impl Into<String>,
        transform: Transform,
    ) -> Self {
        Self {
            source_field: source_field.into(),
            target_field: target_field.into(),
            transform,
            confidence: 1.0,
        }
    }

    /// Validates a raw mapping
    ///
    /// # Errors
    ///
    /// Returns a description of the first problem found.
    pub fn from_raw(raw: &RawFieldMapping) -> Result<Self, String> {
        if raw.source_field.trim().is_empty() {
            return Err("source_field cannot be empty".to_string());
        }
        if raw.target_field.trim().is_empty() {
            return Err(format!(
                "target_field cannot be empty (source_field '{}')",
                raw.source_field
            ));
        }
        if !(0.0..=1.0).contains(&raw.confidence) {
            return Err(format!(
                "confidence must be within [0, 1], got {} for '{}'",
                raw.confidence, raw.source_field
            ));
        }

        let transform = parse_transform(raw)?;

        Ok(Self {
            source_field: raw.source_field.trim().to_string(),
            target_field: raw.target_field.trim().to_string(),
            transform,
            confidence: raw.confidence,
        })
    }
}

fn parse_transform(raw: &RawFieldMapping) -> Result<Transform, String> {
    let params = &raw.transform_params;
    let kind = raw.transform_kind.trim().to_ascii_uppercase().replace('-', "_");

    let transform = match kind.as_str() {
        "DIRECT" => Transform::Direct,
        "TRIM" => Transform::Trim,
        "UPPER" => Transform::Upper,
        "LOWER" => Transform::Lower,
        "CONCAT" => {
            let fields = match params.get("fields") {
                None => Vec::new(),
                Some(Value::Array(items)) => items
                    .iter()
                    .map(|item| {
                        item.as_str()
                            .map(|s| s.trim().to_string())
                            .ok_or_else(|| "CONCAT fields must be strings".to_string())
                    })
                    .collect::<Result<Vec<_>, _>>()?,
                Some(Value::String(list)) => list
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                Some(other) => {
                    return Err(format!(
                        "CONCAT fields must be a list or comma-separated string, got {other}"
                    ))
                }
            };
            Transform::Concat {
                fields,
                separator: string_param(params, "separator")?.unwrap_or_else(|| " ".to_string()),
            }
        }
        "SPLIT" => {
            let index = match params.get("index") {
                None => 0,
                Some(Value::Number(n)) => n
                    .as_u64()
                    .ok_or_else(|| format!("SPLIT index must be a non-negative integer, got {n}"))?
                    as usize,
                Some(Value::String(s)) => s
                    .trim()
                    .parse()
                    .map_err(|_| format!("SPLIT index must be a non-negative integer, got '{s}'"))?,
                Some(other) => return Err(format!("SPLIT index has invalid type: {other}")),
            };
            let separator =
                string_param(params, "separator")?.unwrap_or_else(|| " ".to_string());
            if separator.is_empty() {
                return Err("SPLIT separator cannot be empty".to_string());
            }
            Transform::Split { separator, index }
        }
        "FORMAT_DATE" => Transform::FormatDate {
            input_format: string_param(params, "input_format")?,
        },
        "CUSTOM" => {
            let name = string_param(params, "function")?
                .ok_or_else(|| "CUSTOM transform requires a 'function' parameter".to_string())?;
            let function = match name.as_str() {
                "strip_non_digits" => CustomFunction::StripNonDigits,
                "gender_code" => CustomFunction::GenderCode,
                "default" => CustomFunction::Default(
                    string_param(params, "value")?
                        .ok_or_else(|| "CUSTOM 'default' requires a 'value'".to_string())?,
                ),
                "prefix" => CustomFunction::Prefix(
                    string_param(params, "value")?
                        .ok_or_else(|| "CUSTOM 'prefix' requires a 'value'".to_string())?,
                ),
                other => return Err(format!("Unknown CUSTOM function '{other}'")),
            };
            Transform::Custom(function)
        }
        other => return Err(format!("Unknown transform kind '{other}'")),
    };

    Ok(transform)
}

fn string_param(params: &BTreeMap<String, Value>, key: &str) -> Result<Option<String>, String> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(format!("parameter '{key}' must be a string, got {other}")),
    }
}

/// An approved, ordered mapping list
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MappingSet {
    /// Reference the list was resolved from
    pub reference: String,

    /// Mappings in application order
    pub mappings: Vec<FieldMapping>,
}

impl MappingSet {
    /// Validates a raw list into an approved set.
    ///
    /// Unapproved mappings are dropped. Any invalid approved mapping fails the
    /// whole set.
    ///
    /// # Errors
    ///
    /// Returns every validation problem, one per line.
    pub fn approve(reference: impl Into<String>, raw: &[RawFieldMapping]) -> Result<Self, String> {
        let reference = reference.into();
        let mut mappings = Vec::with_capacity(raw.len());
        let mut problems = Vec::new();

        for (position, candidate) in raw.iter().enumerate() {
            if !candidate.approved {
                tracing::debug!(
                    mapping_ref = %reference,
                    source_field = %candidate.source_field,
                    "Skipping unapproved mapping"
                );
                continue;
            }
            match FieldMapping::from_raw(candidate) {
                Ok(mapping) => mappings.push(mapping),
                Err(e) => problems.push(format!("mapping #{position}: {e}")),
            }
        }

        if !problems.is_empty() {
            return Err(problems.join("\n"));
        }

        if mappings.is_empty() {
            return Err(format!("mapping list '{reference}' has no approved mappings"));
        }

        Ok(Self {
            reference,
            mappings,
        })
    }

    /// Number of mappings
    pub fn len(&self) -> usize {
        self.mappings.len()
    }

    /// True when the set is empty
    pub fn is_empty(&self) -> bool {
        self.mappings.is_empty()
    }
}

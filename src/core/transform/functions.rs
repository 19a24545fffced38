//! Transform kinds applied to source values

use crate::domain::mapping::{CustomFunction, FieldMapping, Transform};
use crate::domain::record::{scalar_text, FlatRecord};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde_json::Value;

/// Result of applying one mapping to one record
#[derive(Debug, Clone, PartialEq)]
pub enum Applied {
    /// Write this value
    Value(Value),
    /// Nothing to write (source missing, empty, or token absent)
    Skip,
    /// The source value is present but unusable; the mapping is skipped and
    /// the reason reported
    Invalid(String),
}

const DATE_LAYOUTS: [&str; 7] = [
    "%Y-%m-%d",
    "%Y%m%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%d.%m.%Y",
    "%d-%m-%Y",
    "%d %b %Y",
];

const DATETIME_LAYOUTS: [&str; 5] = [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M",
];

/// Applies a mapping's transform to a record
pub fn apply(mapping: &FieldMapping, record: &FlatRecord) -> Applied {
    let source = record.lookup(&mapping.source_field).filter(|v| !v.is_null());

    match &mapping.transform {
        Transform::Concat { fields, separator } => {
            let parts: Vec<String> = if fields.is_empty() {
                source.and_then(scalar_text).into_iter().collect()
            } else {
                fields.iter().filter_map(|field| record.text(field)).collect()
            };
            let joined = parts
                .iter()
                .map(|part| part.trim())
                .filter(|part| !part.is_empty())
                .collect::<Vec<_>>()
                .join(separator);
            if joined.is_empty() {
                Applied::Skip
            } else {
                Applied::Value(Value::String(joined))
            }
        }
        Transform::Custom(CustomFunction::Default(fallback)) => {
            match source.and_then(scalar_text).filter(|s| !s.trim().is_empty()) {
                Some(_) => Applied::Value(source.cloned().unwrap_or(Value::Null)),
                None => Applied::Value(Value::String(fallback.clone())),
            }
        }
        transform => {
            let Some(value) = source else {
                return Applied::Skip;
            };
            apply_to_value(transform, value)
        }
    }
}

fn apply_to_value(transform: &Transform, value: &Value) -> Applied {
    if let Transform::Direct = transform {
        return Applied::Value(value.clone());
    }

    let Some(text) = scalar_text(value) else {
        return Applied::Invalid(format!("expected a scalar value, got {value}"));
    };

    match transform {
        Transform::Trim => Applied::Value(Value::String(text.trim().to_string())),
        Transform::Upper => Applied::Value(Value::String(text.to_uppercase())),
        Transform::Lower => Applied::Value(Value::String(text.to_lowercase())),
        Transform::Split { separator, index } => text
            .split(separator.as_str())
            .map(str::trim)
            .nth(*index)
            .filter(|token| !token.is_empty())
            .map(|token| Applied::Value(Value::String(token.to_string())))
            .unwrap_or(Applied::Skip),
        Transform::FormatDate { input_format } => match format_date(&text, input_format.as_deref()) {
            Some(date) => Applied::Value(Value::String(date)),
            None if text.trim().is_empty() => Applied::Skip,
            None => Applied::Invalid(format!("unrecognized date '{text}'")),
        },
        Transform::Custom(function) => apply_custom(function, &text),
        Transform::Direct | Transform::Concat { .. } => Applied::Value(value.clone()),
    }
}

fn apply_custom(function: &CustomFunction, text: &str) -> Applied {
    match function {
        CustomFunction::StripNonDigits => {
            let digits: String = text.chars().filter(char::is_ascii_digit).collect();
            if digits.is_empty() {
                Applied::Skip
            } else {
                Applied::Value(Value::String(digits))
            }
        }
        CustomFunction::GenderCode => Applied::Value(Value::String(gender_code(text).to_string())),
        CustomFunction::Prefix(prefix) => Applied::Value(Value::String(format!("{prefix}{}", text.trim()))),
        CustomFunction::Default(_) => Applied::Value(Value::String(text.to_string())),
    }
}

/// Maps free-text sex/gender values onto an administrative gender code
pub fn gender_code(raw: &str) -> &'static str {
    match raw.trim().to_ascii_lowercase().as_str() {
        "m" | "male" | "man" | "1" => "male",
        "f" | "female" | "woman" | "2" => "female",
        "o" | "other" | "x" | "nonbinary" | "non-binary" => "other",
        _ => "unknown",
    }
}

/// Truncates a date or date-time to `YYYY-MM-DD`
///
/// Tries the explicit `input_format` first, then RFC 3339 and a set of
/// common layouts, then the first ten characters when they already look
/// like an ISO date.
pub fn format_date(raw: &str, input_format: Option<&str>) -> Option<String> {
    let text = raw.trim();
    if text.is_empty() {
        return None;
    }

    if let Some(format) = input_format {
        if let Ok(date) = NaiveDate::parse_from_str(text, format) {
            return Some(date.format("%Y-%m-%d").to_string());
        }
        if let Ok(datetime) = NaiveDateTime::parse_from_str(text, format) {
            return Some(datetime.date().format("%Y-%m-%d").to_string());
        }
    }

    if let Ok(datetime) = DateTime::parse_from_rfc3339(text) {
        return Some(datetime.date_naive().format("%Y-%m-%d").to_string());
    }

    for layout in DATETIME_LAYOUTS {
        if let Ok(datetime) = NaiveDateTime::parse_from_str(text, layout) {
            return Some(datetime.date().format("%Y-%m-%d").to_string());
        }
    }

    for layout in DATE_LAYOUTS {
        if let Ok(date) = NaiveDate::parse_from_str(text, layout) {
            return Some(date.format("%Y-%m-%d").to_string());
        }
    }

    let prefix: String = text.chars().take(10).collect();
    if NaiveDate::parse_from_str(&prefix, "%Y-%m-%d").is_ok() {
        return Some(prefix);
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::mapping::FieldMapping;
    use serde_json::json;
    use test_case::test_case;

    fn record() -> FlatRecord {
        FlatRecord::new()
            .with("first_name", "John")
            .with("last_name", "Doe")
            .with("middle", "")
            .with("phone", "(555) 010-2030")
            .with("full", "Doe^John^Q")
            .with("dob", "03/14/1980")
            .with("sex", "F")
            .with("age", 42)
    }

    fn mapping(source: &str, transform: Transform) -> FieldMapping {
        FieldMapping::new(source, "target", transform)
    }

    #[test]
    fn test_concat_skips_empty_fields() {
        let applied = apply(
            &mapping(
                "first_name",
                Transform::Concat {
                    fields: vec!["first_name".into(), "middle".into(), "last_name".into()],
                    separator: " ".into(),
                },
            ),
            &record(),
        );
        assert_eq!(applied, Applied::Value(json!("John Doe")));
    }

    #[test]
    fn test_concat_defaults_to_own_source() {
        let applied = apply(
            &mapping(
                "last_name",
                Transform::Concat {
                    fields: vec![],
                    separator: ",".into(),
                },
            ),
            &record(),
        );
        assert_eq!(applied, Applied::Value(json!("Doe")));
    }

    #[test]
    fn test_split_token_and_missing_token() {
        let second = mapping(
            "full",
            Transform::Split {
                separator: "^".into(),
                index: 1,
            },
        );
        assert_eq!(apply(&second, &record()), Applied::Value(json!("John")));

        let missing = mapping(
            "full",
            Transform::Split {
                separator: "^".into(),
                index: 7,
            },
        );
        assert_eq!(apply(&missing, &record()), Applied::Skip);
    }

    #[test]
    fn test_direct_preserves_type() {
        assert_eq!(
            apply(&mapping("age", Transform::Direct), &record()),
            Applied::Value(json!(42))
        );
    }

    #[test]
    fn test_missing_source_is_skipped() {
        assert_eq!(apply(&mapping("nope", Transform::Upper), &record()), Applied::Skip);
    }

    #[test]
    fn test_custom_functions() {
        assert_eq!(
            apply(&mapping("phone", Transform::Custom(CustomFunction::StripNonDigits)), &record()),
            Applied::Value(json!("5550102030"))
        );
        assert_eq!(
            apply(&mapping("sex", Transform::Custom(CustomFunction::GenderCode)), &record()),
            Applied::Value(json!("female"))
        );
        assert_eq!(
            apply(
                &mapping("nope", Transform::Custom(CustomFunction::Default("unknown".into()))),
                &record()
            ),
            Applied::Value(json!("unknown"))
        );
        assert_eq!(
            apply(
                &mapping("first_name", Transform::Custom(CustomFunction::Default("x".into()))),
                &record()
            ),
            Applied::Value(json!("John"))
        );
    }

    #[test]
    fn test_format_date_invalid_is_reported() {
        let record = FlatRecord::new().with("dob", "not a date");
        let applied = apply(&mapping("dob", Transform::FormatDate { input_format: None }), &record);
        assert!(matches!(applied, Applied::Invalid(_)));
    }

    #[test_case("1980-03-14", None => Some("1980-03-14".to_string()))]
    #[test_case("1980-03-14T10:22:00Z", None => Some("1980-03-14".to_string()))]
    #[test_case("1980-03-14 10:22:00", None => Some("1980-03-14".to_string()))]
    #[test_case("19800314", None => Some("1980-03-14".to_string()))]
    #[test_case("03/14/1980", None => Some("1980-03-14".to_string()))]
    #[test_case("14.03.1980", None => Some("1980-03-14".to_string()))]
    #[test_case("14|03|1980", Some("%d|%m|%Y") => Some("1980-03-14".to_string()))]
    #[test_case("1980-03-14 garbage", None => Some("1980-03-14".to_string()))]
    #[test_case("yesterday", None => None)]
    fn test_format_date(raw: &str, format: Option<&str>) -> Option<String> {
        format_date(raw, format)
    }

    #[test_case("M" => "male")]
    #[test_case("female" => "female")]
    #[test_case("X" => "other")]
    #[test_case("?" => "unknown")]
    fn test_gender_code(raw: &str) -> &'static str {
        gender_code(raw)
    }
}

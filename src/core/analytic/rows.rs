//! Analytic tables and field extraction helpers

use crate::core::identity::hashing::hash_key_parts;
use crate::core::transform::path::read_str_path;
use crate::domain::concept::ConceptDomain;
use crate::domain::record::scalar_text;
use crate::domain::resource::{Resource, ResourceType};
use chrono::{Datelike, NaiveDate};
use serde_json::{Map, Value};
use std::fmt;

/// Hex characters used for event row ids (48 bits)
const ROW_ID_HEX_LEN: usize = 12;

/// Destination tables of the analytic schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnalyticTable {
    Person,
    Measurement,
    Observation,
    VisitOccurrence,
    ConditionOccurrence,
    ProcedureOccurrence,
    DrugExposure,
}

impl AnalyticTable {
    pub const ALL: [AnalyticTable; 7] = [
        AnalyticTable::Person,
        AnalyticTable::Measurement,
        AnalyticTable::Observation,
        AnalyticTable::VisitOccurrence,
        AnalyticTable::ConditionOccurrence,
        AnalyticTable::ProcedureOccurrence,
        AnalyticTable::DrugExposure,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnalyticTable::Person => "person",
            AnalyticTable::Measurement => "measurement",
            AnalyticTable::Observation => "observation",
            AnalyticTable::VisitOccurrence => "visit_occurrence",
            AnalyticTable::ConditionOccurrence => "condition_occurrence",
            AnalyticTable::ProcedureOccurrence => "procedure_occurrence",
            AnalyticTable::DrugExposure => "drug_exposure",
        }
    }

    /// Store collection holding this table (`analytic_<table>`)
    pub fn collection(&self) -> String {
        format!("analytic_{}", self.as_str())
    }

    /// Primary id column
    pub fn id_column(&self) -> &'static str {
        match self {
            AnalyticTable::Person => "person_id",
            AnalyticTable::Measurement => "measurement_id",
            AnalyticTable::Observation => "observation_id",
            AnalyticTable::VisitOccurrence => "visit_occurrence_id",
            AnalyticTable::ConditionOccurrence => "condition_occurrence_id",
            AnalyticTable::ProcedureOccurrence => "procedure_occurrence_id",
            AnalyticTable::DrugExposure => "drug_exposure_id",
        }
    }

    /// Column prefix of the main coded column (`<prefix>_concept_id`)
    pub fn concept_prefix(&self) -> &'static str {
        match self {
            AnalyticTable::Person => "gender",
            AnalyticTable::Measurement => "measurement",
            AnalyticTable::Observation => "observation",
            AnalyticTable::VisitOccurrence => "visit",
            AnalyticTable::ConditionOccurrence => "condition",
            AnalyticTable::ProcedureOccurrence => "procedure",
            AnalyticTable::DrugExposure => "drug",
        }
    }

    /// Concept domain of the table's main coded column
    pub fn domain(&self) -> ConceptDomain {
        match self {
            AnalyticTable::Person => ConceptDomain::Gender,
            AnalyticTable::Measurement => ConceptDomain::Measurement,
            AnalyticTable::Observation => ConceptDomain::Observation,
            AnalyticTable::VisitOccurrence => ConceptDomain::Visit,
            AnalyticTable::ConditionOccurrence => ConceptDomain::Condition,
            AnalyticTable::ProcedureOccurrence => ConceptDomain::Procedure,
            AnalyticTable::DrugExposure => ConceptDomain::Drug,
        }
    }

    /// Table a canonical resource cascades into
    ///
    /// Observations with a numeric value are measurements.
    pub fn for_resource(resource: &Resource) -> Self {
        match resource.resource_type {
            ResourceType::Patient => AnalyticTable::Person,
            ResourceType::Observation if numeric_value(&resource.body).is_some() => AnalyticTable::Measurement,
            ResourceType::Observation => AnalyticTable::Observation,
            ResourceType::Encounter => AnalyticTable::VisitOccurrence,
            ResourceType::Condition => AnalyticTable::ConditionOccurrence,
            ResourceType::Procedure => AnalyticTable::ProcedureOccurrence,
            ResourceType::MedicationStatement => AnalyticTable::DrugExposure,
        }
    }
}

impl fmt::Display for AnalyticTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row bound for an analytic table
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticRow {
    pub table: AnalyticTable,
    pub row_id: i64,
    pub columns: Map<String, Value>,
}

impl AnalyticRow {
    pub fn new(table: AnalyticTable, row_id: i64) -> Self {
        let mut columns = Map::new();
        columns.insert(table.id_column().to_string(), Value::from(row_id));
        Self {
            table,
            row_id,
            columns,
        }
    }

    /// Sets a column; `None` is stored as null
    pub fn set(&mut self, column: &str, value: impl Into<Value>) {
        self.columns.insert(column.to_string(), value.into());
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns.get(column)
    }

    /// The row as a store document
    pub fn into_document(self) -> Value {
        Value::Object(self.columns)
    }
}

/// Event row id for a table and canonical resource id
pub fn event_row_id(table: AnalyticTable, resource_id: &str) -> i64 {
    let digest = hash_key_parts(&[table.as_str(), resource_id]);
    i64::from_str_radix(&digest[..ROW_ID_HEX_LEN], 16).unwrap_or_default()
}

/// A code with its system and display text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coding {
    pub system: String,
    pub code: String,
    pub display: Option<String>,
}

/// Reads `<base>.coding[0]` (falling back to `<base>.text` for display)
pub fn coding_at(body: &Value, base: &str) -> Option<Coding> {
    let code = text_at(body, &format!("{base}.coding[0].code"))?;
    let system = text_at(body, &format!("{base}.coding[0].system")).unwrap_or_else(|| "unknown".to_string());
    let display = text_at(body, &format!("{base}.coding[0].display"))
        .or_else(|| text_at(body, &format!("{base}.text")));
    Some(Coding {
        system,
        code,
        display,
    })
}

/// Encounter `class`, which is a bare Coding rather than a CodeableConcept
pub fn class_coding(body: &Value) -> Option<Coding> {
    Some(Coding {
        code: text_at(body, "class.code")?,
        system: text_at(body, "class.system").unwrap_or_else(|| "unknown".to_string()),
        display: text_at(body, "class.display"),
    })
}

/// Non-empty trimmed text at a path
pub fn text_at(body: &Value, path: &str) -> Option<String> {
    read_str_path(body, path)
        .and_then(scalar_text)
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
}

/// `valueQuantity.value` as a number, when numeric
pub fn numeric_value(body: &Value) -> Option<f64> {
    match read_str_path(body, "valueQuantity.value")? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Text rendering of an observation value (`valueString`, `valueCodeableConcept`, `valueQuantity`)
pub fn value_text(body: &Value) -> Option<String> {
    text_at(body, "valueString")
        .or_else(|| text_at(body, "valueCodeableConcept.text"))
        .or_else(|| text_at(body, "valueCodeableConcept.coding[0].display"))
        .or_else(|| text_at(body, "valueCodeableConcept.coding[0].code"))
        .or_else(|| text_at(body, "valueQuantity.value"))
        .or_else(|| text_at(body, "valueBoolean"))
}

/// Calendar date of a date or date-time string
pub fn date_of(text: &str) -> Option<NaiveDate> {
    let head = text.trim().get(..10)?;
    NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
}

/// Date and original date-time columns for a timestamp path
pub fn set_dates(row: &mut AnalyticRow, body: &Value, path: &str, date_column: &str, datetime_column: &str) {
    let raw = text_at(body, path);
    let date = raw.as_deref().and_then(date_of);
    row.set(date_column, date.map(|d| d.format("%Y-%m-%d").to_string()));
    row.set(datetime_column, raw);
}

/// Year, month and day of birth from `birthDate`
pub fn birth_parts(body: &Value) -> Option<(i32, u32, u32)> {
    let date = text_at(body, "birthDate").as_deref().and_then(date_of)?;
    Some((date.year(), date.month(), date.day()))
}

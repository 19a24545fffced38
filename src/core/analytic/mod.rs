//! Analytic cascade
//!
//! Derives rows of an OMOP-like dimensional schema from canonical resources:
//!
//! | Resource | Table |
//! |---|---|
//! | Patient | `person` |
//! | Observation | `measurement` (numeric value) or `observation` |
//! | Encounter | `visit_occurrence` |
//! | Condition | `condition_occurrence` |
//! | Procedure | `procedure_occurrence` |
//! | MedicationStatement | `drug_exposure` |
//!
//! Coded fields go through the [`ConceptResolver`]; only auto-approved
//! concepts reach the `*_concept_id` columns, everything else is written as
//! concept 0 with the source value kept in `*_source_value`. Rows are upserted
//! into `analytic_<table>` keyed by their primary id.

pub mod rows;

use crate::adapters::database::traits::DocumentStore;
use crate::core::concept::{ConceptRequest, ConceptResolver};
use crate::core::identity::IdentityResolver;
use crate::domain::concept::NO_MATCH_CONCEPT_ID;
use crate::domain::ids::JobId;
use crate::domain::resource::{Resource, ResourceType};
use crate::domain::{EstuaryError, Result};
use chrono::{DateTime, Utc};
use rows::{birth_parts, class_coding, coding_at, event_row_id, numeric_value, set_dates, text_at, value_text, Coding};
use serde_json::Value;
use std::sync::Arc;

pub use rows::{AnalyticRow, AnalyticTable};

/// Code system assumed for bare gender values
const GENDER_SYSTEM: &str = "http://hl7.org/fhir/administrative-gender";

/// Result of cascading one resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyticSync {
    pub table: AnalyticTable,
    pub row_id: i64,
    /// False when the stored row was newer
    pub applied: bool,
}

/// Canonical → analytic transformer and writer
pub struct AnalyticCascade {
    documents: Arc<dyn DocumentStore>,
    identity: Arc<IdentityResolver>,
    resolver: Arc<ConceptResolver>,
}

impl AnalyticCascade {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        identity: Arc<IdentityResolver>,
        resolver: Arc<ConceptResolver>,
    ) -> Self {
        Self {
            documents,
            identity,
            resolver,
        }
    }

    /// Derives the analytic row for a canonical resource
    ///
    /// # Errors
    ///
    /// [`EstuaryError::Transformation`] when the resource has no id, or an
    /// event resource has no subject reference.
    pub async fn derive_row(&self, resource: &Resource) -> Result<AnalyticRow> {
        let resource_id = resource.id().ok_or_else(|| {
            EstuaryError::Transformation(format!("{} resource has no id", resource.resource_type))
        })?;
        let body = &resource.body;
        let table = AnalyticTable::for_resource(resource);

        if resource.resource_type == ResourceType::Patient {
            return Ok(self.person_row(body, resource_id).await);
        }

        let subject = text_at(body, "subject.reference").ok_or_else(|| {
            EstuaryError::Transformation(format!(
                "{} {resource_id} has no subject.reference",
                resource.resource_type
            ))
        })?;
        let person_id = self.identity.person_id(&subject);

        let mut row = match resource.resource_type {
            ResourceType::Encounter => {
                let key = text_at(body, "identifier[0].value").unwrap_or_else(|| resource_id.to_string());
                AnalyticRow::new(table, self.identity.visit_id(&key))
            }
            _ => AnalyticRow::new(table, event_row_id(table, resource_id)),
        };
        row.set("person_id", person_id);

        let coding = match table {
            AnalyticTable::VisitOccurrence => coding_at(body, "type[0]").or_else(|| class_coding(body)),
            AnalyticTable::DrugExposure => coding_at(body, "medicationCodeableConcept"),
            _ => coding_at(body, "code"),
        };
        self.set_concept(&mut row, coding, table).await;

        match table {
            AnalyticTable::Measurement => {
                set_dates(&mut row, body, "effectiveDateTime", "measurement_date", "measurement_datetime");
                row.set("value_as_number", numeric_value(body));
                row.set("unit_source_value", text_at(body, "valueQuantity.unit"));
            }
            AnalyticTable::Observation => {
                set_dates(&mut row, body, "effectiveDateTime", "observation_date", "observation_datetime");
                row.set("value_as_string", value_text(body));
            }
            AnalyticTable::VisitOccurrence => {
                set_dates(&mut row, body, "period.start", "visit_start_date", "visit_start_datetime");
                set_dates(&mut row, body, "period.end", "visit_end_date", "visit_end_datetime");
            }
            AnalyticTable::ConditionOccurrence => {
                set_dates(&mut row, body, "onsetDateTime", "condition_start_date", "condition_start_datetime");
            }
            AnalyticTable::ProcedureOccurrence => {
                set_dates(&mut row, body, "performedDateTime", "procedure_date", "procedure_datetime");
            }
            AnalyticTable::DrugExposure => {
                set_dates(
                    &mut row,
                    body,
                    "effectiveDateTime",
                    "drug_exposure_start_date",
                    "drug_exposure_start_datetime",
                );
            }
            AnalyticTable::Person => {}
        }

        if table != AnalyticTable::VisitOccurrence {
            let visit = text_at(body, "encounter.reference").map(|r| self.identity.visit_id(&r));
            row.set("visit_occurrence_id", visit);
        }

        Ok(row)
    }

    async fn person_row(&self, body: &Value, resource_id: &str) -> AnalyticRow {
        let key = text_at(body, "identifier[0].value").unwrap_or_else(|| resource_id.to_string());
        let mut row = AnalyticRow::new(AnalyticTable::Person, self.identity.person_id(&key));

        let gender = text_at(body, "gender").map(|gender| Coding {
            system: GENDER_SYSTEM.to_string(),
            code: gender.to_lowercase(),
            display: Some(gender),
        });
        self.set_concept(&mut row, gender, AnalyticTable::Person).await;

        match birth_parts(body) {
            Some((year, month, day)) => {
                row.set("year_of_birth", year);
                row.set("month_of_birth", month);
                row.set("day_of_birth", day);
            }
            None => {
                row.set("year_of_birth", Value::Null);
                row.set("month_of_birth", Value::Null);
                row.set("day_of_birth", Value::Null);
            }
        }
        row.set("birth_datetime", text_at(body, "birthDate"));
        row.set("person_source_value", key);
        row
    }

    /// Resolves a coding and writes the table's concept and source value columns
    async fn set_concept(&self, row: &mut AnalyticRow, coding: Option<Coding>, table: AnalyticTable) {
        let prefix = table.concept_prefix();
        let concept_column = format!("{prefix}_concept_id");
        let source_column = format!("{prefix}_source_value");

        let Some(coding) = coding else {
            row.set(&concept_column, NO_MATCH_CONCEPT_ID);
            row.set(&source_column, Value::Null);
            return;
        };

        let request = ConceptRequest::new(coding.system, coding.code.clone(), coding.display, table.domain());
        let resolved = self.resolver.resolve_and_apply(&request).await;
        row.set(&concept_column, resolved.concept_id());
        row.set(&source_column, coding.code);
    }

    /// Derives and upserts the row for a resource
    ///
    /// Rows are tagged with `_job_id`, `_synced` and `_source_resource_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be derived or the upsert fails.
    pub async fn sync(&self, job_id: &JobId, resource: &Resource, now: DateTime<Utc>) -> Result<AnalyticSync> {
        let mut row = self.derive_row(resource).await?;
        let table = row.table;
        let row_id = row.row_id;

        row.set("_job_id", job_id.to_string());
        row.set("_synced", true);
        row.set("_source_resource_id", resource.id().map(str::to_string));

        let last_updated = resource.last_updated().unwrap_or(now);
        let outcome = self
            .documents
            .upsert(&table.collection(), &row_id.to_string(), row.into_document(), last_updated)
            .await?;

        tracing::debug!(
            job_id = %job_id,
            table = %table,
            row_id,
            outcome = ?outcome,
            "Analytic row synced"
        );

        Ok(AnalyticSync {
            table,
            row_id,
            applied: outcome.applied(),
        })
    }
}

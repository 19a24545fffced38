//! Persistence fan-out
//!
//! Writes one transformed resource to every destination of its job:
//!
//! 1. staging insert (the durability boundary)
//! 2. canonical upsert into `canonical_<type>`, last-write-wins
//! 3. analytic cascade, when the job has `auto_sync = "analytic"`
//!
//! Each destination fails on its own. A staging failure dead-letters the
//! original input and skips the rest; canonical and analytic failures are
//! logged and counted but never undo the staging write.

use crate::adapters::database::traits::DocumentStore;
use crate::core::analytic::{AnalyticCascade, AnalyticTable};
use crate::domain::errors::FailureDetail;
use crate::domain::ids::JobId;
use crate::domain::job::{AutoSync, JobSpec};
use crate::domain::resource::Resource;
use crate::domain::Result;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::{Arc, RwLock};

/// Where one job writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDestinations {
    pub job_id: JobId,
    pub staging: String,
    pub dead_letter: String,
    pub canonical: bool,
    pub auto_sync: AutoSync,
    pub dry_run: bool,
}

impl JobDestinations {
    /// Destinations for a job spec
    pub fn for_job(job_id: &JobId, spec: &JobSpec) -> Self {
        Self {
            job_id: job_id.clone(),
            staging: spec.destination.staging_for(job_id),
            dead_letter: spec.destination.dead_letter_for(job_id),
            canonical: spec.destination.canonical,
            auto_sync: spec.destination.auto_sync,
            dry_run: spec.dry_run,
        }
    }
}

/// What happened to one resource
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanOutOutcome {
    /// Staging accepted the resource (always true in dry-run)
    pub staged: bool,
    /// The input went to the dead-letter collection
    pub dead_lettered: bool,
    pub canonical_written: u64,
    pub canonical_failed: u64,
    pub analytic_written: u64,
    pub analytic_failed: u64,
    /// Messages for each failed destination
    pub errors: Vec<String>,
}

impl FanOutOutcome {
    fn add_error(&mut self, error: String) {
        self.errors.push(error);
    }
}

/// Staging, canonical and analytic writer shared by all jobs
pub struct PersistenceFanOut {
    documents: Arc<dyn DocumentStore>,
    analytic: Option<Arc<AnalyticCascade>>,
    ensured: RwLock<HashSet<String>>,
}

impl PersistenceFanOut {
    pub fn new(documents: Arc<dyn DocumentStore>, analytic: Option<Arc<AnalyticCascade>>) -> Self {
        Self {
            documents,
            analytic,
            ensured: RwLock::new(HashSet::new()),
        }
    }

    /// The document store written to
    pub fn documents(&self) -> &Arc<dyn DocumentStore> {
        &self.documents
    }

    /// Creates a collection on first use in this process
    async fn ensure(&self, collection: &str) -> Result<()> {
        let known = self
            .ensured
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(collection);
        if known {
            return Ok(());
        }

        self.documents.ensure_collection(collection).await?;
        self.ensured
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(collection.to_string());
        tracing::debug!(collection = %collection, "Collection ready");
        Ok(())
    }

    /// Writes a resource to every destination of the job
    ///
    /// `input` is the original source record, kept for the dead-letter entry
    /// if staging fails.
    pub async fn write(
        &self,
        destinations: &JobDestinations,
        input: &Value,
        resource: &Resource,
        now: DateTime<Utc>,
    ) -> FanOutOutcome {
        let mut outcome = FanOutOutcome::default();

        if destinations.dry_run {
            tracing::debug!(
                job_id = %destinations.job_id,
                resource_type = %resource.resource_type,
                id = resource.id().unwrap_or_default(),
                "Dry run: skipping destination writes"
            );
            outcome.staged = true;
            return outcome;
        }

        // (a) staging
        if let Err(e) = self.stage(destinations, resource, now).await {
            tracing::warn!(
                job_id = %destinations.job_id,
                collection = %destinations.staging,
                error = %e,
                "Staging write failed; dead-lettering input"
            );
            outcome.add_error(format!("staging: {e}"));
            let failure = FailureDetail::new("staging", e.to_string());
            outcome.dead_lettered = self.dead_letter(destinations, input, &failure, now).await;
            return outcome;
        }
        outcome.staged = true;

        // (b) canonical; a failed or stale write leaves the analytic rows as they are
        let mut cascade = true;
        if destinations.canonical {
            match self.write_canonical(resource, now).await {
                Ok(applied) => {
                    if applied {
                        outcome.canonical_written += 1;
                    }
                    cascade = applied;
                }
                Err(e) => {
                    cascade = false;
                    outcome.canonical_failed += 1;
                    tracing::warn!(
                        job_id = %destinations.job_id,
                        collection = %resource.resource_type.canonical_collection(),
                        error = %e,
                        "Canonical write failed"
                    );
                    outcome.add_error(format!("canonical: {e}"));
                }
            }
        }

        // (c) analytic
        if destinations.auto_sync == AutoSync::Analytic && cascade {
            if let Some(analytic) = &self.analytic {
                match self.write_analytic(analytic, destinations, resource, now).await {
                    Ok(()) => outcome.analytic_written += 1,
                    Err(e) => {
                        outcome.analytic_failed += 1;
                        tracing::warn!(
                            job_id = %destinations.job_id,
                            resource_type = %resource.resource_type,
                            error = %e,
                            "Analytic cascade failed"
                        );
                        outcome.add_error(format!("analytic: {e}"));
                    }
                }
            }
        }

        outcome
    }

    async fn stage(&self, destinations: &JobDestinations, resource: &Resource, now: DateTime<Utc>) -> Result<()> {
        self.ensure(&destinations.staging).await?;

        let mut document = resource.body.clone();
        if let Value::Object(map) = &mut document {
            map.insert("_job_id".to_string(), Value::from(destinations.job_id.to_string()));
            map.insert("_ingested_at".to_string(), Value::from(now.to_rfc3339()));
            map.insert(
                "_resource_type".to_string(),
                Value::from(resource.resource_type.as_str()),
            );
        }
        self.documents.insert(&destinations.staging, document).await
    }

    /// Upserts into `canonical_<type>`; `Ok(false)` when the stored copy is newer
    async fn write_canonical(&self, resource: &Resource, now: DateTime<Utc>) -> Result<bool> {
        let collection = resource.resource_type.canonical_collection();
        self.ensure(&collection).await?;

        let id = resource.id().unwrap_or_default();
        let last_updated = resource.last_updated().unwrap_or(now);
        let outcome = self
            .documents
            .upsert(&collection, id, resource.body.clone(), last_updated)
            .await?;

        if !outcome.applied() {
            tracing::debug!(
                collection = %collection,
                id = %id,
                "Stored canonical resource is newer; incoming version ignored"
            );
        }
        Ok(outcome.applied())
    }

    async fn write_analytic(
        &self,
        analytic: &AnalyticCascade,
        destinations: &JobDestinations,
        resource: &Resource,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let table = AnalyticTable::for_resource(resource);
        self.ensure(&table.collection()).await?;
        analytic.sync(&destinations.job_id, resource, now).await?;
        Ok(())
    }

    /// Records a failed input in the job's dead-letter collection
    ///
    /// Returns false when the dead-letter write itself failed (logged).
    pub async fn dead_letter(
        &self,
        destinations: &JobDestinations,
        input: &Value,
        failure: &FailureDetail,
        now: DateTime<Utc>,
    ) -> bool {
        if destinations.dry_run {
            return true;
        }

        let entry = json!({
            "input": input,
            "reason": failure.message,
            "stage": failure.stage,
            "row": failure.row,
            "timestamp": now.to_rfc3339(),
            "_job_id": destinations.job_id.to_string(),
        });

        let result = match self.ensure(&destinations.dead_letter).await {
            Ok(()) => self.documents.insert(&destinations.dead_letter, entry).await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    job_id = %destinations.job_id,
                    collection = %destinations.dead_letter,
                    stage = %failure.stage,
                    error = %e,
                    "Dead-letter write failed; input is only in the logs"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::database::memory::{MemoryConceptStore, MemoryDocumentStore};
    use crate::adapters::database::traits::ConceptStore;
    use crate::adapters::vocabulary::MemoryVocabulary;
    use crate::core::concept::{ConceptResolver, ResolverStage, StageContext};
    use crate::core::identity::IdentityResolver;
    use crate::domain::concept::{Concept, ConceptSuggestion, ConfidencePolicy, ResolutionStage};
    use crate::domain::ids::ResourceId;
    use crate::domain::job::{DestinationConfig, SourceSpec};
    use crate::domain::resource::ResourceType;
    use async_trait::async_trait;
    use chrono::Duration;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn destinations(dry_run: bool) -> JobDestinations {
        let spec = JobSpec::builder()
            .name("patients")
            .resource_type(ResourceType::Patient)
            .mapping_ref("patients_v1")
            .source(SourceSpec::new("tabular-file").with("path", "p.csv"))
            .destination(DestinationConfig::default())
            .dry_run(dry_run)
            .build()
            .unwrap();
        JobDestinations::for_job(&JobId::new("job1").unwrap(), &spec)
    }

    fn patient(family: &str, last_updated: DateTime<Utc>) -> Resource {
        let mut resource = Resource::from_body(json!({
            "resourceType": "Patient",
            "name": [{"family": family}]
        }))
        .unwrap();
        resource.stamp(&ResourceId::new("aaaabbbbccccdddd").unwrap(), last_updated);
        resource
    }

    #[test]
    fn test_destination_names() {
        let d = destinations(false);
        assert_eq!(d.staging, "staging_job1");
        assert_eq!(d.dead_letter, "staging_job1_dead_letter");
        assert!(d.canonical);
    }

    #[tokio::test]
    async fn test_write_stages_and_upserts() {
        let store = Arc::new(MemoryDocumentStore::new());
        let fan_out = PersistenceFanOut::new(store.clone(), None);
        let now = Utc::now();

        let outcome = fan_out
            .write(&destinations(false), &json!({"family": "Doe"}), &patient("Doe", now), now)
            .await;
        assert!(outcome.staged);
        assert_eq!(outcome.canonical_written, 1);
        assert!(outcome.errors.is_empty());

        let staged = store.list("staging_job1", 10).await.unwrap();
        assert_eq!(staged.len(), 1);
        assert_eq!(staged[0]["_job_id"], "job1");
        assert_eq!(staged[0]["_resource_type"], "Patient");
        assert!(staged[0]["_ingested_at"].is_string());

        let canonical = store.get("canonical_patient", "aaaabbbbccccdddd").await.unwrap().unwrap();
        assert_eq!(canonical["name"][0]["family"], "Doe");
        assert!(canonical.get("_job_id").is_none());
    }

    #[tokio::test]
    async fn test_older_resource_does_not_replace_canonical() {
        let store = Arc::new(MemoryDocumentStore::new());
        let fan_out = PersistenceFanOut::new(store.clone(), None);
        let now = Utc::now();
        let d = destinations(false);

        fan_out.write(&d, &json!({}), &patient("Newer", now), now).await;
        let outcome = fan_out
            .write(&d, &json!({}), &patient("Older", now - Duration::hours(1)), now)
            .await;

        assert!(outcome.staged);
        assert_eq!(outcome.canonical_written, 0);
        assert_eq!(outcome.canonical_failed, 0);
        let canonical = store.get("canonical_patient", "aaaabbbbccccdddd").await.unwrap().unwrap();
        assert_eq!(canonical["name"][0]["family"], "Newer");
        assert_eq!(store.count("staging_job1").await.unwrap(), 2);
    }

    /// Answers every request with a middling suggestion and counts calls
    struct UnsureStage {
        attempts: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ResolverStage for UnsureStage {
        fn stage(&self) -> ResolutionStage {
            ResolutionStage::Semantic
        }

        async fn attempt(&self, context: &mut StageContext) -> Result<Option<ConceptSuggestion>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let concept = Concept {
                concept_id: 8532,
                concept_name: "Female".to_string(),
                concept_code: "F".to_string(),
                vocabulary_id: "Gender".to_string(),
                domain_id: "Gender".to_string(),
                is_standard: true,
            };
            Ok(Some(ConceptSuggestion::for_concept(
                &concept,
                context.request.domain(),
                0.7,
                ResolutionStage::Semantic,
                "close enough",
            )))
        }
    }

    fn analytic_fan_out(
        store: Arc<MemoryDocumentStore>,
        concepts: Arc<MemoryConceptStore>,
        attempts: Arc<AtomicUsize>,
    ) -> PersistenceFanOut {
        let resolver = ConceptResolver::new(
            vec![Box::new(UnsureStage { attempts })],
            concepts,
            Arc::new(MemoryVocabulary::default()),
            ConfidencePolicy::default(),
            std::time::Duration::from_secs(1),
            1,
        );
        let cascade = AnalyticCascade::new(store.clone(), Arc::new(IdentityResolver::new()), Arc::new(resolver));
        PersistenceFanOut::new(store, Some(Arc::new(cascade)))
    }

    #[tokio::test]
    async fn test_stale_canonical_write_skips_analytic_cascade() {
        let store = Arc::new(MemoryDocumentStore::new());
        let concepts = Arc::new(MemoryConceptStore::new());
        let attempts = Arc::new(AtomicUsize::new(0));
        let fan_out = analytic_fan_out(store.clone(), concepts.clone(), attempts.clone());
        let mut d = destinations(false);
        d.auto_sync = AutoSync::Analytic;
        let now = Utc::now();

        let newer = fan_out.write(&d, &json!({}), &patient("Newer", now), now).await;
        assert_eq!(newer.analytic_written, 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 0);

        // the superseded version carries a code that would be queued for review
        let mut older = patient("Older", now - Duration::hours(1));
        older.body["gender"] = json!("f");
        let outcome = fan_out.write(&d, &json!({}), &older, now).await;

        assert!(outcome.staged);
        assert_eq!(outcome.canonical_written, 0);
        assert_eq!(outcome.analytic_written, 0);
        assert_eq!(outcome.analytic_failed, 0);
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
        assert_eq!(concepts.pending_review_count().await.unwrap(), 0);
        assert_eq!(store.count("analytic_person").await.unwrap(), 1);

        // a current version with the same code does reach the resolver
        let mut current = patient("Current", now + Duration::hours(1));
        current.body["gender"] = json!("f");
        let outcome = fan_out.write(&d, &json!({}), &current, now).await;
        assert_eq!(outcome.analytic_written, 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(concepts.pending_review_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let store = Arc::new(MemoryDocumentStore::new());
        let fan_out = PersistenceFanOut::new(store.clone(), None);
        let now = Utc::now();
        let d = destinations(true);

        let outcome = fan_out.write(&d, &json!({}), &patient("Doe", now), now).await;
        assert!(outcome.staged);
        assert!(fan_out
            .dead_letter(&d, &json!({"x": 1}), &FailureDetail::new("source", "bad row"), now)
            .await);
        assert_eq!(store.count("staging_job1").await.unwrap(), 0);
        assert_eq!(store.count("canonical_patient").await.unwrap(), 0);
        assert_eq!(store.count("staging_job1_dead_letter").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_dead_letter_entry_shape() {
        let store = Arc::new(MemoryDocumentStore::new());
        let fan_out = PersistenceFanOut::new(store.clone(), None);
        let now = Utc::now();
        let failure = FailureDetail::new("source", "found record with 3 fields, expected 2").with_row(7);

        assert!(fan_out
            .dead_letter(&destinations(false), &json!({"mrn": "1"}), &failure, now)
            .await);

        let entries = store.list("staging_job1_dead_letter", 10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0]["input"], json!({"mrn": "1"}));
        assert_eq!(entries[0]["stage"], "source");
        assert_eq!(entries[0]["row"], 7);
        assert_eq!(entries[0]["reason"], "found record with 3 fields, expected 2");
        assert!(entries[0]["timestamp"].is_string());
    }
}

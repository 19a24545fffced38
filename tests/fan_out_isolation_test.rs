//! Destination isolation
//!
//! A failing canonical or analytic destination must never cost the staged
//! copy of a record, and a failing staging insert sends the record to the
//! dead-letter collection.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use estuary::adapters::database::{DocumentStore, MemoryConceptStore, MemoryDocumentStore, Stores, UpsertOutcome};
use estuary::adapters::mapping::memory::InMemoryMappingRepository;
use estuary::adapters::source::SourceRegistry;
use estuary::adapters::vocabulary::MemoryVocabulary;
use estuary::config::EstuaryConfig;
use estuary::core::orchestrator::{Engine, EngineContext};
use estuary::domain::{
    AutoSync, DestinationConfig, EstuaryError, FieldMapping, JobSpec, JobState, ResourceType, Result,
    SourceSpec, StoreError, Transform,
};
use serde_json::Value;
use std::sync::Arc;

/// Memory store that fails every write to collections with a given prefix
struct FailingPrefixStore {
    inner: MemoryDocumentStore,
    prefix: &'static str,
}

impl FailingPrefixStore {
    fn new(prefix: &'static str) -> Self {
        Self {
            inner: MemoryDocumentStore::new(),
            prefix,
        }
    }

    fn check(&self, collection: &str) -> Result<()> {
        if collection.starts_with(self.prefix) {
            Err(EstuaryError::Store(StoreError::UpsertFailed {
                collection: collection.to_string(),
                message: "disk full".to_string(),
            }))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DocumentStore for FailingPrefixStore {
    fn backend_name(&self) -> &'static str {
        "failing"
    }

    async fn test_connection(&self) -> Result<()> {
        Ok(())
    }

    async fn ensure_collection(&self, collection: &str) -> Result<()> {
        self.inner.ensure_collection(collection).await
    }

    async fn insert(&self, collection: &str, document: Value) -> Result<()> {
        self.check(collection)?;
        self.inner.insert(collection, document).await
    }

    async fn upsert(
        &self,
        collection: &str,
        key: &str,
        document: Value,
        last_updated: DateTime<Utc>,
    ) -> Result<UpsertOutcome> {
        self.check(collection)?;
        self.inner.upsert(collection, key, document, last_updated).await
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>> {
        self.inner.get(collection, key).await
    }

    async fn count(&self, collection: &str) -> Result<u64> {
        self.inner.count(collection).await
    }

    async fn list(&self, collection: &str, limit: usize) -> Result<Vec<Value>> {
        self.inner.list(collection, limit).await
    }
}

async fn run_with_store(documents: Arc<dyn DocumentStore>, rows: &str) -> (Engine, estuary::domain::JobStatus) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("patients.csv");
    std::fs::write(&path, rows).unwrap();

    let mappings = Arc::new(InMemoryMappingRepository::new());
    mappings
        .insert(
            "patients_v1",
            vec![
                FieldMapping::new("mrn", "identifier[0].value", Transform::Direct),
                FieldMapping::new("last", "name[0].family", Transform::Trim),
            ],
        )
        .await;

    let stores = Stores {
        documents,
        concepts: Arc::new(MemoryConceptStore::new()),
    };
    let context = EngineContext::assemble(
        &EstuaryConfig::default(),
        stores,
        Arc::new(MemoryVocabulary::default()),
        mappings,
        Arc::new(SourceRegistry::with_builtin()),
    )
    .unwrap();
    let engine = Engine::new(Arc::new(context));

    let spec = JobSpec::builder()
        .name("patients")
        .resource_type(ResourceType::Patient)
        .mapping_ref("patients_v1")
        .source(SourceSpec::new("tabular-file").with("path", path.to_string_lossy().into_owned()))
        .destination(DestinationConfig {
            auto_sync: AutoSync::Analytic,
            ..DestinationConfig::default()
        })
        .build()
        .unwrap();
    let id = engine.create(spec).await.unwrap();
    engine.start(&id).await.unwrap();
    let status = engine.wait(&id).await.unwrap();
    (engine, status)
}

#[tokio::test]
async fn test_canonical_failure_keeps_staging() {
    let store = Arc::new(FailingPrefixStore::new("canonical_"));
    let (engine, status) = run_with_store(store.clone(), "mrn,last\n1,Doe\n2,Roe\n").await;

    assert_eq!(status.state, JobState::Stopped);
    assert_eq!(status.metrics.processed, 2);
    assert_eq!(status.metrics.failed, 0);
    assert_eq!(status.metrics.canonical_written, 0);
    assert_eq!(status.metrics.canonical_failed, 2);
    // no cascade from a canonical write that did not happen
    assert_eq!(status.metrics.analytic_written, 0);

    let staging = format!("staging_{}", status.job_id);
    assert_eq!(store.count(&staging).await.unwrap(), 2);
    assert_eq!(store.count("canonical_patient").await.unwrap(), 0);
    assert!(engine.context().stores.documents.count("analytic_person").await.unwrap() == 0);
}

#[tokio::test]
async fn test_analytic_failure_keeps_staging_and_canonical() {
    let store = Arc::new(FailingPrefixStore::new("analytic_"));
    let (_engine, status) = run_with_store(store.clone(), "mrn,last\n1,Doe\n").await;

    assert_eq!(status.metrics.processed, 1);
    assert_eq!(status.metrics.canonical_written, 1);
    assert_eq!(status.metrics.analytic_written, 0);
    assert_eq!(status.metrics.analytic_failed, 1);
    assert_eq!(store.count("canonical_patient").await.unwrap(), 1);
}

#[tokio::test]
async fn test_staging_failure_dead_letters_the_record() {
    let store = Arc::new(FailingPrefixStore::new("staging_"));
    let (_engine, status) = run_with_store(store.clone(), "mrn,last\n1,Doe\n").await;

    // the dead-letter collection shares the staging prefix, so it fails too
    assert_eq!(status.state, JobState::Stopped);
    assert_eq!(status.metrics.processed, 0);
    assert_eq!(status.metrics.failed, 1);
    assert_eq!(status.metrics.dead_lettered, 0);
    assert_eq!(store.count("canonical_patient").await.unwrap(), 0);
}

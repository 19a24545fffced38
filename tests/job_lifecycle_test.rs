//! Job lifecycle against a live message-stream listener
//!
//! Exercises start, pause, resume, stop and restart on a source that never
//! runs dry on its own.

use estuary::adapters::database::Stores;
use estuary::adapters::mapping::memory::InMemoryMappingRepository;
use estuary::adapters::source::SourceRegistry;
use estuary::adapters::vocabulary::MemoryVocabulary;
use estuary::config::EstuaryConfig;
use estuary::core::orchestrator::{Engine, EngineContext};
use estuary::domain::{FieldMapping, JobId, JobSpec, JobState, JobStatus, ResourceType, SourceSpec, Transform};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

async fn engine() -> Engine {
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

    let context = EngineContext::assemble(
        &EstuaryConfig::default(),
        Stores::in_memory(),
        Arc::new(MemoryVocabulary::default()),
        mappings,
        Arc::new(SourceRegistry::with_builtin()),
    )
    .unwrap();
    Engine::new(Arc::new(context))
}

fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn listener_job(port: u16) -> JobSpec {
    JobSpec::builder()
        .name("listener")
        .resource_type(ResourceType::Patient)
        .mapping_ref("patients_v1")
        .source(SourceSpec::new("message-stream-listener").with("bind", format!("127.0.0.1:{port}")))
        .build()
        .unwrap()
}

async fn send(port: u16, payload: &[u8]) {
    let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    stream.write_all(payload).await.unwrap();
    stream.shutdown().await.unwrap();
}

/// Waits until `count` units have been fully handled (processed or failed)
async fn wait_for_handled(engine: &Engine, id: &JobId, count: u64) -> JobStatus {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let status = engine.status(id).await.unwrap();
            if status.metrics.processed + status.metrics.failed >= count {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("records arrive")
}

#[tokio::test]
async fn test_listener_runs_until_stopped() {
    let engine = engine().await;
    let port = free_port();
    let id = engine.create(listener_job(port)).await.unwrap();

    engine.start(&id).await.unwrap();
    send(port, b"{\"mrn\": \"1\", \"last\": \"Doe\"}\n{\"mrn\": \"2\", \"last\": \"Roe\"}\nnot json\n").await;

    let status = wait_for_handled(&engine, &id, 3).await;
    assert_eq!(status.state, JobState::Running);
    assert_eq!(status.metrics.processed, 2);
    assert_eq!(status.metrics.failed, 1);
    assert_eq!(status.metrics.dead_lettered, 1);

    let stopped = engine.stop(&id).await.unwrap();
    assert_eq!(stopped.state, JobState::Stopped);
    assert!(stopped.metrics.finished_at.is_some());
    assert_eq!(
        engine.context().stores.documents.count("canonical_patient").await.unwrap(),
        2
    );
}

#[tokio::test]
async fn test_pause_resume_and_restart_keep_metrics() {
    let engine = engine().await;
    let port = free_port();
    let id = engine.create(listener_job(port)).await.unwrap();

    engine.start(&id).await.unwrap();
    send(port, b"{\"mrn\": \"1\", \"last\": \"Doe\"}\n").await;
    wait_for_handled(&engine, &id, 1).await;

    assert_eq!(engine.pause(&id).await.unwrap().state, JobState::Paused);
    assert!(matches!(engine.start(&id).await, Err(estuary::domain::EstuaryError::Job(_))));
    assert_eq!(engine.resume(&id).await.unwrap().state, JobState::Running);

    send(port, b"{\"mrn\": \"2\", \"last\": \"Roe\"}\n").await;
    wait_for_handled(&engine, &id, 2).await;

    engine.pause(&id).await.unwrap();
    assert_eq!(engine.stop(&id).await.unwrap().state, JobState::Stopped);

    // the listener socket was released, so a restart can bind it again
    engine.start(&id).await.unwrap();
    send(port, b"{\"mrn\": \"3\", \"last\": \"Poe\"}\n").await;
    let status = wait_for_handled(&engine, &id, 3).await;
    assert_eq!(status.metrics.processed, 3);

    assert!(engine.shutdown(Duration::from_secs(5)).await);
    assert_eq!(engine.status(&id).await.unwrap().state, JobState::Stopped);
}

#[tokio::test]
async fn test_control_errors() {
    let engine = engine().await;
    let id = engine.create(listener_job(free_port())).await.unwrap();

    assert!(engine.stop(&id).await.is_err());
    assert!(engine.pause(&id).await.is_err());
    assert!(engine.resume(&id).await.is_err());
    assert_eq!(engine.status(&id).await.unwrap().state, JobState::Created);
}

#[tokio::test]
async fn test_concurrent_jobs_share_destinations() {
    let engine = engine().await;
    let first_port = free_port();
    let second_port = free_port();

    let mut second = listener_job(second_port);
    second.name = "listener-2".to_string();
    let a = engine.create(listener_job(first_port)).await.unwrap();
    let b = engine.create(second).await.unwrap();
    engine.start(&a).await.unwrap();
    engine.start(&b).await.unwrap();

    // the same patient arrives on both streams
    let message = b"{\"mrn\": \"7\", \"last\": \"Same\"}\n";
    send(first_port, message).await;
    send(second_port, message).await;
    wait_for_handled(&engine, &a, 1).await;
    wait_for_handled(&engine, &b, 1).await;

    assert!(engine.shutdown(Duration::from_secs(5)).await);
    let documents = &engine.context().stores.documents;
    assert_eq!(documents.count("canonical_patient").await.unwrap(), 1);
    assert_eq!(documents.count(&format!("staging_{a}")).await.unwrap(), 1);
    assert_eq!(documents.count(&format!("staging_{b}")).await.unwrap(), 1);

    let stats = engine.engine_stats().await.unwrap();
    assert_eq!(stats.jobs_total, 2);
    assert_eq!(stats.jobs_by_state["STOPPED"], 2);
    assert_eq!(stats.records_processed, 2);
}

//! Job orchestrator
//!
//! The [`Engine`] owns every job's lifecycle:
//!
//! ```text
//! CREATED --start--> RUNNING --stop--> STOPPED --start--> RUNNING ...
//!                    RUNNING <--pause/resume--> PAUSED --stop--> STOPPED
//!                    RUNNING --source broke / panic--> FAILED (terminal)
//! ```
//!
//! `start` fails fast: an unresolvable mapping reference or a source that
//! cannot be opened moves the job straight to FAILED with the reason. A
//! bounded source that runs dry ends in STOPPED.

pub mod context;
pub mod worker;

use crate::core::persist::JobDestinations;
use crate::domain::concept::{CachedConceptMapping, ReviewItem, ReviewStatus};
use crate::domain::ids::{JobId, ReviewId};
use crate::domain::job::{JobSpec, JobState, JobStatus};
use crate::domain::{EstuaryError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use worker::{Control, JobRun, JobShared};

pub use context::{EngineContext, EngineSettings};

/// Engine-wide counters
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub jobs_total: usize,
    /// Job count per state (`RUNNING`, `STOPPED`, ...)
    pub jobs_by_state: BTreeMap<String, usize>,
    pub records_received: u64,
    pub records_processed: u64,
    pub records_failed: u64,
    pub concept_cache_size: u64,
    pub pending_reviews: u64,
    pub identity_cache_size: usize,
    pub normalization_cache_size: usize,
    pub uptime_seconds: i64,
}

/// Job registry and control surface
pub struct Engine {
    context: Arc<EngineContext>,
    jobs: RwLock<HashMap<JobId, Arc<JobShared>>>,
    started_at: DateTime<Utc>,
}

impl Engine {
    pub fn new(context: Arc<EngineContext>) -> Self {
        Self {
            context,
            jobs: RwLock::new(HashMap::new()),
            started_at: Utc::now(),
        }
    }

    /// The shared context
    pub fn context(&self) -> &Arc<EngineContext> {
        &self.context
    }

    /// Registers a job in CREATED
    ///
    /// # Errors
    ///
    /// [`EstuaryError::Job`] when another job already uses the name.
    pub async fn create(&self, spec: JobSpec) -> Result<JobId> {
        let mut jobs = self.jobs.write().await;
        if jobs.values().any(|job| job.spec.name == spec.name) {
            return Err(EstuaryError::Job(format!("a job named '{}' already exists", spec.name)));
        }

        let id = JobId::generate();
        tracing::info!(
            job_id = %id,
            job_name = %spec.name,
            resource_type = %spec.resource_type,
            connector = %spec.source.connector,
            "Job created"
        );
        jobs.insert(id.clone(), Arc::new(JobShared::new(id.clone(), spec)));
        Ok(id)
    }

    async fn job(&self, id: &JobId) -> Result<Arc<JobShared>> {
        self.jobs
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| EstuaryError::Job(format!("unknown job {id}")))
    }

    /// Starts (or restarts) a CREATED or STOPPED job
    ///
    /// Metrics carry over across restarts.
    ///
    /// # Errors
    ///
    /// - [`EstuaryError::Job`] for an unknown job or a state that cannot start
    /// - the mapping or source error that moved the job to FAILED
    pub async fn start(&self, id: &JobId) -> Result<JobStatus> {
        let job = self.job(id).await?;
        let state = job.state();
        if !state.can_start() {
            return Err(EstuaryError::Job(format!("job {id} cannot start from {state}")));
        }
        // a STOPPED loop may still be releasing its source
        job.wait_idle().await;

        let mappings = match self.context.mappings.resolve(&job.spec.mapping_ref).await {
            Ok(mappings) => mappings,
            Err(e) => {
                tracing::error!(job_id = %id, mapping_ref = %job.spec.mapping_ref, error = %e, "Mapping list unavailable");
                job.fail(format!("mapping list '{}' unavailable: {e}", job.spec.mapping_ref));
                return Err(e);
            }
        };

        let source = match self.context.sources.open(&job.spec.source).await {
            Ok(source) => source,
            Err(e) => {
                tracing::error!(job_id = %id, connector = %job.spec.source.connector, error = %e, "Source cannot be opened");
                job.fail(e.to_string());
                return Err(e.into());
            }
        };

        job.begin_run(Utc::now())
            .map_err(|state| EstuaryError::Job(format!("job {id} cannot start from {state}")))?;

        worker::spawn(JobRun {
            job: job.clone(),
            context: self.context.clone(),
            mappings,
            source,
            destinations: JobDestinations::for_job(id, &job.spec),
        });

        Ok(job.status())
    }

    /// Stops a RUNNING or PAUSED job and waits for its loop to exit
    ///
    /// # Errors
    ///
    /// [`EstuaryError::Job`] for an unknown or inactive job.
    pub async fn stop(&self, id: &JobId) -> Result<JobStatus> {
        let job = self.job(id).await?;
        job.request_stop()
            .map_err(|state| EstuaryError::Job(format!("job {id} is not running ({state})")))?;

        tracing::info!(job_id = %id, "Stopping job");
        job.wait_idle().await;
        Ok(job.status())
    }

    /// RUNNING → PAUSED; takes effect before the next unit is pulled
    ///
    /// # Errors
    ///
    /// [`EstuaryError::Job`] when the job is not RUNNING.
    pub async fn pause(&self, id: &JobId) -> Result<JobStatus> {
        let job = self.job(id).await?;
        job.transition(|s| s == JobState::Running, JobState::Paused, Control::Pause)
            .map_err(|state| EstuaryError::Job(format!("job {id} cannot pause from {state}")))?;
        tracing::info!(job_id = %id, "Job paused");
        Ok(job.status())
    }

    /// PAUSED → RUNNING
    ///
    /// # Errors
    ///
    /// [`EstuaryError::Job`] when the job is not PAUSED.
    pub async fn resume(&self, id: &JobId) -> Result<JobStatus> {
        let job = self.job(id).await?;
        job.transition(|s| s == JobState::Paused, JobState::Running, Control::Run)
            .map_err(|state| EstuaryError::Job(format!("job {id} cannot resume from {state}")))?;
        tracing::info!(job_id = %id, "Job resumed");
        Ok(job.status())
    }

    /// State, metrics and failure reason of a job
    ///
    /// # Errors
    ///
    /// [`EstuaryError::Job`] for an unknown job.
    pub async fn status(&self, id: &JobId) -> Result<JobStatus> {
        Ok(self.job(id).await?.status())
    }

    /// Waits until the job's loop has exited, then returns its status
    ///
    /// # Errors
    ///
    /// [`EstuaryError::Job`] for an unknown job.
    pub async fn wait(&self, id: &JobId) -> Result<JobStatus> {
        let job = self.job(id).await?;
        job.wait_idle().await;
        Ok(job.status())
    }

    /// Every job, ordered by creation time then name
    pub async fn list_jobs(&self) -> Vec<JobStatus> {
        let mut statuses: Vec<JobStatus> = self.jobs.read().await.values().map(|job| job.status()).collect();
        statuses.sort_by(|a, b| {
            a.metrics
                .created_at
                .cmp(&b.metrics.created_at)
                .then_with(|| a.name.cmp(&b.name))
        });
        statuses
    }

    /// Stops every active job, waiting at most `timeout` in total
    ///
    /// Returns false when some job did not stop in time.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        let jobs: Vec<Arc<JobShared>> = self.jobs.read().await.values().cloned().collect();
        for job in &jobs {
            // inactive jobs have nothing to stop
            let _ = job.request_stop();
        }

        let all_idle = futures::future::join_all(jobs.iter().map(|job| job.wait_idle()));
        match tokio::time::timeout(timeout, all_idle).await {
            Ok(_) => true,
            Err(_) => {
                tracing::warn!(timeout_secs = timeout.as_secs(), "Jobs did not stop within the shutdown timeout");
                false
            }
        }
    }

    /// Engine-wide counters
    ///
    /// # Errors
    ///
    /// Returns an error if the concept store cannot be queried.
    pub async fn engine_stats(&self) -> Result<EngineStats> {
        let statuses = self.list_jobs().await;

        let mut jobs_by_state: BTreeMap<String, usize> = JobState::ALL
            .iter()
            .map(|state| (state.as_str().to_string(), 0))
            .collect();
        for status in &statuses {
            *jobs_by_state.entry(status.state.as_str().to_string()).or_default() += 1;
        }

        let concepts = &self.context.stores.concepts;
        Ok(EngineStats {
            jobs_total: statuses.len(),
            jobs_by_state,
            records_received: statuses.iter().map(|s| s.metrics.received).sum(),
            records_processed: statuses.iter().map(|s| s.metrics.processed).sum(),
            records_failed: statuses.iter().map(|s| s.metrics.failed).sum(),
            concept_cache_size: concepts.mapping_count().await?,
            pending_reviews: concepts.pending_review_count().await?,
            identity_cache_size: self.context.identity.cache_len(),
            normalization_cache_size: self.context.transform.normalization().len(),
            uptime_seconds: (Utc::now() - self.started_at).num_seconds(),
        })
    }

    /// Review queue items, optionally filtered by status
    ///
    /// # Errors
    ///
    /// Returns an error if the concept store cannot be queried.
    pub async fn list_reviews(&self, status: Option<ReviewStatus>, limit: usize) -> Result<Vec<ReviewItem>> {
        self.context.concepts.list_reviews(status, limit).await
    }

    /// Approves a review item, optionally choosing another concept
    ///
    /// # Errors
    ///
    /// See [`ConceptResolver::approve_review`](crate::core::concept::ConceptResolver::approve_review).
    pub async fn approve_review(&self, id: ReviewId, override_concept_id: Option<i64>) -> Result<CachedConceptMapping> {
        self.context.concepts.approve_review(id, override_concept_id).await
    }

    /// Rejects a review item
    ///
    /// # Errors
    ///
    /// See [`ConceptResolver::reject_review`](crate::core::concept::ConceptResolver::reject_review).
    pub async fn reject_review(&self, id: ReviewId) -> Result<ReviewItem> {
        self.context.concepts.reject_review(id).await
    }
}

//! Job worker loop
//!
//! One tokio task per job pulls a unit, transforms it, assigns its identity
//! and fans it out. The loop only suspends at the pause gate and in the
//! inter-iteration delay; a pending pull is also abandoned on stop so that
//! listeners without traffic can be stopped.

use super::context::EngineContext;
use crate::adapters::source::Source;
use crate::core::persist::JobDestinations;
use crate::domain::errors::{FailureDetail, SourceError};
use crate::domain::job::{JobMetrics, JobSpec, JobState, JobStatus};
use crate::domain::ids::JobId;
use crate::domain::mapping::MappingSet;
use crate::domain::record::FlatRecord;
use crate::{log_job_complete, log_job_start, log_record_failure};
use chrono::Utc;
use serde_json::Value;
use std::sync::{Arc, RwLock};
use tokio::sync::watch;

/// Signal sent from the engine to a job loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Run,
    Pause,
    Stop,
}

#[derive(Debug)]
struct JobRecord {
    state: JobState,
    metrics: JobMetrics,
    reason: Option<String>,
}

/// State shared between the engine and one job's loop
#[derive(Debug)]
pub struct JobShared {
    pub id: JobId,
    pub spec: JobSpec,
    record: RwLock<JobRecord>,
    control: watch::Sender<Control>,
    idle: watch::Sender<bool>,
}

impl JobShared {
    pub fn new(id: JobId, spec: JobSpec) -> Self {
        let (control, _) = watch::channel(Control::Stop);
        let (idle, _) = watch::channel(true);
        Self {
            id,
            spec,
            record: RwLock::new(JobRecord {
                state: JobState::Created,
                metrics: JobMetrics::created(Utc::now()),
                reason: None,
            }),
            control,
            idle,
        }
    }

    fn read<T>(&self, f: impl FnOnce(&JobRecord) -> T) -> T {
        f(&self.record.read().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }

    fn write<T>(&self, f: impl FnOnce(&mut JobRecord) -> T) -> T {
        f(&mut self.record.write().unwrap_or_else(|poisoned| poisoned.into_inner()))
    }

    pub fn state(&self) -> JobState {
        self.read(|r| r.state)
    }

    pub fn metrics(&self) -> JobMetrics {
        self.read(|r| r.metrics.clone())
    }

    pub fn status(&self) -> JobStatus {
        self.read(|r| JobStatus {
            job_id: self.id.clone(),
            name: self.spec.name.clone(),
            resource_type: self.spec.resource_type,
            state: r.state,
            metrics: r.metrics.clone(),
            reason: r.reason.clone(),
        })
    }

    /// Moves to `to` and signals the loop, when the current state satisfies
    /// `allowed` and no stop is pending
    ///
    /// State and signal change under one lock so a concurrent stop is never
    /// overwritten.
    pub fn transition(
        &self,
        allowed: impl FnOnce(JobState) -> bool,
        to: JobState,
        control: Control,
    ) -> Result<(), JobState> {
        self.write(|r| {
            if allowed(r.state) && *self.control.borrow() != Control::Stop {
                r.state = to;
                self.control.send_replace(control);
                Ok(())
            } else {
                Err(r.state)
            }
        })
    }

    /// CREATED or STOPPED → RUNNING for a new loop run
    ///
    /// The job is marked busy before the state becomes visible, so `stop()`
    /// and `wait()` never observe a RUNNING job without a loop to wait for.
    /// The first start time is kept across restarts.
    pub fn begin_run(&self, now: chrono::DateTime<Utc>) -> Result<(), JobState> {
        self.write(|r| {
            if !r.state.can_start() {
                return Err(r.state);
            }
            self.idle.send_replace(false);
            self.control.send_replace(Control::Run);
            r.state = JobState::Running;
            r.metrics.started_at.get_or_insert(now);
            r.metrics.finished_at = None;
            r.reason = None;
            Ok(())
        })
    }

    /// Signals an active loop to stop
    pub fn request_stop(&self) -> Result<(), JobState> {
        self.write(|r| {
            if r.state.is_active() {
                self.control.send_replace(Control::Stop);
                Ok(())
            } else {
                Err(r.state)
            }
        })
    }

    /// Marks the job FAILED with a reason; FAILED is terminal
    pub fn fail(&self, reason: impl Into<String>) {
        let reason = reason.into();
        self.write(|r| {
            r.state = JobState::Failed;
            r.reason = Some(reason);
            r.metrics.finished_at = Some(Utc::now());
        });
    }

    fn update_metrics(&self, f: impl FnOnce(&mut JobMetrics)) {
        self.write(|r| f(&mut r.metrics));
    }

    pub fn subscribe_control(&self) -> watch::Receiver<Control> {
        self.control.subscribe()
    }

    pub fn set_idle(&self, idle: bool) {
        self.idle.send_replace(idle);
    }

    /// Resolves once no loop is running for this job
    pub async fn wait_idle(&self) {
        let mut idle = self.idle.subscribe();
        let _ = idle.wait_for(|idle| *idle).await;
    }
}

/// Why the loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopExit {
    /// Bounded source exhausted
    Exhausted,
    /// `stop()` was called
    Stopped,
    /// The stream itself broke
    Failed(String),
}

/// Everything a started loop owns
pub struct JobRun {
    pub job: Arc<JobShared>,
    pub context: Arc<EngineContext>,
    pub mappings: MappingSet,
    pub source: Box<dyn Source>,
    pub destinations: JobDestinations,
}

/// Spawns the loop under a supervisor
///
/// A panic inside the loop is caught at the task boundary and marks the job
/// FAILED.
pub fn spawn(run: JobRun) {
    let job = run.job.clone();

    tokio::spawn(async move {
        let worker = tokio::spawn(run_loop(run));
        match worker.await {
            Ok(exit) => finish(&job, exit),
            Err(e) if e.is_panic() => {
                let message = panic_message(e.into_panic());
                tracing::error!(job_id = %job.id, panic = %message, "Job worker panicked");
                job.fail(format!("worker panicked: {message}"));
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Job worker was cancelled");
                job.fail(format!("worker cancelled: {e}"));
            }
        }
        let metrics = job.metrics();
        log_job_complete!(&job.id, job.state(), &metrics);
        job.set_idle(true);
    });
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn finish(job: &JobShared, exit: LoopExit) {
    match exit {
        LoopExit::Failed(reason) => job.fail(reason),
        LoopExit::Exhausted | LoopExit::Stopped => job.write(|r| {
            if r.state != JobState::Failed {
                r.state = JobState::Stopped;
            }
            r.metrics.finished_at = Some(Utc::now());
        }),
    }
}

/// Waits at the pause gate; false when the job should stop
async fn gate(control: &mut watch::Receiver<Control>) -> bool {
    match control.wait_for(|c| *c != Control::Pause).await {
        Ok(c) => *c == Control::Run,
        Err(_) => false,
    }
}

/// Resolves when stop is requested (or the engine is gone)
async fn stop_requested(control: &mut watch::Receiver<Control>) {
    let _ = control.wait_for(|c| *c == Control::Stop).await;
}

async fn run_loop(run: JobRun) -> LoopExit {
    let JobRun {
        job,
        context,
        mappings,
        mut source,
        destinations,
    } = run;
    let mut control = job.subscribe_control();
    let delay = context.settings.iteration_delay;

    log_job_start!(&job.id, &job.spec.name, job.spec.resource_type);

    loop {
        if !gate(&mut control).await {
            return LoopExit::Stopped;
        }

        let next = tokio::select! {
            biased;
            _ = stop_requested(&mut control) => return LoopExit::Stopped,
            next = source.next_record() => next,
        };

        let now = Utc::now();
        match next {
            Ok(None) => {
                tracing::info!(job_id = %job.id, source = %source.describe(), "Source exhausted");
                return LoopExit::Exhausted;
            }
            Ok(Some(record)) => {
                job.update_metrics(|m| {
                    m.received += 1;
                    m.last_record_at = Some(now);
                });
                process_record(&job, &context, &mappings, &destinations, record).await;
            }
            Err(SourceError::MalformedRow { row, message }) => {
                job.update_metrics(|m| {
                    m.received += 1;
                    m.last_record_at = Some(now);
                });
                let failure = FailureDetail::new("source", message).with_row(row);
                dead_letter(&job, &context, &destinations, &Value::Null, &failure).await;
            }
            Err(e) => {
                tracing::error!(job_id = %job.id, error = %e, "Source stream failed");
                return LoopExit::Failed(e.to_string());
            }
        }

        if !delay.is_zero() {
            tokio::select! {
                biased;
                _ = stop_requested(&mut control) => return LoopExit::Stopped,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

async fn process_record(
    job: &JobShared,
    context: &EngineContext,
    mappings: &MappingSet,
    destinations: &JobDestinations,
    record: FlatRecord,
) {
    let input = record.to_value();

    let built = context
        .transform
        .build_resource(&record, &mappings.mappings, job.spec.resource_type);
    for issue in &built.issues {
        tracing::warn!(job_id = %job.id, issue = %issue, "Mapped value skipped");
    }
    if built.written == 0 {
        tracing::debug!(
            job_id = %job.id,
            mappings = mappings.mappings.len(),
            "No mapped source fields present"
        );
    }
    let mut resource = built.resource;

    let now = Utc::now();
    context.identity.assign_identity(&mut resource, now);

    let outcome = context.fan_out.write(destinations, &input, &resource, now).await;
    job.update_metrics(|m| {
        if outcome.staged {
            m.processed += 1;
        } else {
            m.failed += 1;
            if outcome.dead_lettered {
                m.dead_lettered += 1;
            }
        }
        m.canonical_written += outcome.canonical_written;
        m.canonical_failed += outcome.canonical_failed;
        m.analytic_written += outcome.analytic_written;
        m.analytic_failed += outcome.analytic_failed;
    });
}

async fn dead_letter(
    job: &JobShared,
    context: &EngineContext,
    destinations: &JobDestinations,
    input: &Value,
    failure: &FailureDetail,
) {
    log_record_failure!(&job.id, failure);
    let recorded = context
        .fan_out
        .dead_letter(destinations, input, failure, Utc::now())
        .await;
    job.update_metrics(|m| {
        m.failed += 1;
        if recorded && !destinations.dry_run {
            m.dead_lettered += 1;
        }
    });
}

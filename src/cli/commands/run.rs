//! Run command implementation
//!
//! Builds the engine from the configuration, starts the selected jobs and
//! waits until every job has stopped or a shutdown signal arrives.

use crate::config::load_config;
use crate::core::orchestrator::{Engine, EngineContext};
use crate::domain::job::{JobState, JobStatus};
use clap::Args;
use std::sync::Arc;
use tokio::sync::watch;

/// Arguments for the run command
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Dry run mode - run the pipelines without writing to any store
    #[arg(long)]
    pub dry_run: bool,

    /// Only run the named job (repeatable); named jobs start even without auto_start
    #[arg(long, value_name = "NAME")]
    pub job: Vec<String>,
}

impl RunArgs {
    /// Execute the run command
    pub async fn execute(
        &self,
        config_path: &str,
        mut shutdown_signal: watch::Receiver<bool>,
    ) -> anyhow::Result<i32> {
        tracing::info!("Starting run command");

        let mut config = match load_config(config_path) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "Configuration could not be loaded");
                eprintln!("Configuration error: {e}");
                return Ok(2);
            }
        };

        if self.dry_run {
            tracing::info!("Enabling dry-run mode from CLI");
            config.application.dry_run = true;
        }
        let dry_run = config.application.dry_run;

        let selected = match config.select_jobs(&self.job) {
            Ok(jobs) => jobs,
            Err(e) => {
                eprintln!("Configuration error: {e}");
                return Ok(2);
            }
        };
        let mut specs = Vec::with_capacity(selected.len());
        for job in selected {
            if !self.job.is_empty() || job.auto_start {
                match job.to_spec(dry_run) {
                    Ok(spec) => specs.push(spec),
                    Err(e) => {
                        eprintln!("Configuration error: {e}");
                        return Ok(2);
                    }
                }
            }
        }

        if specs.is_empty() {
            println!("No jobs to run.");
            return Ok(0);
        }

        if dry_run {
            tracing::info!("Dry run mode enabled - no data will be written");
            println!("🔍 DRY RUN MODE - No data will be written to any store");
            println!();
        }

        let context = match EngineContext::from_config(&config).await {
            Ok(c) => c,
            Err(e) => {
                tracing::error!(error = %e, "Failed to build engine");
                eprintln!("Failed to initialize engine: {e}");
                return Ok(5);
            }
        };
        let engine = Arc::new(Engine::new(Arc::new(context)));

        let mut ids = Vec::with_capacity(specs.len());
        for spec in specs {
            let name = spec.name.clone();
            let id = engine.create(spec).await?;
            match engine.start(&id).await {
                Ok(_) => println!("🚀 Started job '{name}' ({id})"),
                Err(e) => println!("❌ Job '{name}' failed to start: {e}"),
            }
            ids.push(id);
        }
        println!();

        let all_done = futures::future::join_all(ids.iter().map(|id| engine.wait(id)));
        let interrupted = tokio::select! {
            _ = all_done => false,
            _ = shutdown_signal.wait_for(|stop| *stop) => true,
        };

        if interrupted {
            let timeout = engine.context().settings.shutdown_timeout;
            tracing::info!(timeout_secs = timeout.as_secs(), "Stopping all jobs");
            if !engine.shutdown(timeout).await {
                eprintln!("Some jobs did not stop within {}s", timeout.as_secs());
            }
        }

        let statuses = engine.list_jobs().await;
        print_summary(&statuses);

        if let Ok(stats) = engine.engine_stats().await {
            println!("📈 Engine:");
            println!("  Concept cache entries: {}", stats.concept_cache_size);
            println!("  Pending reviews: {}", stats.pending_reviews);
            println!("  Identity cache entries: {}", stats.identity_cache_size);
            println!("  Uptime: {}s", stats.uptime_seconds);
            println!();
        }

        let code = exit_code(&statuses, interrupted);
        match code {
            130 => {
                println!("⚠️  Run interrupted; jobs were stopped gracefully.");
                tracing::info!("Run interrupted by user signal");
            }
            1 => println!("⚠️  Run completed with failures"),
            _ => println!("✅ Run completed successfully!"),
        }
        Ok(code)
    }
}

fn print_summary(statuses: &[JobStatus]) {
    println!("📊 Job Summary:");
    for status in statuses {
        let m = &status.metrics;
        println!("  {} [{}] {}", status.name, status.resource_type, status.state);
        println!(
            "    Received: {}  Processed: {}  Failed: {}  Dead-lettered: {}",
            m.received, m.processed, m.failed, m.dead_lettered
        );
        println!(
            "    Canonical: {} written, {} failed  Analytic: {} written, {} failed",
            m.canonical_written, m.canonical_failed, m.analytic_written, m.analytic_failed
        );
        if let Some(duration) = m.duration() {
            println!(
                "    Duration: {:.2}s  Success Rate: {:.2}%",
                duration.num_milliseconds() as f64 / 1000.0,
                m.success_rate()
            );
        }
        if let Some(reason) = &status.reason {
            println!("    Reason: {reason}");
        }
    }
    println!();
}

/// 130 when interrupted, 1 when any job failed or dropped records, else 0
fn exit_code(statuses: &[JobStatus], interrupted: bool) -> i32 {
    if interrupted {
        130
    } else if statuses
        .iter()
        .any(|s| s.state == JobState::Failed || s.metrics.failed > 0)
    {
        1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ids::JobId;
    use crate::domain::job::JobMetrics;
    use crate::domain::resource::ResourceType;
    use chrono::Utc;

    fn status(state: JobState, failed: u64) -> JobStatus {
        JobStatus {
            job_id: JobId::generate(),
            name: "job".to_string(),
            resource_type: ResourceType::Patient,
            state,
            metrics: JobMetrics {
                failed,
                ..JobMetrics::created(Utc::now())
            },
            reason: None,
        }
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(&[status(JobState::Stopped, 0)], false), 0);
        assert_eq!(exit_code(&[status(JobState::Stopped, 2)], false), 1);
        assert_eq!(exit_code(&[status(JobState::Failed, 0)], false), 1);
        assert_eq!(exit_code(&[status(JobState::Failed, 0)], true), 130);
    }

    #[tokio::test]
    async fn test_missing_config_is_a_config_error() {
        let (_tx, rx) = watch::channel(false);
        let args = RunArgs {
            dry_run: false,
            job: vec![],
        };
        assert_eq!(args.execute("/nonexistent/estuary.toml", rx).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_runs_tabular_job_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("patients.csv"), "mrn,last\n1,Doe\n2,Roe\n").unwrap();
        std::fs::write(
            dir.path().join("patients_v1.toml"),
            r#"
[[mappings]]
source_field = "mrn"
target_field = "Patient.identifier[0].value"
transform_kind = "DIRECT"

[[mappings]]
source_field = "last"
target_field = "Patient.name[0].family"
transform_kind = "TRIM"
"#,
        )
        .unwrap();
        let config_path = dir.path().join("estuary.toml");
        std::fs::write(
            &config_path,
            format!(
                r#"
[mappings]
directory = "{dir}"

[[jobs]]
name = "patients"
resource_type = "Patient"
mapping_ref = "patients_v1"

[jobs.source]
type = "tabular-file"
path = "{dir}/patients.csv"
"#,
                dir = dir.path().display()
            ),
        )
        .unwrap();

        let (_tx, rx) = watch::channel(false);
        let args = RunArgs {
            dry_run: true,
            job: vec![],
        };
        assert_eq!(args.execute(config_path.to_str().unwrap(), rx).await.unwrap(), 0);
    }
}

//! Logging and observability
//!
//! Structured logging through `tracing`: console output plus optional JSON
//! files with rotation.
//!
//! # Example
//!
//! ```no_run
//! use estuary::logging::init_logging;
//! use estuary::config::LoggingConfig;
//!
//! let config = LoggingConfig::default();
//! let _guard = init_logging("info", &config).expect("Failed to initialize logging");
//!
//! tracing::info!(job_id = "abc", "Job started");
//! ```

pub mod structured;

pub use structured::{init_logging, LoggingGuard};

/// Log the start of a job run
///
/// # Example
///
/// ```no_run
/// use estuary::log_job_start;
/// use estuary::domain::{JobId, ResourceType};
///
/// let job_id = JobId::generate();
/// log_job_start!(&job_id, "patients", ResourceType::Patient);
/// ```
#[macro_export]
macro_rules! log_job_start {
    ($job_id:expr, $name:expr, $resource_type:expr) => {
        tracing::info!(
            job_id = %$job_id,
            job_name = %$name,
            resource_type = %$resource_type,
            "Job started"
        );
    };
}

/// Log the end of a job run with its final state and counters
///
/// # Example
///
/// ```no_run
/// use estuary::log_job_complete;
/// use estuary::domain::{JobId, JobMetrics, JobState};
///
/// let job_id = JobId::generate();
/// let metrics = JobMetrics::default();
/// log_job_complete!(&job_id, JobState::Stopped, &metrics);
/// ```
#[macro_export]
macro_rules! log_job_complete {
    ($job_id:expr, $state:expr, $metrics:expr) => {
        tracing::info!(
            job_id = %$job_id,
            state = %$state,
            received = $metrics.received,
            processed = $metrics.processed,
            failed = $metrics.failed,
            canonical_written = $metrics.canonical_written,
            analytic_written = $metrics.analytic_written,
            "Job finished"
        );
    };
}

/// Log a record that was dead-lettered
///
/// # Example
///
/// ```no_run
/// use estuary::log_record_failure;
/// use estuary::domain::{FailureDetail, JobId};
///
/// let job_id = JobId::generate();
/// let detail = FailureDetail::new("staging", "connection reset").with_row(3);
/// log_record_failure!(&job_id, &detail);
/// ```
#[macro_export]
macro_rules! log_record_failure {
    ($job_id:expr, $detail:expr) => {
        tracing::warn!(
            job_id = %$job_id,
            stage = %$detail.stage,
            row = ?$detail.row,
            error = %$detail.message,
            "Record failed; routed to dead letter"
        );
    };
}

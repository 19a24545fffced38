//! Job domain model
//!
//! A job binds one source connector, one approved mapping list and one
//! resource type to a set of destinations. This module defines its
//! specification, lifecycle state, and metrics.

use super::errors::SourceError;
use super::ids::JobId;
use super::resource::ResourceType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    /// Created, never started
    Created,
    /// Loop running
    Running,
    /// Loop parked before the next pull
    Paused,
    /// Loop exited cleanly (stop requested or source exhausted)
    Stopped,
    /// Unrecoverable failure; terminal
    Failed,
}

impl JobState {
    /// All states, in lifecycle order
    pub const ALL: [JobState; 5] = [
        JobState::Created,
        JobState::Running,
        JobState::Paused,
        JobState::Stopped,
        JobState::Failed,
    ];

    /// True when `start()` is permitted from this state
    pub fn can_start(&self) -> bool {
        matches!(self, JobState::Created | JobState::Stopped)
    }

    /// True while the loop task is alive
    pub fn is_active(&self) -> bool {
        matches!(self, JobState::Running | JobState::Paused)
    }

    /// Upper-case name
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Created => "CREATED",
            JobState::Running => "RUNNING",
            JobState::Paused => "PAUSED",
            JobState::Stopped => "STOPPED",
            JobState::Failed => "FAILED",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-job counters and timestamps
///
/// Counters only ever increase; the job loop is the sole writer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMetrics {
    /// Units pulled from the source (including malformed rows)
    pub received: u64,
    /// Units that reached staging
    pub processed: u64,
    /// Units that failed transform, identity or staging
    pub failed: u64,
    /// Units written to the dead-letter collection
    pub dead_lettered: u64,
    /// Canonical upserts that were applied or found stale
    pub canonical_written: u64,
    /// Canonical upserts that failed
    pub canonical_failed: u64,
    /// Analytic rows written
    pub analytic_written: u64,
    /// Analytic cascades that failed
    pub analytic_failed: u64,
    /// Creation time
    pub created_at: Option<DateTime<Utc>>,
    /// Time of the first `start()`; kept across restarts
    pub started_at: Option<DateTime<Utc>>,
    /// Time the most recent unit was pulled
    pub last_record_at: Option<DateTime<Utc>>,
    /// Time the loop last exited
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobMetrics {
    /// Fresh metrics stamped with a creation time
    pub fn created(now: DateTime<Utc>) -> Self {
        Self {
            created_at: Some(now),
            ..Self::default()
        }
    }

    /// Success rate over received units, in percent
    pub fn success_rate(&self) -> f64 {
        if self.received == 0 {
            0.0
        } else {
            (self.processed as f64 / self.received as f64) * 100.0
        }
    }

    /// Wall-clock duration of the last run, when it has finished
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) if end >= start => Some(end - start),
            _ => None,
        }
    }
}

/// Snapshot returned by `Engine::status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    /// Job identifier
    pub job_id: JobId,
    /// Human-readable name
    pub name: String,
    /// Resource type produced
    pub resource_type: ResourceType,
    /// Current state
    pub state: JobState,
    /// Metrics at snapshot time
    pub metrics: JobMetrics,
    /// Failure reason (set when the job entered FAILED)
    pub reason: Option<String>,
}

/// Source connector configuration: a connector type plus an open key-value map
///
/// ```toml
/// [jobs.source]
/// type = "tabular-file"
/// path = "data/patients.csv"
/// delimiter = ";"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSpec {
    /// Registered connector type (e.g. `tabular-file`)
    #[serde(rename = "type")]
    pub connector: String,

    /// Connector-specific settings; unknown keys are ignored by connectors
    #[serde(flatten)]
    pub settings: BTreeMap<String, Value>,
}

impl SourceSpec {
    /// Creates a spec for a connector type with no settings
    pub fn new(connector: impl Into<String>) -> Self {
        Self {
            connector: connector.into(),
            settings: BTreeMap::new(),
        }
    }

    /// Builder-style setting insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    /// Required string setting
    pub fn require_str(&self, key: &str) -> Result<&str, SourceError> {
        self.get_str(key).filter(|s| !s.trim().is_empty()).ok_or_else(|| {
            SourceError::InvalidConfig(format!(
                "connector '{}' requires key '{key}'",
                self.connector
            ))
        })
    }

    /// Optional string setting
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.settings.get(key).and_then(Value::as_str)
    }

    /// Optional boolean setting; accepts `true`/`false` strings too
    pub fn get_bool(&self, key: &str) -> Result<Option<bool>, SourceError> {
        match self.settings.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Ok(Some(true)),
                "false" | "no" | "0" => Ok(Some(false)),
                _ => Err(self.invalid(key, "a boolean")),
            },
            Some(_) => Err(self.invalid(key, "a boolean")),
        }
    }

    /// Optional non-negative integer setting; accepts numeric strings too
    pub fn get_u64(&self, key: &str) -> Result<Option<u64>, SourceError> {
        match self.settings.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n
                .as_u64()
                .map(Some)
                .ok_or_else(|| self.invalid(key, "a non-negative integer")),
            Some(Value::String(s)) => s
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| self.invalid(key, "a non-negative integer")),
            Some(_) => Err(self.invalid(key, "a non-negative integer")),
        }
    }

    fn invalid(&self, key: &str, expected: &str) -> SourceError {
        SourceError::InvalidConfig(format!(
            "connector '{}' key '{key}' must be {expected}",
            self.connector
        ))
    }
}

/// Analytic cascade switch for a job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoSync {
    /// Canonical resources are not cascaded
    #[default]
    Off,
    /// Every canonical write cascades into the analytic store
    Analytic,
}

/// Where a job writes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationConfig {
    /// Staging collection; defaults to `staging_<job id>`
    #[serde(default)]
    pub staging_collection: Option<String>,

    /// Upsert into `canonical_<type>`
    #[serde(default = "default_true")]
    pub canonical: bool,

    /// Analytic cascade
    #[serde(default)]
    pub auto_sync: AutoSync,
}

fn default_true() -> bool {
    true
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            staging_collection: None,
            canonical: true,
            auto_sync: AutoSync::Off,
        }
    }
}

impl DestinationConfig {
    /// Staging collection name for a job
    pub fn staging_for(&self, job_id: &JobId) -> String {
        self.staging_collection
            .clone()
            .unwrap_or_else(|| format!("staging_{job_id}"))
    }

    /// Dead-letter collection name for a job
    pub fn dead_letter_for(&self, job_id: &JobId) -> String {
        format!("{}_dead_letter", self.staging_for(job_id))
    }
}

/// Everything needed to create a job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Human-readable name
    pub name: String,
    /// Resource type the mappings produce
    pub resource_type: ResourceType,
    /// Approved mapping list reference
    pub mapping_ref: String,
    /// Source connector
    pub source: SourceSpec,
    /// Destinations
    pub destination: DestinationConfig,
    /// Skip all destination writes
    pub dry_run: bool,
}

impl JobSpec {
    /// Creates a new builder
    pub fn builder() -> JobSpecBuilder {
        JobSpecBuilder::default()
    }
}

/// Builder for [`JobSpec`]
#[derive(Debug, Default)]
pub struct JobSpecBuilder {
    name: Option<String>,
    resource_type: Option<ResourceType>,
    mapping_ref: Option<String>,
    source: Option<SourceSpec>,
    destination: DestinationConfig,
    dry_run: bool,
}

impl JobSpecBuilder {
    /// Sets the job name
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the resource type
    pub fn resource_type(mut self, resource_type: ResourceType) -> Self {
        self.resource_type = Some(resource_type);
        self
    }

    /// Sets the mapping reference
    pub fn mapping_ref(mut self, mapping_ref: impl Into<String>) -> Self {
        self.mapping_ref = Some(mapping_ref.into());
        self
    }

    /// Sets the source connector
    pub fn source(mut self, source: SourceSpec) -> Self {
        self.source = Some(source);
        self
    }

    /// Sets the destinations
    pub fn destination(mut self, destination: DestinationConfig) -> Self {
        self.destination = destination;
        self
    }

    /// Enables or disables dry-run
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Builds the spec
    ///
    /// # Errors
    ///
    /// Returns an error if a required field is missing.
    pub fn build(self) -> Result<JobSpec, String> {
        let name = self.name.ok_or("name is required")?;
        if name.trim().is_empty() {
            return Err("name cannot be empty".to_string());
        }
        Ok(JobSpec {
            name,
            resource_type: self.resource_type.ok_or("resource_type is required")?,
            mapping_ref: self.mapping_ref.ok_or("mapping_ref is required")?,
            source: self.source.ok_or("source is required")?,
            destination: self.destination,
            dry_run: self.dry_run,
        })
    }
}

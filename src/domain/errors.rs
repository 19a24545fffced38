//! Domain error types
//!
//! This module defines the error hierarchy for Estuary. All errors are
//! domain-specific and don't expose third-party types.

use thiserror::Error;

/// Main Estuary error type
///
/// This is the primary error type used throughout the application.
/// It wraps specific error types and provides context for error handling.
#[derive(Debug, Error)]
pub enum EstuaryError {
    /// Configuration-related errors (malformed connector config, bad TOML, ...)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Source adapter errors
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    /// Destination store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A single record could not be transformed
    #[error("Transformation error: {0}")]
    Transformation(String),

    /// A mapping list failed approval
    #[error("Mapping error: {0}")]
    Mapping(String),

    /// A concept resolver stage failed; never escapes the resolver chain
    #[error("Concept resolution error: {0}")]
    ConceptResolution(String),

    /// Job lifecycle errors (unknown job, invalid transition)
    #[error("Job error: {0}")]
    Job(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Network/connection errors
    #[error("Connection error: {0}")]
    Connection(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// Generic errors with context
    #[error("{0}")]
    Other(String),
}

/// Source adapter errors
///
/// `Unavailable` is fatal for the owning job: the orchestrator never loops on
/// an input it cannot open.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The source could not be opened at all
    #[error("Source unavailable: {0}")]
    Unavailable(String),

    /// Required connector key missing or malformed
    #[error("Invalid connector configuration: {0}")]
    InvalidConfig(String),

    /// Connector type is not registered
    #[error("Unknown connector type: {0}")]
    UnknownConnector(String),

    /// The stream broke after it was opened
    #[error("Source stream failed: {0}")]
    StreamFailed(String),

    /// One row could not be decoded; the stream itself is still usable
    #[error("Malformed row {row}: {message}")]
    MalformedRow { row: u64, message: String },
}

/// Destination store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Store unreachable
    #[error("Failed to connect to store: {0}")]
    ConnectionFailed(String),

    /// Failed to create a collection or index
    #[error("Failed to create collection {collection}: {message}")]
    CollectionCreationFailed { collection: String, message: String },

    /// Failed to insert a document
    #[error("Failed to insert document into {collection}: {message}")]
    InsertFailed { collection: String, message: String },

    /// Failed to upsert a document
    #[error("Failed to upsert document into {collection}: {message}")]
    UpsertFailed { collection: String, message: String },

    /// Failed to query documents
    #[error("Failed to query {collection}: {message}")]
    QueryFailed { collection: String, message: String },

    /// Invalid collection name
    #[error("Invalid collection name: {0}")]
    InvalidCollection(String),

    /// Requested entity not found
    #[error("Not found: {0}")]
    NotFound(String),
}

/// Dead-letter reason attached to failed inputs
///
/// Provides additional context for records that did not reach staging.
#[derive(Debug, Clone)]
pub struct FailureDetail {
    /// Pipeline stage that failed (`source` or `staging`)
    pub stage: String,

    /// Error message
    pub message: String,

    /// Row number within the source, when known
    pub row: Option<u64>,
}

impl FailureDetail {
    /// Creates a new failure detail
    pub fn new(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            message: message.into(),
            row: None,
        }
    }

    /// Sets the source row number
    pub fn with_row(mut self, row: u64) -> Self {
        self.row = Some(row);
        self
    }
}

impl From<std::io::Error> for EstuaryError {
    fn from(err: std::io::Error) -> Self {
        EstuaryError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for EstuaryError {
    fn from(err: serde_json::Error) -> Self {
        EstuaryError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for EstuaryError {
    fn from(err: toml::de::Error) -> Self {
        EstuaryError::Configuration(format!("TOML parse error: {err}"))
    }
}

impl From<csv::Error> for EstuaryError {
    fn from(err: csv::Error) -> Self {
        EstuaryError::Serialization(format!("CSV error: {err}"))
    }
}

impl From<reqwest::Error> for EstuaryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            EstuaryError::Connection(format!("Request timeout: {err}"))
        } else {
            EstuaryError::Connection(err.to_string())
        }
    }
}

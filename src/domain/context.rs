//! Error context extension trait
//!
//! Adds `anyhow`-style `.context()` / `.with_context()` to any result whose
//! error converts into [`EstuaryError`], so library code can annotate failures
//! without giving up the typed error.
//!
//! # Examples
//!
//! ```rust
//! use estuary::domain::Result;
//! use estuary::domain::context::ResultExt;
//!
//! fn read_mapping(path: &str) -> Result<String> {
//!     std::fs::read_to_string(path).with_context(|| format!("Failed to read mapping file {path}"))
//! }
//! ```

use crate::domain::errors::EstuaryError;
use crate::domain::result::Result;

/// Extension trait for adding context to `Result` types
pub trait ResultExt<T> {
    /// Add context to an error (evaluated eagerly)
    fn context<C>(self, context: C) -> Result<T>
    where
        C: std::fmt::Display + Send + Sync + 'static;

    /// Add context to an error, computed only when an error occurs
    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: std::fmt::Display + Send + Sync + 'static,
        F: FnOnce() -> C;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: Into<EstuaryError>,
{
    fn context<C>(self, context: C) -> Result<T>
    where
        C: std::fmt::Display + Send + Sync + 'static,
    {
        self.map_err(|e| wrap(e.into(), context))
    }

    fn with_context<C, F>(self, f: F) -> Result<T>
    where
        C: std::fmt::Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        self.map_err(|e| wrap(e.into(), f()))
    }
}

/// Configuration errors keep their variant (the CLI maps them to exit code 2);
/// everything else collapses into `Other`.
fn wrap(base: EstuaryError, context: impl std::fmt::Display) -> EstuaryError {
    match base {
        EstuaryError::Configuration(msg) => EstuaryError::Configuration(format!("{context}: {msg}")),
        other => EstuaryError::Other(format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::StoreError;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_context_keeps_configuration_category() {
        let result: Result<()> = Err(EstuaryError::Configuration("missing key 'path'".to_string()));
        let err = result.context("Job 'labs'").unwrap_err();

        assert!(matches!(err, EstuaryError::Configuration(_)));
        assert_eq!(err.to_string(), "Configuration error: Job 'labs': missing key 'path'");
    }

    #[test]
    fn test_with_context_is_lazy() {
        let called = Arc::new(AtomicBool::new(false));
        let flag = called.clone();

        let result: Result<i32> = Ok(42);
        let out = result.with_context(move || {
            flag.store(true, Ordering::SeqCst);
            "expensive"
        });

        assert_eq!(out.unwrap(), 42);
        assert!(!called.load(Ordering::SeqCst));
    }

    #[test]
    fn test_context_chaining_with_store_error() {
        let result: std::result::Result<(), StoreError> = Err(StoreError::QueryFailed {
            collection: "canonical_patient".to_string(),
            message: "connection reset".to_string(),
        });
        let err = result
            .context("Failed to read resource")
            .context("Canonical lookup failed")
            .unwrap_err()
            .to_string();

        assert!(err.contains("Canonical lookup failed"));
        assert!(err.contains("Failed to read resource"));
        assert!(err.contains("connection reset"));
    }

    #[test]
    fn test_io_error_with_context() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
        let result: std::result::Result<(), std::io::Error> = Err(io_error);
        let err = result.context("Failed to read estuary.toml").unwrap_err();
        assert!(err.to_string().contains("File not found"));
    }
}

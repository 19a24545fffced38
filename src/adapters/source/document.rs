//! Document file source (`document-store`)
//!
//! Reads a JSON array of documents or newline-delimited JSON and flattens
//! each document into dotted columns (`name[0].family`).

use super::{Source, SourceFactory, SourceResult};
use crate::domain::errors::SourceError;
use crate::domain::job::SourceSpec;
use crate::domain::record::{flatten_document, FlatRecord};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;

/// Connector type name
pub const CONNECTOR: &str = "document-store";

/// Opens [`DocumentFileSource`]s
pub struct DocumentFileSourceFactory;

#[async_trait]
impl SourceFactory for DocumentFileSourceFactory {
    async fn open(&self, spec: &SourceSpec) -> SourceResult<Box<dyn Source>> {
        let path = spec.require_str("path")?;
        Ok(Box::new(DocumentFileSource::open(path).await?))
    }
}

/// Documents parsed from one file
pub struct DocumentFileSource {
    path: String,
    pending: VecDeque<Result<Value, String>>,
    row: u64,
}

impl DocumentFileSource {
    /// Reads and splits the file
    ///
    /// A file starting with `[` must be a valid JSON array; otherwise each
    /// non-blank line is one document and bad lines surface one at a time as
    /// malformed rows.
    ///
    /// # Errors
    ///
    /// [`SourceError::Unavailable`] when the file cannot be read or the array
    /// does not parse.
    pub async fn open(path: &str) -> SourceResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| SourceError::Unavailable(format!("cannot read '{path}': {e}")))?;

        let pending = if content.trim_start().starts_with('[') {
            let documents: Vec<Value> = serde_json::from_str(&content).map_err(|e| {
                SourceError::Unavailable(format!("'{path}' is not a valid JSON array: {e}"))
            })?;
            documents.into_iter().map(Ok).collect()
        } else {
            content
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(|line| serde_json::from_str::<Value>(line).map_err(|e| format!("invalid JSON: {e}")))
                .collect()
        };

        Ok(Self {
            path: path.to_string(),
            pending,
            row: 0,
        })
    }
}

#[async_trait]
impl Source for DocumentFileSource {
    async fn next_record(&mut self) -> SourceResult<Option<FlatRecord>> {
        let Some(next) = self.pending.pop_front() else {
            return Ok(None);
        };
        self.row += 1;

        match next {
            Ok(document @ Value::Object(_)) => Ok(Some(flatten_document(&document))),
            Ok(other) => Err(SourceError::MalformedRow {
                row: self.row,
                message: format!("expected a JSON object, got {other}"),
            }),
            Err(message) => Err(SourceError::MalformedRow { row: self.row, message }),
        }
    }

    fn describe(&self) -> String {
        format!("{CONNECTOR} {} ({} documents)", self.path, self.pending.len())
    }
}

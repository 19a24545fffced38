//! Delimited text file source (`tabular-file`)
//!
//! ```toml
//! [jobs.source]
//! type = "tabular-file"
//! path = "data/patients.csv"
//! delimiter = ";"      # optional, default ","; "tab" or "\t" for TSV
//! has_headers = true   # optional; without headers columns are column_1..N
//! ```

use super::{Source, SourceFactory, SourceResult};
use crate::domain::errors::SourceError;
use crate::domain::job::SourceSpec;
use crate::domain::record::FlatRecord;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::fs::File;

/// Connector type name
pub const CONNECTOR: &str = "tabular-file";

/// Rows parsed per blocking read
const READ_BATCH: usize = 256;

/// Opens [`TabularFileSource`]s
pub struct TabularFileSourceFactory;

#[async_trait]
impl SourceFactory for TabularFileSourceFactory {
    async fn open(&self, spec: &SourceSpec) -> SourceResult<Box<dyn Source>> {
        let path = spec.require_str("path")?;
        let delimiter = parse_delimiter(spec.get_str("delimiter"))?;
        let has_headers = spec.get_bool("has_headers")?.unwrap_or(true);
        Ok(Box::new(TabularFileSource::open(path, delimiter, has_headers).await?))
    }
}

fn parse_delimiter(raw: Option<&str>) -> SourceResult<u8> {
    match raw {
        None => Ok(b','),
        Some("tab") | Some("\\t") | Some("\t") => Ok(b'\t'),
        Some(value) if value.len() == 1 && value.is_ascii() => Ok(value.as_bytes()[0]),
        Some(value) => Err(SourceError::InvalidConfig(format!(
            "connector '{CONNECTOR}' delimiter must be a single ASCII character, got '{value}'"
        ))),
    }
}

fn open_reader(
    path: &str,
    delimiter: u8,
    has_headers: bool,
) -> SourceResult<(csv::Reader<File>, Option<Vec<String>>)> {
    let file = File::open(path).map_err(|e| SourceError::Unavailable(format!("cannot open '{path}': {e}")))?;

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(has_headers)
        .trim(csv::Trim::Headers)
        .from_reader(file);

    let headers = if has_headers {
        let headers = reader
            .headers()
            .map_err(|e| SourceError::Unavailable(format!("cannot read header of '{path}': {e}")))?;
        Some(headers.iter().map(str::to_string).collect())
    } else {
        None
    };
    Ok((reader, headers))
}

/// Streams rows of a delimited file
///
/// File reads and parsing run on the blocking pool, a batch at a time.
pub struct TabularFileSource {
    path: String,
    /// `None` once the file is exhausted (or while a batch is being read)
    reader: Option<csv::Reader<File>>,
    headers: Option<Vec<String>>,
    pending: VecDeque<csv::Result<csv::StringRecord>>,
    row: u64,
}

impl TabularFileSource {
    /// Opens the file and reads its header row
    ///
    /// # Errors
    ///
    /// [`SourceError::Unavailable`] when the file cannot be opened or its
    /// header row cannot be read.
    pub async fn open(path: &str, delimiter: u8, has_headers: bool) -> SourceResult<Self> {
        let owned = path.to_string();
        let (reader, headers) = tokio::task::spawn_blocking(move || open_reader(&owned, delimiter, has_headers))
            .await
            .map_err(|e| SourceError::Unavailable(format!("opening '{path}' was interrupted: {e}")))??;

        Ok(Self {
            path: path.to_string(),
            reader: Some(reader),
            headers,
            pending: VecDeque::new(),
            row: 0,
        })
    }

    /// Reads the next batch of rows off the runtime thread
    async fn fill(&mut self) -> SourceResult<()> {
        let Some(mut reader) = self.reader.take() else {
            return Ok(());
        };

        let (reader, batch, exhausted) = tokio::task::spawn_blocking(move || {
            let mut batch = Vec::with_capacity(READ_BATCH);
            let mut exhausted = false;
            while batch.len() < READ_BATCH {
                let mut row = csv::StringRecord::new();
                match reader.read_record(&mut row) {
                    Ok(true) => batch.push(Ok(row)),
                    Ok(false) => {
                        exhausted = true;
                        break;
                    }
                    Err(e) => {
                        // a broken stream ends the file; a bad row does not
                        let fatal = matches!(e.kind(), csv::ErrorKind::Io(_));
                        batch.push(Err(e));
                        if fatal {
                            exhausted = true;
                            break;
                        }
                    }
                }
            }
            (reader, batch, exhausted)
        })
        .await
        .map_err(|e| SourceError::StreamFailed(format!("reading '{}' was interrupted: {e}", self.path)))?;

        if !exhausted {
            self.reader = Some(reader);
        }
        self.pending.extend(batch);
        Ok(())
    }

    fn to_record(&self, row: &csv::StringRecord) -> FlatRecord {
        row.iter()
            .enumerate()
            .map(|(index, cell)| {
                let column = self
                    .headers
                    .as_ref()
                    .and_then(|headers| headers.get(index).cloned())
                    .unwrap_or_else(|| format!("column_{}", index + 1));
                let value = if cell.trim().is_empty() {
                    Value::Null
                } else {
                    Value::String(cell.to_string())
                };
                (column, value)
            })
            .collect()
    }
}

#[async_trait]
impl Source for TabularFileSource {
    async fn next_record(&mut self) -> SourceResult<Option<FlatRecord>> {
        loop {
            match self.pending.pop_front() {
                Some(Ok(row)) => {
                    self.row += 1;
                    return Ok(Some(self.to_record(&row)));
                }
                Some(Err(e)) if matches!(e.kind(), csv::ErrorKind::Io(_)) => {
                    return Err(SourceError::StreamFailed(format!("reading '{}': {e}", self.path)));
                }
                Some(Err(e)) => {
                    self.row += 1;
                    return Err(SourceError::MalformedRow {
                        row: self.row,
                        message: e.to_string(),
                    });
                }
                None if self.reader.is_none() => return Ok(None),
                None => self.fill().await?,
            }
        }
    }

    fn describe(&self) -> String {
        format!("{CONNECTOR} {}", self.path)
    }
}

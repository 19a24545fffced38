//! Source adapters
//!
//! A source yields a bounded (or, for listeners, unbounded) sequence of
//! [`FlatRecord`]s. Connectors are looked up by type name in a
//! [`SourceRegistry`]; the four built-in types are registered by
//! [`SourceRegistry::with_builtin`] and more can be added at runtime.
//!
//! Error contract:
//! - `open` failing (missing file, bad config, unreachable endpoint) is fatal
//!   for the job
//! - [`SourceError::MalformedRow`] from `next_record` affects one unit only
//! - any other error from `next_record` means the stream itself broke

pub mod document;
pub mod remote;
pub mod stream;
pub mod tabular;

use crate::domain::errors::SourceError;
use crate::domain::job::SourceSpec;
use crate::domain::record::FlatRecord;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

pub use document::{DocumentFileSource, DocumentFileSourceFactory};
pub use remote::{RemoteApiSource, RemoteApiSourceFactory};
pub use stream::{MessageStreamSource, MessageStreamSourceFactory};
pub use tabular::{TabularFileSource, TabularFileSourceFactory};

/// Result alias for source operations
pub type SourceResult<T> = std::result::Result<T, SourceError>;

/// An opened source
#[async_trait]
pub trait Source: Send {
    /// Pulls the next unit; `Ok(None)` once the source is exhausted
    async fn next_record(&mut self) -> SourceResult<Option<FlatRecord>>;

    /// Short description for logs (connector and location)
    fn describe(&self) -> String;
}

/// Opens sources of one connector type
#[async_trait]
pub trait SourceFactory: Send + Sync {
    /// Opens a source; unknown settings are ignored
    ///
    /// # Errors
    ///
    /// [`SourceError::InvalidConfig`] for missing or malformed settings,
    /// [`SourceError::Unavailable`] when the input cannot be opened.
    async fn open(&self, spec: &SourceSpec) -> SourceResult<Box<dyn Source>>;
}

/// Connector type → factory
#[derive(Default)]
pub struct SourceRegistry {
    factories: RwLock<HashMap<String, Arc<dyn SourceFactory>>>,
}

impl SourceRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with `tabular-file`, `message-stream-listener`,
    /// `document-store` and `remote-resource-api`
    pub fn with_builtin() -> Self {
        let registry = Self::new();
        registry.register(tabular::CONNECTOR, Arc::new(TabularFileSourceFactory));
        registry.register(stream::CONNECTOR, Arc::new(MessageStreamSourceFactory));
        registry.register(document::CONNECTOR, Arc::new(DocumentFileSourceFactory));
        registry.register(remote::CONNECTOR, Arc::new(RemoteApiSourceFactory));
        registry
    }

    /// Registers (or replaces) a connector type
    pub fn register(&self, connector: impl Into<String>, factory: Arc<dyn SourceFactory>) {
        let connector = connector.into();
        tracing::debug!(connector = %connector, "Registering source connector");
        self.factories
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(connector, factory);
    }

    /// True when a connector type is registered
    pub fn contains(&self, connector: &str) -> bool {
        self.factories
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(connector)
    }

    /// Registered connector types, sorted
    pub fn connectors(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .factories
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Opens a source for a connector spec
    ///
    /// # Errors
    ///
    /// [`SourceError::UnknownConnector`] when the type is not registered, or
    /// whatever the connector's factory reports.
    pub async fn open(&self, spec: &SourceSpec) -> SourceResult<Box<dyn Source>> {
        let factory = self
            .factories
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(spec.connector.trim())
            .cloned()
            .ok_or_else(|| SourceError::UnknownConnector(spec.connector.clone()))?;

        let source = factory.open(spec).await?;
        tracing::info!(source = %source.describe(), "Source opened");
        Ok(source)
    }
}

/// A fixed list of records; used for embedding and tests
pub struct VecSource {
    records: std::vec::IntoIter<SourceResult<FlatRecord>>,
}

impl VecSource {
    pub fn new(records: Vec<FlatRecord>) -> Self {
        Self::from_results(records.into_iter().map(Ok).collect())
    }

    /// Records interleaved with per-unit errors
    pub fn from_results(records: Vec<SourceResult<FlatRecord>>) -> Self {
        Self {
            records: records.into_iter(),
        }
    }
}

#[async_trait]
impl Source for VecSource {
    async fn next_record(&mut self) -> SourceResult<Option<FlatRecord>> {
        self.records.next().transpose()
    }

    fn describe(&self) -> String {
        format!("in-memory ({} remaining)", self.records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_connectors() {
        let registry = SourceRegistry::with_builtin();
        assert_eq!(
            registry.connectors(),
            vec![
                "document-store",
                "message-stream-listener",
                "remote-resource-api",
                "tabular-file"
            ]
        );
    }

    #[tokio::test]
    async fn test_unknown_connector() {
        let registry = SourceRegistry::with_builtin();
        let err = registry.open(&SourceSpec::new("carrier-pigeon")).await.err().unwrap();
        assert!(matches!(err, SourceError::UnknownConnector(name) if name == "carrier-pigeon"));
    }

    struct FixedFactory;

    #[async_trait]
    impl SourceFactory for FixedFactory {
        async fn open(&self, spec: &SourceSpec) -> SourceResult<Box<dyn Source>> {
            let count = spec.get_u64("count")?.unwrap_or(1);
            Ok(Box::new(VecSource::new(
                (0..count).map(|i| FlatRecord::new().with("n", i)).collect(),
            )))
        }
    }

    #[tokio::test]
    async fn test_runtime_registration() {
        let registry = SourceRegistry::new();
        registry.register("fixed", Arc::new(FixedFactory));

        let mut source = registry
            .open(&SourceSpec::new("fixed").with("count", 2))
            .await
            .unwrap();
        assert!(source.next_record().await.unwrap().is_some());
        assert!(source.next_record().await.unwrap().is_some());
        assert!(source.next_record().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_vec_source_yields_errors_in_order() {
        let mut source = VecSource::from_results(vec![
            Ok(FlatRecord::new().with("a", 1)),
            Err(SourceError::MalformedRow {
                row: 2,
                message: "bad".to_string(),
            }),
        ]);
        assert!(source.next_record().await.unwrap().is_some());
        assert!(source.next_record().await.is_err());
        assert!(source.next_record().await.unwrap().is_none());
    }
}

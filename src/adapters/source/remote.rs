//! Remote resource API source (`remote-resource-api`)
//!
//! Fetches a JSON array or a FHIR-style `Bundle` over HTTP. Bundles are
//! unwrapped (`entry[].resource`) and their `next` links followed as the
//! job consumes records.
//!
//! ```toml
//! [jobs.source]
//! type = "remote-resource-api"
//! url = "https://fhir.example.org/Patient?_count=100"
//! bearer_token = "${FHIR_TOKEN}"   # optional
//! timeout_seconds = 30             # optional
//! ```

use super::{Source, SourceFactory, SourceResult};
use crate::domain::errors::SourceError;
use crate::domain::job::SourceSpec;
use crate::domain::record::{flatten_document, FlatRecord};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Duration;

/// Connector type name
pub const CONNECTOR: &str = "remote-resource-api";

const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

/// Opens [`RemoteApiSource`]s
pub struct RemoteApiSourceFactory;

#[async_trait]
impl SourceFactory for RemoteApiSourceFactory {
    async fn open(&self, spec: &SourceSpec) -> SourceResult<Box<dyn Source>> {
        let url = spec.require_str("url")?;
        url::Url::parse(url).map_err(|e| {
            SourceError::InvalidConfig(format!("connector '{CONNECTOR}' url '{url}' is invalid: {e}"))
        })?;
        let timeout = spec.get_u64("timeout_seconds")?.unwrap_or(DEFAULT_TIMEOUT_SECONDS);
        let token = spec.get_str("bearer_token").map(str::to_string);

        Ok(Box::new(
            RemoteApiSource::open(url, token, Duration::from_secs(timeout)).await?,
        ))
    }
}

/// Paged HTTP source
pub struct RemoteApiSource {
    client: reqwest::Client,
    url: String,
    bearer_token: Option<String>,
    pending: VecDeque<Value>,
    next_page: Option<String>,
    row: u64,
}

impl RemoteApiSource {
    /// Fetches the first page
    ///
    /// # Errors
    ///
    /// [`SourceError::Unavailable`] when the endpoint cannot be reached,
    /// answers with a non-success status or returns something other than
    /// JSON.
    pub async fn open(url: &str, bearer_token: Option<String>, timeout: Duration) -> SourceResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::Unavailable(format!("cannot build HTTP client: {e}")))?;

        let mut source = Self {
            client,
            url: url.to_string(),
            bearer_token,
            pending: VecDeque::new(),
            next_page: None,
            row: 0,
        };
        source
            .fetch(url)
            .await
            .map_err(SourceError::Unavailable)?;
        Ok(source)
    }

    async fn fetch(&mut self, url: &str) -> Result<(), String> {
        let mut request = self.client.get(url).header("Accept", "application/json");
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| format!("GET {url} failed: {e}"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(format!("GET {url} returned {status}: {body}"));
        }

        let page: Value = response
            .json()
            .await
            .map_err(|e| format!("GET {url} returned invalid JSON: {e}"))?;

        let (documents, next_page) = unwrap_page(page);
        tracing::debug!(url = %url, documents = documents.len(), "Fetched remote page");
        self.pending.extend(documents);
        self.next_page = next_page;
        Ok(())
    }
}

/// Splits a response into documents and the `next` link, if any
fn unwrap_page(page: Value) -> (Vec<Value>, Option<String>) {
    match page {
        Value::Array(items) => (items, None),
        Value::Object(mut map)
            if map.get("resourceType").and_then(Value::as_str) == Some("Bundle") =>
        {
            let next = map
                .get("link")
                .and_then(Value::as_array)
                .and_then(|links| {
                    links.iter().find(|link| {
                        link.get("relation").and_then(Value::as_str) == Some("next")
                    })
                })
                .and_then(|link| link.get("url"))
                .and_then(Value::as_str)
                .map(str::to_string);

            let documents = match map.remove("entry") {
                Some(Value::Array(entries)) => entries
                    .into_iter()
                    .map(|mut entry| match entry.get_mut("resource") {
                        Some(resource) => resource.take(),
                        None => entry,
                    })
                    .collect(),
                _ => Vec::new(),
            };
            (documents, next)
        }
        single => (vec![single], None),
    }
}

#[async_trait]
impl Source for RemoteApiSource {
    async fn next_record(&mut self) -> SourceResult<Option<FlatRecord>> {
        while self.pending.is_empty() {
            let Some(next) = self.next_page.take() else {
                return Ok(None);
            };
            self.fetch(&next).await.map_err(SourceError::StreamFailed)?;
        }

        let Some(document) = self.pending.pop_front() else {
            return Ok(None);
        };
        self.row += 1;

        if document.is_object() {
            Ok(Some(flatten_document(&document)))
        } else {
            Err(SourceError::MalformedRow {
                row: self.row,
                message: format!("expected a JSON object, got {document}"),
            })
        }
    }

    fn describe(&self) -> String {
        format!("{CONNECTOR} {}", self.url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unwrap_bundle() {
        let (documents, next) = unwrap_page(json!({
            "resourceType": "Bundle",
            "link": [
                {"relation": "self", "url": "http://x/a"},
                {"relation": "next", "url": "http://x/b"}
            ],
            "entry": [
                {"resource": {"resourceType": "Patient", "id": "1"}},
                {"resource": {"resourceType": "Patient", "id": "2"}}
            ]
        }));
        assert_eq!(documents.len(), 2);
        assert_eq!(documents[1]["id"], json!("2"));
        assert_eq!(next.as_deref(), Some("http://x/b"));
    }

    #[test]
    fn test_unwrap_single_object() {
        let (documents, next) = unwrap_page(json!({"id": "1"}));
        assert_eq!(documents.len(), 1);
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn test_fetches_array_with_bearer_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/patients")
            .match_header("authorization", "Bearer s3cret")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"[{"mrn": "1"}, {"mrn": "2"}]"#)
            .create_async()
            .await;

        let spec = SourceSpec::new(CONNECTOR)
            .with("url", format!("{}/patients", server.url()))
            .with("bearer_token", "s3cret");
        let mut source = RemoteApiSourceFactory.open(&spec).await.unwrap();

        assert_eq!(
            source.next_record().await.unwrap().unwrap().get("mrn"),
            Some(&json!("1"))
        );
        assert!(source.next_record().await.unwrap().is_some());
        assert!(source.next_record().await.unwrap().is_none());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_follows_bundle_next_link() {
        let mut server = mockito::Server::new_async().await;
        let page_two = format!("{}/page2", server.url());
        let first = server
            .mock("GET", "/page1")
            .with_status(200)
            .with_body(
                json!({
                    "resourceType": "Bundle",
                    "link": [{"relation": "next", "url": page_two}],
                    "entry": [{"resource": {"n": 1}}]
                })
                .to_string(),
            )
            .create_async()
            .await;
        let second = server
            .mock("GET", "/page2")
            .with_status(200)
            .with_body(r#"{"resourceType": "Bundle", "entry": [{"resource": {"n": 2}}]}"#)
            .create_async()
            .await;

        let mut source = RemoteApiSource::open(
            &format!("{}/page1", server.url()),
            None,
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        let mut values = Vec::new();
        while let Some(record) = source.next_record().await.unwrap() {
            values.push(record.get("n").cloned().unwrap());
        }
        assert_eq!(values, vec![json!(1), json!(2)]);
        first.assert_async().await;
        second.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_error_is_unavailable() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/down")
            .with_status(503)
            .create_async()
            .await;

        let err = RemoteApiSource::open(&format!("{}/down", server.url()), None, Duration::from_secs(5))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SourceError::Unavailable(message) if message.contains("503")));
    }

    #[tokio::test]
    async fn test_invalid_url_is_invalid_config() {
        let err = RemoteApiSourceFactory
            .open(&SourceSpec::new(CONNECTOR).with("url", "not a url"))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SourceError::InvalidConfig(_)));
    }
}

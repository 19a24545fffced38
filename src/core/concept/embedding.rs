//! Text embedding for the semantic stage
//!
//! - [`HashingEmbedder`]: local feature hashing of words and character
//!   trigrams; deterministic and network-free
//! - [`OpenAiEmbedder`]: OpenAI-compatible `POST /embeddings` endpoint with
//!   retry on 429 and 5xx
//!
//! [`create_embedder`] picks one from `[concepts.embedding]`.

use crate::config::schema::{EmbeddingConfig, EmbeddingProviderKind};
use crate::core::identity::hashing::sha256_hex;
use crate::domain::{EstuaryError, Result};
use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_OPENAI_ENDPOINT: &str = "https://api.openai.com/v1/embeddings";
const MAX_RETRIES: u32 = 2;

/// Turns texts into vectors
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier, for logs
    fn model_name(&self) -> &str;

    /// True when `embed` performs network calls
    fn is_remote(&self) -> bool;

    /// One vector per input text, in input order
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Creates the embedder selected by configuration
///
/// # Errors
///
/// Returns a configuration error when the OpenAI provider has no API key.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider {
        EmbeddingProviderKind::Hashing => Ok(Arc::new(HashingEmbedder::new(config.dims))),
        EmbeddingProviderKind::OpenAi => Ok(Arc::new(OpenAiEmbedder::new(config)?)),
    }
}

/// Cosine similarity in `[-1, 1]`; 0 for empty or mismatched vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

/// Feature-hashing embedder
///
/// Each lower-cased word contributes weight 1.0 and each character trigram
/// (with word boundary padding) weight 0.5 to a bucket chosen by SHA-256.
/// Identical texts embed identically; abbreviations still share trigrams
/// with their expansions.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dims: usize,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    /// Embeds one text
    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dims];
        let lowered = text.to_lowercase();

        for word in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            vector[self.bucket(word)] += 1.0;

            let padded: Vec<char> = format!(" {word} ").chars().collect();
            for trigram in padded.windows(3) {
                let trigram: String = trigram.iter().collect();
                vector[self.bucket(&trigram)] += 0.5;
            }
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            vector.iter_mut().for_each(|v| *v /= norm);
        }
        vector
    }

    fn bucket(&self, feature: &str) -> usize {
        let digest = sha256_hex(feature.as_bytes());
        let prefix = u64::from_str_radix(&digest[..16], 16).unwrap_or_default();
        (prefix % self.dims as u64) as usize
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model_name(&self) -> &str {
        "hashing"
    }

    fn is_remote(&self) -> bool {
        false
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }
}

/// OpenAI-compatible embeddings client
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl OpenAiEmbedder {
    /// Creates a client from `[concepts.embedding]`
    ///
    /// # Errors
    ///
    /// Returns [`EstuaryError::Configuration`] when no API key is configured.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .as_ref()
            .map(|key| {
                let key: &str = key.expose_secret().as_ref();
                key.to_string()
            })
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| {
                EstuaryError::Configuration(
                    "concepts.embedding.api_key is required for the openai provider".to_string(),
                )
            })?;

        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| EstuaryError::Connection(format!("cannot build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config
                .endpoint
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_ENDPOINT.to_string()),
            model: config.model.clone(),
            api_key,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn is_remote(&self) -> bool {
        true
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let mut last_error = None;
        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(200 << (attempt - 1))).await;
            }

            let response = match self
                .client
                .post(&self.endpoint)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    last_error = Some(EstuaryError::from(e));
                    continue;
                }
            };

            let status = response.status();
            if status.is_success() {
                let json: Value = response.json().await?;
                return parse_embeddings(&json, texts.len());
            }

            let text = response.text().await.unwrap_or_default();
            let error = EstuaryError::ConceptResolution(format!(
                "embedding endpoint returned {status}: {text}"
            ));
            if status.as_u16() == 429 || status.is_server_error() {
                last_error = Some(error);
                continue;
            }
            return Err(error);
        }

        Err(last_error.unwrap_or_else(|| {
            EstuaryError::ConceptResolution("embedding failed after retries".to_string())
        }))
    }
}

/// Extracts `data[].embedding`, ordered by `index` when present
fn parse_embeddings(json: &Value, expected: usize) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            EstuaryError::ConceptResolution("embedding response has no data array".to_string())
        })?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                EstuaryError::ConceptResolution("embedding response item has no embedding".to_string())
            })?;
        let index = item
            .get("index")
            .and_then(Value::as_u64)
            .map_or(position, |i| i as usize);
        let vector = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        indexed.push((index, vector));
    }
    indexed.sort_by_key(|(index, _)| *index);

    if indexed.len() != expected {
        return Err(EstuaryError::ConceptResolution(format!(
            "embedding response has {} vectors for {expected} inputs",
            indexed.len()
        )));
    }
    Ok(indexed.into_iter().map(|(_, vector)| vector).collect())
}

//! Resolver stages
//!
//! Each stage either returns a suggestion that is confident enough to stop
//! the chain, or `Ok(None)` to hand over to the next stage. Stages share a
//! [`StageContext`] so later stages can see earlier candidates.

use super::embedding::{cosine_similarity, Embedder};
use crate::adapters::database::traits::ConceptStore;
use crate::adapters::vocabulary::VocabularyStore;
use crate::config::secret::SecretString;
use crate::domain::concept::{
    Concept, ConceptCandidate, ConceptDomain, ConceptSuggestion, MappingKey, ResolutionStage,
    NO_MATCH_CONCEPT_ID,
};
use crate::domain::{EstuaryError, Result};
use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// A coded value to resolve
#[derive(Debug, Clone, PartialEq)]
pub struct ConceptRequest {
    pub key: MappingKey,
    /// Human-readable label from the source, when there is one
    pub source_display: Option<String>,
}

impl ConceptRequest {
    pub fn new(
        source_system: impl Into<String>,
        source_code: impl Into<String>,
        source_display: Option<String>,
        target_domain: ConceptDomain,
    ) -> Self {
        Self {
            key: MappingKey::new(source_system, source_code, target_domain),
            source_display: source_display
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty()),
        }
    }

    pub fn domain(&self) -> ConceptDomain {
        self.key.target_domain
    }

    /// Text used for similarity search: the display, else the code
    pub fn search_text(&self) -> &str {
        self.source_display
            .as_deref()
            .unwrap_or(&self.key.source_code)
    }
}

/// State carried along the chain for one request
#[derive(Debug, Clone)]
pub struct StageContext {
    pub request: ConceptRequest,
    /// Ranked candidates from the semantic stage, best first
    pub candidates: Vec<ConceptCandidate>,
    /// Best below-threshold suggestion seen so far
    pub best: Option<ConceptSuggestion>,
}

impl StageContext {
    pub fn new(request: ConceptRequest) -> Self {
        Self {
            request,
            candidates: Vec::new(),
            best: None,
        }
    }

    /// Result when every stage declined: best earlier candidate, else the
    /// null-match sentinel
    pub fn into_fallback(self) -> ConceptSuggestion {
        match self.best {
            Some(mut best) => {
                best.stage = ResolutionStage::Fallback;
                best
            }
            None => ConceptSuggestion::no_match(self.request.domain(), "no stage produced a match"),
        }
    }
}

/// One step of the fallback chain
#[async_trait]
pub trait ResolverStage: Send + Sync {
    /// Which stage this is
    fn stage(&self) -> ResolutionStage;

    /// True when attempts go over the network; such attempts are bounded by
    /// the resolver's timeout and shared concurrency limit
    fn is_network(&self) -> bool {
        false
    }

    /// Attempts resolution; `Ok(None)` passes to the next stage
    async fn attempt(&self, context: &mut StageContext) -> Result<Option<ConceptSuggestion>>;
}

/// Stage 1: previously approved mappings
pub struct CacheStage {
    store: Arc<dyn ConceptStore>,
    min_confidence: f64,
}

impl CacheStage {
    pub fn new(store: Arc<dyn ConceptStore>, min_confidence: f64) -> Self {
        Self {
            store,
            min_confidence,
        }
    }
}

#[async_trait]
impl ResolverStage for CacheStage {
    fn stage(&self) -> ResolutionStage {
        ResolutionStage::Cache
    }

    async fn attempt(&self, context: &mut StageContext) -> Result<Option<ConceptSuggestion>> {
        let key = &context.request.key;
        let Some(cached) = self.store.get_mapping(key).await? else {
            return Ok(None);
        };
        if cached.confidence < self.min_confidence {
            return Ok(None);
        }

        let hits = self
            .store
            .record_hit(key)
            .await?
            .map_or(cached.hits + 1, |updated| updated.hits);

        Ok(Some(ConceptSuggestion {
            concept_id: cached.concept_id,
            concept_name: cached.concept_name,
            vocabulary_id: cached.vocabulary_id,
            domain: key.target_domain,
            confidence: cached.confidence,
            reasoning: format!("cached {} decision ({hits} hits)", cached.stage),
            stage: ResolutionStage::Cache,
            alternatives: Vec::new(),
        }))
    }
}

/// Stage 2: exact code match in the vocabulary
pub struct DirectStage {
    vocabulary: Arc<dyn VocabularyStore>,
    confidence: f64,
}

impl DirectStage {
    pub fn new(vocabulary: Arc<dyn VocabularyStore>, confidence: f64) -> Self {
        Self {
            vocabulary,
            confidence,
        }
    }
}

#[async_trait]
impl ResolverStage for DirectStage {
    fn stage(&self) -> ResolutionStage {
        ResolutionStage::Direct
    }

    async fn attempt(&self, context: &mut StageContext) -> Result<Option<ConceptSuggestion>> {
        let domain = context.request.domain();
        let matches = self
            .vocabulary
            .search_by_code(&context.request.key.source_code, Some(domain))
            .await?;

        let Some(chosen) = matches.first() else {
            return Ok(None);
        };
        if !chosen.is_standard || !domain.matches(&chosen.domain_id) {
            tracing::debug!(
                code = %context.request.key.source_code,
                concept_id = chosen.concept_id,
                "Code matched only non-standard or out-of-domain concepts"
            );
            return Ok(None);
        }

        let suggestion = ConceptSuggestion::for_concept(
            chosen,
            domain,
            self.confidence,
            ResolutionStage::Direct,
            format!("exact {} code match", chosen.vocabulary_id),
        )
        .with_alternatives(
            matches
                .iter()
                .skip(1)
                .map(|c| ConceptCandidate::from_concept(c, self.confidence)),
        );
        Ok(Some(suggestion))
    }
}

/// Stage 3: embedding similarity over name-search candidates
pub struct SemanticStage {
    vocabulary: Arc<dyn VocabularyStore>,
    embedder: Arc<dyn Embedder>,
    top_k: usize,
    threshold: f64,
}

impl SemanticStage {
    pub fn new(
        vocabulary: Arc<dyn VocabularyStore>,
        embedder: Arc<dyn Embedder>,
        top_k: usize,
        threshold: f64,
    ) -> Self {
        Self {
            vocabulary,
            embedder,
            top_k,
            threshold,
        }
    }
}

#[async_trait]
impl ResolverStage for SemanticStage {
    fn stage(&self) -> ResolutionStage {
        ResolutionStage::Semantic
    }

    fn is_network(&self) -> bool {
        self.embedder.is_remote()
    }

    async fn attempt(&self, context: &mut StageContext) -> Result<Option<ConceptSuggestion>> {
        let domain = context.request.domain();
        let query = context.request.search_text().to_string();
        let concepts = self
            .vocabulary
            .search_by_name(&query, domain, self.top_k)
            .await?;
        if concepts.is_empty() {
            return Ok(None);
        }

        let mut texts = Vec::with_capacity(concepts.len() + 1);
        texts.push(query);
        texts.extend(concepts.iter().map(|c| c.concept_name.clone()));
        let vectors = self.embedder.embed(&texts).await?;
        let Some((query_vector, concept_vectors)) = vectors.split_first() else {
            return Ok(None);
        };

        let mut ranked: Vec<(&Concept, f64)> = concepts
            .iter()
            .zip(concept_vectors)
            .map(|(concept, vector)| {
                let score = f64::from(cosine_similarity(query_vector, vector)).clamp(0.0, 1.0);
                (concept, score)
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.0.is_standard.cmp(&a.0.is_standard))
        });

        context.candidates = ranked
            .iter()
            .map(|(concept, score)| ConceptCandidate::from_concept(concept, *score))
            .collect();

        let Some((top, score)) = ranked.first() else {
            return Ok(None);
        };
        let suggestion = ConceptSuggestion::for_concept(
            top,
            domain,
            *score,
            ResolutionStage::Semantic,
            format!("cosine similarity {score:.3} via {}", self.embedder.model_name()),
        )
        .with_alternatives(context.candidates.iter().skip(1).cloned());

        if *score >= self.threshold {
            Ok(Some(suggestion))
        } else {
            context.best = Some(suggestion);
            Ok(None)
        }
    }
}

/// Request body sent to the reasoning backend
#[derive(Debug, Serialize)]
struct ReasoningRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    source_system: &'a str,
    source_code: &'a str,
    source_display: Option<&'a str>,
    target_domain: &'a str,
    candidates: &'a [ConceptCandidate],
}

/// Response expected from the reasoning backend
#[derive(Debug, Deserialize)]
struct ReasoningResponse {
    concept_id: i64,
    confidence: f64,
    #[serde(default)]
    reasoning: String,
}

/// Stage 4: external reasoning service choosing among candidates
pub struct ReasoningStage {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<SecretString>,
    model: Option<String>,
    vocabulary: Arc<dyn VocabularyStore>,
}

impl ReasoningStage {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<SecretString>,
        model: Option<String>,
        vocabulary: Arc<dyn VocabularyStore>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| EstuaryError::Connection(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            api_key,
            model,
            vocabulary,
        })
    }
}

#[async_trait]
impl ResolverStage for ReasoningStage {
    fn stage(&self) -> ResolutionStage {
        ResolutionStage::Reasoning
    }

    fn is_network(&self) -> bool {
        true
    }

    async fn attempt(&self, context: &mut StageContext) -> Result<Option<ConceptSuggestion>> {
        if context.candidates.is_empty() {
            return Ok(None);
        }

        let request = &context.request;
        let body = ReasoningRequest {
            model: self.model.as_deref(),
            source_system: &request.key.source_system,
            source_code: &request.key.source_code,
            source_display: request.source_display.as_deref(),
            target_domain: request.domain().as_str(),
            candidates: &context.candidates,
        };

        let mut call = self.client.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            let token: &str = key.expose_secret().as_ref();
            call = call.bearer_auth(token);
        }
        let response = call.send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(EstuaryError::ConceptResolution(format!(
                "reasoning backend returned {status}: {text}"
            )));
        }
        let answer: ReasoningResponse = response.json().await.map_err(|e| {
            EstuaryError::ConceptResolution(format!("reasoning backend returned invalid JSON: {e}"))
        })?;

        let domain = request.domain();
        if answer.concept_id == NO_MATCH_CONCEPT_ID {
            let mut sentinel = ConceptSuggestion::no_match(domain, answer.reasoning);
            sentinel.stage = ResolutionStage::Reasoning;
            return Ok(Some(sentinel.with_alternatives(context.candidates.iter().cloned())));
        }

        let concept = match context
            .candidates
            .iter()
            .find(|c| c.concept_id == answer.concept_id)
        {
            Some(candidate) => Concept {
                concept_id: candidate.concept_id,
                concept_name: candidate.concept_name.clone(),
                concept_code: String::new(),
                vocabulary_id: candidate.vocabulary_id.clone(),
                domain_id: domain.as_str().to_string(),
                is_standard: true,
            },
            None => self.vocabulary.get_by_id(answer.concept_id).await?.ok_or_else(|| {
                EstuaryError::ConceptResolution(format!(
                    "reasoning backend chose unknown concept {}",
                    answer.concept_id
                ))
            })?,
        };

        Ok(Some(
            ConceptSuggestion::for_concept(
                &concept,
                domain,
                answer.confidence,
                ResolutionStage::Reasoning,
                answer.reasoning,
            )
            .with_alternatives(context.candidates.iter().cloned()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::vocabulary::MemoryVocabulary;
    use crate::core::concept::embedding::HashingEmbedder;

    fn concept(id: i64, name: &str, code: &str, domain: &str, is_standard: bool) -> Concept {
        Concept {
            concept_id: id,
            concept_name: name.to_string(),
            concept_code: code.to_string(),
            vocabulary_id: "SNOMED".to_string(),
            domain_id: domain.to_string(),
            is_standard,
        }
    }

    fn vocabulary() -> Arc<dyn VocabularyStore> {
        Arc::new(MemoryVocabulary::from_concepts([
            concept(201826, "Type 2 diabetes mellitus", "44054006", "Condition", true),
            concept(4000001, "Legacy diabetes code", "250.00", "Condition", false),
            concept(1503297, "Metformin", "6809", "Drug", true),
        ]))
    }

    #[test]
    fn test_request_trims_blank_display() {
        let request = ConceptRequest::new("sys", "E11", Some("   ".to_string()), ConceptDomain::Condition);
        assert_eq!(request.source_display, None);
        assert_eq!(request.search_text(), "E11");
    }

    #[test]
    fn test_fallback_prefers_best_candidate() {
        let request = ConceptRequest::new("sys", "E11", None, ConceptDomain::Condition);
        assert!(StageContext::new(request.clone()).into_fallback().is_no_match());

        let mut context = StageContext::new(request);
        context.best = Some(ConceptSuggestion::for_concept(
            &concept(201826, "Type 2 diabetes mellitus", "44054006", "Condition", true),
            ConceptDomain::Condition,
            0.7,
            ResolutionStage::Semantic,
            "close",
        ));
        let fallback = context.into_fallback();
        assert_eq!(fallback.concept_id, 201826);
        assert_eq!(fallback.stage, ResolutionStage::Fallback);
        assert_eq!(fallback.confidence, 0.7);
    }

    #[tokio::test]
    async fn test_direct_stage_skips_non_standard_and_other_domains() {
        let stage = DirectStage::new(vocabulary(), 0.95);

        let mut legacy = StageContext::new(ConceptRequest::new("icd9", "250.00", None, ConceptDomain::Condition));
        assert!(stage.attempt(&mut legacy).await.unwrap().is_none());

        let mut wrong_domain = StageContext::new(ConceptRequest::new("rx", "6809", None, ConceptDomain::Condition));
        assert!(stage.attempt(&mut wrong_domain).await.unwrap().is_none());

        let mut drug = StageContext::new(ConceptRequest::new("rx", "6809", None, ConceptDomain::Drug));
        let suggestion = stage.attempt(&mut drug).await.unwrap().unwrap();
        assert_eq!(suggestion.concept_id, 1503297);
        assert_eq!(suggestion.stage, ResolutionStage::Direct);
    }

    #[tokio::test]
    async fn test_semantic_stage_records_candidates_below_threshold() {
        let stage = SemanticStage::new(vocabulary(), Arc::new(HashingEmbedder::new(256)), 5, 0.99);
        let mut context = StageContext::new(ConceptRequest::new(
            "local",
            "T2DM",
            Some("diabetes type two".to_string()),
            ConceptDomain::Condition,
        ));

        assert!(stage.attempt(&mut context).await.unwrap().is_none());
        assert_eq!(context.candidates.first().map(|c| c.concept_id), Some(201826));
        assert_eq!(context.best.as_ref().map(|b| b.concept_id), Some(201826));
    }

    #[tokio::test]
    async fn test_reasoning_stage_without_candidates_declines() {
        let stage = ReasoningStage::new("http://127.0.0.1:9/unused", None, None, vocabulary()).unwrap();
        let mut context = StageContext::new(ConceptRequest::new("local", "X", None, ConceptDomain::Drug));
        assert!(stage.attempt(&mut context).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reasoning_stage_no_match_answer() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"concept_id": 0, "confidence": 0.2, "reasoning": "none fit"}"#)
            .create_async()
            .await;

        let stage = ReasoningStage::new(server.url(), None, Some("judge".to_string()), vocabulary()).unwrap();
        let mut context = StageContext::new(ConceptRequest::new("local", "X", None, ConceptDomain::Condition));
        context.candidates = vec![ConceptCandidate::from_concept(
            &concept(201826, "Type 2 diabetes mellitus", "44054006", "Condition", true),
            0.4,
        )];

        let suggestion = stage.attempt(&mut context).await.unwrap().unwrap();
        assert!(suggestion.is_no_match());
        assert_eq!(suggestion.stage, ResolutionStage::Reasoning);
        assert_eq!(suggestion.alternatives.len(), 1);
    }
}

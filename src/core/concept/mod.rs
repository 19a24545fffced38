//! Concept resolution
//!
//! Maps a source code (system, code, display) onto a standard vocabulary
//! concept for a target domain. Stages are tried in order and the first
//! confident suggestion wins:
//!
//! 1. [`CacheStage`] - previously approved mappings
//! 2. [`DirectStage`] - exact code match in the vocabulary
//! 3. [`SemanticStage`] - embedding similarity over name-search candidates
//! 4. [`ReasoningStage`] - external reasoning service (optional)
//!
//! When every stage declines, the best semantic candidate (or the null-match
//! sentinel) is returned. The [`ConfidencePolicy`] then decides whether the
//! result is cached, queued for human review, or discarded.
//!
//! Network-backed stages run under a per-call timeout and a semaphore shared
//! by every job, so a slow backend degrades resolution instead of stalling
//! the pipelines.

pub mod embedding;
pub mod stages;

use crate::adapters::database::traits::ConceptStore;
use crate::adapters::vocabulary::VocabularyStore;
use crate::config::schema::ConceptsConfig;
use crate::domain::concept::{
    CachedConceptMapping, ConceptSuggestion, ConfidencePolicy, Decision, ResolutionStage,
    ReviewItem, ReviewStatus, NO_MATCH_CONCEPT_ID,
};
use crate::domain::ids::ReviewId;
use crate::domain::{EstuaryError, Result, StoreError};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

pub use embedding::{cosine_similarity, create_embedder, Embedder, HashingEmbedder, OpenAiEmbedder};
pub use stages::{
    CacheStage, ConceptRequest, DirectStage, ReasoningStage, ResolverStage, SemanticStage,
    StageContext,
};

/// Resolution result after the confidence policy was applied
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConcept {
    /// Chain result
    pub suggestion: ConceptSuggestion,
    /// Policy decision
    pub decision: Decision,
    /// Review item created (or already pending) for this key
    pub review_id: Option<ReviewId>,
}

impl ResolvedConcept {
    /// Concept id to write: the suggestion when auto-approved, else 0
    pub fn concept_id(&self) -> i64 {
        match self.decision {
            Decision::AutoApproved => self.suggestion.concept_id,
            Decision::NeedsReview | Decision::Rejected => NO_MATCH_CONCEPT_ID,
        }
    }
}

/// Ordered stage chain plus the confidence policy
pub struct ConceptResolver {
    stages: Vec<Box<dyn ResolverStage>>,
    store: Arc<dyn ConceptStore>,
    vocabulary: Arc<dyn VocabularyStore>,
    policy: ConfidencePolicy,
    stage_timeout: Duration,
    network_permits: Arc<Semaphore>,
}

impl ConceptResolver {
    /// Resolver with an explicit stage chain
    pub fn new(
        stages: Vec<Box<dyn ResolverStage>>,
        store: Arc<dyn ConceptStore>,
        vocabulary: Arc<dyn VocabularyStore>,
        policy: ConfidencePolicy,
        stage_timeout: Duration,
        max_concurrent_calls: usize,
    ) -> Self {
        Self {
            stages,
            store,
            vocabulary,
            policy,
            stage_timeout,
            network_permits: Arc::new(Semaphore::new(max_concurrent_calls.max(1))),
        }
    }

    /// Builds the standard chain from `[concepts]`
    ///
    /// The reasoning stage is only added when `concepts.reasoning.enabled`.
    ///
    /// # Errors
    ///
    /// Returns an error if the embedder or reasoning client cannot be built.
    pub fn from_config(
        config: &ConceptsConfig,
        store: Arc<dyn ConceptStore>,
        vocabulary: Arc<dyn VocabularyStore>,
    ) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;

        let mut stages: Vec<Box<dyn ResolverStage>> = vec![
            Box::new(CacheStage::new(store.clone(), config.cache_threshold)),
            Box::new(DirectStage::new(vocabulary.clone(), config.direct_confidence)),
            Box::new(SemanticStage::new(
                vocabulary.clone(),
                embedder,
                config.top_k,
                config.semantic_threshold,
            )),
        ];

        if config.reasoning.enabled {
            let endpoint = config.reasoning.endpoint.clone().ok_or_else(|| {
                EstuaryError::Configuration(
                    "concepts.reasoning.endpoint is required when reasoning is enabled".to_string(),
                )
            })?;
            stages.push(Box::new(ReasoningStage::new(
                endpoint,
                config.reasoning.api_key.clone(),
                config.reasoning.model.clone(),
                vocabulary.clone(),
            )?));
        }

        tracing::debug!(
            stages = ?stages.iter().map(|s| s.stage().as_str()).collect::<Vec<_>>(),
            "Concept resolver chain built"
        );

        Ok(Self::new(
            stages,
            store,
            vocabulary,
            config.policy(),
            config.stage_timeout(),
            config.max_concurrent_calls,
        ))
    }

    /// The confidence policy
    pub fn policy(&self) -> ConfidencePolicy {
        self.policy
    }

    /// The concept store backing the cache and review queue
    pub fn store(&self) -> &Arc<dyn ConceptStore> {
        &self.store
    }

    /// Runs the chain; never fails
    ///
    /// Stage errors and timeouts are logged and the next stage is tried.
    pub async fn resolve(&self, request: &ConceptRequest) -> ConceptSuggestion {
        let mut context = StageContext::new(request.clone());

        for stage in &self.stages {
            let name = stage.stage();
            let attempt = if stage.is_network() {
                self.attempt_bounded(stage.as_ref(), &mut context).await
            } else {
                stage.attempt(&mut context).await
            };

            match attempt {
                Ok(Some(suggestion)) => {
                    tracing::debug!(
                        key = %request.key,
                        stage = %name,
                        concept_id = suggestion.concept_id,
                        confidence = suggestion.confidence,
                        "Concept resolved"
                    );
                    return suggestion;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        key = %request.key,
                        stage = %name,
                        error = %e,
                        "Concept resolver stage failed; trying next stage"
                    );
                }
            }
        }

        let fallback = context.into_fallback();
        tracing::debug!(
            key = %request.key,
            concept_id = fallback.concept_id,
            confidence = fallback.confidence,
            "Concept resolution fell back"
        );
        fallback
    }

    async fn attempt_bounded(
        &self,
        stage: &dyn ResolverStage,
        context: &mut StageContext,
    ) -> Result<Option<ConceptSuggestion>> {
        let _permit = self.network_permits.acquire().await.map_err(|e| {
            EstuaryError::ConceptResolution(format!("concurrency limiter closed: {e}"))
        })?;

        match tokio::time::timeout(self.stage_timeout, stage.attempt(context)).await {
            Ok(result) => result,
            Err(_) => Err(EstuaryError::ConceptResolution(format!(
                "{} stage timed out after {}ms",
                stage.stage(),
                self.stage_timeout.as_millis()
            ))),
        }
    }

    /// Resolves and applies the confidence policy
    ///
    /// - auto-approved: cached (cache hits are already counted by the cache stage)
    /// - needs review: queued with its alternatives; an item already pending
    ///   for the same key is reused
    /// - rejected: nothing is stored
    ///
    /// Store failures while applying the policy are logged; the decision
    /// still stands.
    pub async fn resolve_and_apply(&self, request: &ConceptRequest) -> ResolvedConcept {
        let suggestion = self.resolve(request).await;
        let decision = if suggestion.is_no_match() {
            Decision::Rejected
        } else {
            self.policy.decide(suggestion.confidence)
        };
        let now = Utc::now();
        let mut review_id = None;

        match decision {
            Decision::AutoApproved if suggestion.stage != ResolutionStage::Cache => {
                let entry = CachedConceptMapping::from_suggestion(request.key.clone(), &suggestion, now);
                if let Err(e) = self.store.upsert_mapping(entry).await {
                    tracing::warn!(key = %request.key, error = %e, "Failed to cache concept mapping");
                }
            }
            Decision::AutoApproved => {}
            Decision::NeedsReview => {
                let item = ReviewItem::pending(
                    request.key.clone(),
                    request.source_display.clone(),
                    suggestion.clone(),
                    now,
                );
                match self.store.enqueue_review(item).await {
                    Ok(queued) => review_id = Some(queued.id),
                    Err(e) => {
                        tracing::warn!(key = %request.key, error = %e, "Failed to enqueue concept review")
                    }
                }
            }
            Decision::Rejected => {
                tracing::debug!(
                    key = %request.key,
                    confidence = suggestion.confidence,
                    "Concept suggestion rejected"
                );
            }
        }

        ResolvedConcept {
            suggestion,
            decision,
            review_id,
        }
    }

    /// Review items, optionally filtered by status
    ///
    /// # Errors
    ///
    /// Returns an error if the store query fails.
    pub async fn list_reviews(&self, status: Option<ReviewStatus>, limit: usize) -> Result<Vec<ReviewItem>> {
        self.store.list_reviews(status, limit).await
    }

    /// Approves a pending review item and writes the mapping to the cache
    ///
    /// The reviewer may pick a different concept with `override_concept_id`.
    /// Human decisions are cached with confidence 1.0.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] when the item does not exist
    /// - [`EstuaryError::Validation`] when the item was already decided, the
    ///   override concept is unknown, or there is no concept to approve
    pub async fn approve_review(
        &self,
        id: ReviewId,
        override_concept_id: Option<i64>,
    ) -> Result<CachedConceptMapping> {
        let mut item = self.pending_review(id).await?;

        let concept_id = override_concept_id.unwrap_or(item.suggestion.concept_id);
        if concept_id == NO_MATCH_CONCEPT_ID {
            return Err(EstuaryError::Validation(format!(
                "review item {id} has no suggested concept; approve it with an override concept id"
            )));
        }

        let mut decided = if override_concept_id.is_some() && concept_id != item.suggestion.concept_id {
            let concept = self.vocabulary.get_by_id(concept_id).await?.ok_or_else(|| {
                EstuaryError::Validation(format!("concept {concept_id} is not in the vocabulary"))
            })?;
            ConceptSuggestion::for_concept(
                &concept,
                item.key.target_domain,
                1.0,
                ResolutionStage::Human,
                "chosen by reviewer",
            )
        } else {
            ConceptSuggestion {
                confidence: 1.0,
                stage: ResolutionStage::Human,
                reasoning: "approved by reviewer".to_string(),
                ..item.suggestion.clone()
            }
        };
        decided.alternatives.clear();

        let now = Utc::now();
        let stored = self
            .store
            .upsert_mapping(CachedConceptMapping::from_suggestion(item.key.clone(), &decided, now))
            .await?;

        item.status = ReviewStatus::Approved;
        item.decided_at = Some(now);
        item.decided_concept_id = Some(concept_id);
        self.store.update_review(&item).await?;

        tracing::info!(
            review_id = %id,
            key = %item.key,
            concept_id,
            hits = stored.hits,
            "Concept review approved"
        );
        Ok(stored)
    }

    /// Rejects a pending review item; nothing is cached
    ///
    /// # Errors
    ///
    /// Same as [`ConceptResolver::approve_review`].
    pub async fn reject_review(&self, id: ReviewId) -> Result<ReviewItem> {
        let mut item = self.pending_review(id).await?;
        item.status = ReviewStatus::Rejected;
        item.decided_at = Some(Utc::now());
        self.store.update_review(&item).await?;

        tracing::info!(review_id = %id, key = %item.key, "Concept review rejected");
        Ok(item)
    }

    async fn pending_review(&self, id: ReviewId) -> Result<ReviewItem> {
        let item = self
            .store
            .get_review(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("review item {id}")))?;
        if item.status != ReviewStatus::Pending {
            return Err(EstuaryError::Validation(format!(
                "review item {id} was already {}",
                item.status
            )));
        }
        Ok(item)
    }
}

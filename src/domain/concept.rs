//! Concept resolution domain model
//!
//! Types shared by the concept resolver, the concept stores and the review
//! (human-in-the-loop) workflow.

use super::ids::ReviewId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum number of alternatives carried by a suggestion or review item
pub const MAX_ALTERNATIVES: usize = 3;

/// Concept id written when nothing matched or the match is pending review
pub const NO_MATCH_CONCEPT_ID: i64 = 0;

/// Target domain of a coded value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConceptDomain {
    Gender,
    Measurement,
    Observation,
    Visit,
    Condition,
    Procedure,
    Drug,
}

impl ConceptDomain {
    /// All domains
    pub const ALL: [ConceptDomain; 7] = [
        ConceptDomain::Gender,
        ConceptDomain::Measurement,
        ConceptDomain::Observation,
        ConceptDomain::Visit,
        ConceptDomain::Condition,
        ConceptDomain::Procedure,
        ConceptDomain::Drug,
    ];

    /// Vocabulary domain name
    pub fn as_str(&self) -> &'static str {
        match self {
            ConceptDomain::Gender => "Gender",
            ConceptDomain::Measurement => "Measurement",
            ConceptDomain::Observation => "Observation",
            ConceptDomain::Visit => "Visit",
            ConceptDomain::Condition => "Condition",
            ConceptDomain::Procedure => "Procedure",
            ConceptDomain::Drug => "Drug",
        }
    }

    /// True when a vocabulary domain string denotes this domain
    pub fn matches(&self, domain: &str) -> bool {
        self.as_str().eq_ignore_ascii_case(domain.trim())
    }
}

impl fmt::Display for ConceptDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConceptDomain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConceptDomain::ALL
            .iter()
            .find(|d| d.matches(s))
            .copied()
            .ok_or_else(|| format!("Unknown concept domain '{s}'"))
    }
}

/// A standard vocabulary concept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    pub concept_id: i64,
    pub concept_name: String,
    pub concept_code: String,
    pub vocabulary_id: String,
    pub domain_id: String,
    pub is_standard: bool,
}

/// A ranked candidate concept
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptCandidate {
    pub concept_id: i64,
    pub concept_name: String,
    pub vocabulary_id: String,
    /// Similarity or confidence score in [0, 1]
    pub score: f64,
}

impl ConceptCandidate {
    /// Candidate from a vocabulary concept and a score
    pub fn from_concept(concept: &Concept, score: f64) -> Self {
        Self {
            concept_id: concept.concept_id,
            concept_name: concept.concept_name.clone(),
            vocabulary_id: concept.vocabulary_id.clone(),
            score,
        }
    }
}

/// Resolver stage that produced a suggestion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStage {
    Cache,
    Direct,
    Semantic,
    Reasoning,
    /// Reasoning backend unavailable; best semantic candidate or sentinel
    Fallback,
    /// Human reviewer decision
    Human,
}

impl ResolutionStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResolutionStage::Cache => "cache",
            ResolutionStage::Direct => "direct",
            ResolutionStage::Semantic => "semantic",
            ResolutionStage::Reasoning => "reasoning",
            ResolutionStage::Fallback => "fallback",
            ResolutionStage::Human => "human",
        }
    }
}

impl fmt::Display for ResolutionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolution result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConceptSuggestion {
    pub concept_id: i64,
    pub concept_name: String,
    pub vocabulary_id: String,
    pub domain: ConceptDomain,
    /// Confidence in [0, 1]
    pub confidence: f64,
    pub reasoning: String,
    pub stage: ResolutionStage,
    /// At most [`MAX_ALTERNATIVES`] runners-up
    pub alternatives: Vec<ConceptCandidate>,
}

impl ConceptSuggestion {
    /// Suggestion for a vocabulary concept; confidence is clamped into [0, 1]
    pub fn for_concept(
        concept: &Concept,
        domain: ConceptDomain,
        confidence: f64,
        stage: ResolutionStage,
        reasoning: impl Into<String>,
    ) -> Self {
        Self {
            concept_id: concept.concept_id,
            concept_name: concept.concept_name.clone(),
            vocabulary_id: concept.vocabulary_id.clone(),
            domain,
            confidence: clamp_confidence(confidence),
            reasoning: reasoning.into(),
            stage,
            alternatives: Vec::new(),
        }
    }

    /// The null-match sentinel (`concept_id = 0`, confidence 0)
    pub fn no_match(domain: ConceptDomain, reasoning: impl Into<String>) -> Self {
        Self {
            concept_id: NO_MATCH_CONCEPT_ID,
            concept_name: "No matching concept".to_string(),
            vocabulary_id: "None".to_string(),
            domain,
            confidence: 0.0,
            reasoning: reasoning.into(),
            stage: ResolutionStage::Fallback,
            alternatives: Vec::new(),
        }
    }

    /// Sets alternatives, keeping the first [`MAX_ALTERNATIVES`] and never
    /// repeating the chosen concept
    pub fn with_alternatives(mut self, alternatives: impl IntoIterator<Item = ConceptCandidate>) -> Self {
        let chosen = self.concept_id;
        self.alternatives = alternatives
            .into_iter()
            .filter(|c| c.concept_id != chosen)
            .take(MAX_ALTERNATIVES)
            .collect();
        self
    }

    /// True for the sentinel
    pub fn is_no_match(&self) -> bool {
        self.concept_id == NO_MATCH_CONCEPT_ID
    }
}

fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_nan() {
        0.0
    } else {
        confidence.clamp(0.0, 1.0)
    }
}

/// Cache and review key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MappingKey {
    pub source_system: String,
    pub source_code: String,
    pub target_domain: ConceptDomain,
}

impl MappingKey {
    pub fn new(
        source_system: impl Into<String>,
        source_code: impl Into<String>,
        target_domain: ConceptDomain,
    ) -> Self {
        Self {
            source_system: source_system.into().trim().to_string(),
            source_code: source_code.into().trim().to_string(),
            target_domain,
        }
    }
}

impl fmt::Display for MappingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}|{}|{}",
            self.source_system, self.source_code, self.target_domain
        )
    }
}

/// Cached mapping decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedConceptMapping {
    pub key: MappingKey,
    pub concept_id: i64,
    pub concept_name: String,
    pub vocabulary_id: String,
    pub confidence: f64,
    pub stage: ResolutionStage,
    /// Number of times the mapping was written or served
    pub hits: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CachedConceptMapping {
    /// Cache entry for a suggestion; `hits` is set by the store on upsert
    pub fn from_suggestion(key: MappingKey, suggestion: &ConceptSuggestion, now: DateTime<Utc>) -> Self {
        Self {
            key,
            concept_id: suggestion.concept_id,
            concept_name: suggestion.concept_name.clone(),
            vocabulary_id: suggestion.vocabulary_id.clone(),
            confidence: suggestion.confidence,
            stage: suggestion.stage,
            hits: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Review queue item status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::Approved => "approved",
            ReviewStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReviewStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(ReviewStatus::Pending),
            "approved" => Ok(ReviewStatus::Approved),
            "rejected" => Ok(ReviewStatus::Rejected),
            other => Err(format!("Unknown review status '{other}'")),
        }
    }
}

/// Human review queue entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewItem {
    pub id: ReviewId,
    pub key: MappingKey,
    pub source_display: Option<String>,
    pub suggestion: ConceptSuggestion,
    /// At most [`MAX_ALTERNATIVES`]
    pub alternatives: Vec<ConceptCandidate>,
    pub status: ReviewStatus,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
    /// Concept chosen by the reviewer, when approved
    pub decided_concept_id: Option<i64>,
}

impl ReviewItem {
    /// New pending item
    pub fn pending(
        key: MappingKey,
        source_display: Option<String>,
        suggestion: ConceptSuggestion,
        now: DateTime<Utc>,
    ) -> Self {
        let alternatives = suggestion
            .alternatives
            .iter()
            .take(MAX_ALTERNATIVES)
            .cloned()
            .collect();
        Self {
            id: ReviewId::generate(),
            key,
            source_display,
            suggestion,
            alternatives,
            status: ReviewStatus::Pending,
            created_at: now,
            decided_at: None,
            decided_concept_id: None,
        }
    }
}

/// Outcome of the confidence policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Decision {
    /// Cached and used
    AutoApproved,
    /// Queued for a human; concept 0 written meanwhile
    NeedsReview,
    /// Discarded; concept 0 written
    Rejected,
}

/// Confidence thresholds, lower bounds inclusive
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidencePolicy {
    /// `c >= auto_approve` ⇒ [`Decision::AutoApproved`]
    pub auto_approve: f64,
    /// `review <= c < auto_approve` ⇒ [`Decision::NeedsReview`]
    pub review: f64,
}

impl Default for ConfidencePolicy {
    fn default() -> Self {
        Self {
            auto_approve: 0.90,
            review: 0.50,
        }
    }
}

impl ConfidencePolicy {
    /// Classifies a confidence value
    pub fn decide(&self, confidence: f64) -> Decision {
        if confidence >= self.auto_approve {
            Decision::AutoApproved
        } else if confidence >= self.review {
            Decision::NeedsReview
        } else {
            Decision::Rejected
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn concept(id: i64) -> Concept {
        Concept {
            concept_id: id,
            concept_name: format!("Concept {id}"),
            concept_code: id.to_string(),
            vocabulary_id: "LOINC".to_string(),
            domain_id: "Measurement".to_string(),
            is_standard: true,
        }
    }

    #[test_case(1.0 => Decision::AutoApproved)]
    #[test_case(0.90 => Decision::AutoApproved)]
    #[test_case(0.89 => Decision::NeedsReview)]
    #[test_case(0.70 => Decision::NeedsReview)]
    #[test_case(0.50 => Decision::NeedsReview)]
    #[test_case(0.49 => Decision::Rejected)]
    #[test_case(0.0 => Decision::Rejected)]
    fn test_policy_boundaries(confidence: f64) -> Decision {
        ConfidencePolicy::default().decide(confidence)
    }

    #[test]
    fn test_domain_parse_case_insensitive() {
        assert_eq!(ConceptDomain::from_str("measurement").unwrap(), ConceptDomain::Measurement);
        assert!(ConceptDomain::Drug.matches(" DRUG "));
        assert!(ConceptDomain::from_str("Device").is_err());
    }

    #[test]
    fn test_alternatives_capped_and_exclude_choice() {
        let chosen = concept(1);
        let candidates = (1..=6).map(|id| ConceptCandidate::from_concept(&concept(id), 0.5));
        let suggestion = ConceptSuggestion::for_concept(
            &chosen,
            ConceptDomain::Measurement,
            0.8,
            ResolutionStage::Semantic,
            "similar",
        )
        .with_alternatives(candidates);

        assert_eq!(suggestion.alternatives.len(), MAX_ALTERNATIVES);
        assert!(suggestion.alternatives.iter().all(|c| c.concept_id != 1));
    }

    #[test]
    fn test_confidence_clamped() {
        let high = ConceptSuggestion::for_concept(
            &concept(2),
            ConceptDomain::Measurement,
            1.7,
            ResolutionStage::Reasoning,
            "",
        );
        assert_eq!(high.confidence, 1.0);
        let nan = ConceptSuggestion::for_concept(
            &concept(2),
            ConceptDomain::Measurement,
            f64::NAN,
            ResolutionStage::Reasoning,
            "",
        );
        assert_eq!(nan.confidence, 0.0);
    }

    #[test]
    fn test_no_match_sentinel() {
        let sentinel = ConceptSuggestion::no_match(ConceptDomain::Condition, "nothing found");
        assert!(sentinel.is_no_match());
        assert_eq!(sentinel.confidence, 0.0);
        assert_eq!(sentinel.stage, ResolutionStage::Fallback);
    }

    #[test]
    fn test_mapping_key_trims() {
        let key = MappingKey::new(" http://loinc.org ", " 8480-6", ConceptDomain::Measurement);
        assert_eq!(key.to_string(), "http://loinc.org|8480-6|Measurement");
    }

    #[test]
    fn test_review_item_pending() {
        let suggestion = ConceptSuggestion::for_concept(
            &concept(3),
            ConceptDomain::Measurement,
            0.7,
            ResolutionStage::Semantic,
            "",
        );
        let item = ReviewItem::pending(
            MappingKey::new("local", "SBP", ConceptDomain::Measurement),
            Some("Systolic BP".to_string()),
            suggestion,
            Utc::now(),
        );
        assert_eq!(item.status, ReviewStatus::Pending);
        assert!(item.decided_at.is_none());
    }
}

//! In-memory vocabulary loaded from an OMOP-style CONCEPT file

use super::{rank_code_matches, VocabularyStore};
use crate::domain::concept::{Concept, ConceptDomain};
use crate::domain::{EstuaryError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// In-memory vocabulary index
#[derive(Debug, Clone, Default)]
pub struct MemoryVocabulary {
    concepts: Vec<Concept>,
    by_code: HashMap<String, Vec<usize>>,
    by_id: HashMap<i64, usize>,
}

fn header_index(headers: &csv::StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|h| h.trim().eq_ignore_ascii_case(name))
}

fn get_string(row: &csv::StringRecord, idx: Option<usize>) -> Option<String> {
    idx.and_then(|i| row.get(i))
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

fn name_tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_lowercase())
        .collect()
}

impl MemoryVocabulary {
    /// Builds an index over a concept list
    pub fn from_concepts(concepts: impl IntoIterator<Item = Concept>) -> Self {
        let mut vocabulary = Self::default();
        for concept in concepts {
            vocabulary.push(concept);
        }
        vocabulary
    }

    fn push(&mut self, concept: Concept) {
        let position = self.concepts.len();
        self.by_code
            .entry(concept.concept_code.trim().to_lowercase())
            .or_default()
            .push(position);
        self.by_id.insert(concept.concept_id, position);
        self.concepts.push(concept);
    }

    /// Loads a CONCEPT file
    ///
    /// The delimiter is a tab unless the header line contains no tab.
    /// Required columns: `concept_id`, `concept_name`, `domain_id`,
    /// `vocabulary_id`, `concept_code`; `standard_concept` and
    /// `invalid_reason` are honored when present (invalid rows are skipped).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, a required column is
    /// missing or a `concept_id` is not an integer.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            EstuaryError::Io(format!("Failed to read vocabulary file {}: {e}", path.display()))
        })?;
        Self::from_delimited(&content)
    }

    /// Parses CONCEPT file content
    pub fn from_delimited(content: &str) -> Result<Self> {
        let header_line = content.lines().next().unwrap_or_default();
        let delimiter = if header_line.contains('\t') { b'\t' } else { b',' };

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(true)
            .flexible(true)
            .quoting(delimiter == b',')
            .from_reader(content.as_bytes());
        let headers = reader.headers()?.clone();

        let required = |name: &str| {
            header_index(&headers, name).ok_or_else(|| {
                EstuaryError::Validation(format!("vocabulary file is missing column '{name}'"))
            })
        };
        let idx_id = required("concept_id")?;
        let idx_name = required("concept_name")?;
        let idx_domain = required("domain_id")?;
        let idx_vocabulary = required("vocabulary_id")?;
        let idx_code = required("concept_code")?;
        let idx_standard = header_index(&headers, "standard_concept");
        let idx_invalid = header_index(&headers, "invalid_reason");

        let mut vocabulary = Self::default();
        for (line, row) in reader.records().enumerate() {
            let row = row?;
            if get_string(&row, idx_invalid).is_some() {
                continue;
            }
            let raw_id = get_string(&row, Some(idx_id)).unwrap_or_default();
            let concept_id = raw_id.parse::<i64>().map_err(|_| {
                EstuaryError::Validation(format!(
                    "vocabulary row {}: concept_id '{raw_id}' is not an integer",
                    line + 2
                ))
            })?;

            vocabulary.push(Concept {
                concept_id,
                concept_name: get_string(&row, Some(idx_name)).unwrap_or_default(),
                concept_code: get_string(&row, Some(idx_code)).unwrap_or_default(),
                vocabulary_id: get_string(&row, Some(idx_vocabulary)).unwrap_or_default(),
                domain_id: get_string(&row, Some(idx_domain)).unwrap_or_default(),
                is_standard: get_string(&row, idx_standard).as_deref() == Some("S"),
            });
        }

        Ok(vocabulary)
    }

    /// Number of concepts
    pub fn len(&self) -> usize {
        self.concepts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.concepts.is_empty()
    }
}

#[async_trait]
impl VocabularyStore for MemoryVocabulary {
    async fn search_by_code(&self, code: &str, domain: Option<ConceptDomain>) -> Result<Vec<Concept>> {
        let mut matches: Vec<Concept> = self
            .by_code
            .get(&code.trim().to_lowercase())
            .map(|positions| positions.iter().map(|&p| self.concepts[p].clone()).collect())
            .unwrap_or_default();
        rank_code_matches(&mut matches, domain);
        Ok(matches)
    }

    async fn search_by_name(&self, text: &str, domain: ConceptDomain, limit: usize) -> Result<Vec<Concept>> {
        let query = name_tokens(text);
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, &Concept)> = self
            .concepts
            .iter()
            .filter(|c| domain.matches(&c.domain_id))
            .filter_map(|c| {
                let overlap = name_tokens(&c.concept_name).intersection(&query).count();
                (overlap > 0).then_some((overlap, c))
            })
            .collect();

        scored.sort_by(|(a_score, a), (b_score, b)| {
            b_score
                .cmp(a_score)
                .then(b.is_standard.cmp(&a.is_standard))
                .then(a.concept_name.len().cmp(&b.concept_name.len()))
                .then(a.concept_id.cmp(&b.concept_id))
        });

        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(_, c)| c.clone())
            .collect())
    }

    async fn get_by_id(&self, concept_id: i64) -> Result<Option<Concept>> {
        Ok(self.by_id.get(&concept_id).map(|&p| self.concepts[p].clone()))
    }
}

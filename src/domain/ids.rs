//! Domain identifier types with validation
//!
//! This module provides newtype wrappers for Estuary identifiers. Each type
//! ensures type safety and provides validation for format compliance.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Job identifier newtype wrapper
///
/// Every job created by the engine gets a random v4 UUID. The id also names
/// the job's default staging collection, so it is rendered in simple
/// (hyphen-free) form.
///
/// # Examples
///
/// ```
/// use estuary::domain::ids::JobId;
/// use std::str::FromStr;
///
/// let job_id = JobId::from_str("6f1c0d2e9b6a4c5d8e7f001122334455").unwrap();
/// assert_eq!(job_id.as_str(), "6f1c0d2e9b6a4c5d8e7f001122334455");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(String);

impl JobId {
    /// Generates a fresh job id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    /// Creates a JobId from an existing string
    ///
    /// # Returns
    ///
    /// Returns `Ok(JobId)` if the ID is valid, `Err` otherwise
    pub fn new(id: impl Into<String>) -> Result<Self, String> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err("Job ID cannot be empty".to_string());
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(format!(
                "Job ID may only contain ASCII letters, digits, '_' and '-', got: {id}"
            ));
        }
        Ok(Self(id))
    }

    /// Returns the job ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Resource identity newtype wrapper
///
/// A 16 character lower-case hex prefix of a SHA-256 digest. Produced by the
/// identity resolver; re-ingesting the same logical entity yields the same id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId(String);

impl ResourceId {
    /// Length of a resource id in hex characters
    pub const LEN: usize = 16;

    /// Creates a ResourceId, validating the hex format
    pub fn new(id: impl Into<String>) -> Result<Self, String> {
        let id = id.into();
        if id.len() != Self::LEN || !id.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!(
                "Resource ID must be {} hex characters, got: {id}",
                Self::LEN
            ));
        }
        Ok(Self(id.to_ascii_lowercase()))
    }

    /// Takes the first [`ResourceId::LEN`] characters of a lower-case hex digest
    pub(crate) fn from_digest(digest: &str) -> Self {
        Self(digest.chars().take(Self::LEN).collect())
    }

    /// Returns the resource ID as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ResourceId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Review queue item identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReviewId(Uuid);

impl ReviewId {
    /// Generates a fresh review id
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the inner UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for ReviewId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for ReviewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ReviewId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| format!("Invalid review ID '{s}': {e}"))
    }
}

//! Mapping repository
//!
//! Jobs refer to their approved mapping list by name (`mapping_ref`). The
//! repository resolves that name into a validated [`MappingSet`] when the job
//! starts.

pub mod file;
pub mod memory;

use crate::domain::mapping::MappingSet;
use crate::domain::Result;
use async_trait::async_trait;

pub use file::FileMappingRepository;
pub use memory::InMemoryMappingRepository;

/// Resolves mapping references into approved mapping sets
#[async_trait]
pub trait MappingRepository: Send + Sync {
    /// Loads and approves the mapping list named `reference`
    ///
    /// # Errors
    ///
    /// [`crate::domain::EstuaryError::Mapping`] when the reference is unknown
    /// or the list fails approval.
    async fn resolve(&self, reference: &str) -> Result<MappingSet>;
}

/// Rejects references that could escape a repository root
pub(crate) fn validate_reference(reference: &str) -> std::result::Result<&str, String> {
    let reference = reference.trim();
    if reference.is_empty() {
        return Err("mapping reference cannot be empty".to_string());
    }
    if !reference
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        || reference.starts_with('.')
        || reference.contains("..")
    {
        return Err(format!(
            "mapping reference '{reference}' may only contain letters, digits, '_', '-' and '.'"
        ));
    }
    Ok(reference)
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("patients_v1" => true)]
    #[test_case("labs-2024.03" => true)]
    #[test_case("" => false)]
    #[test_case("../secrets" => false)]
    #[test_case("a/b" => false)]
    #[test_case(".hidden" => false)]
    fn test_validate_reference(reference: &str) -> bool {
        validate_reference(reference).is_ok()
    }
}

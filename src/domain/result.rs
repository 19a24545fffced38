//! Result type alias for Estuary
//!
//! This module provides a convenient Result type alias that uses EstuaryError
//! as the error type.

use super::errors::EstuaryError;

/// Result type alias for Estuary operations
///
/// # Examples
///
/// ```
/// use estuary::domain::result::Result;
/// use estuary::domain::errors::EstuaryError;
///
/// fn example_function() -> Result<String> {
///     Ok("success".to_string())
/// }
///
/// fn failing_function() -> Result<()> {
///     Err(EstuaryError::Validation("Invalid input".to_string()))
/// }
/// ```
pub type Result<T> = std::result::Result<T, EstuaryError>;

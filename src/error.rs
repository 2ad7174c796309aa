//! Error types for the tangent-solver library.
//!
//! All recoverable failures use the `thiserror` crate for automatic trait
//! implementations. Programming errors (out-of-range indices, dimension
//! mismatches in update vectors or chain-rule matrices) are preconditions and
//! panic with a descriptive message instead of appearing here.

use thiserror::Error;

/// Main result type used throughout the tangent-solver library
pub type TangentResult<T> = Result<T, TangentError>;

/// Main error type for the tangent-solver library
#[derive(Debug, Clone, Error)]
pub enum TangentError {
    /// Invalid option combinations, detected eagerly at construction time
    #[error("Configuration error: {0}")]
    Config(String),

    /// Dimension mismatches surfaced through fallible constructors
    #[error("Dimension error: {0}")]
    Dimension(String),

    /// Numerical health failures from diagnostic paths
    #[error("Numerical error: {0}")]
    Numerical(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = TangentError::Config("etaMinus must be positive".to_string());
        assert_eq!(
            error.to_string(),
            "Configuration error: etaMinus must be positive"
        );
    }

    #[test]
    fn test_result_err() {
        let result: TangentResult<i32> =
            Err(TangentError::Numerical("Jacobian mismatch".to_string()));
        assert!(result.is_err());
    }
}

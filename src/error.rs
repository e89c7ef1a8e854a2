//! Error types for the apex-fit library
//!
//! This module provides the main error and result types used throughout the library.
//! All errors use the `thiserror` crate for automatic trait implementations.

use crate::linalg::LinAlgError;
use thiserror::Error;

/// Main result type used throughout the apex-fit library
pub type FitResult<T> = Result<T, FitError>;

/// Outcome of a fit or evaluation that did not succeed
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FitError {
    /// The model function is undefined at some evaluation point
    #[error("Model function is invalid at the evaluated parameters")]
    InvalidModel,

    /// The normal matrix is singular or the damping factor saturated
    #[error("Jacobian is degenerate, the normal equations cannot be solved")]
    DegenerateJacobian,

    /// Iteration limit or timeout reached; the best parameters so far are kept
    #[error("Fit did not converge after {iterations} iterations")]
    NotConverged { iterations: u32 },

    /// Every parameter is fixed, there is nothing to fit
    #[error("All parameters are fixed")]
    FixedAllParams,

    /// Parameter values were never set
    #[error("Parameters are not initialized")]
    Uninitialized,

    /// No residuum has been evaluated yet, or there is no data to evaluate it on
    #[error("Residuum is not available")]
    ResiduumUnavailable,

    /// Invalid input parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl FitError {
    /// True for outcomes where the fitter still holds a usable best-effort result
    pub fn is_partial(&self) -> bool {
        matches!(
            self,
            FitError::NotConverged { .. } | FitError::DegenerateJacobian
        )
    }
}

// A failed factorization of the normal matrix means the problem is degenerate

impl From<LinAlgError> for FitError {
    fn from(_err: LinAlgError) -> Self {
        FitError::DegenerateJacobian
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_error_display() {
        let error = FitError::NotConverged { iterations: 100 };
        assert_eq!(error.to_string(), "Fit did not converge after 100 iterations");

        let error = FitError::InvalidInput("expected 4 values, got 3".to_string());
        assert_eq!(error.to_string(), "Invalid input: expected 4 values, got 3");
    }

    #[test]
    fn test_linalg_error_conversion() {
        let error: FitError = LinAlgError::Singular.into();
        assert_eq!(error, FitError::DegenerateJacobian);

        let error: FitError = LinAlgError::NonFinite.into();
        assert_eq!(error, FitError::DegenerateJacobian);
    }

    #[test]
    fn test_partial_outcomes() {
        assert!(FitError::NotConverged { iterations: 3 }.is_partial());
        assert!(FitError::DegenerateJacobian.is_partial());
        assert!(!FitError::InvalidModel.is_partial());
        assert!(!FitError::FixedAllParams.is_partial());
    }

    #[test]
    fn test_question_mark_conversion() {
        fn failing() -> FitResult<()> {
            Err(LinAlgError::Singular)?;
            Ok(())
        }
        assert_eq!(failing(), Err(FitError::DegenerateJacobian));
    }
}

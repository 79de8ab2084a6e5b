//! Error types and validation functions for model configuration and data.
//!
//! Fitting and prediction never fail on validated input: numerical degeneracy is
//! absorbed by safety floors and non-convergence is reported through
//! [`FitResult`](crate::results::FitResult). The errors here surface only while
//! building a configuration, a sequence store or a problem.

use thiserror::Error;

/// Error types for HMM configuration and data validation.
#[derive(Error, Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum HmmError {
    /// Invalid parameter value in the fitting configuration.
    #[error("Invalid parameter: {parameter} = {value}, expected {constraint}")]
    InvalidParameter {
        /// Parameter name
        parameter: String,
        /// Invalid value provided
        value: f64,
        /// Valid range or constraint description
        constraint: String,
    },

    /// Two arrays that must agree in size do not.
    #[error("Dimension mismatch for {what}: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// What was being sized
        what: String,
        /// Expected length
        expected: usize,
        /// Actual length
        actual: usize,
    },

    /// Observation symbol outside `[0, nO)`.
    #[error("Invalid observation at row {row}: {value} is not below nO = {n_obs}")]
    InvalidObservation {
        /// Row index in the columnar input
        row: usize,
        /// Offending symbol
        value: usize,
        /// Number of observation symbols
        n_obs: usize,
    },

    /// Solver identifier could not be parsed.
    #[error("Invalid solver id '{id}': {reason}")]
    InvalidSolver {
        /// Text that was parsed
        id: String,
        /// Why it was rejected
        reason: String,
    },

    /// Not enough data for the requested operation.
    #[error("Insufficient data: need at least {required}, got {actual}")]
    InsufficientData {
        /// Minimum required count
        required: usize,
        /// Actual count provided
        actual: usize,
    },

    /// Lower/upper bounds of a simplex row admit no probability vector.
    #[error("Infeasible bounds for {component} row {row}: lower sum {lower_sum}, upper sum {upper_sum}")]
    InfeasibleBounds {
        /// `PI`, `A` or `B`
        component: String,
        /// Row within the component
        row: usize,
        /// Sum of lower bounds
        lower_sum: f64,
        /// Sum of upper bounds
        upper_sum: f64,
    },
}

/// Result type for configuration and data operations.
pub type HmmResult<T> = Result<T, HmmError>;

/// Validates that a parameter is within expected bounds.
///
/// # Example
/// ```rust
/// use knowledge_hmm::errors::validate_parameter;
///
/// assert!(validate_parameter(0.5, 0.0, 1.0, "tolerance").is_ok());
/// assert!(validate_parameter(1.5, 0.0, 1.0, "tolerance").is_err());
/// ```
pub fn validate_parameter(value: f64, min: f64, max: f64, name: &str) -> HmmResult<()> {
    if value.is_nan() {
        return Err(HmmError::InvalidParameter {
            parameter: name.to_string(),
            value,
            constraint: "must not be NaN".to_string(),
        });
    }

    if value < min || value > max {
        Err(HmmError::InvalidParameter {
            parameter: name.to_string(),
            value,
            constraint: format!("[{}, {}]", min, max),
        })
    } else {
        Ok(())
    }
}

/// Validates that a slice has the expected length.
pub fn validate_len(what: &str, expected: usize, actual: usize) -> HmmResult<()> {
    if expected != actual {
        return Err(HmmError::DimensionMismatch {
            what: what.to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}

/// Validates that every value of a slice is a finite number inside `[0, 1]`.
pub fn validate_probabilities(values: &[f64], name: &str) -> HmmResult<()> {
    if let Some(&value) = values.iter().find(|v| !v.is_finite() || **v < 0.0 || **v > 1.0) {
        return Err(HmmError::InvalidParameter {
            parameter: name.to_string(),
            value,
            constraint: "finite probability in [0, 1]".to_string(),
        });
    }
    Ok(())
}

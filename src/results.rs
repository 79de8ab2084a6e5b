//! # Fit and Prediction Results
//!
//! Per-slice fit outcomes, the summary of a whole fit, and the metrics and
//! per-row distributions produced by prediction.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// How a slice fit ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SliceStatus {
    /// Maximum parameter change fell below the tolerance
    Converged,
    /// Iteration cap reached first
    MaxIterations,
    /// No step satisfied the line-search condition
    Stalled,
}

/// Outcome of fitting one slice
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FitResult {
    /// Iterations run
    pub iterations: usize,
    /// Negative log-likelihood before the first step
    pub initial_nll: f64,
    /// Negative log-likelihood at the start of the last iteration
    pub previous_nll: f64,
    /// Negative log-likelihood at the returned parameters
    pub final_nll: f64,
    /// `true` only for [`SliceStatus::Converged`]
    pub converged: bool,
    /// Rows the slice was fitted on
    pub n_rows: usize,
    /// Terminal state
    pub status: SliceStatus,
}

/// Fit result of one parameter block
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SliceReport {
    /// Block index (skill or group id)
    pub slice: usize,
    /// Fit outcome
    pub result: FitResult,
}

/// Everything one call to `fit` produced
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FitSummary {
    /// Pooled single-skill fit, when enabled
    pub pooled: Option<FitResult>,
    /// Per-slice fits in slice order
    pub slices: Vec<SliceReport>,
    /// Slices with no unblocked sequence
    pub skipped: Vec<usize>,
    /// Negative log-likelihood of the null-skill rows
    pub null_nll: f64,
    /// Model total: fitted slices plus null skill
    pub total_nll: f64,
}

impl FitSummary {
    /// Number of fitted slices that converged
    pub fn n_converged(&self) -> usize {
        self.slices.iter().filter(|s| s.result.converged).count()
    }

    /// Fit result of one slice
    pub fn slice(&self, slice: usize) -> Option<&FitResult> {
        self.slices.iter().find(|s| s.slice == slice).map(|s| &s.result)
    }
}

/// Goodness-of-fit metrics against the target observation
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Metrics {
    /// Negative log-likelihood of the target observation
    pub log_likelihood: f64,
    /// Akaike information criterion, `2k + 2·LL`
    pub aic: f64,
    /// Bayesian information criterion, `k·ln N + 2·LL`
    pub bic: f64,
    /// Root mean squared error
    pub rmse: f64,
    /// RMSE over skill-labelled rows only
    pub rmse_no_null: f64,
    /// Share of rows classified correctly at threshold 0.5
    pub accuracy: f64,
    /// Accuracy over skill-labelled rows only
    pub accuracy_no_null: f64,
    /// Rows scored
    pub n_rows: usize,
    /// Null-skill rows among them
    pub n_null_rows: usize,
    /// Parameter count used for AIC and BIC
    pub n_parameters: f64,
}

impl Metrics {
    /// `[LL, AIC, BIC, RMSE, RMSE no null, accuracy, accuracy no null]`
    pub fn as_array(&self) -> [f64; 7] {
        [
            self.log_likelihood,
            self.aic,
            self.bic,
            self.rmse,
            self.rmse_no_null,
            self.accuracy,
            self.accuracy_no_null,
        ]
    }
}

/// Per-row observation distributions plus metrics
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Prediction {
    /// Distribution over observations, `None` for rows not predicted
    pub probabilities: Vec<Option<Vec<f64>>>,
    /// Metrics over predicted rows with a known observation
    pub metrics: Metrics,
}

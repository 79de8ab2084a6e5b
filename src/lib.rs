//! # Knowledge-Tracing HMM
//!
//! Fitting and prediction of discrete hidden Markov models for knowledge
//! tracing, with Bayesian Knowledge Tracing (two states, two observations) as
//! the default model.
//!
//! Learner interaction logs are given as columns (observation, group, skill)
//! and partitioned into per-(skill, group) sequences. A model holds one
//! parameter block (PI, A, B) per skill or per group; every block is fitted
//! independently on its own slice of the data by one of several solvers, all
//! of which keep the parameters inside box constraints on the probability
//! simplex.
//!
//! ## Key Features
//!
//! - **Scaled forward-backward**: log-likelihood, gradients of the negative
//!   log-likelihood and state posteriors without underflow
//! - **Solvers**: Baum-Welch, projected gradient descent with Armijo line
//!   search, a Lagrange-corrected variant, conjugate gradient (Polak-Ribière,
//!   Fletcher-Reeves, Hestenes-Stiefel) and Barzilai-Borwein
//! - **Bounded simplex projection** for every stochastic row
//! - **Blocking**: hold out sequences, groups or whole parameter components
//! - **Prediction and metrics**: per-row observation distributions,
//!   log-likelihood, AIC, BIC, RMSE and accuracy
//! - **Cross-validation** stratified by group
//!
//! ## Quick Start
//!
//! ```rust
//! use knowledge_hmm::{FitConfig, HmmProblem, SequenceStore};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // two students practising one skill; 0 = correct, 1 = incorrect
//!     let store = SequenceStore::from_columns(
//!         2,
//!         vec![Some(1), Some(0), Some(0), Some(1), Some(1), Some(0)],
//!         vec![0, 0, 0, 1, 1, 1],
//!         vec![Some(0); 6],
//!     )?;
//!
//!     let mut problem = HmmProblem::new(FitConfig::bkt(), &store)?;
//!     let summary = problem.fit(&store);
//!     assert!(summary.total_nll.is_finite());
//!
//!     let prediction = problem.predict(&store, false);
//!     println!("RMSE = {:.4}", prediction.metrics.rmse);
//!     Ok(())
//! }
//! ```
//!
//! ## Solver identifiers
//!
//! Models are commonly described by `structure.solver[.setting]`, for example
//! `1.2` (by skill, gradient descent) or `2.3.1` (by group, conjugate gradient
//! with Polak-Ribière). See [`SolverId`].

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(clippy::all)]

// Core modules
pub mod config;
pub mod data;
pub mod errors;
pub mod math_utils;
pub mod matrix;
pub mod params;
pub mod results;
pub mod simplex;
pub mod structure;

// Fitting
pub mod baum_welch;
pub mod fitbit;
pub mod forward_backward;
pub mod gradient;
pub mod optimizer;
pub mod problem;

// Prediction and validation
pub mod cross_validation;
pub mod predict;

// Re-exports for convenience - main public API
pub use config::{
    ArmijoConfig, CgFormula, FitConfig, SingleSkillMode, Solver, SolverId, Structure,
};
pub use cross_validation::{
    assign_folds, cross_validate, CrossValidationConfig, CrossValidationResult, FoldResult,
};
pub use data::{Sequence, SequenceStore};
pub use errors::{HmmError, HmmResult};
pub use matrix::Matrix;
pub use params::{BlockFitting, Component, ParameterBlock, ParameterBounds};
pub use problem::{HmmProblem, NullSkillModel};
pub use results::{FitResult, FitSummary, Metrics, Prediction, SliceReport, SliceStatus};

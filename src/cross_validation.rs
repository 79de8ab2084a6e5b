//! Group-stratified cross-validation.
//!
//! Every group (student) is assigned to one fold. For each fold the group's
//! sequences and null-skill rows are blocked, a fresh problem is fitted on the
//! remaining data, and the blocks are lifted again. Each row is then predicted
//! by the model of its group's fold, which never saw that group.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::config::FitConfig;
use crate::data::SequenceStore;
use crate::errors::{HmmError, HmmResult};
use crate::predict::{predict_distributions, score};
use crate::problem::HmmProblem;
use crate::results::{FitSummary, Metrics};

/// Fold count and RNG seed
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CrossValidationConfig {
    /// Number of folds (at least 2)
    pub folds: usize,
    /// Seed for the fold assignment; `None` draws one from the OS
    pub seed: Option<u64>,
}

impl Default for CrossValidationConfig {
    fn default() -> Self {
        Self {
            folds: 5,
            seed: None,
        }
    }
}

/// Fit of one fold
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FoldResult {
    /// Fold index
    pub fold: usize,
    /// Groups held out in this fold
    pub groups: Vec<usize>,
    /// Summary of the fit on the other folds' data
    pub summary: FitSummary,
}

/// Pooled out-of-fold metrics plus per-fold fits
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CrossValidationResult {
    /// Metrics over every row, each predicted by the model that did not see it
    pub metrics: Metrics,
    /// One entry per fold
    pub folds: Vec<FoldResult>,
}

/// Assign each of `n_groups` groups to one of `folds` folds. Groups are
/// shuffled and dealt round-robin, so no fold is empty.
pub fn assign_folds(n_groups: usize, folds: usize, seed: Option<u64>) -> Vec<usize> {
    let mut rng = match seed {
        Some(seed) => ChaCha20Rng::seed_from_u64(seed),
        None => ChaCha20Rng::from_entropy(),
    };
    let mut order: Vec<usize> = (0..n_groups).collect();
    order.shuffle(&mut rng);

    let mut assignment = vec![0; n_groups];
    for (i, &group) in order.iter().enumerate() {
        assignment[group] = i % folds;
    }
    assignment
}

/// Run group-stratified cross-validation of `config` on `store`.
///
/// `store` is left unblocked on return, including on error.
pub fn cross_validate(
    config: &FitConfig,
    store: &mut SequenceStore,
    cv: &CrossValidationConfig,
) -> HmmResult<CrossValidationResult> {
    if cv.folds < 2 {
        return Err(HmmError::InsufficientData {
            required: 2,
            actual: cv.folds,
        });
    }
    let n_groups = store.n_groups();
    if n_groups < cv.folds {
        return Err(HmmError::InsufficientData {
            required: cv.folds,
            actual: n_groups,
        });
    }
    config.validate()?;

    let assignment = assign_folds(n_groups, cv.folds, cv.seed);
    let mut probabilities = vec![None; store.n_rows()];
    let mut folds = Vec::with_capacity(cv.folds);
    let mut n_parameters = 0.0;

    for fold in 0..cv.folds {
        let groups: Vec<usize> = (0..n_groups).filter(|&g| assignment[g] == fold).collect();
        for &g in &groups {
            store.block_group(g);
        }
        let fitted = HmmProblem::new(config.clone(), store).map(|mut problem| {
            let summary = problem.fit(store);
            (problem, summary)
        });
        for &g in &groups {
            store.unblock_group(g);
        }
        let (problem, summary) = fitted?;

        // knowledge is tracked per (group, skill), so predicting the whole
        // store and keeping the held-out rows gives the same values
        let predicted = predict_distributions(&problem, store, false);
        for (row, p) in predicted.into_iter().enumerate() {
            if assignment[store.group(row)] == fold {
                probabilities[row] = p;
            }
        }
        n_parameters += problem.n_parameters() as f64;
        log::info!(
            "fold {}/{} done: {} groups held out, training NLL {:.6}",
            fold + 1,
            cv.folds,
            groups.len(),
            summary.total_nll
        );
        folds.push(FoldResult {
            fold,
            groups,
            summary,
        });
    }

    let metrics = score(
        store,
        &probabilities,
        config.metrics_target_obs,
        n_parameters / cv.folds as f64,
    );
    log::info!(
        "{}-fold cross-validation: LL {:.6}, AIC {:.6}, BIC {:.6}, RMSE {:.6} ({:.6}), accuracy {:.6} ({:.6})",
        cv.folds,
        metrics.log_likelihood,
        metrics.aic,
        metrics.bic,
        metrics.rmse,
        metrics.rmse_no_null,
        metrics.accuracy,
        metrics.accuracy_no_null
    );
    Ok(CrossValidationResult { metrics, folds })
}

//! Per-row observation prediction and goodness-of-fit metrics.
//!
//! Rows are visited in input order. Each (group, skill) pair carries a
//! knowledge-state distribution that starts at PI of the row's block; the
//! prediction for a row is `Σ_i L[i]·B[i][·]`, after which `L` is conditioned
//! on the observed symbol (when known) and propagated through A. Null-skill
//! rows are predicted by the null-skill frequency of their group.

use std::collections::HashMap;

use crate::data::SequenceStore;
use crate::math_utils::float_ops::{safe_log, safe_positive, safe_unit};
use crate::params::ParameterBlock;
use crate::problem::HmmProblem;
use crate::results::{Metrics, Prediction};

/// Observation distribution predicted from knowledge state `state`
fn observation_distribution(block: &ParameterBlock, state: &[f64]) -> Vec<f64> {
    (0..block.n_obs())
        .map(|m| state.iter().enumerate().map(|(i, l)| l * block.b().get(i, m)).sum())
        .collect()
}

/// Condition `state` on `obs` (if known), then propagate it one step.
fn advance(block: &ParameterBlock, state: &mut [f64], obs: Option<usize>) {
    let n_states = state.len();
    if let Some(o) = obs {
        let evidence: f64 = state.iter().enumerate().map(|(i, l)| l * block.b().get(i, o)).sum();
        let evidence = safe_positive(evidence);
        for (i, l) in state.iter_mut().enumerate() {
            *l = *l * block.b().get(i, o) / evidence;
        }
    }
    let posterior = state.to_vec();
    for (j, l) in state.iter_mut().enumerate() {
        *l = (0..n_states).map(|i| posterior[i] * block.a().get(i, j)).sum();
    }
}

/// Predicted distribution for every row; `None` for rows skipped because they
/// were not requested (`only_unlabeled`) or reference a missing block. A store
/// whose observation alphabet differs from the model's gets no predictions.
pub fn predict_distributions(
    problem: &HmmProblem,
    store: &SequenceStore,
    only_unlabeled: bool,
) -> Vec<Option<Vec<f64>>> {
    if !problem.accepts(store) {
        log::warn!(
            "store has {} observation symbols, model expects {}; nothing predicted",
            store.n_obs(),
            problem.config().n_obs
        );
        return vec![None; store.n_rows()];
    }
    let layout = problem.layout();
    let null_model = problem.null_model();
    let mut knowledge: HashMap<(usize, usize), Vec<f64>> = HashMap::new();
    let mut out = vec![None; store.n_rows()];
    let mut missing = 0usize;

    for (row, slot) in out.iter_mut().enumerate() {
        let obs = store.obs(row);
        let requested = !only_unlabeled || obs.is_none();
        let group = store.group(row);

        let Some(skill) = store.skill(row) else {
            if requested {
                *slot = Some(null_model.frequency(group).to_vec());
            }
            continue;
        };

        let Some(block) = layout.row_block(store, row).and_then(|b| problem.block(b)) else {
            missing += 1;
            log::warn!("row {}: no parameters for skill {} / group {}, skipped", row, skill, group);
            continue;
        };

        let state = knowledge
            .entry((group, skill))
            .or_insert_with(|| block.pi().to_vec());
        if requested {
            *slot = Some(observation_distribution(block, state));
        }
        advance(block, state, obs);
    }

    if missing > 0 {
        log::warn!("{} rows had no matching parameter block", missing);
    }
    out
}

/// Metrics of `probabilities` against the observed symbols, scored for the
/// `target` observation. Rows without a prediction or an observation are
/// ignored.
pub fn score(
    store: &SequenceStore,
    probabilities: &[Option<Vec<f64>>],
    target: usize,
    n_parameters: f64,
) -> Metrics {
    let mut ll = 0.0;
    let mut sse = 0.0;
    let mut sse_no_null = 0.0;
    let mut correct = 0usize;
    let mut correct_no_null = 0usize;
    let mut n = 0usize;
    let mut n_null = 0usize;

    for (row, prediction) in probabilities.iter().enumerate() {
        let (Some(dist), Some(obs)) = (prediction.as_ref(), store.obs(row)) else {
            continue;
        };
        let raw = dist.get(target).copied().unwrap_or(0.0);
        let is_target = if obs == target { 1.0 } else { 0.0 };
        let p = safe_unit(raw);
        ll -= is_target * safe_log(p) + (1.0 - is_target) * safe_log(1.0 - p);

        let err = (is_target - raw).powi(2);
        let hit = (raw >= 0.5) == (obs == target);
        n += 1;
        sse += err;
        correct += usize::from(hit);
        if store.skill(row).is_none() {
            n_null += 1;
        } else {
            sse_no_null += err;
            correct_no_null += usize::from(hit);
        }
    }

    let ratio = |num: f64, den: usize| if den > 0 { num / den as f64 } else { 0.0 };
    let n_labelled = n - n_null;
    Metrics {
        log_likelihood: ll,
        aic: 2.0 * n_parameters + 2.0 * ll,
        bic: n_parameters * safe_log(n as f64) + 2.0 * ll,
        rmse: ratio(sse, n).sqrt(),
        rmse_no_null: ratio(sse_no_null, n_labelled).sqrt(),
        accuracy: ratio(correct as f64, n),
        accuracy_no_null: ratio(correct_no_null as f64, n_labelled),
        n_rows: n,
        n_null_rows: n_null,
        n_parameters,
    }
}

impl HmmProblem {
    /// Predict every row of `store` (or only rows with an unknown observation)
    /// and score the predictions.
    pub fn predict(&self, store: &SequenceStore, only_unlabeled: bool) -> Prediction {
        let probabilities = predict_distributions(self, store, only_unlabeled);
        let metrics = score(
            store,
            &probabilities,
            self.config().metrics_target_obs,
            self.n_parameters() as f64,
        );
        log::debug!(
            "predicted {} rows: LL {:.6}, RMSE {:.6}, accuracy {:.4}",
            metrics.n_rows,
            metrics.log_likelihood,
            metrics.rmse,
            metrics.accuracy
        );
        Prediction {
            probabilities,
            metrics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FitConfig;

    fn bkt_store() -> SequenceStore {
        SequenceStore::from_columns(
            2,
            vec![Some(1), Some(1), Some(0), Some(0), None],
            vec![0, 0, 0, 0, 0],
            vec![Some(0), Some(0), Some(0), None, Some(0)],
        )
        .unwrap()
    }

    #[test]
    fn test_first_prediction_uses_pi() {
        let store = bkt_store();
        let problem = HmmProblem::new(FitConfig::bkt(), &store).unwrap();
        let prediction = problem.predict(&store, false);
        // PI = [.5, .5], B = [[.8, .2], [.2, .8]]
        let first = prediction.probabilities[0].as_ref().unwrap();
        assert!((first[0] - 0.5).abs() < 1e-12);
        assert!((first[1] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_knowledge_update_follows_bayes_rule() {
        let store = bkt_store();
        let problem = HmmProblem::new(FitConfig::bkt(), &store).unwrap();
        let prediction = problem.predict(&store, false);
        // after observing 1: L ∝ [.5·.2, .5·.8] = [.2, .8]; propagate through A = [[1,0],[.4,.6]]
        let l0 = 0.2 + 0.8 * 0.4;
        let l1 = 0.8 * 0.6;
        let second = prediction.probabilities[1].as_ref().unwrap();
        assert!((second[0] - (l0 * 0.8 + l1 * 0.2)).abs() < 1e-12);
        assert!((second[1] - (l0 * 0.2 + l1 * 0.8)).abs() < 1e-12);
        for dist in prediction.probabilities.iter().flatten() {
            assert!((dist.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_only_unlabeled_rows() {
        let store = bkt_store();
        let problem = HmmProblem::new(FitConfig::bkt(), &store).unwrap();
        let prediction = problem.predict(&store, true);
        let predicted: Vec<usize> = prediction
            .probabilities
            .iter()
            .enumerate()
            .filter_map(|(r, p)| p.as_ref().map(|_| r))
            .collect();
        assert_eq!(predicted, vec![4]);
        assert_eq!(prediction.metrics.n_rows, 0);
    }

    #[test]
    fn test_store_with_other_alphabet_is_not_predicted() {
        let store = bkt_store();
        let mut problem = HmmProblem::new(FitConfig::bkt(), &store).unwrap();
        problem.fit(&store);
        let wider = SequenceStore::from_columns(
            3,
            vec![Some(0), Some(2), Some(1), Some(2)],
            vec![0, 0, 0, 1],
            vec![Some(0), Some(0), Some(0), None],
        )
        .unwrap();
        let prediction = problem.predict(&wider, false);
        assert_eq!(prediction.probabilities.len(), 4);
        assert!(prediction.probabilities.iter().all(Option::is_none));
        assert_eq!(prediction.metrics.n_rows, 0);
        assert!(prediction.metrics.as_array().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_metric_definitions() {
        let store = SequenceStore::from_columns(
            2,
            vec![Some(0), Some(1), Some(0)],
            vec![0, 0, 0],
            vec![Some(0), Some(0), None],
        )
        .unwrap();
        let probabilities = vec![Some(vec![0.8, 0.2]), Some(vec![0.6, 0.4]), Some(vec![0.3, 0.7])];
        let m = score(&store, &probabilities, 0, 4.0);

        let ll = -(0.8f64.ln() + 0.4f64.ln() + 0.3f64.ln());
        assert!((m.log_likelihood - ll).abs() < 1e-12);
        assert!((m.aic - (8.0 + 2.0 * ll)).abs() < 1e-12);
        assert!((m.bic - (4.0 * 3f64.ln() + 2.0 * ll)).abs() < 1e-12);
        assert!((m.rmse - ((0.04 + 0.36 + 0.49) / 3.0f64).sqrt()).abs() < 1e-12);
        assert!((m.rmse_no_null - ((0.04 + 0.36) / 2.0f64).sqrt()).abs() < 1e-12);
        assert!((m.accuracy - 1.0 / 3.0).abs() < 1e-12);
        assert!((m.accuracy_no_null - 0.5).abs() < 1e-12);
        assert_eq!(m.n_null_rows, 1);
    }

    #[test]
    fn test_empty_scoring_is_finite() {
        let store = bkt_store();
        let m = score(&store, &vec![None; 5], 0, 4.0);
        assert_eq!(m.n_rows, 0);
        assert!(m.as_array().iter().all(|v| v.is_finite()));
    }
}

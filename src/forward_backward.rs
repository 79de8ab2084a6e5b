//! Scaled forward-backward recursion over the sequences of one slice.
//!
//! Every time step of the forward pass is normalised by its scale factor
//! `c[t]`, and the backward pass divides by the same factors, so that
//! `Σ_i alpha[t][i]·beta[t][i] = 1` for every `t` and the sequence
//! log-likelihood is `Σ_t ln c[t]`. Rows with an unknown observation
//! contribute an emission factor of one.
//!
//! Trellises are scratch: a [`SlicePass`] owns them for one pass over one
//! slice and is dropped before the next pass.

use crate::data::SequenceStore;
use crate::math_utils::float_ops::safe_positive;
use crate::matrix::Matrix;
use crate::params::ParameterBlock;

/// Emission probability of an observation; one when it is unknown.
#[inline]
pub fn emission(block: &ParameterBlock, state: usize, obs: Option<usize>) -> f64 {
    obs.map_or(1.0, |m| block.b().get(state, m))
}

/// Forward, backward and (optionally) posterior arrays of one sequence.
#[derive(Debug, Clone)]
pub struct Trellis {
    obs: Vec<Option<usize>>,
    alpha: Matrix,
    beta: Matrix,
    scale: Vec<f64>,
    gamma: Option<Matrix>,
    xi: Option<Vec<Matrix>>,
}

impl Trellis {
    /// Run the forward and backward passes for one observation sequence.
    pub fn compute(block: &ParameterBlock, obs: Vec<Option<usize>>) -> Self {
        let n = obs.len();
        let n_states = block.n_states();
        let a = block.a();
        let mut alpha = Matrix::zeros(n, n_states);
        let mut beta = Matrix::zeros(n, n_states);
        let mut scale = vec![0.0; n];

        // Forward pass
        for t in 0..n {
            let mut sum = 0.0;
            for i in 0..n_states {
                let reach = if t == 0 {
                    block.pi()[i]
                } else {
                    (0..n_states).map(|j| alpha.get(t - 1, j) * a.get(j, i)).sum()
                };
                let value = reach * emission(block, i, obs[t]);
                alpha.set(t, i, value);
                sum += value;
            }
            let c = safe_positive(sum);
            scale[t] = c;
            for v in alpha.row_mut(t) {
                *v /= c;
            }
        }

        // Backward pass with the forward scale factors
        if n > 0 {
            beta.row_mut(n - 1).fill(1.0);
        }
        for t in (0..n.saturating_sub(1)).rev() {
            for i in 0..n_states {
                let mut value = 0.0;
                for j in 0..n_states {
                    value += a.get(i, j) * emission(block, j, obs[t + 1]) * beta.get(t + 1, j);
                }
                beta.set(t, i, value / scale[t + 1]);
            }
        }

        Self {
            obs,
            alpha,
            beta,
            scale,
            gamma: None,
            xi: None,
        }
    }

    /// Fill `gamma` and `xi` from the forward and backward arrays.
    pub fn compute_posteriors(&mut self, block: &ParameterBlock) {
        let n = self.len();
        let n_states = block.n_states();
        let a = block.a();

        let mut gamma = Matrix::zeros(n, n_states);
        for t in 0..n {
            let mut sum = 0.0;
            for i in 0..n_states {
                let value = self.alpha.get(t, i) * self.beta.get(t, i);
                gamma.set(t, i, value);
                sum += value;
            }
            let sum = safe_positive(sum);
            for v in gamma.row_mut(t) {
                *v /= sum;
            }
        }

        let mut xi = Vec::with_capacity(n.saturating_sub(1));
        for t in 0..n.saturating_sub(1) {
            let mut step = Matrix::zeros(n_states, n_states);
            let mut sum = 0.0;
            for i in 0..n_states {
                for j in 0..n_states {
                    let value = self.alpha.get(t, i)
                        * a.get(i, j)
                        * emission(block, j, self.obs[t + 1])
                        * self.beta.get(t + 1, j);
                    step.set(i, j, value);
                    sum += value;
                }
            }
            let sum = safe_positive(sum);
            for v in step.as_mut_slice() {
                *v /= sum;
            }
            xi.push(step);
        }

        self.gamma = Some(gamma);
        self.xi = Some(xi);
    }

    /// Sequence length
    pub fn len(&self) -> usize {
        self.obs.len()
    }

    /// Zero-length sequence
    pub fn is_empty(&self) -> bool {
        self.obs.is_empty()
    }

    /// Observations the trellis was computed for
    pub fn obs(&self) -> &[Option<usize>] {
        &self.obs
    }

    /// Scaled forward probabilities, `n × nS`
    pub fn alpha(&self) -> &Matrix {
        &self.alpha
    }

    /// Scaled backward probabilities, `n × nS`
    pub fn beta(&self) -> &Matrix {
        &self.beta
    }

    /// Per-step scale factors
    pub fn scale(&self) -> &[f64] {
        &self.scale
    }

    /// State posteriors, if computed
    pub fn gamma(&self) -> Option<&Matrix> {
        self.gamma.as_ref()
    }

    /// Transition posteriors for `t = 0..n-1`, if computed
    pub fn xi(&self) -> Option<&[Matrix]> {
        self.xi.as_deref()
    }

    /// `Σ_t ln c[t]`
    pub fn log_likelihood(&self) -> f64 {
        self.scale.iter().map(|c| c.ln()).sum()
    }
}

/// Observations of one stored sequence
fn sequence_obs(store: &SequenceStore, idx: usize) -> Vec<Option<usize>> {
    store.sequence(idx).rows().iter().map(|&r| store.obs(r)).collect()
}

/// Trellises for every unblocked sequence of a slice plus their total negative
/// log-likelihood.
#[derive(Debug, Clone)]
pub struct SlicePass {
    trellises: Vec<Trellis>,
    neg_log_likelihood: f64,
    n_rows: usize,
}

impl SlicePass {
    /// Run forward-backward over the unblocked sequences among `sequences`.
    /// Posteriors are filled when `with_posteriors` is set.
    pub fn run(
        block: &ParameterBlock,
        store: &SequenceStore,
        sequences: &[usize],
        with_posteriors: bool,
    ) -> Self {
        let mut trellises = Vec::with_capacity(sequences.len());
        let mut neg_log_likelihood = 0.0;
        let mut n_rows = 0;
        for &idx in sequences {
            if store.sequence(idx).is_blocked() {
                continue;
            }
            let mut trellis = Trellis::compute(block, sequence_obs(store, idx));
            if with_posteriors {
                trellis.compute_posteriors(block);
            }
            neg_log_likelihood -= trellis.log_likelihood();
            n_rows += trellis.len();
            trellises.push(trellis);
        }
        Self {
            trellises,
            neg_log_likelihood,
            n_rows,
        }
    }

    /// Per-sequence trellises
    pub fn trellises(&self) -> &[Trellis] {
        &self.trellises
    }

    /// Total negative log-likelihood of the slice
    pub fn neg_log_likelihood(&self) -> f64 {
        self.neg_log_likelihood
    }

    /// Rows covered by the pass
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// No unblocked sequence in the slice
    pub fn is_empty(&self) -> bool {
        self.trellises.is_empty()
    }
}

/// Negative log-likelihood of the unblocked sequences among `sequences`,
/// forward pass only. Used to score line-search candidates.
pub fn slice_neg_log_likelihood(
    block: &ParameterBlock,
    store: &SequenceStore,
    sequences: &[usize],
) -> f64 {
    let n_states = block.n_states();
    let a = block.a();
    let mut nll = 0.0;
    let mut prev = vec![0.0; n_states];
    let mut next = vec![0.0; n_states];

    for &idx in sequences {
        let seq = store.sequence(idx);
        if seq.is_blocked() {
            continue;
        }
        for (t, &row) in seq.rows().iter().enumerate() {
            let obs = store.obs(row);
            let mut sum = 0.0;
            for i in 0..n_states {
                let reach = if t == 0 {
                    block.pi()[i]
                } else {
                    (0..n_states).map(|j| prev[j] * a.get(j, i)).sum()
                };
                next[i] = reach * emission(block, i, obs);
                sum += next[i];
            }
            let c = safe_positive(sum);
            nll -= c.ln();
            for (p, v) in prev.iter_mut().zip(&next) {
                *p = v / c;
            }
        }
    }
    nll
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math_utils::float_ops::approx_eq_eps;

    fn scenario_block() -> ParameterBlock {
        ParameterBlock::from_compact(&[0.5, 1.0, 0.4, 0.8, 0.2], 2, 2).unwrap()
    }

    /// Likelihood by summing over every hidden path
    fn brute_force_likelihood(block: &ParameterBlock, obs: &[Option<usize>]) -> f64 {
        let n_states = block.n_states();
        let n = obs.len();
        let mut total = 0.0;
        for path in 0..n_states.pow(n as u32) {
            let states: Vec<usize> = (0..n).map(|t| (path / n_states.pow(t as u32)) % n_states).collect();
            let mut p = block.pi()[states[0]] * emission(block, states[0], obs[0]);
            for t in 1..n {
                p *= block.a().get(states[t - 1], states[t]) * emission(block, states[t], obs[t]);
            }
            total += p;
        }
        total
    }

    #[test]
    fn test_likelihood_matches_path_enumeration() {
        let block = scenario_block();
        let obs = vec![Some(0), Some(0), Some(1), Some(0)];
        let trellis = Trellis::compute(&block, obs.clone());
        let expected = brute_force_likelihood(&block, &obs).ln();
        assert!(approx_eq_eps(trellis.log_likelihood(), expected, 1e-12));
    }

    #[test]
    fn test_alpha_beta_product_is_constant() {
        let block = ParameterBlock::from_compact(&[0.3, 0.7, 0.2, 0.9, 0.35], 2, 2).unwrap();
        let trellis = Trellis::compute(&block, vec![Some(1), Some(0), None, Some(1), Some(1)]);
        for t in 0..trellis.len() {
            let s: f64 = (0..2).map(|i| trellis.alpha().get(t, i) * trellis.beta().get(t, i)).sum();
            assert!(approx_eq_eps(s, 1.0, 1e-12), "t = {}: {}", t, s);
        }
    }

    #[test]
    fn test_unknown_observation_is_neutral() {
        let block = scenario_block();
        let with_gap = Trellis::compute(&block, vec![Some(0), None, Some(1)]);
        let expected = brute_force_likelihood(&block, &[Some(0), None, Some(1)]).ln();
        assert!(approx_eq_eps(with_gap.log_likelihood(), expected, 1e-12));
    }

    #[test]
    fn test_posteriors_are_distributions() {
        let block = scenario_block();
        let mut trellis = Trellis::compute(&block, vec![Some(0), Some(0), Some(1), Some(0)]);
        trellis.compute_posteriors(&block);
        let gamma = trellis.gamma().unwrap();
        for t in 0..4 {
            assert!(approx_eq_eps(gamma.row(t).iter().sum::<f64>(), 1.0, 1e-12));
        }
        let xi = trellis.xi().unwrap();
        assert_eq!(xi.len(), 3);
        for (t, step) in xi.iter().enumerate() {
            assert!(approx_eq_eps(step.as_slice().iter().sum::<f64>(), 1.0, 1e-12));
            // marginalising xi over the target state gives gamma
            for i in 0..2 {
                assert!(approx_eq_eps(step.row(i).iter().sum::<f64>(), gamma.get(t, i), 1e-12));
            }
        }
        // no transition out of the absorbing state
        assert!(xi.iter().all(|step| step.get(0, 1) == 0.0));
    }

    #[test]
    fn test_degenerate_block_stays_finite() {
        let mut block = scenario_block();
        block.b_mut().row_mut(0).copy_from_slice(&[0.0, 1.0]);
        block.b_mut().row_mut(1).copy_from_slice(&[0.0, 1.0]);
        let trellis = Trellis::compute(&block, vec![Some(0), Some(0)]);
        assert!(trellis.log_likelihood().is_finite());
        assert!(trellis.beta().as_slice().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_slice_pass_skips_blocked_sequences() {
        let mut store = SequenceStore::from_columns(
            2,
            vec![Some(0), Some(1), Some(0), Some(1)],
            vec![0, 0, 1, 1],
            vec![Some(0), Some(0), Some(0), Some(0)],
        )
        .unwrap();
        let block = scenario_block();
        let seqs = store.skill_sequences(0).to_vec();

        let full = SlicePass::run(&block, &store, &seqs, false);
        assert_eq!(full.trellises().len(), 2);
        assert_eq!(full.n_rows(), 4);
        let forward_only = slice_neg_log_likelihood(&block, &store, &seqs);
        assert!(approx_eq_eps(full.neg_log_likelihood(), forward_only, 1e-12));

        store.block_group(1);
        let partial = SlicePass::run(&block, &store, &seqs, true);
        assert_eq!(partial.trellises().len(), 1);
        assert!(partial.trellises()[0].gamma().is_some());
        assert!(partial.neg_log_likelihood() < full.neg_log_likelihood());
    }
}

//! Gradient of a slice's negative log-likelihood with respect to PI, A and B.
//!
//! With the scaled trellis the partial derivatives of `ln P(O)` reduce to
//!
//! * `∂/∂PI[i]   = B[i][o_0]·beta[0][i] / c[0]`
//! * `∂/∂A[i][j] = Σ_{t≥1} alpha[t-1][i]·B[j][o_t]·beta[t][j] / c[t]`
//! * `∂/∂B[i][m] = Σ_{t: o_t=m} pred[t][i]·beta[t][i] / c[t]`
//!
//! where `pred[0] = PI` and `pred[t][i] = Σ_j alpha[t-1][j]·A[j][i]`. The
//! negated sums over all sequences of the slice are written into the gradient
//! block; blocked components get zeros.

use crate::forward_backward::{emission, SlicePass, Trellis};
use crate::params::{BlockFitting, Component, ParameterBlock};

/// Add one sequence's contribution to `grad`.
fn accumulate(block: &ParameterBlock, trellis: &Trellis, grad: &mut ParameterBlock) {
    let n_states = block.n_states();
    let a = block.a();
    let alpha = trellis.alpha();
    let beta = trellis.beta();
    let scale = trellis.scale();
    let obs = trellis.obs();
    let mut pred = vec![0.0; n_states];

    for t in 0..trellis.len() {
        for (i, p) in pred.iter_mut().enumerate() {
            *p = if t == 0 {
                block.pi()[i]
            } else {
                (0..n_states).map(|j| alpha.get(t - 1, j) * a.get(j, i)).sum()
            };
        }

        if t == 0 {
            for i in 0..n_states {
                grad.pi_mut()[i] -= emission(block, i, obs[0]) * beta.get(0, i) / scale[0];
            }
        } else {
            for i in 0..n_states {
                let from = alpha.get(t - 1, i);
                for j in 0..n_states {
                    let d = from * emission(block, j, obs[t]) * beta.get(t, j) / scale[t];
                    let g = grad.a().get(i, j);
                    grad.a_mut().set(i, j, g - d);
                }
            }
        }

        if let Some(m) = obs[t] {
            for (i, p) in pred.iter().enumerate() {
                let d = p * beta.get(t, i) / scale[t];
                let g = grad.b().get(i, m);
                grad.b_mut().set(i, m, g - d);
            }
        }
    }
}

/// Overwrite `grad` with the gradient of the negative log-likelihood of every
/// trellis in `pass`, zeroing blocked components.
pub fn compute_gradient(
    block: &ParameterBlock,
    pass: &SlicePass,
    blocking: &BlockFitting,
    grad: &mut ParameterBlock,
) {
    grad.clear();
    for trellis in pass.trellises() {
        accumulate(block, trellis, grad);
    }
    for component in Component::ALL {
        if blocking.is_blocked(component) {
            grad.component_mut(component).fill(0.0);
        }
    }
}

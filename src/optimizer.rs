//! Gradient-family step rules and the Armijo line search they share.
//!
//! Every rule builds a step vector `s` from the gradient (and, for the
//! history-based rules, from the previous gradient and direction), then tries
//! candidates `x − e·s` projected onto the bounded simplex, shrinking `e` until
//! the sufficient-decrease condition
//! `f(x_new) ≤ f(x) + c1·⟨g, x_new − x⟩` holds with a strict decrease. When no
//! step down to the minimum is accepted the parameters are restored and the
//! rule reports a stall.

use std::fmt::Debug;

use crate::baum_welch::BaumWelch;
use crate::config::{ArmijoConfig, CgFormula, Solver};
use crate::data::SequenceStore;
use crate::fitbit::{FitBit, Slot};
use crate::forward_backward::{slice_neg_log_likelihood, SlicePass};
use crate::params::{BlockFitting, Component, ParameterBlock, ParameterBounds};

/// What a step rule needs besides the FitBit.
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    /// Rows of the slice
    pub store: &'a SequenceStore,
    /// Sequences of the slice
    pub sequences: &'a [usize],
    /// Bounds every candidate is projected onto
    pub bounds: &'a ParameterBounds,
    /// Line-search settings
    pub armijo: &'a ArmijoConfig,
    /// Forward-backward pass at `Current`
    pub pass: &'a SlicePass,
    /// Negative log-likelihood at `Current`
    pub objective: f64,
}

impl StepContext<'_> {
    /// Negative log-likelihood of the slice under `block`
    pub fn evaluate(&self, block: &ParameterBlock) -> f64 {
        slice_neg_log_likelihood(block, self.store, self.sequences)
    }
}

/// Result of one step
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StepOutcome {
    /// Parameters moved; `step` is the accepted step length
    Accepted {
        /// Accepted step length (1 for Baum-Welch)
        step: f64,
    },
    /// No acceptable candidate; parameters unchanged
    Stalled,
}

/// One parameter update of a slice fit.
pub trait StepRule: Debug {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Update `Current` in place. Gradient-family rules expect the `Gradient`
    /// slot to hold the gradient at `Current`.
    fn step(&mut self, fb: &mut FitBit<'_>, ctx: &StepContext<'_>) -> StepOutcome;
}

/// Step rule for a solver
pub fn step_rule_for(solver: Solver) -> Box<dyn StepRule> {
    match solver {
        Solver::BaumWelch => Box::new(BaumWelch),
        Solver::GradientDescent => Box::new(GradientDescent),
        Solver::ConjugateGradient(formula) => Box::new(ConjugateGradient::new(formula)),
        Solver::GradientDescentLagrange => Box::new(LagrangeGradientDescent),
        Solver::BarzilaiBorwein => Box::new(BarzilaiBorwein),
    }
}

/// Armijo backtracking from `start` along `−step_vector`.
///
/// Saves `Current` into `Snapshot` first and restores it when every candidate
/// is rejected. Returns the accepted step length.
pub fn armijo_backtrack(
    fb: &mut FitBit<'_>,
    ctx: &StepContext<'_>,
    step_vector: &ParameterBlock,
    start: f64,
) -> Option<f64> {
    let armijo = ctx.armijo;
    fb.copy(Slot::Current, Slot::Snapshot);

    let mut step = start;
    loop {
        fb.set_candidate(step_vector, step, ctx.bounds);
        let value = ctx.evaluate(fb.current());
        let threshold = ctx.objective + armijo.c1 * fb.directional_change();
        if value.is_finite() && value < ctx.objective && value <= threshold {
            log::trace!("armijo accepted step {:.6} ({:.6} -> {:.6})", step, ctx.objective, value);
            return Some(step);
        }
        step /= armijo.reduce_factor;
        if step < armijo.min_step {
            break;
        }
    }

    fb.restore_snapshot();
    None
}

fn negated(block: &ParameterBlock) -> ParameterBlock {
    let mut out = block.clone();
    out.scale(-1.0);
    out
}

/// Projected gradient descent: `x − e·g`, `g` gently scaled.
#[derive(Debug, Clone, Copy, Default)]
pub struct GradientDescent;

impl StepRule for GradientDescent {
    fn name(&self) -> &'static str {
        "gradient descent"
    }

    fn step(&mut self, fb: &mut FitBit<'_>, ctx: &StepContext<'_>) -> StepOutcome {
        let Some(mut step_vector) = fb.get(Slot::Gradient).cloned() else {
            return StepOutcome::Stalled;
        };
        fb.scale_gentle(&mut step_vector);
        match armijo_backtrack(fb, ctx, &step_vector, ctx.armijo.seed) {
            Some(step) => StepOutcome::Accepted { step },
            None => StepOutcome::Stalled,
        }
    }
}

/// Remove from every probability row its mean gradient over the free entries
/// (`lb < ub`) and zero the pinned entries, so a step keeps the row sum.
pub fn lagrange_correct(grad: &mut ParameterBlock, bounds: &ParameterBounds, blocking: &BlockFitting) {
    let n_states = grad.n_states();
    let n_obs = grad.n_obs();
    for component in blocking.free_components() {
        let width = match component {
            Component::Pi | Component::A => n_states,
            Component::B => n_obs,
        };
        let lower = bounds.lower.component(component);
        let upper = bounds.upper.component(component);
        let rows = grad
            .component_mut(component)
            .chunks_mut(width)
            .zip(lower.chunks(width).zip(upper.chunks(width)));
        for (row, (lo, hi)) in rows {
            let free: Vec<bool> = lo.iter().zip(hi).map(|(l, h)| l < h).collect();
            let mut sum = 0.0;
            let mut n_free = 0usize;
            for (g, &f) in row.iter().zip(&free) {
                if f {
                    sum += g;
                    n_free += 1;
                }
            }
            let mean = if n_free > 0 { sum / n_free as f64 } else { 0.0 };
            for (g, &f) in row.iter_mut().zip(&free) {
                *g = if f { *g - mean } else { 0.0 };
            }
        }
    }
}

/// Gradient descent along the row-sum preserving (Lagrange-corrected) gradient.
#[derive(Debug, Clone, Copy, Default)]
pub struct LagrangeGradientDescent;

impl StepRule for LagrangeGradientDescent {
    fn name(&self) -> &'static str {
        "gradient descent with Lagrange step"
    }

    fn step(&mut self, fb: &mut FitBit<'_>, ctx: &StepContext<'_>) -> StepOutcome {
        let Some(mut step_vector) = fb.get(Slot::Gradient).cloned() else {
            return StepOutcome::Stalled;
        };
        lagrange_correct(&mut step_vector, ctx.bounds, fb.blocking());
        fb.scale_gentle(&mut step_vector);
        match armijo_backtrack(fb, ctx, &step_vector, ctx.armijo.seed) {
            Some(step) => StepOutcome::Accepted { step },
            None => StepOutcome::Stalled,
        }
    }
}

/// Nonlinear conjugate gradient with restarts.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConjugateGradient {
    formula: CgFormula,
}

impl ConjugateGradient {
    /// Rule using `formula` for β
    pub fn new(formula: CgFormula) -> Self {
        Self { formula }
    }

    /// β for the current gradient, or `None` when there is no history.
    fn beta(&self, fb: &FitBit<'_>, grad: &ParameterBlock) -> Option<f64> {
        let g_prev = fb.get(Slot::PreviousGradient)?;
        let d_prev = fb.get(Slot::PreviousDirection)?;
        let blocking = fb.blocking();
        let mut y = grad.clone();
        y.add_scaled(g_prev, -1.0);
        let beta = match self.formula {
            CgFormula::PolakRibiere => grad.dot(&y, blocking) / g_prev.dot(g_prev, blocking),
            CgFormula::FletcherReeves => grad.dot(grad, blocking) / g_prev.dot(g_prev, blocking),
            CgFormula::HestenesStiefel => grad.dot(&y, blocking) / d_prev.dot(&y, blocking),
        };
        Some(beta)
    }
}

impl StepRule for ConjugateGradient {
    fn name(&self) -> &'static str {
        "conjugate gradient"
    }

    fn step(&mut self, fb: &mut FitBit<'_>, ctx: &StepContext<'_>) -> StepOutcome {
        let Some(grad) = fb.get(Slot::Gradient).cloned() else {
            return StepOutcome::Stalled;
        };
        let blocking = *fb.blocking();

        let steepest = negated(&grad);
        let mut direction = steepest.clone();
        let mut conjugate = false;
        match self.beta(fb, &grad) {
            Some(beta) if beta.is_finite() && beta > 0.0 => {
                if let Some(d_prev) = fb.get(Slot::PreviousDirection) {
                    let mut candidate = steepest.clone();
                    candidate.add_scaled(d_prev, beta);
                    if grad.dot(&candidate, &blocking) < 0.0 {
                        direction = candidate;
                        conjugate = true;
                    } else {
                        log::debug!("conjugate direction is not a descent direction, restarting");
                    }
                }
            }
            Some(beta) => log::debug!("restarting conjugate gradient (beta = {})", beta),
            None => {}
        }

        let mut step_vector = negated(&direction);
        fb.scale_gentle(&mut step_vector);
        let mut accepted = armijo_backtrack(fb, ctx, &step_vector, ctx.armijo.seed);

        if accepted.is_none() && conjugate {
            log::debug!("line search failed along conjugate direction, retrying along the gradient");
            direction = steepest;
            let mut step_vector = grad.clone();
            fb.scale_gentle(&mut step_vector);
            accepted = armijo_backtrack(fb, ctx, &step_vector, ctx.armijo.seed);
        }

        match accepted {
            Some(step) => {
                fb.store(Slot::PreviousDirection, &direction);
                fb.copy(Slot::Gradient, Slot::PreviousGradient);
                StepOutcome::Accepted { step }
            }
            None => StepOutcome::Stalled,
        }
    }
}

/// Barzilai-Borwein two-point step length `⟨s,s⟩/⟨s,y⟩`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BarzilaiBorwein;

impl BarzilaiBorwein {
    fn step_length(fb: &FitBit<'_>, grad: &ParameterBlock) -> Option<f64> {
        let g_prev = fb.get(Slot::PreviousGradient)?;
        let s = fb.get(Slot::PreviousDirection)?;
        let blocking = fb.blocking();
        let mut y = grad.clone();
        y.add_scaled(g_prev, -1.0);
        let sy = s.dot(&y, blocking);
        let alpha = s.dot(s, blocking) / sy;
        (sy > 0.0 && alpha.is_finite() && alpha > 0.0).then_some(alpha)
    }
}

impl StepRule for BarzilaiBorwein {
    fn name(&self) -> &'static str {
        "Barzilai-Borwein"
    }

    fn step(&mut self, fb: &mut FitBit<'_>, ctx: &StepContext<'_>) -> StepOutcome {
        let Some(grad) = fb.get(Slot::Gradient).cloned() else {
            return StepOutcome::Stalled;
        };

        let accepted = match Self::step_length(fb, &grad) {
            Some(alpha) => armijo_backtrack(fb, ctx, &grad, alpha),
            None => {
                let mut step_vector = grad.clone();
                fb.scale_gentle(&mut step_vector);
                armijo_backtrack(fb, ctx, &step_vector, ctx.armijo.seed)
            }
        };

        match accepted {
            Some(step) => {
                if let Some(displacement) = fb.displacement() {
                    fb.store(Slot::PreviousDirection, &displacement);
                }
                fb.copy(Slot::Gradient, Slot::PreviousGradient);
                StepOutcome::Accepted { step }
            }
            None => StepOutcome::Stalled,
        }
    }
}

//! Baum-Welch re-estimation as a step rule.
//!
//! Expected counts come from the posteriors of the slice pass at `Current`.
//! Rows without expected mass keep their values, blocked components are left
//! alone, and the result is projected onto the bounds as a safety net.

use crate::fitbit::FitBit;
use crate::math_utils::constants::SAFETY;
use crate::matrix::Matrix;
use crate::optimizer::{StepContext, StepOutcome, StepRule};
use crate::params::Component;

/// Expectation-maximisation update of PI, A and B.
#[derive(Debug, Clone, Copy, Default)]
pub struct BaumWelch;

/// Expected counts accumulated over a slice
struct ExpectedCounts {
    pi: Vec<f64>,
    transitions: Matrix,
    departures: Vec<f64>,
    emissions: Matrix,
    visits: Vec<f64>,
}

impl ExpectedCounts {
    fn new(n_states: usize, n_obs: usize) -> Self {
        Self {
            pi: vec![0.0; n_states],
            transitions: Matrix::zeros(n_states, n_states),
            departures: vec![0.0; n_states],
            emissions: Matrix::zeros(n_states, n_obs),
            visits: vec![0.0; n_states],
        }
    }
}

/// Normalise `counts` into `row` unless the mass is negligible.
fn normalise_into(row: &mut [f64], counts: &[f64], mass: f64) {
    if mass > SAFETY {
        for (r, c) in row.iter_mut().zip(counts) {
            *r = c / mass;
        }
    }
}

impl StepRule for BaumWelch {
    fn name(&self) -> &'static str {
        "Baum-Welch"
    }

    fn step(&mut self, fb: &mut FitBit<'_>, ctx: &StepContext<'_>) -> StepOutcome {
        let n_states = fb.n_states();
        let mut counts = ExpectedCounts::new(n_states, fb.n_obs());

        for trellis in ctx.pass.trellises() {
            let (Some(gamma), Some(xi)) = (trellis.gamma(), trellis.xi()) else {
                log::warn!("Baum-Welch step without posteriors, skipping sequence");
                continue;
            };
            for (p, g) in counts.pi.iter_mut().zip(gamma.row(0)) {
                *p += g;
            }
            for (t, step) in xi.iter().enumerate() {
                for i in 0..n_states {
                    counts.departures[i] += gamma.get(t, i);
                    for j in 0..n_states {
                        let c = counts.transitions.get(i, j);
                        counts.transitions.set(i, j, c + step.get(i, j));
                    }
                }
            }
            for (t, obs) in trellis.obs().iter().enumerate() {
                let Some(m) = *obs else {
                    continue;
                };
                for i in 0..n_states {
                    let g = gamma.get(t, i);
                    counts.visits[i] += g;
                    let c = counts.emissions.get(i, m);
                    counts.emissions.set(i, m, c + g);
                }
            }
        }

        let blocking = *fb.blocking();
        let block = fb.current_mut();
        if !blocking.is_blocked(Component::Pi) {
            let mass: f64 = counts.pi.iter().sum();
            normalise_into(block.pi_mut(), &counts.pi, mass);
        }
        if !blocking.is_blocked(Component::A) {
            for i in 0..n_states {
                normalise_into(block.a_mut().row_mut(i), counts.transitions.row(i), counts.departures[i]);
            }
        }
        if !blocking.is_blocked(Component::B) {
            for i in 0..n_states {
                normalise_into(block.b_mut().row_mut(i), counts.emissions.row(i), counts.visits[i]);
            }
        }
        block.project(ctx.bounds);

        StepOutcome::Accepted { step: 1.0 }
    }
}

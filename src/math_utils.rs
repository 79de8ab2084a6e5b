//! Numeric safety helpers shared by the forward-backward engine, the step rules
//! and prediction.
//!
//! Every probability that could be exactly zero goes through one of these before
//! a logarithm or a division, so the recursions stay well-defined on degenerate
//! parameter blocks.

/// Mathematical constants used across the engine
pub mod constants {
    /// Value substituted for zero in logarithms and denominators
    pub const SAFETY: f64 = 1e-12;

    /// Tolerance for "sums to one" checks on projected rows
    pub const SIMPLEX_TOLERANCE: f64 = 1e-9;

    /// Share of the distance to the nearest boundary a gentle step may cover
    pub const GENTLE_STEP_SHARE: f64 = 0.95;
}

/// Safe floating point operations
pub mod float_ops {
    use super::constants::SAFETY;

    /// Check if two floating point numbers are approximately equal with custom epsilon
    #[inline]
    pub fn approx_eq_eps(a: f64, b: f64, epsilon: f64) -> bool {
        (a - b).abs() < epsilon
    }

    /// Logarithm that substitutes [`SAFETY`] for non-positive arguments.
    #[inline]
    pub fn safe_log(x: f64) -> f64 {
        if x > 0.0 {
            x.ln()
        } else {
            SAFETY.ln()
        }
    }

    /// Clamp a probability into the open interval `(0, 1)`.
    #[inline]
    pub fn safe_unit(x: f64) -> f64 {
        if x <= 0.0 {
            SAFETY
        } else if x >= 1.0 {
            1.0 - SAFETY
        } else {
            x
        }
    }

    /// Floor a non-negative quantity at [`SAFETY`].
    #[inline]
    pub fn safe_positive(x: f64) -> f64 {
        if x < SAFETY {
            SAFETY
        } else {
            x
        }
    }
}

/// Dot product of two equally sized slices.
#[inline]
pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Rescale a descent vector so that a unit step `par - grad` cannot carry any
/// parameter past 0 or 1.
///
/// For every non-zero component the distance to the boundary it moves toward is
/// measured (toward 1 for negative components, toward 0 for positive ones).
/// Parameters already sitting at 0 or 1 do not constrain the step. The largest
/// component is then shrunk to [`GENTLE_STEP_SHARE`](constants::GENTLE_STEP_SHARE)
/// of the tightest distance, i.e. every component is multiplied by
/// `GENTLE_STEP_SHARE · min_delta / max|g|`. Vectors already small enough are
/// left untouched.
///
/// Returns the factor applied (1.0 when nothing changed).
pub fn log10_scale_gentle(grad: &mut [f64], par: &[f64]) -> f64 {
    use constants::{GENTLE_STEP_SHARE, SAFETY};

    debug_assert_eq!(grad.len(), par.len());
    let mut max_grad = 0.0f64;
    let mut min_delta = 1.0f64;

    for (&g, &p) in grad.iter().zip(par) {
        if g.abs() < SAFETY {
            continue;
        }
        max_grad = max_grad.max(g.abs());

        let at_extreme = p.abs() < SAFETY || (1.0 - p).abs() < SAFETY;
        let mut delta = if g < 0.0 { 1.0 - p } else { p };
        if at_extreme {
            delta += 1.0;
        }
        min_delta = min_delta.min(delta);
    }

    if max_grad == 0.0 {
        return 1.0;
    }

    let factor = GENTLE_STEP_SHARE * min_delta.max(0.0) / max_grad;
    if factor >= 1.0 || !factor.is_finite() {
        return 1.0;
    }

    for g in grad.iter_mut() {
        *g *= factor;
    }
    factor
}

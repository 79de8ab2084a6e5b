//! Euclidean projection onto the probability simplex, optionally intersected
//! with per-element lower/upper bounds.
//!
//! This is the only place where simplex feasibility of PI and of the rows of A
//! and B is enforced. Every gradient-family step runs its candidate through
//! [`project_simplex_bounded`]; Baum-Welch uses it as a safety net.

use crate::math_utils::constants::SAFETY;
use crate::matrix::Matrix;

/// `true` when `x` is a probability vector: entries in `[0, 1]`, sum within
/// [`SAFETY`] of one.
pub fn is_simplex(x: &[f64]) -> bool {
    let mut sum = 0.0;
    for &v in x {
        if !(0.0..=1.0).contains(&v) {
            return false;
        }
        sum += v;
    }
    (sum - 1.0).abs() < SAFETY
}

/// `true` when `x` is a probability vector whose entries lie within their bounds
/// (with [`SAFETY`] slack).
pub fn is_simplex_bounded(x: &[f64], lb: &[f64], ub: &[f64]) -> bool {
    debug_assert!(x.len() == lb.len() && x.len() == ub.len());
    let mut sum = 0.0;
    for ((&v, &lo), &hi) in x.iter().zip(lb).zip(ub) {
        if !v.is_finite() || lo - v > SAFETY || v - hi > SAFETY {
            return false;
        }
        sum += v;
    }
    (sum - 1.0).abs() < SAFETY
}

/// Project `y` onto `{x : Σx = 1, x ≥ 0}` in place.
///
/// Sorted-threshold algorithm (Chen & Ye, arXiv:1101.6081): sort descending,
/// find the first prefix whose shifted mean reaches the next element, subtract
/// that threshold and clip at zero.
pub fn project_simplex(y: &mut [f64]) {
    let n = y.len();
    if n == 0 {
        return;
    }

    let mut sorted: Vec<f64> = y.iter().map(|v| if v.is_finite() { *v } else { 0.0 }).collect();
    sorted.sort_by(|a, b| b.total_cmp(a));

    let mut cumsum = 0.0;
    let mut threshold = None;
    for i in 0..n - 1 {
        cumsum += sorted[i];
        let t = (cumsum - 1.0) / (i + 1) as f64;
        if t >= sorted[i + 1] {
            threshold = Some(t);
            break;
        }
    }
    let threshold = threshold.unwrap_or((cumsum + sorted[n - 1] - 1.0) / n as f64);

    for v in y.iter_mut() {
        let value = if v.is_finite() { *v } else { 0.0 };
        *v = (value - threshold).max(0.0);
    }
}

/// Project `x` onto `{x : Σx = 1, lb ≤ x ≤ ub}` in place.
///
/// The projection is `clamp(x_i − τ, lb_i, ub_i)` for the threshold τ at which
/// the clamped vector sums to one. The clamped sum is piecewise linear and
/// non-increasing in τ with breakpoints `x_i − ub_i` and `x_i − lb_i`; the
/// breakpoints are sorted and τ is solved on the segment that brackets one.
/// Feasible input is left untouched. When the bounds admit no probability
/// vector the result is the nearer bound vector.
pub fn project_simplex_bounded(x: &mut [f64], lb: &[f64], ub: &[f64]) {
    debug_assert!(x.len() == lb.len() && x.len() == ub.len());
    if x.is_empty() || is_simplex_bounded(x, lb, ub) {
        return;
    }
    if lb.iter().all(|&v| v <= 0.0) && ub.iter().all(|&v| v >= 1.0) {
        project_simplex(x);
        return;
    }

    for v in x.iter_mut() {
        if !v.is_finite() {
            *v = 0.0;
        }
    }

    let lower_sum: f64 = lb.iter().sum();
    let upper_sum: f64 = ub.iter().sum();
    if lower_sum >= 1.0 - SAFETY {
        x.copy_from_slice(lb);
        return;
    }
    if upper_sum <= 1.0 + SAFETY {
        x.copy_from_slice(ub);
        return;
    }

    let clamped_sum = |tau: f64| -> f64 {
        x.iter()
            .zip(lb)
            .zip(ub)
            .map(|((&v, &lo), &hi)| (v - tau).clamp(lo, hi))
            .sum()
    };

    let mut breakpoints: Vec<f64> = x
        .iter()
        .zip(lb)
        .zip(ub)
        .flat_map(|((&v, &lo), &hi)| [v - hi, v - lo])
        .collect();
    breakpoints.sort_by(f64::total_cmp);
    breakpoints.dedup();

    // the sum at the smallest breakpoint is upper_sum > 1, at the largest lower_sum < 1
    let mut tau = breakpoints[breakpoints.len() - 1];
    let mut left = breakpoints[0];
    let mut left_sum = clamped_sum(left);
    for &right in &breakpoints[1..] {
        let right_sum = clamped_sum(right);
        if right_sum <= 1.0 {
            let drop = left_sum - right_sum;
            tau = if drop > 0.0 {
                left + (left_sum - 1.0) / drop * (right - left)
            } else {
                left
            };
            break;
        }
        left = right;
        left_sum = right_sum;
    }

    for ((v, &lo), &hi) in x.iter_mut().zip(lb).zip(ub) {
        *v = (*v - tau).clamp(lo, hi);
    }
}

/// Project every row of `m` onto the bounded simplex given by the matching rows
/// of `lb` and `ub`.
pub fn project_rows_bounded(m: &mut Matrix, lb: &Matrix, ub: &Matrix) {
    for r in 0..m.rows() {
        project_simplex_bounded(m.row_mut(r), lb.row(r), ub.row(r));
    }
}

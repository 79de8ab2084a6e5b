//! Parameter blocks: one `(PI, A, B)` triple per skill or per group, plus the
//! paired lower/upper bounds every block must respect.

use crate::errors::{validate_len, HmmError, HmmResult};
use crate::math_utils::constants::SIMPLEX_TOLERANCE;
use crate::math_utils::dot;
use crate::matrix::Matrix;
use crate::simplex::{is_simplex_bounded, project_rows_bounded, project_simplex_bounded};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The three probability components of an HMM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Component {
    /// Initial-state distribution
    Pi,
    /// Transition matrix
    A,
    /// Emission matrix
    B,
}

impl Component {
    /// All components in storage order
    pub const ALL: [Component; 3] = [Component::Pi, Component::A, Component::B];

    /// Short display name
    pub fn name(self) -> &'static str {
        match self {
            Component::Pi => "PI",
            Component::A => "A",
            Component::B => "B",
        }
    }
}

/// Flags excluding components from fitting. A blocked component keeps its
/// starting values for the whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BlockFitting {
    /// Keep PI fixed
    pub pi: bool,
    /// Keep A fixed
    pub a: bool,
    /// Keep B fixed
    pub b: bool,
}

impl BlockFitting {
    /// Nothing blocked
    pub fn none() -> Self {
        Self::default()
    }

    /// Whether `component` is excluded from fitting
    #[inline]
    pub fn is_blocked(&self, component: Component) -> bool {
        match component {
            Component::Pi => self.pi,
            Component::A => self.a,
            Component::B => self.b,
        }
    }

    /// Components that are fitted
    pub fn free_components(&self) -> impl Iterator<Item = Component> + '_ {
        Component::ALL.into_iter().filter(move |c| !self.is_blocked(*c))
    }
}

/// Initial-state vector, transition matrix and emission matrix of one model.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ParameterBlock {
    pi: Vec<f64>,
    a: Matrix,
    b: Matrix,
}

impl ParameterBlock {
    /// All-zero block of the given shape
    pub fn zeros(n_states: usize, n_obs: usize) -> Self {
        Self {
            pi: vec![0.0; n_states],
            a: Matrix::zeros(n_states, n_states),
            b: Matrix::zeros(n_states, n_obs),
        }
    }

    /// Assemble a block from its parts, checking shapes.
    pub fn from_parts(pi: Vec<f64>, a: Matrix, b: Matrix) -> HmmResult<Self> {
        let n_states = pi.len();
        validate_len("A rows", n_states, a.rows())?;
        validate_len("A columns", n_states, a.cols())?;
        validate_len("B rows", n_states, b.rows())?;
        Ok(Self { pi, a, b })
    }

    /// Build a block from the compact layout where the last value of every
    /// probability row is implied: `nS-1` priors, then `nS` transition rows of
    /// `nS-1`, then `nS` emission rows of `nO-1`.
    pub fn from_compact(values: &[f64], n_states: usize, n_obs: usize) -> HmmResult<Self> {
        check_shape(n_states, n_obs)?;
        let expected = (n_states - 1) + n_states * (n_states - 1) + n_states * (n_obs - 1);
        validate_len("compact parameter vector", expected, values.len())?;

        let mut rest = values;
        let mut take_row = |width: usize| -> Vec<f64> {
            let (head, tail) = rest.split_at(width - 1);
            rest = tail;
            let mut row = head.to_vec();
            row.push(1.0 - head.iter().sum::<f64>());
            row
        };

        let pi = take_row(n_states);
        let a_rows: Vec<Vec<f64>> = (0..n_states).map(|_| take_row(n_states)).collect();
        let b_rows: Vec<Vec<f64>> = (0..n_states).map(|_| take_row(n_obs)).collect();
        Self::from_parts(pi, Matrix::from_rows(&a_rows), Matrix::from_rows(&b_rows))
    }

    /// Build a block from the full layout: `nS` priors, `nS*nS` transitions,
    /// `nS*nO` emissions. Used for bounds.
    pub fn from_full(values: &[f64], n_states: usize, n_obs: usize) -> HmmResult<Self> {
        check_shape(n_states, n_obs)?;
        let expected = n_states + n_states * n_states + n_states * n_obs;
        validate_len("full parameter vector", expected, values.len())?;

        let (pi, rest) = values.split_at(n_states);
        let (a, b) = rest.split_at(n_states * n_states);
        let a_rows: Vec<Vec<f64>> = a.chunks(n_states).map(<[f64]>::to_vec).collect();
        let b_rows: Vec<Vec<f64>> = b.chunks(n_obs).map(<[f64]>::to_vec).collect();
        Self::from_parts(pi.to_vec(), Matrix::from_rows(&a_rows), Matrix::from_rows(&b_rows))
    }

    /// Number of hidden states
    #[inline]
    pub fn n_states(&self) -> usize {
        self.pi.len()
    }

    /// Number of observation symbols
    #[inline]
    pub fn n_obs(&self) -> usize {
        self.b.cols()
    }

    /// Initial-state distribution
    #[inline]
    pub fn pi(&self) -> &[f64] {
        &self.pi
    }

    /// Transition matrix
    #[inline]
    pub fn a(&self) -> &Matrix {
        &self.a
    }

    /// Emission matrix
    #[inline]
    pub fn b(&self) -> &Matrix {
        &self.b
    }

    /// Mutable initial-state distribution
    #[inline]
    pub fn pi_mut(&mut self) -> &mut [f64] {
        &mut self.pi
    }

    /// Mutable transition matrix
    #[inline]
    pub fn a_mut(&mut self) -> &mut Matrix {
        &mut self.a
    }

    /// Mutable emission matrix
    #[inline]
    pub fn b_mut(&mut self) -> &mut Matrix {
        &mut self.b
    }

    /// Flat view of one component
    pub fn component(&self, component: Component) -> &[f64] {
        match component {
            Component::Pi => &self.pi,
            Component::A => self.a.as_slice(),
            Component::B => self.b.as_slice(),
        }
    }

    /// Mutable flat view of one component
    pub fn component_mut(&mut self, component: Component) -> &mut [f64] {
        match component {
            Component::Pi => &mut self.pi,
            Component::A => self.a.as_mut_slice(),
            Component::B => self.b.as_mut_slice(),
        }
    }

    /// Same shape as `other`
    pub fn same_shape(&self, other: &ParameterBlock) -> bool {
        self.n_states() == other.n_states() && self.n_obs() == other.n_obs()
    }

    /// Set every element to zero
    pub fn clear(&mut self) {
        self.pi.fill(0.0);
        self.a.clear();
        self.b.clear();
    }

    /// Overwrite with the values of a same-shaped block
    pub fn copy_from(&mut self, other: &ParameterBlock) {
        debug_assert!(self.same_shape(other));
        self.pi.copy_from_slice(&other.pi);
        self.a.copy_from(&other.a);
        self.b.copy_from(&other.b);
    }

    /// `self += weight * other`, element-wise over PI, A and B
    pub fn add_scaled(&mut self, other: &ParameterBlock, weight: f64) {
        debug_assert!(self.same_shape(other));
        for component in Component::ALL {
            let source = other.component(component);
            for (t, s) in self.component_mut(component).iter_mut().zip(source) {
                *t += weight * s;
            }
        }
    }

    /// Multiply every element by `factor`
    pub fn scale(&mut self, factor: f64) {
        for component in Component::ALL {
            for v in self.component_mut(component) {
                *v *= factor;
            }
        }
    }

    /// Inner product over the components that are not blocked
    pub fn dot(&self, other: &ParameterBlock, blocking: &BlockFitting) -> f64 {
        blocking
            .free_components()
            .map(|c| dot(self.component(c), other.component(c)))
            .sum()
    }

    /// Largest absolute element-wise difference over non-blocked components
    pub fn max_abs_diff(&self, other: &ParameterBlock, blocking: &BlockFitting) -> f64 {
        blocking
            .free_components()
            .flat_map(|c| {
                self.component(c)
                    .iter()
                    .zip(other.component(c))
                    .map(|(x, y)| (x - y).abs())
            })
            .fold(0.0, f64::max)
    }

    /// Project PI and every row of A and B onto their bounded simplices.
    pub fn project(&mut self, bounds: &ParameterBounds) {
        project_simplex_bounded(&mut self.pi, &bounds.lower.pi, &bounds.upper.pi);
        project_rows_bounded(&mut self.a, &bounds.lower.a, &bounds.upper.a);
        project_rows_bounded(&mut self.b, &bounds.lower.b, &bounds.upper.b);
    }

    /// `true` when PI and every row of A and B are probability vectors within
    /// their bounds.
    pub fn satisfies(&self, bounds: &ParameterBounds) -> bool {
        if !is_simplex_bounded(&self.pi, &bounds.lower.pi, &bounds.upper.pi) {
            return false;
        }
        let rows_ok = |m: &Matrix, lo: &Matrix, hi: &Matrix| {
            (0..m.rows()).all(|r| is_simplex_bounded(m.row(r), lo.row(r), hi.row(r)))
        };
        rows_ok(&self.a, &bounds.lower.a, &bounds.upper.a)
            && rows_ok(&self.b, &bounds.lower.b, &bounds.upper.b)
    }
}

/// Element-wise lower and upper bounds for a [`ParameterBlock`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ParameterBounds {
    /// Lower bounds
    pub lower: ParameterBlock,
    /// Upper bounds
    pub upper: ParameterBlock,
}

impl ParameterBounds {
    /// The plain `[0, 1]` box.
    pub fn unbounded(n_states: usize, n_obs: usize) -> Self {
        Self {
            lower: ParameterBlock::zeros(n_states, n_obs),
            upper: ParameterBlock::ones(n_states, n_obs),
        }
    }

    /// Build from two full-layout vectors (see [`ParameterBlock::from_full`]).
    pub fn from_full(lower: &[f64], upper: &[f64], n_states: usize, n_obs: usize) -> HmmResult<Self> {
        let bounds = Self {
            lower: ParameterBlock::from_full(lower, n_states, n_obs)?,
            upper: ParameterBlock::from_full(upper, n_states, n_obs)?,
        };
        bounds.validate()?;
        Ok(bounds)
    }

    /// Every row must admit at least one probability vector.
    pub fn validate(&self) -> HmmResult<()> {
        let check = |component: Component, row: usize, lo: &[f64], hi: &[f64]| -> HmmResult<()> {
            let lower_sum: f64 = lo.iter().sum();
            let upper_sum: f64 = hi.iter().sum();
            let crossed = lo.iter().zip(hi).any(|(l, h)| l > h);
            if crossed || lower_sum > 1.0 + SIMPLEX_TOLERANCE || upper_sum < 1.0 - SIMPLEX_TOLERANCE {
                return Err(HmmError::InfeasibleBounds {
                    component: component.name().to_string(),
                    row,
                    lower_sum,
                    upper_sum,
                });
            }
            Ok(())
        };

        check(Component::Pi, 0, self.lower.pi(), self.upper.pi())?;
        for r in 0..self.lower.n_states() {
            check(Component::A, r, self.lower.a().row(r), self.upper.a().row(r))?;
            check(Component::B, r, self.lower.b().row(r), self.upper.b().row(r))?;
        }
        Ok(())
    }

    /// Number of free parameters of one block: per probability row, the entries
    /// with `lb < ub` minus one for the sum constraint.
    pub fn free_parameter_count(&self, blocking: &BlockFitting) -> usize {
        let free_in_row = |lo: &[f64], hi: &[f64]| -> usize {
            let free = lo.iter().zip(hi).filter(|(l, h)| l < h).count();
            free.saturating_sub(1)
        };
        let mut count = 0;
        if !blocking.pi {
            count += free_in_row(self.lower.pi(), self.upper.pi());
        }
        for r in 0..self.lower.n_states() {
            if !blocking.a {
                count += free_in_row(self.lower.a().row(r), self.upper.a().row(r));
            }
            if !blocking.b {
                count += free_in_row(self.lower.b().row(r), self.upper.b().row(r));
            }
        }
        count
    }
}

fn check_shape(n_states: usize, n_obs: usize) -> HmmResult<()> {
    let smallest = n_states.min(n_obs);
    if smallest == 0 {
        return Err(HmmError::InsufficientData {
            required: 1,
            actual: smallest,
        });
    }
    Ok(())
}

impl ParameterBlock {
    fn ones(n_states: usize, n_obs: usize) -> Self {
        Self {
            pi: vec![1.0; n_states],
            a: Matrix::filled(n_states, n_states, 1.0),
            b: Matrix::filled(n_states, n_obs, 1.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bkt_block() -> ParameterBlock {
        ParameterBlock::from_compact(&[0.5, 1.0, 0.4, 0.8, 0.2], 2, 2).unwrap()
    }

    fn bkt_bounds() -> ParameterBounds {
        ParameterBounds::from_full(
            &[0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            &[1.0, 1.0, 1.0, 0.0, 1.0, 1.0, 1.0, 0.3, 0.3, 1.0],
            2,
            2,
        )
        .unwrap()
    }

    #[test]
    fn test_compact_layout_fills_implied_values() {
        let block = bkt_block();
        assert_eq!(block.pi(), &[0.5, 0.5]);
        assert_eq!(block.a().row(0), &[1.0, 0.0]);
        assert!((block.a().get(1, 1) - 0.6).abs() < 1e-12);
        assert_eq!(block.b().row(0), &[0.8, 0.2]);
        assert!((block.b().get(1, 1) - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_compact_layout_length_is_checked() {
        let err = ParameterBlock::from_compact(&[0.5, 1.0], 2, 2).unwrap_err();
        assert!(matches!(err, HmmError::DimensionMismatch { expected: 5, actual: 2, .. }));
    }

    #[test]
    fn test_default_bkt_block_satisfies_bounds() {
        assert!(bkt_block().satisfies(&bkt_bounds()));
    }

    #[test]
    fn test_projection_restores_feasibility() {
        let bounds = bkt_bounds();
        let mut block = bkt_block();
        block.pi_mut()[0] = 1.4;
        block.b_mut().set(0, 1, 0.9);
        assert!(!block.satisfies(&bounds));
        block.project(&bounds);
        assert!(block.satisfies(&bounds));
        assert!(block.b().get(0, 1) <= 0.3 + 1e-12);
    }

    #[test]
    fn test_crossed_bounds_are_rejected() {
        let err = ParameterBounds::from_full(
            &[0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.9],
            &[1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 0.5],
            2,
            2,
        )
        .unwrap_err();
        assert!(matches!(err, HmmError::InfeasibleBounds { row: 1, .. }));
    }

    #[test]
    fn test_bound_sums_within_simplex_tolerance() {
        let hi = [1.0; 10];
        let mut lo = [0.0; 10];
        // PI lower bounds summing to one plus rounding noise stay feasible
        lo[0] = 0.5 + SIMPLEX_TOLERANCE / 2.0;
        lo[1] = 0.5;
        assert!(ParameterBounds::from_full(&lo, &hi, 2, 2).is_ok());
        lo[0] = 0.5 + 10.0 * SIMPLEX_TOLERANCE;
        let err = ParameterBounds::from_full(&lo, &hi, 2, 2).unwrap_err();
        assert!(matches!(err, HmmError::InfeasibleBounds { row: 0, .. }));
    }

    #[test]
    fn test_free_parameter_count_for_bkt() {
        let bounds = bkt_bounds();
        assert_eq!(bounds.free_parameter_count(&BlockFitting::none()), 4);
        let blocked_pi = BlockFitting { pi: true, ..BlockFitting::none() };
        assert_eq!(bounds.free_parameter_count(&blocked_pi), 3);
        assert_eq!(ParameterBounds::unbounded(2, 3).free_parameter_count(&BlockFitting::none()), 7);
    }

    #[test]
    fn test_diff_and_dot_skip_blocked_components() {
        let a = bkt_block();
        let mut b = a.clone();
        b.pi_mut()[0] = 0.9;
        let none = BlockFitting::none();
        let pi_blocked = BlockFitting { pi: true, ..none };
        assert!((a.max_abs_diff(&b, &none) - 0.4).abs() < 1e-12);
        assert_eq!(a.max_abs_diff(&b, &pi_blocked), 0.0);
        assert!(a.dot(&a, &none) > a.dot(&a, &pi_blocked));
    }

    #[test]
    fn test_add_scaled() {
        let mut a = ParameterBlock::zeros(2, 2);
        let b = bkt_block();
        a.add_scaled(&b, 2.0);
        assert_eq!(a.pi(), &[1.0, 1.0]);
        assert_eq!(a.a().get(0, 0), 2.0);
    }
}

//! # Fitting Configuration
//!
//! Everything a fit needs besides the data: model shape, initial parameters and
//! bounds in their flat layouts, which components are frozen, the model
//! structure, the step rule and its line-search settings, and the stopping
//! rule. A [`FitConfig`] is passed by value into
//! [`HmmProblem::new`](crate::problem::HmmProblem::new) and never mutated by
//! fitting.

use std::fmt;
use std::str::FromStr;

use crate::errors::{validate_parameter, validate_probabilities, HmmError, HmmResult};
use crate::params::{BlockFitting, Component, ParameterBlock, ParameterBounds};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// How rows are grouped into parameter blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Structure {
    /// One block per skill (id 1)
    BySkill,
    /// One block per group, e.g. per student (id 2)
    ByGroup,
}

impl Structure {
    fn id(self) -> u8 {
        match self {
            Structure::BySkill => 1,
            Structure::ByGroup => 2,
        }
    }
}

/// Formula for the conjugate-gradient β coefficient
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CgFormula {
    /// Polak-Ribiere (setting 1)
    #[default]
    PolakRibiere,
    /// Fletcher-Reeves (setting 2)
    FletcherReeves,
    /// Hestenes-Stiefel (setting 3)
    HestenesStiefel,
}

impl CgFormula {
    fn from_setting(setting: u8) -> Option<Self> {
        match setting {
            1 => Some(CgFormula::PolakRibiere),
            2 => Some(CgFormula::FletcherReeves),
            3 => Some(CgFormula::HestenesStiefel),
            _ => None,
        }
    }

    fn setting(self) -> u8 {
        match self {
            CgFormula::PolakRibiere => 1,
            CgFormula::FletcherReeves => 2,
            CgFormula::HestenesStiefel => 3,
        }
    }
}

/// Step rule used to update parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Solver {
    /// Expectation maximization (id 1)
    BaumWelch,
    /// Projected gradient descent with Armijo backtracking (id 2)
    GradientDescent,
    /// Conjugate gradient descent (id 3)
    ConjugateGradient(CgFormula),
    /// Gradient descent with a Lagrange-multiplier row correction (id 4)
    GradientDescentLagrange,
    /// Barzilai-Borwein two-point step size (id 5)
    BarzilaiBorwein,
}

impl Solver {
    fn id(self) -> u8 {
        match self {
            Solver::BaumWelch => 1,
            Solver::GradientDescent => 2,
            Solver::ConjugateGradient(_) => 3,
            Solver::GradientDescentLagrange => 4,
            Solver::BarzilaiBorwein => 5,
        }
    }

    /// Whether the rule consumes gradients
    pub fn uses_gradient(self) -> bool {
        !matches!(self, Solver::BaumWelch)
    }
}

/// Parsed `structure.solver[.setting]` identifier, e.g. `1.2` or `1.3.1`.
///
/// # Example
/// ```rust
/// use knowledge_hmm::config::{CgFormula, Solver, SolverId, Structure};
///
/// let id: SolverId = "2.3.2".parse().unwrap();
/// assert_eq!(id.structure, Structure::ByGroup);
/// assert_eq!(id.solver, Solver::ConjugateGradient(CgFormula::FletcherReeves));
/// assert_eq!(id.to_string(), "2.3.2");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SolverId {
    /// Model structure
    pub structure: Structure,
    /// Step rule
    pub solver: Solver,
}

impl SolverId {
    /// Parse an identifier. A missing solver means gradient descent; a missing
    /// conjugate-gradient setting means Polak-Ribiere. Settings on other
    /// solvers are accepted and ignored.
    pub fn parse(text: &str) -> HmmResult<Self> {
        let invalid = |reason: String| HmmError::InvalidSolver {
            id: text.to_string(),
            reason,
        };

        let mut fields = text.trim().split('.');
        let mut next_number = |what: &str| -> HmmResult<Option<u8>> {
            match fields.next() {
                None => Ok(None),
                Some(field) => field
                    .trim()
                    .parse::<u8>()
                    .map(Some)
                    .map_err(|_| invalid(format!("{} '{}' is not a number", what, field))),
            }
        };

        let structure = match next_number("structure")? {
            Some(1) => Structure::BySkill,
            Some(2) => Structure::ByGroup,
            Some(other) => return Err(invalid(format!("unknown structure {}", other))),
            None => return Err(invalid("empty identifier".to_string())),
        };
        let solver_number = next_number("solver")?.unwrap_or(2);
        let setting = next_number("setting")?;
        if fields.next().is_some() {
            return Err(invalid("too many fields".to_string()));
        }

        let solver = match solver_number {
            1 => Solver::BaumWelch,
            2 => Solver::GradientDescent,
            3 => match setting {
                None => Solver::ConjugateGradient(CgFormula::default()),
                Some(s) => Solver::ConjugateGradient(
                    CgFormula::from_setting(s)
                        .ok_or_else(|| invalid(format!("unknown conjugate gradient setting {}", s)))?,
                ),
            },
            4 => Solver::GradientDescentLagrange,
            5 => Solver::BarzilaiBorwein,
            other => return Err(invalid(format!("unknown solver {}", other))),
        };

        Ok(Self { structure, solver })
    }
}

impl FromStr for SolverId {
    type Err = HmmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SolverId::parse(s)
    }
}

impl fmt::Display for SolverId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.structure.id(), self.solver.id())?;
        if let Solver::ConjugateGradient(formula) = self.solver {
            write!(f, ".{}", formula.setting())?;
        }
        Ok(())
    }
}

/// Armijo backtracking line-search settings
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ArmijoConfig {
    /// Sufficient-decrease constant
    pub c1: f64,
    /// Step is divided by this after every rejected candidate
    pub reduce_factor: f64,
    /// First step tried
    pub seed: f64,
    /// Backtracking gives up below this step
    pub min_step: f64,
}

impl Default for ArmijoConfig {
    fn default() -> Self {
        Self {
            c1: 1e-4,
            reduce_factor: 2.0,
            seed: 1.0,
            min_step: 0.001,
        }
    }
}

/// Pooled single-skill fitting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum SingleSkillMode {
    /// Fit every slice from the configured initial values
    #[default]
    Off,
    /// Fit all data as one slice, then refit every slice from that result
    Seed,
    /// Fit all data as one slice and use the result for every block
    Force,
}

/// Configuration of one fitting run
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FitConfig {
    /// Number of hidden states
    pub n_states: usize,
    /// Number of observation symbols
    pub n_obs: usize,
    /// Initial parameters, compact layout (last value of every row implied)
    pub init: Vec<f64>,
    /// Lower bounds, full layout
    pub lower: Vec<f64>,
    /// Upper bounds, full layout
    pub upper: Vec<f64>,
    /// Components kept at their initial values
    pub block_fitting: BlockFitting,
    /// Model structure
    pub structure: Structure,
    /// Step rule
    pub solver: Solver,
    /// Convergence tolerance on the maximum absolute parameter change
    pub tol: f64,
    /// Iteration cap per slice
    pub max_iter: usize,
    /// Line-search settings for gradient-family rules
    pub armijo: ArmijoConfig,
    /// Pooled single-skill fitting
    pub single_skill: SingleSkillMode,
    /// Observation whose probability the metrics score
    pub metrics_target_obs: usize,
}

impl Default for FitConfig {
    fn default() -> Self {
        Self::bkt()
    }
}

impl FitConfig {
    /// Two-state, two-observation Bayesian Knowledge Tracing model: no
    /// forgetting, guess and slip capped at 0.3.
    pub fn bkt() -> Self {
        Self {
            n_states: 2,
            n_obs: 2,
            init: vec![0.5, 1.0, 0.4, 0.8, 0.2],
            lower: vec![0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
            upper: vec![1.0, 1.0, 1.0, 0.0, 1.0, 1.0, 1.0, 0.3, 0.3, 1.0],
            block_fitting: BlockFitting::none(),
            structure: Structure::BySkill,
            solver: Solver::GradientDescent,
            tol: 0.01,
            max_iter: 200,
            armijo: ArmijoConfig::default(),
            single_skill: SingleSkillMode::Off,
            metrics_target_obs: 0,
        }
    }

    /// Unconstrained model of any shape. PI starts uniform, A favours staying,
    /// and each state favours a different symbol in B so the states are not
    /// interchangeable.
    pub fn unbounded(n_states: usize, n_obs: usize) -> Self {
        let mut init = Vec::new();
        if n_states >= 2 && n_obs >= 2 {
            init.extend(std::iter::repeat(1.0 / n_states as f64).take(n_states - 1));
            let stay = 0.5 + 0.5 / n_states as f64;
            let leave = (1.0 - stay) / (n_states - 1) as f64;
            for i in 0..n_states {
                init.extend((0..n_states - 1).map(|j| if i == j { stay } else { leave }));
            }
            let peak = 0.5 + 0.5 / n_obs as f64;
            let rest = (1.0 - peak) / (n_obs - 1) as f64;
            for i in 0..n_states {
                init.extend((0..n_obs - 1).map(|m| if i % n_obs == m { peak } else { rest }));
            }
        }

        let full = n_states + n_states * n_states + n_states * n_obs;
        Self {
            n_states,
            n_obs,
            init,
            lower: vec![0.0; full],
            upper: vec![1.0; full],
            ..Self::bkt()
        }
    }

    /// Set structure and solver from a `structure.solver[.setting]` id.
    pub fn with_solver_id(mut self, id: &str) -> HmmResult<Self> {
        let parsed = SolverId::parse(id)?;
        self.structure = parsed.structure;
        self.solver = parsed.solver;
        Ok(self)
    }

    /// Current structure and solver as an id
    pub fn solver_id(&self) -> SolverId {
        SolverId {
            structure: self.structure,
            solver: self.solver,
        }
    }

    /// Initial parameter block built from [`init`](Self::init).
    pub fn initial_block(&self) -> HmmResult<ParameterBlock> {
        ParameterBlock::from_compact(&self.init, self.n_states, self.n_obs)
    }

    /// Bounds built from [`lower`](Self::lower) and [`upper`](Self::upper).
    pub fn bounds(&self) -> HmmResult<ParameterBounds> {
        ParameterBounds::from_full(&self.lower, &self.upper, self.n_states, self.n_obs)
    }

    /// Check every setting; fitting assumes a validated configuration.
    pub fn validate(&self) -> HmmResult<()> {
        if self.n_states < 2 {
            return Err(HmmError::InsufficientData {
                required: 2,
                actual: self.n_states,
            });
        }
        if self.n_obs < 2 {
            return Err(HmmError::InsufficientData {
                required: 2,
                actual: self.n_obs,
            });
        }
        validate_parameter(self.tol, 0.0, 10.0, "tol")?;
        if self.max_iter == 0 {
            return Err(HmmError::InvalidParameter {
                parameter: "max_iter".to_string(),
                value: 0.0,
                constraint: "at least 1".to_string(),
            });
        }
        if self.metrics_target_obs >= self.n_obs {
            return Err(HmmError::InvalidParameter {
                parameter: "metrics_target_obs".to_string(),
                value: self.metrics_target_obs as f64,
                constraint: format!("below nO = {}", self.n_obs),
            });
        }

        let armijo = &self.armijo;
        validate_parameter(armijo.c1, f64::MIN_POSITIVE, 1.0 - f64::EPSILON, "armijo.c1")?;
        validate_parameter(armijo.reduce_factor, 1.0 + f64::EPSILON, f64::MAX, "armijo.reduce_factor")?;
        validate_parameter(armijo.seed, f64::MIN_POSITIVE, f64::MAX, "armijo.seed")?;
        validate_parameter(armijo.min_step, f64::MIN_POSITIVE, armijo.seed, "armijo.min_step")?;

        validate_probabilities(&self.init, "init")?;
        validate_probabilities(&self.lower, "lower")?;
        validate_probabilities(&self.upper, "upper")?;
        let block = self.initial_block()?;
        for component in Component::ALL {
            validate_probabilities(block.component(component), component.name())?;
        }
        self.bounds()?;
        Ok(())
    }
}

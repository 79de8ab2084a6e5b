//! Fit orchestration: one parameter block per slice, fitted slice by slice.
//!
//! For every slice a [`FitBit`] is linked to the slice's block and the loop
//! runs forward-backward, the gradient (gradient-family rules only) and the
//! step rule until the parameters stop moving, the step rule stalls, or the
//! iteration cap is hit. Null-skill rows never enter a slice; they are
//! summarised per group by their empirical observation frequency.

use crate::config::{FitConfig, SingleSkillMode};
use crate::data::SequenceStore;
use crate::errors::{validate_len, HmmError, HmmResult};
use crate::fitbit::{FitBit, Slot};
use crate::forward_backward::SlicePass;
use crate::gradient::compute_gradient;
use crate::math_utils::float_ops::safe_log;
use crate::optimizer::{step_rule_for, StepContext, StepOutcome};
use crate::params::{ParameterBlock, ParameterBounds};
use crate::results::{FitResult, FitSummary, SliceReport, SliceStatus};
use crate::structure::{layout_for, SliceLayout};

/// Empirical observation frequencies of the null-skill rows.
#[derive(Debug, Clone, PartialEq)]
pub struct NullSkillModel {
    by_group: Vec<Option<Vec<f64>>>,
    global: Vec<f64>,
}

impl NullSkillModel {
    /// Frequencies over the unblocked, labelled null-skill rows. Groups without
    /// such rows use the global frequency; with no null-skill data at all the
    /// global frequency is uniform.
    pub fn from_store(store: &SequenceStore) -> Self {
        let n_obs = store.n_obs();
        let mut global_counts = vec![0usize; n_obs];
        let by_group = (0..store.n_groups())
            .map(|g| {
                let counts = store.null_counts(g);
                for (total, c) in global_counts.iter_mut().zip(&counts) {
                    *total += c;
                }
                frequencies(&counts)
            })
            .collect();
        let global = frequencies(&global_counts).unwrap_or_else(|| vec![1.0 / n_obs as f64; n_obs]);
        Self { by_group, global }
    }

    /// Observation distribution for a group's null-skill rows
    pub fn frequency(&self, group: usize) -> &[f64] {
        match self.by_group.get(group) {
            Some(Some(freq)) => freq,
            _ => &self.global,
        }
    }

    /// Frequency over every unblocked null-skill row
    pub fn global_frequency(&self) -> &[f64] {
        &self.global
    }

    /// Negative log-likelihood of the unblocked, labelled null-skill rows
    pub fn neg_log_likelihood(&self, store: &SequenceStore) -> f64 {
        let mut nll = 0.0;
        for group in 0..store.n_groups() {
            if store.is_null_blocked(group) {
                continue;
            }
            let freq = self.frequency(group);
            for &row in store.null_rows(group) {
                if let Some(o) = store.obs(row) {
                    nll -= safe_log(freq[o]);
                }
            }
        }
        nll
    }
}

fn frequencies(counts: &[usize]) -> Option<Vec<f64>> {
    let total: usize = counts.iter().sum();
    (total > 0).then(|| counts.iter().map(|&c| c as f64 / total as f64).collect())
}

/// A configured model: one parameter block per slice plus the null-skill
/// summary.
#[derive(Debug)]
pub struct HmmProblem {
    config: FitConfig,
    layout: Box<dyn SliceLayout>,
    bounds: ParameterBounds,
    initial: ParameterBlock,
    blocks: Vec<ParameterBlock>,
    null_model: NullSkillModel,
    neg_log_likelihood: f64,
}

impl HmmProblem {
    /// Validate `config` against `store` and create one block per slice,
    /// each starting at the configured initial values projected onto the
    /// bounds.
    pub fn new(config: FitConfig, store: &SequenceStore) -> HmmResult<Self> {
        config.validate()?;
        validate_len("observation symbols", config.n_obs, store.n_obs())?;

        let bounds = config.bounds()?;
        let mut initial = config.initial_block()?;
        if !initial.satisfies(&bounds) {
            log::warn!("initial parameters violate their bounds, projecting");
            initial.project(&bounds);
        }

        let layout = layout_for(config.structure);
        let n_slices = layout.n_slices(store);
        log::debug!(
            "model {} with {} blocks of {} states and {} observations",
            config.solver_id(),
            n_slices,
            config.n_states,
            config.n_obs
        );

        Ok(Self {
            blocks: vec![initial.clone(); n_slices],
            null_model: NullSkillModel::from_store(store),
            layout,
            bounds,
            initial,
            config,
            neg_log_likelihood: 0.0,
        })
    }

    /// Configuration the problem was built with
    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    /// Slice layout
    pub fn layout(&self) -> &dyn SliceLayout {
        self.layout.as_ref()
    }

    /// Parameter bounds shared by every block
    pub fn bounds(&self) -> &ParameterBounds {
        &self.bounds
    }

    /// All blocks, indexed by skill or group id
    pub fn blocks(&self) -> &[ParameterBlock] {
        &self.blocks
    }

    /// One block
    pub fn block(&self, slice: usize) -> Option<&ParameterBlock> {
        self.blocks.get(slice)
    }

    /// Replace a block, e.g. with parameters loaded by the caller. The block is
    /// projected onto the bounds.
    pub fn set_block(&mut self, slice: usize, block: ParameterBlock) -> HmmResult<()> {
        if slice >= self.blocks.len() {
            return Err(HmmError::InvalidParameter {
                parameter: "slice".to_string(),
                value: slice as f64,
                constraint: format!("below {}", self.blocks.len()),
            });
        }
        validate_len("block states", self.config.n_states, block.n_states())?;
        validate_len("block observations", self.config.n_obs, block.n_obs())?;
        let mut block = block;
        block.project(&self.bounds);
        self.blocks[slice] = block;
        Ok(())
    }

    /// Null-skill summary from the last fit (or construction)
    pub fn null_model(&self) -> &NullSkillModel {
        &self.null_model
    }

    /// Total negative log-likelihood of the last fit
    pub fn neg_log_likelihood(&self) -> f64 {
        self.neg_log_likelihood
    }

    /// Free parameters over all blocks, for AIC and BIC
    pub fn n_parameters(&self) -> usize {
        self.bounds.free_parameter_count(&self.config.block_fitting) * self.blocks.len()
    }

    /// Whether `store` uses the observation alphabet the model was built for.
    pub fn accepts(&self, store: &SequenceStore) -> bool {
        store.n_obs() == self.config.n_obs
    }

    /// Fit every slice on the unblocked sequences of `store`.
    ///
    /// A store with a different number of observation symbols is not fitted;
    /// the blocks are left alone and an empty summary is returned.
    pub fn fit(&mut self, store: &SequenceStore) -> FitSummary {
        let mut summary = FitSummary::default();
        if !self.accepts(store) {
            log::warn!(
                "store has {} observation symbols, model expects {}; nothing fitted",
                store.n_obs(),
                self.config.n_obs
            );
            return summary;
        }
        let n_slices = self.layout.n_slices(store).min(self.blocks.len());
        if n_slices != self.blocks.len() {
            log::warn!(
                "store has {} slices, model has {} blocks",
                self.layout.n_slices(store),
                self.blocks.len()
            );
        }

        let mut total = 0.0;
        let mut pooled_only = false;
        if self.config.single_skill != SingleSkillMode::Off {
            let all: Vec<usize> = (0..store.sequences().len()).collect();
            let mut pooled_block = self.initial.clone();
            summary.pooled = fit_slice(&self.config, &self.bounds, store, &all, &mut pooled_block, "pooled");
            for block in &mut self.blocks {
                block.copy_from(&pooled_block);
            }
            if self.config.single_skill == SingleSkillMode::Force {
                total += summary.pooled.as_ref().map_or(0.0, |r| r.final_nll);
                pooled_only = true;
            }
        }

        if !pooled_only {
            for slice in 0..n_slices {
                let sequences = self.layout.slice_sequences(store, slice);
                let label = format!("slice {}", slice);
                match fit_slice(&self.config, &self.bounds, store, sequences, &mut self.blocks[slice], &label) {
                    Some(result) => {
                        total += result.final_nll;
                        summary.slices.push(SliceReport { slice, result });
                    }
                    None => summary.skipped.push(slice),
                }
            }
        }

        self.null_model = NullSkillModel::from_store(store);
        summary.null_nll = self.null_model.neg_log_likelihood(store);
        total += summary.null_nll;
        summary.total_nll = total;
        self.neg_log_likelihood = total;

        log::info!(
            "fit {}: {} slices fitted ({} converged), {} skipped, total NLL {:.6}",
            self.config.solver_id(),
            summary.slices.len(),
            summary.n_converged(),
            summary.skipped.len(),
            total
        );
        summary
    }
}

/// Fit one block on the unblocked sequences among `sequences`. Returns `None`
/// when none is unblocked.
fn fit_slice(
    config: &FitConfig,
    bounds: &ParameterBounds,
    store: &SequenceStore,
    sequences: &[usize],
    block: &mut ParameterBlock,
    label: &str,
) -> Option<FitResult> {
    let uses_gradient = config.solver.uses_gradient();
    let with_posteriors = !uses_gradient;
    let mut pass = SlicePass::run(block, store, sequences, with_posteriors);
    if pass.is_empty() {
        log::debug!("{}: no unblocked sequences, skipped", label);
        return None;
    }

    let mut rule = step_rule_for(config.solver);
    let mut grad = ParameterBlock::zeros(config.n_states, config.n_obs);
    let mut fb = FitBit::link_par(block, config.tol, config.block_fitting);
    fb.init(Slot::Previous);

    let initial_nll = pass.neg_log_likelihood();
    let mut previous_nll = initial_nll;
    let mut current_nll = initial_nll;
    let mut status = SliceStatus::MaxIterations;
    let mut iterations = 0;

    for iteration in 1..=config.max_iter {
        iterations = iteration;
        fb.copy(Slot::Current, Slot::Previous);
        if uses_gradient {
            compute_gradient(fb.current(), &pass, &config.block_fitting, &mut grad);
            fb.store(Slot::Gradient, &grad);
        }

        let ctx = StepContext {
            store,
            sequences,
            bounds,
            armijo: &config.armijo,
            pass: &pass,
            objective: current_nll,
        };
        if rule.step(&mut fb, &ctx) == StepOutcome::Stalled {
            log::warn!("{}: {} stalled at iteration {}", label, rule.name(), iteration);
            status = SliceStatus::Stalled;
            break;
        }

        pass = SlicePass::run(fb.current(), store, sequences, with_posteriors);
        previous_nll = current_nll;
        current_nll = pass.neg_log_likelihood();
        log::debug!(
            "{}: iteration {} NLL {:.6} max change {:.6}",
            label,
            iteration,
            current_nll,
            fb.max_change()
        );

        if fb.check_convergence() {
            status = SliceStatus::Converged;
            break;
        }
    }

    log::debug!("{}: {:?} after {} iterations, NLL {:.6} -> {:.6}", label, status, iterations, initial_nll, current_nll);
    Some(FitResult {
        iterations,
        initial_nll,
        previous_nll,
        final_nll: current_nll,
        converged: status == SliceStatus::Converged,
        n_rows: pass.n_rows(),
        status,
    })
}

//! Working buffers of one slice fit.
//!
//! A [`FitBit`] borrows the live parameter block as its `Current` slot and owns
//! up to five more blocks of the same shape, allocated on demand. Owned slots
//! are released when the FitBit is dropped or the slot is destroyed; the
//! borrowed block is never released by it.

use crate::math_utils::log10_scale_gentle;
use crate::params::{BlockFitting, ParameterBlock, ParameterBounds};

fn scale_block_gentle(target: &mut ParameterBlock, par: &ParameterBlock, blocking: &BlockFitting) {
    for component in blocking.free_components() {
        log10_scale_gentle(target.component_mut(component), par.component(component));
    }
}

/// Named buffers of a [`FitBit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Live parameters (borrowed)
    Current,
    /// Parameters at the start of the iteration
    Previous,
    /// Gradient at `Current`
    Gradient,
    /// Gradient of the previous iteration
    PreviousGradient,
    /// Saved parameters a line search restores on failure
    Snapshot,
    /// Previous search direction or displacement
    PreviousDirection,
}

impl Slot {
    fn owned_index(self) -> Option<usize> {
        match self {
            Slot::Current => None,
            Slot::Previous => Some(0),
            Slot::Gradient => Some(1),
            Slot::PreviousGradient => Some(2),
            Slot::Snapshot => Some(3),
            Slot::PreviousDirection => Some(4),
        }
    }
}

/// Parameter, gradient and history buffers of one slice fit.
#[derive(Debug)]
pub struct FitBit<'a> {
    par: &'a mut ParameterBlock,
    owned: [Option<ParameterBlock>; 5],
    tol: f64,
    blocking: BlockFitting,
}

impl<'a> FitBit<'a> {
    /// Link the live block as `Current`; every other slot starts unallocated.
    pub fn link_par(par: &'a mut ParameterBlock, tol: f64, blocking: BlockFitting) -> Self {
        Self {
            par,
            owned: Default::default(),
            tol,
            blocking,
        }
    }

    /// Number of hidden states
    pub fn n_states(&self) -> usize {
        self.par.n_states()
    }

    /// Number of observation symbols
    pub fn n_obs(&self) -> usize {
        self.par.n_obs()
    }

    /// Components excluded from fitting
    pub fn blocking(&self) -> &BlockFitting {
        &self.blocking
    }

    /// Allocate a zeroed slot if it is not allocated yet.
    pub fn init(&mut self, slot: Slot) {
        if let Some(i) = slot.owned_index() {
            if self.owned[i].is_none() {
                self.owned[i] = Some(ParameterBlock::zeros(self.par.n_states(), self.par.n_obs()));
            }
        }
    }

    /// Zero a slot, allocating it if needed.
    pub fn to_zero(&mut self, slot: Slot) {
        match slot.owned_index() {
            None => self.par.clear(),
            Some(i) => match self.owned[i].as_mut() {
                Some(block) => block.clear(),
                None => self.init(slot),
            },
        }
    }

    /// Release an owned slot. The borrowed `Current` slot is left alone.
    pub fn destroy(&mut self, slot: Slot) {
        if let Some(i) = slot.owned_index() {
            self.owned[i] = None;
        }
    }

    /// Whether a slot holds data
    pub fn is_allocated(&self, slot: Slot) -> bool {
        slot.owned_index().map_or(true, |i| self.owned[i].is_some())
    }

    /// Read a slot
    pub fn get(&self, slot: Slot) -> Option<&ParameterBlock> {
        match slot.owned_index() {
            None => Some(&*self.par),
            Some(i) => self.owned[i].as_ref(),
        }
    }

    /// Write a slot
    pub fn get_mut(&mut self, slot: Slot) -> Option<&mut ParameterBlock> {
        match slot.owned_index() {
            None => Some(&mut *self.par),
            Some(i) => self.owned[i].as_mut(),
        }
    }

    /// Live parameters
    pub fn current(&self) -> &ParameterBlock {
        &*self.par
    }

    /// Live parameters, mutable
    pub fn current_mut(&mut self) -> &mut ParameterBlock {
        &mut *self.par
    }

    /// Gradient slot, allocated on first use
    pub fn gradient_mut(&mut self) -> &mut ParameterBlock {
        self.owned[1].get_or_insert_with(|| ParameterBlock::zeros(self.par.n_states(), self.par.n_obs()))
    }

    /// Apply `f(source, target)` to two distinct slots, allocating the target.
    /// Returns `false` when the source is unallocated.
    fn with_pair(&mut self, src: Slot, dst: Slot, f: impl FnOnce(&ParameterBlock, &mut ParameterBlock)) -> bool {
        if src == dst {
            return true;
        }
        self.init(dst);
        match (src.owned_index(), dst.owned_index()) {
            (None, Some(d)) => match self.owned[d].as_mut() {
                Some(target) => {
                    f(&*self.par, target);
                    true
                }
                None => false,
            },
            (Some(s), None) => match self.owned[s].as_ref() {
                Some(source) => {
                    f(source, &mut *self.par);
                    true
                }
                None => false,
            },
            (Some(s), Some(d)) => {
                let Some(mut target) = self.owned[d].take() else {
                    return false;
                };
                let applied = match self.owned[s].as_ref() {
                    Some(source) => {
                        f(source, &mut target);
                        true
                    }
                    None => false,
                };
                self.owned[d] = Some(target);
                applied
            }
            (None, None) => true,
        }
    }

    /// `dst = src` over PI, A and B. An unallocated source zeroes `dst`.
    pub fn copy(&mut self, src: Slot, dst: Slot) {
        if !self.with_pair(src, dst, |from, to| to.copy_from(from)) {
            self.to_zero(dst);
        }
    }

    /// `dst += src` over PI, A and B. An unallocated source adds nothing.
    pub fn add(&mut self, src: Slot, dst: Slot) {
        self.with_pair(src, dst, |from, to| to.add_scaled(from, 1.0));
    }

    /// Store an external block into a slot.
    pub fn store(&mut self, slot: Slot, block: &ParameterBlock) {
        self.init(slot);
        if let Some(target) = self.get_mut(slot) {
            target.copy_from(block);
        }
    }

    /// Largest absolute change between `Current` and `Previous` over the
    /// non-blocked components; infinite before `Previous` exists.
    pub fn max_change(&self) -> f64 {
        match self.owned[0].as_ref() {
            Some(previous) => self.par.max_abs_diff(previous, &self.blocking),
            None => f64::INFINITY,
        }
    }

    /// Converged when [`max_change`](Self::max_change) is below the tolerance.
    pub fn check_convergence(&self) -> bool {
        self.max_change() < self.tol
    }

    /// Rescale a gradient or direction slot so that a unit step from `Current`
    /// against it cannot leave `[0, 1]`. PI, A and B are scaled independently;
    /// blocked components are skipped.
    pub fn log10_scale_gentle(&mut self, slot: Slot) {
        let Some(i) = slot.owned_index() else {
            return;
        };
        if let Some(target) = self.owned[i].as_mut() {
            scale_block_gentle(target, &*self.par, &self.blocking);
        }
    }

    /// Same scaling as [`log10_scale_gentle`](Self::log10_scale_gentle) for a
    /// step vector held outside the FitBit.
    pub fn scale_gentle(&self, step: &mut ParameterBlock) {
        scale_block_gentle(step, &*self.par, &self.blocking);
    }

    /// `Current = Snapshot − step·direction`, projected onto `bounds`.
    pub fn set_candidate(&mut self, direction: &ParameterBlock, step: f64, bounds: &ParameterBounds) {
        if let Some(snapshot) = self.owned[3].as_ref() {
            self.par.copy_from(snapshot);
        }
        self.par.add_scaled(direction, -step);
        self.par.project(bounds);
    }

    /// `⟨Gradient, Current − Snapshot⟩` over non-blocked components.
    pub fn directional_change(&self) -> f64 {
        match (self.owned[1].as_ref(), self.displacement()) {
            (Some(grad), Some(displacement)) => grad.dot(&displacement, &self.blocking),
            _ => 0.0,
        }
    }

    /// `Current − Snapshot`, if a snapshot was taken
    pub fn displacement(&self) -> Option<ParameterBlock> {
        let snapshot = self.owned[3].as_ref()?;
        let mut displacement = self.par.clone();
        displacement.add_scaled(snapshot, -1.0);
        Some(displacement)
    }

    /// `Current = Snapshot`
    pub fn restore_snapshot(&mut self) {
        self.copy(Slot::Snapshot, Slot::Current);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block() -> ParameterBlock {
        ParameterBlock::from_compact(&[0.5, 1.0, 0.4, 0.8, 0.2], 2, 2).unwrap()
    }

    #[test]
    fn test_slots_allocate_on_demand() {
        let mut par = block();
        let mut fb = FitBit::link_par(&mut par, 0.01, BlockFitting::none());
        assert!(fb.is_allocated(Slot::Current));
        assert!(!fb.is_allocated(Slot::Gradient));
        fb.init(Slot::Gradient);
        assert!(fb.get(Slot::Gradient).unwrap().pi().iter().all(|&v| v == 0.0));
        fb.destroy(Slot::Gradient);
        assert!(!fb.is_allocated(Slot::Gradient));
        fb.destroy(Slot::Current);
        assert!(fb.is_allocated(Slot::Current));
    }

    #[test]
    fn test_copy_and_add_between_slots() {
        let mut par = block();
        let mut fb = FitBit::link_par(&mut par, 0.01, BlockFitting::none());
        fb.copy(Slot::Current, Slot::Previous);
        fb.add(Slot::Previous, Slot::Snapshot);
        fb.add(Slot::Current, Slot::Snapshot);
        assert_eq!(fb.get(Slot::Snapshot).unwrap().pi(), &[1.0, 1.0]);

        fb.copy(Slot::PreviousGradient, Slot::Snapshot);
        assert!(fb.get(Slot::Snapshot).unwrap().pi().iter().all(|&v| v == 0.0));

        fb.to_zero(Slot::Previous);
        assert_eq!(fb.get(Slot::Previous).unwrap().pi(), &[0.0, 0.0]);
        fb.copy(Slot::Previous, Slot::Current);
        drop(fb);
        assert_eq!(par.pi(), &[0.0, 0.0]);
    }

    #[test]
    fn test_convergence_ignores_blocked_components() {
        let mut par = block();
        let blocking = BlockFitting { pi: true, ..BlockFitting::none() };
        let mut fb = FitBit::link_par(&mut par, 0.01, blocking);
        assert!(!fb.check_convergence());
        fb.copy(Slot::Current, Slot::Previous);
        fb.current_mut().pi_mut()[0] = 0.9;
        assert!(fb.check_convergence());
        fb.current_mut().b_mut().set(0, 0, 0.7);
        assert!(!fb.check_convergence());
        assert!((fb.max_change() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_gentle_scaling_per_component() {
        let mut par = block();
        let mut fb = FitBit::link_par(&mut par, 0.01, BlockFitting::none());
        fb.gradient_mut().pi_mut().copy_from_slice(&[40.0, -40.0]);
        fb.gradient_mut().b_mut().set(0, 0, 0.01);
        fb.log10_scale_gentle(Slot::Gradient);
        let grad = fb.get(Slot::Gradient).unwrap().clone();
        assert!(grad.pi()[0] < 0.5 && grad.pi()[0] > 0.0);
        // B was small enough already
        assert_eq!(grad.b().get(0, 0), 0.01);
    }

    #[test]
    fn test_candidate_and_restore() {
        let mut par = block();
        let bounds = ParameterBounds::unbounded(2, 2);
        let mut fb = FitBit::link_par(&mut par, 0.01, BlockFitting::none());
        fb.copy(Slot::Current, Slot::Snapshot);
        let mut direction = ParameterBlock::zeros(2, 2);
        direction.pi_mut().copy_from_slice(&[-0.2, 0.2]);
        fb.gradient_mut().copy_from(&direction);

        fb.set_candidate(&direction, 1.0, &bounds);
        assert!((fb.current().pi()[0] - 0.7).abs() < 1e-12);
        assert!((fb.directional_change() + 0.08).abs() < 1e-12);

        fb.restore_snapshot();
        assert_eq!(fb.current().pi(), &[0.5, 0.5]);
    }
}

//! Model structure as a slice layout: which sequences share a parameter block.
//!
//! The fitting engine never branches on [`Structure`]; it asks the layout
//! chosen at construction for the slice count, a slice's sequences, and the
//! block a row reads from.

use crate::config::Structure;
use crate::data::SequenceStore;

/// Maps sequences and rows to parameter blocks.
pub trait SliceLayout: std::fmt::Debug {
    /// Structure this layout implements
    fn structure(&self) -> Structure;

    /// Number of parameter blocks for a store
    fn n_slices(&self, store: &SequenceStore) -> usize;

    /// Sequence indices fitted with block `slice`
    fn slice_sequences<'s>(&self, store: &'s SequenceStore, slice: usize) -> &'s [usize];

    /// Block a skill-labelled row reads from; `None` for null-skill rows.
    fn row_block(&self, store: &SequenceStore, row: usize) -> Option<usize>;
}

/// One block per skill
#[derive(Debug, Clone, Copy, Default)]
pub struct BySkill;

/// One block per group
#[derive(Debug, Clone, Copy, Default)]
pub struct ByGroup;

impl SliceLayout for BySkill {
    fn structure(&self) -> Structure {
        Structure::BySkill
    }

    fn n_slices(&self, store: &SequenceStore) -> usize {
        store.n_skills()
    }

    fn slice_sequences<'s>(&self, store: &'s SequenceStore, slice: usize) -> &'s [usize] {
        store.skill_sequences(slice)
    }

    fn row_block(&self, store: &SequenceStore, row: usize) -> Option<usize> {
        store.skill(row)
    }
}

impl SliceLayout for ByGroup {
    fn structure(&self) -> Structure {
        Structure::ByGroup
    }

    fn n_slices(&self, store: &SequenceStore) -> usize {
        store.n_groups()
    }

    fn slice_sequences<'s>(&self, store: &'s SequenceStore, slice: usize) -> &'s [usize] {
        store.group_sequences(slice)
    }

    fn row_block(&self, store: &SequenceStore, row: usize) -> Option<usize> {
        store.skill(row).map(|_| store.group(row))
    }
}

/// Layout for a structure
pub fn layout_for(structure: Structure) -> Box<dyn SliceLayout> {
    match structure {
        Structure::BySkill => Box::new(BySkill),
        Structure::ByGroup => Box::new(ByGroup),
    }
}

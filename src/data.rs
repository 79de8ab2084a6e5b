//! Columnar row store partitioned into (skill, group) sequences.
//!
//! Rows keep the caller's order. Every row with a skill belongs to exactly one
//! [`Sequence`]; rows without a skill are the null skill and are only listed
//! per group. Cross-validation hides data by raising blocked counters, never by
//! removing rows.

use std::collections::HashMap;

use crate::errors::{validate_len, HmmError, HmmResult};

/// Ordered rows of one (skill, group) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Sequence {
    skill: usize,
    group: usize,
    rows: Vec<usize>,
    blocked: u32,
}

impl Sequence {
    /// Skill id
    #[inline]
    pub fn skill(&self) -> usize {
        self.skill
    }

    /// Group id
    #[inline]
    pub fn group(&self) -> usize {
        self.group
    }

    /// Row indices in input order
    #[inline]
    pub fn rows(&self) -> &[usize] {
        &self.rows
    }

    /// Number of rows
    #[inline]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Never true for a stored sequence
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Excluded from fitting
    #[inline]
    pub fn is_blocked(&self) -> bool {
        self.blocked > 0
    }
}

/// All rows of a dataset plus the sequence partition built over them.
#[derive(Debug, Clone)]
pub struct SequenceStore {
    n_obs: usize,
    obs: Vec<Option<usize>>,
    group: Vec<usize>,
    skill: Vec<Option<usize>>,
    sequences: Vec<Sequence>,
    by_skill: Vec<Vec<usize>>,
    by_group: Vec<Vec<usize>>,
    null_rows: Vec<Vec<usize>>,
    null_blocked: Vec<u32>,
}

impl SequenceStore {
    /// Partition columnar rows into sequences.
    ///
    /// `obs[r]` is `None` for a row whose observation is unknown (a prediction
    /// target); `skill[r]` is `None` for a null-skill row. Skill and group ids
    /// are dense; the number of skills and groups is one past the largest id.
    pub fn from_columns(
        n_obs: usize,
        obs: Vec<Option<usize>>,
        group: Vec<usize>,
        skill: Vec<Option<usize>>,
    ) -> HmmResult<Self> {
        let n_rows = obs.len();
        if n_rows == 0 {
            return Err(HmmError::InsufficientData {
                required: 1,
                actual: 0,
            });
        }
        validate_len("group column", n_rows, group.len())?;
        validate_len("skill column", n_rows, skill.len())?;
        if let Some((row, value)) = obs
            .iter()
            .enumerate()
            .find_map(|(row, o)| o.filter(|&v| v >= n_obs).map(|v| (row, v)))
        {
            return Err(HmmError::InvalidObservation { row, value, n_obs });
        }

        let n_groups = group.iter().max().map_or(0, |g| g + 1);
        let n_skills = skill.iter().flatten().max().map_or(0, |k| k + 1);

        let mut sequences: Vec<Sequence> = Vec::new();
        let mut index: HashMap<(usize, usize), usize> = HashMap::new();
        let mut null_rows = vec![Vec::new(); n_groups];

        for row in 0..n_rows {
            let g = group[row];
            match skill[row] {
                None => null_rows[g].push(row),
                Some(k) => {
                    let idx = *index.entry((k, g)).or_insert_with(|| {
                        sequences.push(Sequence {
                            skill: k,
                            group: g,
                            rows: Vec::new(),
                            blocked: 0,
                        });
                        sequences.len() - 1
                    });
                    sequences[idx].rows.push(row);
                }
            }
        }

        let mut by_skill = vec![Vec::new(); n_skills];
        let mut by_group = vec![Vec::new(); n_groups];
        for (idx, seq) in sequences.iter().enumerate() {
            by_skill[seq.skill].push(idx);
            by_group[seq.group].push(idx);
        }

        log::debug!(
            "partitioned {} rows into {} sequences ({} skills, {} groups, {} null-skill rows)",
            n_rows,
            sequences.len(),
            n_skills,
            n_groups,
            null_rows.iter().map(Vec::len).sum::<usize>()
        );

        Ok(Self {
            n_obs,
            obs,
            group,
            skill,
            sequences,
            by_skill,
            by_group,
            null_rows,
            null_blocked: vec![0; n_groups],
        })
    }

    /// Number of rows
    pub fn n_rows(&self) -> usize {
        self.obs.len()
    }

    /// Number of observation symbols
    pub fn n_obs(&self) -> usize {
        self.n_obs
    }

    /// One past the largest skill id
    pub fn n_skills(&self) -> usize {
        self.by_skill.len()
    }

    /// One past the largest group id
    pub fn n_groups(&self) -> usize {
        self.by_group.len()
    }

    /// Observation of a row
    #[inline]
    pub fn obs(&self, row: usize) -> Option<usize> {
        self.obs[row]
    }

    /// Group of a row
    #[inline]
    pub fn group(&self, row: usize) -> usize {
        self.group[row]
    }

    /// Skill of a row, `None` for the null skill
    #[inline]
    pub fn skill(&self, row: usize) -> Option<usize> {
        self.skill[row]
    }

    /// All sequences in order of first appearance
    pub fn sequences(&self) -> &[Sequence] {
        &self.sequences
    }

    /// Sequence by index
    #[inline]
    pub fn sequence(&self, idx: usize) -> &Sequence {
        &self.sequences[idx]
    }

    /// Indices of the sequences of one skill
    pub fn skill_sequences(&self, skill: usize) -> &[usize] {
        self.by_skill.get(skill).map_or(&[][..], Vec::as_slice)
    }

    /// Indices of the sequences of one group
    pub fn group_sequences(&self, group: usize) -> &[usize] {
        self.by_group.get(group).map_or(&[][..], Vec::as_slice)
    }

    /// Null-skill rows of one group
    pub fn null_rows(&self, group: usize) -> &[usize] {
        self.null_rows.get(group).map_or(&[][..], Vec::as_slice)
    }

    /// Number of null-skill rows across all groups
    pub fn n_null_rows(&self) -> usize {
        self.null_rows.iter().map(Vec::len).sum()
    }

    /// Whether the null-skill rows of a group are hidden from fitting
    pub fn is_null_blocked(&self, group: usize) -> bool {
        self.null_blocked.get(group).is_some_and(|&b| b > 0)
    }

    /// Hide every sequence and null-skill row of a group from fitting.
    pub fn block_group(&mut self, group: usize) {
        for &idx in self.by_group.get(group).map_or(&[][..], Vec::as_slice) {
            self.sequences[idx].blocked += 1;
        }
        if let Some(b) = self.null_blocked.get_mut(group) {
            *b += 1;
        }
    }

    /// Undo one [`block_group`](Self::block_group).
    pub fn unblock_group(&mut self, group: usize) {
        for &idx in self.by_group.get(group).map_or(&[][..], Vec::as_slice) {
            let seq = &mut self.sequences[idx];
            seq.blocked = seq.blocked.saturating_sub(1);
        }
        if let Some(b) = self.null_blocked.get_mut(group) {
            *b = b.saturating_sub(1);
        }
    }

    /// Reset every blocked counter.
    pub fn clear_blocks(&mut self) {
        for seq in &mut self.sequences {
            seq.blocked = 0;
        }
        self.null_blocked.fill(0);
    }

    /// Number of rows in unblocked sequences
    pub fn n_fit_rows(&self) -> usize {
        self.sequences
            .iter()
            .filter(|s| !s.is_blocked())
            .map(Sequence::len)
            .sum()
    }

    /// Observation counts over the unblocked, labelled null-skill rows of one
    /// group.
    pub fn null_counts(&self, group: usize) -> Vec<usize> {
        let mut counts = vec![0; self.n_obs];
        if self.is_null_blocked(group) {
            return counts;
        }
        for &row in self.null_rows(group) {
            if let Some(o) = self.obs[row] {
                counts[o] += 1;
            }
        }
        counts
    }
}

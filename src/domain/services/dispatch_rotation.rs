//! Dispatch Rotation Service
//!
//! Fair selection of which ready nodes receive a task in a scheduling pass.

use crate::domain::entities::Bulk;
use crate::domain::value_objects::Mode;
use std::collections::HashSet;

/// Persistent per-mode rotating index.
///
/// The index is never reset between passes, so when fewer dispatch slots
/// than candidates are available the starting point keeps moving and every
/// node is eventually served.
#[derive(Debug, Default, Clone)]
pub struct DispatchRotation {
    next_push: usize,
    next_pull: usize,
}

impl DispatchRotation {
    pub fn new() -> Self {
        Self::default()
    }

    fn cursor(&mut self, mode: Mode) -> &mut usize {
        match mode {
            Mode::Push => &mut self.next_push,
            Mode::Pull => &mut self.next_pull,
        }
    }

    /// Current index for a mode.
    pub fn position(&self, mode: Mode) -> usize {
        match mode {
            Mode::Push => self.next_push,
            Mode::Pull => self.next_pull,
        }
    }

    /// Select up to `budget` bulks from `candidates`.
    ///
    /// Walks at most one full turn of the candidate set starting at the
    /// persistent index. A node never receives two bulks in the same pass.
    pub fn select(&mut self, mode: Mode, candidates: Vec<Bulk>, budget: usize) -> Vec<Bulk> {
        let width = candidates.len();
        let mut slots: Vec<Option<Bulk>> = candidates.into_iter().map(Some).collect();
        let mut selected = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        let mut attempts = 0;
        while attempts < width && selected.len() < budget {
            let cursor = self.cursor(mode);
            let idx = *cursor % width;
            *cursor = cursor.wrapping_add(1);
            attempts += 1;

            let Some(bulk) = slots[idx].take() else {
                continue;
            };
            if bulk.is_empty() || !seen.insert(bulk.node.clone()) {
                continue;
            }
            selected.push(bulk);
        }

        selected
    }
}

//! Slot reclamation by swap.

use crate::distance::Element;
use crate::error::{IndexError, Result};
use crate::InternalId;

use super::ProximityGraph;

/// The record that used to live in slot `from` now lives in slot `to`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Relocation {
    pub from: InternalId,
    pub to: InternalId,
}

impl<T: Element> ProximityGraph<T> {
    /// Free the slot of tombstone `id`.
    ///
    /// Every remaining edge touching `id` is dropped first. If `id` is not the
    /// last slot, the last record moves into it and every reference to it is
    /// rewritten through its out and incoming lists; the move is returned so
    /// callers holding slot numbers can follow it.
    pub fn reclaim(&mut self, id: InternalId) -> Result<Option<Relocation>> {
        if id as usize >= self.nodes.len() {
            return Err(IndexError::InvariantViolation(format!(
                "reclaim of unallocated id {id}"
            )));
        }
        if !self.store.is_deleted(id) {
            return Err(IndexError::InvariantViolation(format!(
                "reclaim of live node {id}"
            )));
        }

        self.scrub(id);
        let was_entry = self.entry_point == Some(id);

        let removed = self.store.swap_remove(id);
        self.nodes.swap_remove(id as usize);

        let relocation = removed.moved_from.map(|from| Relocation { from, to: id });
        if let Some(moved) = relocation {
            self.rewrite_references(moved);
            if !self.store.is_deleted(id) {
                self.labels.insert(self.store.label(id), id);
            }
            if self.entry_point == Some(moved.from) {
                self.entry_point = Some(id);
            }
        }
        if was_entry {
            self.entry_point = self.choose_entry_point();
        }
        if let Some(change) = removed.capacity {
            self.log_capacity(change);
            self.nodes.shrink_to(change.new);
        }
        Ok(relocation)
    }

    /// Drop every edge into and out of `id`, on all its levels.
    fn scrub(&mut self, id: InternalId) {
        for level in 0..self.nodes[id as usize].levels.len() {
            let out = self.nodes[id as usize].levels[level].out.clone();
            for to in out {
                self.unlink(id, to, level);
            }
            let incoming = self.nodes[id as usize].levels[level].incoming.clone();
            for from in incoming {
                self.unlink(from, id, level);
            }
        }
    }

    /// Point every edge that named `moved.from` at `moved.to`.
    fn rewrite_references(&mut self, moved: Relocation) {
        let Relocation { from, to } = moved;
        for level in 0..self.nodes[to as usize].levels.len() {
            let out = self.nodes[to as usize].levels[level].out.clone();
            for n in out {
                for slot in self.nodes[n as usize].levels[level].incoming.iter_mut() {
                    if *slot == from {
                        *slot = to;
                    }
                }
            }
            let incoming = self.nodes[to as usize].levels[level].incoming.clone();
            for n in incoming {
                for slot in self.nodes[n as usize].levels[level].out.iter_mut() {
                    if *slot == from {
                        *slot = to;
                    }
                }
            }
        }
    }
}

//! Tombstoning and neighbor repair.
//!
//! Deleting is two-phase. [`ProximityGraph::mark_deleted`] only flips the
//! liveness flag and reports every live `(node, level)` that still links to
//! the victim. Each of those gets a [`ProximityGraph::repair`], which replaces
//! edges into tombstones with edges to the tombstones' own live neighbors.
//! Once all repairs ran nothing live points at the victim and it can be
//! reclaimed.

use std::collections::HashSet;

use crate::distance::Element;
use crate::error::Result;
use crate::{InternalId, Label};

use super::search::Candidate;
use super::ProximityGraph;

/// A live node whose out-list on `level` references a tombstone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepairTarget {
    pub node: InternalId,
    pub level: usize,
}

impl<T: Element> ProximityGraph<T> {
    /// Tombstone the vector stored under `label`.
    ///
    /// Returns its slot and the live in-neighbors that need repair, or `None`
    /// if the label is not in the graph. Edges are left in place.
    pub fn mark_deleted(&mut self, label: Label) -> Option<(InternalId, Vec<RepairTarget>)> {
        let id = self.labels.remove(&label)?;
        self.store.remove(id);

        let mut targets: Vec<RepairTarget> = Vec::new();
        for (level, links) in self.nodes[id as usize].levels.iter().enumerate() {
            targets.extend(
                links
                    .incoming
                    .iter()
                    .filter(|&&from| !self.store.is_deleted(from))
                    .map(|&node| RepairTarget { node, level }),
            );
        }
        targets.sort_unstable();

        if self.entry_point == Some(id) {
            self.entry_point = self.choose_entry_point();
        }
        Some((id, targets))
    }

    /// Rebuild the out-list of `node` on `level` without tombstones.
    ///
    /// Candidates are the node's live neighbors plus the live neighbors of its
    /// tombstoned ones, re-selected with the insertion heuristic. A node that
    /// is itself tombstoned, or has no tombstoned neighbor on that level, is
    /// left alone.
    pub fn repair(&mut self, node: InternalId, level: usize) -> Result<()> {
        self.check_id(node, level, node)?;
        if self.store.is_deleted(node) || level > self.top_level_of(node) {
            return Ok(());
        }

        let mut seen: HashSet<InternalId> = HashSet::new();
        seen.insert(node);
        let mut pool: Vec<InternalId> = Vec::new();
        let mut touched_tombstone = false;
        for &n in self.neighbors(node, level) {
            self.check_id(node, level, n)?;
            if !self.store.is_deleted(n) {
                if seen.insert(n) {
                    pool.push(n);
                }
                continue;
            }
            touched_tombstone = true;
            for &nn in self.neighbors(n, level) {
                self.check_id(n, level, nn)?;
                if !self.store.is_deleted(nn) && seen.insert(nn) {
                    pool.push(nn);
                }
            }
        }
        if !touched_tombstone {
            return Ok(());
        }

        let mut candidates: Vec<Candidate> = pool
            .into_iter()
            .map(|n| Candidate {
                distance: self.distance_between(node, n),
                id: n,
            })
            .collect();
        candidates.sort_unstable();
        let selected = self.select_neighbors(&candidates, self.cap(level));
        self.set_neighbors(node, level, &selected);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::graph;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn random_graph(n: u64) -> crate::ProximityGraph<f32> {
        let mut g = graph(4);
        let mut rng = StdRng::seed_from_u64(11);
        for i in 0..n {
            let v: Vec<f32> = (0..4).map(|_| rng.random::<f32>()).collect();
            g.add(i, &v).unwrap();
        }
        g
    }

    #[test]
    fn mark_deleted_reports_live_in_neighbors() {
        let mut g = random_graph(60);
        let victim = g.id_of(17).unwrap();
        let expected: usize = (0..=g.top_level_of(victim))
            .map(|l| g.incoming(victim, l).len())
            .sum();

        let (id, targets) = g.mark_deleted(17).unwrap();
        assert_eq!(id, victim);
        assert_eq!(targets.len(), expected);
        assert!(g.is_deleted(id));
        assert!(!g.contains(17));
        assert!(g.mark_deleted(17).is_none());
    }

    #[test]
    fn repair_removes_edges_to_tombstones() {
        let mut g = random_graph(80);
        let (victim, targets) = g.mark_deleted(5).unwrap();
        for t in &targets {
            g.repair(t.node, t.level).unwrap();
        }
        for l in 0..=g.top_level_of(victim) {
            assert!(
                g.incoming(victim, l).iter().all(|&n| g.is_deleted(n)),
                "live node still links to tombstone on level {l}"
            );
        }
        g.check_integrity().unwrap();
    }

    #[test]
    fn repair_is_noop_without_tombstoned_neighbors() {
        let mut g = random_graph(30);
        let before = g.neighbors(3, 0).to_vec();
        g.repair(3, 0).unwrap();
        assert_eq!(g.neighbors(3, 0), before.as_slice());
    }

    #[test]
    fn deleting_entry_point_moves_it_to_a_live_node() {
        let mut g = random_graph(50);
        let ep = g.entry_point().unwrap();
        let label = g.label_of(ep);
        g.mark_deleted(label).unwrap();
        let new_ep = g.entry_point().unwrap();
        assert_ne!(new_ep, ep);
        assert!(!g.is_deleted(new_ep));
    }
}

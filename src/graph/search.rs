//! Greedy descent and beam search.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};

use crate::distance::{self, Element};
use crate::error::{IndexError, Result};
use crate::heap::UpdatableMaxHeap;
use crate::results::{DefaultResults, QueryResult, ResultsContainer};
use crate::InternalId;

use super::ProximityGraph;

/// Node reached during traversal. Orders by distance, then id.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Candidate {
    pub(crate) distance: f64,
    pub(crate) id: InternalId,
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.id.cmp(&other.id))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: Element> ProximityGraph<T> {
    /// Follow strictly closer neighbors on `level` until none is left.
    pub(crate) fn greedy_step(
        &self,
        query: &[T],
        mut cur: Candidate,
        level: usize,
    ) -> Result<Candidate> {
        loop {
            let mut moved = false;
            for &n in self.neighbors(cur.id, level) {
                self.check_id(cur.id, level, n)?;
                let d = self.distance(query, self.store.get(n));
                if d < cur.distance {
                    cur = Candidate { distance: d, id: n };
                    moved = true;
                }
            }
            if !moved {
                return Ok(cur);
            }
        }
    }

    /// Best-first search on one level with beam width `ef`.
    ///
    /// Tombstoned nodes are expanded but never returned. The result is sorted
    /// by distance, ties by ascending id.
    pub(crate) fn search_layer(
        &self,
        query: &[T],
        entries: &[Candidate],
        level: usize,
        ef: usize,
    ) -> Result<Vec<Candidate>> {
        // Beam widths come from callers; never reserve more than the graph holds.
        let bound = ef.min(self.nodes.len());
        let mut visited: HashSet<InternalId> = HashSet::with_capacity(bound.saturating_mul(2));
        let mut candidates: BinaryHeap<Reverse<Candidate>> =
            BinaryHeap::with_capacity(bound.saturating_mul(2));
        // Max-heap of the current best: top is the worst kept result.
        let mut results: UpdatableMaxHeap<f64, InternalId> =
            UpdatableMaxHeap::with_capacity(bound.saturating_add(1));

        for &entry in entries {
            if !visited.insert(entry.id) {
                continue;
            }
            candidates.push(Reverse(entry));
            if !self.store.is_deleted(entry.id) {
                results.emplace(entry.distance, entry.id);
                if results.size() > ef {
                    results.pop();
                }
            }
        }

        while let Some(Reverse(current)) = candidates.pop() {
            if results.size() >= ef {
                if let Some((worst, _)) = results.top() {
                    if current.distance > worst {
                        break;
                    }
                }
            }

            for &n in self.neighbors(current.id, level) {
                self.check_id(current.id, level, n)?;
                if !visited.insert(n) {
                    continue;
                }
                let d = self.distance(query, self.store.get(n));
                let worst = results.top().map(|(w, _)| w);
                if results.size() < ef || worst.map_or(true, |w| d < w) {
                    candidates.push(Reverse(Candidate { distance: d, id: n }));
                    if !self.store.is_deleted(n) {
                        results.emplace(d, n);
                        if results.size() > ef {
                            results.pop();
                        }
                    }
                }
            }
        }

        Ok(results
            .into_sorted_vec()
            .into_iter()
            .map(|(distance, id)| Candidate { distance, id })
            .collect())
    }

    /// `k` nearest live vectors to `query`, closest first.
    ///
    /// The beam on level 0 is `max(ef, k)` wide. Ties are broken by ascending
    /// internal id, so the result is deterministic for a given graph.
    pub fn search(&self, query: &[T], k: usize, ef: usize) -> Result<Vec<QueryResult>> {
        if query.len() != self.params.dim {
            return Err(IndexError::DimensionMismatch {
                expected: self.params.dim,
                actual: query.len(),
            });
        }
        let Some(ep) = self.entry_point else {
            return Ok(Vec::new());
        };
        if k == 0 {
            return Ok(Vec::new());
        }
        if ep as usize >= self.nodes.len() {
            return Err(IndexError::InvariantViolation(format!(
                "entry point {ep} is unallocated"
            )));
        }

        let query = distance::prepare(self.params.metric, query);
        let mut cur = Candidate {
            distance: self.distance(&query, self.store.get(ep)),
            id: ep,
        };
        for level in (1..=self.top_level_of(ep)).rev() {
            cur = self.greedy_step(&query, cur, level)?;
        }
        let found = self.search_layer(&query, &[cur], 0, ef.max(k))?;

        let mut out = DefaultResults::with_capacity(k.min(found.len()));
        for c in found.into_iter().take(k) {
            out.emplace(QueryResult {
                id: c.id,
                label: self.store.label(c.id),
                score: c.distance,
            });
        }
        Ok(out.into_results())
    }

    /// Exact scan over live nodes, for recall measurements.
    pub fn brute_force(&self, query: &[T], k: usize) -> Vec<QueryResult> {
        let query = distance::prepare(self.params.metric, query);
        let mut all: Vec<Candidate> = (0..self.nodes.len() as InternalId)
            .filter(|&id| !self.store.is_deleted(id))
            .map(|id| Candidate {
                distance: self.distance(&query, self.store.get(id)),
                id,
            })
            .collect();
        all.sort_unstable();
        all.into_iter()
            .take(k)
            .map(|c| QueryResult {
                id: c.id,
                label: self.store.label(c.id),
                score: c.distance,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::tests::graph;

    #[test]
    fn empty_graph_returns_nothing() {
        let g = graph(2);
        assert!(g.search(&[0.0, 0.0], 5, 10).unwrap().is_empty());
    }

    #[test]
    fn finds_exact_match_first() {
        let mut g = graph(2);
        for i in 0..50u64 {
            g.add(i, &[i as f32, (i % 7) as f32]).unwrap();
        }
        let hits = g.search(&[20.0, 6.0], 3, 32).unwrap();
        assert_eq!(hits[0].label, 20);
        assert_eq!(hits[0].score, 0.0);
        assert!(hits.windows(2).all(|w| w[0].score <= w[1].score));
    }

    #[test]
    fn ties_break_by_ascending_id() {
        let mut g = graph(1);
        g.add(10, &[1.0]).unwrap();
        g.add(11, &[-1.0]).unwrap();
        g.add(12, &[1.0]).unwrap();
        let hits = g.search(&[0.0], 3, 10).unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn tombstones_are_skipped_but_navigable() {
        let mut g = graph(1);
        for i in 0..20u64 {
            g.add(i, &[i as f32]).unwrap();
        }
        g.mark_deleted(5).unwrap();
        let hits = g.search(&[5.0], 3, 20).unwrap();
        assert!(hits.iter().all(|h| h.label != 5));
        assert_eq!(hits.len(), 3);
        let labels: Vec<_> = hits.iter().map(|h| h.label).collect();
        assert_eq!(labels, vec![4, 6, 3]);
    }

    #[test]
    fn beam_is_at_least_k() {
        let mut g = graph(1);
        for i in 0..30u64 {
            g.add(i, &[i as f32]).unwrap();
        }
        assert_eq!(g.search(&[0.0], 25, 1).unwrap().len(), 25);
    }

    #[test]
    fn dangling_neighbor_is_an_invariant_violation() {
        let mut g = graph(1);
        g.add(0, &[0.0]).unwrap();
        g.add(1, &[1.0]).unwrap();
        g.nodes[0].levels[0].out.push(99);
        g.nodes[1].levels[0].out.push(99);
        let err = g.search(&[0.0], 1, 4).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn huge_k_and_ef_do_not_overallocate() {
        let mut g = graph(2);
        for i in 0..10u64 {
            g.add(i, &[i as f32, 0.0]).unwrap();
        }
        assert_eq!(g.search(&[0.0, 0.0], usize::MAX, 10).unwrap().len(), 10);
        assert_eq!(g.search(&[0.0, 0.0], 3, usize::MAX).unwrap().len(), 3);
        assert_eq!(g.search(&[0.0, 0.0], usize::MAX, usize::MAX).unwrap().len(), 10);
    }
}

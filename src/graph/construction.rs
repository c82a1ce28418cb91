//! Incremental HNSW insertion.

use rand::Rng;

use crate::config::HNSW_MAX_LEVEL;
use crate::distance::Element;
use crate::error::Result;
use crate::InternalId;

use super::search::Candidate;
use super::ProximityGraph;

impl<T: Element> ProximityGraph<T> {
    /// Draw `floor(-ln(U) * 1/ln(m))`, capped at [`HNSW_MAX_LEVEL`].
    pub(crate) fn random_level(&mut self) -> usize {
        // `random` is in [0, 1); flip it so ln never sees 0.
        let u: f64 = 1.0 - self.rng.random::<f64>();
        let level = (-u.ln() * self.params.level_mult()).floor();
        (level as usize).min(HNSW_MAX_LEVEL)
    }

    /// Diversity heuristic over candidates sorted closest first.
    ///
    /// A candidate is kept only if no already kept neighbor is strictly closer
    /// to it than the base node is. Rejected candidates are not used to fill
    /// up the list.
    pub(crate) fn select_neighbors(&self, sorted: &[Candidate], m: usize) -> Vec<InternalId> {
        let mut selected: Vec<InternalId> = Vec::with_capacity(m.min(sorted.len()));
        for c in sorted {
            if selected.len() >= m {
                break;
            }
            let diverse = selected
                .iter()
                .all(|&s| self.distance_between(c.id, s) >= c.distance);
            if diverse {
                selected.push(c.id);
            }
        }
        selected
    }

    /// Re-select the out-list of `id` on `level` after it outgrew its cap.
    /// Tombstoned neighbors are dropped.
    pub(crate) fn shrink_neighbors(&mut self, id: InternalId, level: usize) {
        let mut candidates: Vec<Candidate> = self
            .neighbors(id, level)
            .iter()
            .filter(|&&n| !self.store.is_deleted(n))
            .map(|&n| Candidate {
                distance: self.distance_between(id, n),
                id: n,
            })
            .collect();
        candidates.sort_unstable();
        let selected = self.select_neighbors(&candidates, self.cap(level));
        self.set_neighbors(id, level, &selected);
    }

    /// Wire the freshly stored node `id` into every level up to its own.
    ///
    /// 1. Greedy descent from the entry point through levels above the node's.
    /// 2. From the node's level down to 0: beam search with `ef_construction`,
    ///    heuristic selection of `m` neighbors, symmetric edges.
    /// 3. Neighbors pushed over their cap are re-selected with the same
    ///    heuristic.
    pub(crate) fn insert(&mut self, id: InternalId) -> Result<()> {
        let level = self.top_level_of(id);
        let Some(ep) = self.entry_point else {
            self.entry_point = Some(id);
            return Ok(());
        };
        let ep_level = self.top_level_of(ep);
        let query = self.store.get(id).to_vec();

        let mut cur = Candidate {
            distance: self.distance(&query, self.store.get(ep)),
            id: ep,
        };
        for l in ((level + 1)..=ep_level).rev() {
            cur = self.greedy_step(&query, cur, l)?;
        }

        let mut entries = vec![cur];
        for l in (0..=level.min(ep_level)).rev() {
            let mut found = self.search_layer(&query, &entries, l, self.params.ef_construction)?;
            found.retain(|c| c.id != id);

            let selected = self.select_neighbors(&found, self.params.m);
            self.set_neighbors(id, l, &selected);
            for &n in &selected {
                self.link(n, id, l);
                if self.nodes[n as usize].levels[l].out.len() > self.cap(l) {
                    self.shrink_neighbors(n, l);
                }
            }

            if !found.is_empty() {
                entries = found;
            }
        }

        if self.store.is_deleted(ep) || level > ep_level {
            self.entry_point = Some(id);
        }
        Ok(())
    }
}

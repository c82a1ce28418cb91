//! Multi-layer proximity graph (HNSW).
//!
//! Every node keeps, per level it lives on, its out-neighbors (bounded by `m`
//! above level 0 and `2m` at level 0) and the full list of nodes linking to
//! it. The incoming lists are what make deletion exact: a tombstoned node
//! knows which neighbors must be repaired, and reclaiming a slot can rewrite
//! every reference to the relocated record without scanning the graph.
//!
//! All edge changes go through [`ProximityGraph::link`],
//! [`ProximityGraph::unlink`] and [`ProximityGraph::set_neighbors`], which keep
//! both directions in sync.
//!
//! # Lifecycle of a node
//!
//! ```text
//! add ──► live ──mark_deleted──► tombstoned ──repair(in-neighbors)──► reclaim
//! ```
//!
//! Tombstoned nodes stay navigable: searches walk through them and only drop
//! them from results.

mod construction;
mod reclaim;
mod repair;
mod search;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::config::{
    DEFAULT_BLOCK_SIZE, HNSW_DEFAULT_EF_CONSTRUCTION, HNSW_DEFAULT_EF_RUNTIME, HNSW_DEFAULT_M,
    HNSW_MAX_DIM, HNSW_MAX_EF, HNSW_MAX_M, MAX_BLOCK_SIZE,
};
use crate::distance::{self, Element, Metric};
use crate::error::{IndexError, Result};
use crate::log::LogContext;
use crate::store::{CapacityChange, VectorStore};
use crate::{InternalId, Label};

pub use reclaim::Relocation;
pub use repair::RepairTarget;

/// Seed of the level generator when none is configured.
pub const DEFAULT_LEVEL_SEED: u64 = 100;

/// Graph configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphParams {
    pub dim: usize,
    pub metric: Metric,
    /// Slots reserved up front, rounded up to whole blocks.
    pub initial_capacity: usize,
    pub block_size: usize,
    /// Max out-degree above level 0.
    pub m: usize,
    pub ef_construction: usize,
    pub ef_runtime: usize,
    pub seed: u64,
}

impl Default for GraphParams {
    fn default() -> Self {
        Self {
            dim: 0,
            metric: Metric::L2,
            initial_capacity: 0,
            block_size: DEFAULT_BLOCK_SIZE,
            m: HNSW_DEFAULT_M,
            ef_construction: HNSW_DEFAULT_EF_CONSTRUCTION,
            ef_runtime: HNSW_DEFAULT_EF_RUNTIME,
            seed: DEFAULT_LEVEL_SEED,
        }
    }
}

impl GraphParams {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            ..Self::default()
        }
    }

    pub fn metric(mut self, metric: Metric) -> Self {
        self.metric = metric;
        self
    }

    pub fn m(mut self, m: usize) -> Self {
        self.m = m;
        self
    }

    pub fn ef_construction(mut self, ef: usize) -> Self {
        self.ef_construction = ef;
        self
    }

    pub fn ef_runtime(mut self, ef: usize) -> Self {
        self.ef_runtime = ef;
        self
    }

    pub fn block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size;
        self
    }

    pub fn initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Max out-degree at level 0.
    #[inline]
    pub fn m0(&self) -> usize {
        2 * self.m
    }

    /// Multiplier applied to `-ln(U)` when drawing levels.
    #[inline]
    pub fn level_mult(&self) -> f64 {
        1.0 / (self.m as f64).ln()
    }

    /// Check every field against its accepted range. Errors name the field.
    pub fn validate(&self) -> Result<()> {
        check_range("dim", self.dim, 1, HNSW_MAX_DIM)?;
        check_range("m", self.m, 2, HNSW_MAX_M)?;
        check_range("block_size", self.block_size, 1, MAX_BLOCK_SIZE)?;
        check_range("ef_construction", self.ef_construction, 1, HNSW_MAX_EF)?;
        check_range("ef_runtime", self.ef_runtime, 1, HNSW_MAX_EF)?;
        check_range("initial_capacity", self.initial_capacity, 0, InternalId::MAX as usize)
    }
}

fn check_range(field: &str, value: usize, min: usize, max: usize) -> Result<()> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(IndexError::InvalidParameter(format!(
            "{field} must be in {min}..={max}, got {value}"
        )))
    }
}

/// Edges of one node on one level.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Links {
    pub(crate) out: SmallVec<[InternalId; 16]>,
    pub(crate) incoming: Vec<InternalId>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct Node {
    /// Index = level, `levels.len() - 1` = top level.
    pub(crate) levels: Vec<Links>,
}

impl Node {
    pub(crate) fn with_top_level(level: usize) -> Self {
        Self {
            levels: vec![Links::default(); level + 1],
        }
    }

    #[inline]
    pub(crate) fn top_level(&self) -> usize {
        self.levels.len() - 1
    }
}

/// HNSW graph over a [`VectorStore`].
pub struct ProximityGraph<T> {
    pub(crate) params: GraphParams,
    pub(crate) store: VectorStore<T>,
    pub(crate) nodes: Vec<Node>,
    pub(crate) labels: HashMap<Label, InternalId>,
    pub(crate) entry_point: Option<InternalId>,
    pub(crate) rng: StdRng,
    pub(crate) log: Arc<LogContext>,
    /// Set once an invariant violation was seen through [`ProximityGraph::guard`].
    pub(crate) poisoned: AtomicBool,
}

impl<T: Element> ProximityGraph<T> {
    pub fn new(params: GraphParams, log: Arc<LogContext>) -> Result<Self> {
        params.validate()?;
        let store = VectorStore::new(params.dim, params.block_size, params.initial_capacity)?;
        let overflow = || IndexError::CapacityOverflow {
            capacity: store.capacity(),
            dim: params.dim,
        };
        let mut nodes = Vec::new();
        nodes.try_reserve_exact(store.capacity()).map_err(|_| overflow())?;
        let mut labels = HashMap::new();
        labels.try_reserve(store.capacity()).map_err(|_| overflow())?;
        Ok(Self {
            nodes,
            labels,
            entry_point: None,
            rng: StdRng::seed_from_u64(params.seed),
            store,
            params,
            log,
            poisoned: AtomicBool::new(false),
        })
    }

    #[inline]
    pub fn params(&self) -> &GraphParams {
        &self.params
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.params.dim
    }

    /// Allocated slots, tombstones included.
    #[inline]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Live labels.
    #[inline]
    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.store.capacity()
    }

    #[inline]
    pub fn contains(&self, label: Label) -> bool {
        self.labels.contains_key(&label)
    }

    #[inline]
    pub fn id_of(&self, label: Label) -> Option<InternalId> {
        self.labels.get(&label).copied()
    }

    #[inline]
    pub fn label_of(&self, id: InternalId) -> Label {
        self.store.label(id)
    }

    #[inline]
    pub fn is_deleted(&self, id: InternalId) -> bool {
        self.store.is_deleted(id)
    }

    #[inline]
    pub fn entry_point(&self) -> Option<InternalId> {
        self.entry_point
    }

    /// Top level of the entry point, `None` for an empty graph.
    pub fn max_level(&self) -> Option<usize> {
        self.entry_point
            .map(|ep| self.nodes[ep as usize].top_level())
    }

    pub fn vector(&self, id: InternalId) -> &[T] {
        self.store.get(id)
    }

    pub fn top_level_of(&self, id: InternalId) -> usize {
        self.nodes[id as usize].top_level()
    }

    /// Out-neighbors of `id` on `level`.
    pub fn neighbors(&self, id: InternalId, level: usize) -> &[InternalId] {
        self.nodes[id as usize]
            .levels
            .get(level)
            .map(|l| l.out.as_slice())
            .unwrap_or(&[])
    }

    /// Nodes linking to `id` on `level`.
    pub fn incoming(&self, id: InternalId, level: usize) -> &[InternalId] {
        self.nodes[id as usize]
            .levels
            .get(level)
            .map(|l| l.incoming.as_slice())
            .unwrap_or(&[])
    }

    /// Add a vector under a label that is not yet in the graph.
    pub fn add(&mut self, label: Label, payload: &[T]) -> Result<InternalId> {
        if payload.len() != self.params.dim {
            return Err(IndexError::DimensionMismatch {
                expected: self.params.dim,
                actual: payload.len(),
            });
        }
        if self.labels.contains_key(&label) {
            return Err(IndexError::InvalidParameter(format!(
                "label {label} is already in the graph"
            )));
        }
        let prepared = distance::prepare(self.params.metric, payload);
        self.add_prepared(label, &prepared)
    }

    /// Add a payload that is already normalized for the metric.
    pub(crate) fn add_prepared(&mut self, label: Label, prepared: &[T]) -> Result<InternalId> {
        let (id, change) = self.store.add(label, prepared)?;
        if let Some(change) = change {
            self.log_capacity(change);
            self.nodes.reserve_exact(change.new.saturating_sub(self.nodes.len()));
        }
        let level = self.random_level();
        self.nodes.push(Node::with_top_level(level));
        self.labels.insert(label, id);
        self.insert(id)?;
        Ok(id)
    }

    #[inline]
    pub(crate) fn distance(&self, a: &[T], b: &[T]) -> f64 {
        self.params.metric.distance(a, b)
    }

    #[inline]
    pub(crate) fn distance_between(&self, a: InternalId, b: InternalId) -> f64 {
        self.distance(self.store.get(a), self.store.get(b))
    }

    /// Max out-degree on `level`.
    #[inline]
    pub(crate) fn cap(&self, level: usize) -> usize {
        if level == 0 {
            self.params.m0()
        } else {
            self.params.m
        }
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    pub(crate) fn check_poisoned(&self) -> Result<()> {
        if self.is_poisoned() {
            Err(IndexError::Poisoned)
        } else {
            Ok(())
        }
    }

    /// Mark the graph unusable after `e`.
    pub(crate) fn poison(&self, e: &IndexError) {
        if !self.poisoned.swap(true, Ordering::AcqRel) {
            self.log.warning(format_args!(
                "HNSW index is unusable after a fatal error: {e}"
            ));
        }
    }

    /// Poison on fatal errors and pass the result on.
    pub(crate) fn guard<R>(&self, result: Result<R>) -> Result<R> {
        if let Err(e) = &result {
            if e.is_fatal() {
                self.poison(e);
            }
        }
        result
    }

    pub(crate) fn log_capacity(&self, change: CapacityChange) {
        self.log.verbose(format_args!(
            "Updating HNSW index capacity from {} to {}",
            change.old, change.new
        ));
    }

    pub(crate) fn check_id(&self, from: InternalId, level: usize, id: InternalId) -> Result<()> {
        if (id as usize) < self.nodes.len() {
            Ok(())
        } else {
            Err(IndexError::InvariantViolation(format!(
                "node {from} on level {level} links to unallocated id {id}"
            )))
        }
    }

    /// Add edge `from -> to` on `level`.
    pub(crate) fn link(&mut self, from: InternalId, to: InternalId, level: usize) {
        let out = &mut self.nodes[from as usize].levels[level].out;
        if from == to || out.contains(&to) {
            return;
        }
        out.push(to);
        self.nodes[to as usize].levels[level].incoming.push(from);
    }

    /// Remove edge `from -> to` on `level`, if present.
    pub(crate) fn unlink(&mut self, from: InternalId, to: InternalId, level: usize) {
        let out = &mut self.nodes[from as usize].levels[level].out;
        if let Some(pos) = out.iter().position(|&n| n == to) {
            out.remove(pos);
            let incoming = &mut self.nodes[to as usize].levels[level].incoming;
            if let Some(pos) = incoming.iter().position(|&n| n == from) {
                incoming.swap_remove(pos);
            }
        }
    }

    /// Replace the out-list of `id` on `level`, preserving the order of `next`.
    pub(crate) fn set_neighbors(&mut self, id: InternalId, level: usize, next: &[InternalId]) {
        let current: SmallVec<[InternalId; 16]> = self.nodes[id as usize].levels[level].out.clone();
        for &old in current.iter().filter(|n| !next.contains(n)) {
            self.unlink(id, old, level);
        }
        for &new in next {
            self.link(id, new, level);
        }
        let out = &mut self.nodes[id as usize].levels[level].out;
        out.clear();
        out.extend(next.iter().copied().filter(|&n| n != id));
    }

    /// Pick an entry point: the highest live node, or the highest node at all
    /// when nothing is live.
    pub(crate) fn choose_entry_point(&self) -> Option<InternalId> {
        let mut best: Option<(bool, usize, InternalId)> = None;
        for (id, node) in self.nodes.iter().enumerate() {
            let id = id as InternalId;
            let key = (!self.store.is_deleted(id), node.top_level(), id);
            let better = match best {
                None => true,
                Some((live, level, _)) => (key.0, key.1) > (live, level),
            };
            if better {
                best = Some(key);
            }
        }
        best.map(|(_, _, id)| id)
    }

    /// Verify structural invariants: every reference allocated, edges and
    /// incoming lists mirror each other, degrees within caps, label map and
    /// entry point consistent.
    pub fn check_integrity(&self) -> Result<()> {
        let n = self.nodes.len();
        if self.store.len() != n {
            return Err(IndexError::InvariantViolation(format!(
                "store holds {} records but graph has {n} nodes",
                self.store.len()
            )));
        }
        for (id, node) in self.nodes.iter().enumerate() {
            let id = id as InternalId;
            for (level, links) in node.levels.iter().enumerate() {
                if links.out.len() > self.cap(level) {
                    return Err(IndexError::InvariantViolation(format!(
                        "node {id} on level {level} has {} neighbors, cap is {}",
                        links.out.len(),
                        self.cap(level)
                    )));
                }
                for &to in &links.out {
                    self.check_id(id, level, to)?;
                    let back = self.nodes[to as usize]
                        .levels
                        .get(level)
                        .is_some_and(|l| l.incoming.contains(&id));
                    if !back {
                        return Err(IndexError::InvariantViolation(format!(
                            "edge {id} -> {to} on level {level} missing from incoming list"
                        )));
                    }
                }
                for &from in &links.incoming {
                    self.check_id(id, level, from)?;
                    let forward = self.nodes[from as usize]
                        .levels
                        .get(level)
                        .is_some_and(|l| l.out.contains(&id));
                    if !forward {
                        return Err(IndexError::InvariantViolation(format!(
                            "incoming {from} -> {id} on level {level} has no edge"
                        )));
                    }
                }
            }
        }
        for (&label, &id) in &self.labels {
            if id as usize >= n || self.store.label(id) != label || self.store.is_deleted(id) {
                return Err(IndexError::InvariantViolation(format!(
                    "label {label} maps to invalid slot {id}"
                )));
            }
        }
        match self.entry_point {
            Some(ep) if ep as usize >= n => Err(IndexError::InvariantViolation(format!(
                "entry point {ep} is unallocated"
            ))),
            Some(ep) => {
                let top_live = (0..n as InternalId)
                    .filter(|&id| !self.store.is_deleted(id))
                    .map(|id| self.nodes[id as usize].top_level())
                    .max();
                match top_live {
                    Some(top) if self.store.is_deleted(ep) || self.top_level_of(ep) != top => {
                        Err(IndexError::InvariantViolation(format!(
                            "entry point {ep} is not a live node on level {top}"
                        )))
                    }
                    _ => Ok(()),
                }
            }
            None if n > 0 => Err(IndexError::InvariantViolation(
                "non-empty graph has no entry point".into(),
            )),
            None => Ok(()),
        }
    }
}

impl<T> std::fmt::Debug for ProximityGraph<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProximityGraph")
            .field("params", &self.params)
            .field("nodes", &self.nodes.len())
            .field("labels", &self.labels.len())
            .field("entry_point", &self.entry_point)
            .field("poisoned", &self.poisoned.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(super) fn graph(dim: usize) -> ProximityGraph<f32> {
        ProximityGraph::new(
            GraphParams::new(dim).m(4).ef_construction(32).block_size(8),
            Arc::new(LogContext::new()),
        )
        .unwrap()
    }

    #[test]
    fn params_validation() {
        assert!(GraphParams::new(0).validate().is_err());
        assert!(GraphParams::new(4).m(1).validate().is_err());
        assert!(GraphParams::new(4).block_size(0).validate().is_err());
        assert!(GraphParams::new(4).ef_runtime(0).validate().is_err());
        assert!(GraphParams::new(4).validate().is_ok());
        assert_eq!(GraphParams::new(4).m(8).m0(), 16);
    }

    #[test]
    fn params_deserialize_with_defaults() {
        let params: GraphParams = serde_json::from_str(r#"{"dim": 3, "m": 8}"#).unwrap();
        assert_eq!(params.dim, 3);
        assert_eq!(params.m, 8);
        assert_eq!(params.ef_construction, HNSW_DEFAULT_EF_CONSTRUCTION);
        assert_eq!(params.block_size, DEFAULT_BLOCK_SIZE);
    }

    #[test]
    fn link_helpers_keep_both_sides() {
        let mut g = graph(2);
        for i in 0..3u64 {
            g.add(i, &[i as f32, 0.0]).unwrap();
        }
        g.set_neighbors(0, 0, &[1, 2]);
        assert_eq!(g.neighbors(0, 0), &[1, 2]);
        assert!(g.incoming(2, 0).contains(&0));

        g.set_neighbors(0, 0, &[2]);
        assert!(!g.incoming(1, 0).contains(&0));
        g.check_integrity().unwrap();
    }

    #[test]
    fn rejects_bad_dimension_and_duplicate_label() {
        let mut g = graph(3);
        assert!(matches!(
            g.add(1, &[1.0]),
            Err(IndexError::DimensionMismatch { expected: 3, actual: 1 })
        ));
        g.add(1, &[1.0, 2.0, 3.0]).unwrap();
        assert!(matches!(
            g.add(1, &[1.0, 2.0, 3.0]),
            Err(IndexError::InvalidParameter(_))
        ));
    }

    #[test]
    fn capacity_change_is_logged() {
        let lines = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        let log = LogContext::with_sink(move |level, msg| {
            sink.lock().push(format!("{level}: {msg}"));
        });
        let mut g = ProximityGraph::<f64>::new(
            GraphParams::new(2).block_size(2),
            Arc::new(log),
        )
        .unwrap();
        for i in 0..3u64 {
            g.add(i, &[i as f64, 1.0]).unwrap();
        }
        assert_eq!(
            *lines.lock(),
            vec![
                "verbose: Updating HNSW index capacity from 0 to 2".to_string(),
                "verbose: Updating HNSW index capacity from 2 to 4".to_string(),
            ]
        );
    }
}

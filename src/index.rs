//! Type-erased index handle.
//!
//! Algorithm and element type are picked once, from [`IndexParams`], and
//! dispatched through the closed [`VectorIndex`] enum afterwards. Payloads and
//! queries cross this boundary as a [`VectorRef`]; a reference of the wrong
//! element type is rejected instead of converted.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::distance::{DataType, Element};
use crate::error::{IndexError, ParamError, Result};
use crate::graph::{GraphParams, ProximityGraph};
use crate::log::LogContext;
use crate::query::{self, QueryConfig, QueryKind, RawParam};
use crate::results::QueryReply;
use crate::tiered::{JobSubmitter, TieredIndex, TieredParams};
use crate::Label;

/// Which algorithm backs an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexKind {
    /// Proximity graph, updated synchronously.
    Graph,
    /// Staging buffer in front of a graph, maintained by jobs.
    Tiered,
}

impl IndexKind {
    pub fn name(self) -> &'static str {
        match self {
            IndexKind::Graph => "HNSW",
            IndexKind::Tiered => "TIERED",
        }
    }
}

/// Construction parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IndexParams {
    Graph {
        data_type: DataType,
        graph: GraphParams,
    },
    Tiered {
        data_type: DataType,
        graph: GraphParams,
        #[serde(default)]
        tiered: TieredParams,
    },
}

impl IndexParams {
    pub fn kind(&self) -> IndexKind {
        match self {
            IndexParams::Graph { .. } => IndexKind::Graph,
            IndexParams::Tiered { .. } => IndexKind::Tiered,
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            IndexParams::Graph { data_type, .. } | IndexParams::Tiered { data_type, .. } => {
                *data_type
            }
        }
    }
}

/// Borrowed vector of either element type.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VectorRef<'a> {
    F32(&'a [f32]),
    F64(&'a [f64]),
}

impl VectorRef<'_> {
    pub fn data_type(&self) -> DataType {
        match self {
            VectorRef::F32(_) => DataType::Float32,
            VectorRef::F64(_) => DataType::Float64,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            VectorRef::F32(v) => v.len(),
            VectorRef::F64(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<'a> From<&'a [f32]> for VectorRef<'a> {
    fn from(v: &'a [f32]) -> Self {
        VectorRef::F32(v)
    }
}

impl<'a> From<&'a [f64]> for VectorRef<'a> {
    fn from(v: &'a [f64]) -> Self {
        VectorRef::F64(v)
    }
}

/// Summary of an index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexStats {
    pub kind: IndexKind,
    pub data_type: DataType,
    pub dimension: usize,
    pub num_vectors: usize,
}

/// An index of one algorithm over one element type.
#[derive(Debug)]
pub enum VectorIndex {
    GraphF32(ProximityGraph<f32>),
    GraphF64(ProximityGraph<f64>),
    TieredF32(Arc<TieredIndex<f32>>),
    TieredF64(Arc<TieredIndex<f64>>),
}

macro_rules! dispatch {
    ($self:expr, $graph:ident => $on_graph:expr, $tiered:ident => $on_tiered:expr) => {
        match $self {
            VectorIndex::GraphF32($graph) => $on_graph,
            VectorIndex::GraphF64($graph) => $on_graph,
            VectorIndex::TieredF32($tiered) => $on_tiered,
            VectorIndex::TieredF64($tiered) => $on_tiered,
        }
    };
}

fn mismatch(expected: DataType, actual: DataType) -> IndexError {
    IndexError::DataTypeMismatch { expected, actual }
}

impl VectorIndex {
    /// Build an empty index. Tiered indexes need a `submitter` for their
    /// jobs.
    pub fn new(
        params: IndexParams,
        submitter: Option<Arc<dyn JobSubmitter>>,
        log: Arc<LogContext>,
    ) -> Result<Self> {
        match params {
            IndexParams::Graph { data_type, graph } => Ok(match data_type {
                DataType::Float32 => VectorIndex::GraphF32(ProximityGraph::new(graph, log)?),
                DataType::Float64 => VectorIndex::GraphF64(ProximityGraph::new(graph, log)?),
            }),
            IndexParams::Tiered {
                data_type,
                graph,
                tiered,
            } => {
                let submitter = submitter.ok_or_else(|| {
                    IndexError::InvalidParameter("tiered index needs a job submitter".into())
                })?;
                Ok(match data_type {
                    DataType::Float32 => {
                        VectorIndex::TieredF32(TieredIndex::new(graph, tiered, submitter, log)?)
                    }
                    DataType::Float64 => {
                        VectorIndex::TieredF64(TieredIndex::new(graph, tiered, submitter, log)?)
                    }
                })
            }
        }
    }

    pub fn kind(&self) -> IndexKind {
        match self {
            VectorIndex::GraphF32(_) | VectorIndex::GraphF64(_) => IndexKind::Graph,
            VectorIndex::TieredF32(_) | VectorIndex::TieredF64(_) => IndexKind::Tiered,
        }
    }

    pub fn data_type(&self) -> DataType {
        match self {
            VectorIndex::GraphF32(_) | VectorIndex::TieredF32(_) => DataType::Float32,
            VectorIndex::GraphF64(_) | VectorIndex::TieredF64(_) => DataType::Float64,
        }
    }

    pub fn dim(&self) -> usize {
        dispatch!(self, g => g.dim(), t => t.dim())
    }

    /// Live labels.
    pub fn len(&self) -> usize {
        dispatch!(self, g => g.label_count(), t => t.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            kind: self.kind(),
            data_type: self.data_type(),
            dimension: self.dim(),
            num_vectors: self.len(),
        }
    }

    /// Add or overwrite `label`. Returns true if the label is new.
    pub fn add<'a>(&mut self, label: Label, payload: impl Into<VectorRef<'a>>) -> Result<bool> {
        let payload = payload.into();
        let expected = self.data_type();
        match (self, payload) {
            (VectorIndex::GraphF32(g), VectorRef::F32(v)) => graph_add(g, label, v),
            (VectorIndex::GraphF64(g), VectorRef::F64(v)) => graph_add(g, label, v),
            (VectorIndex::TieredF32(t), VectorRef::F32(v)) => t.add(label, v),
            (VectorIndex::TieredF64(t), VectorRef::F64(v)) => t.add(label, v),
            (_, v) => Err(mismatch(expected, v.data_type())),
        }
    }

    /// Delete `label`. Returns false if it was not present.
    pub fn delete(&mut self, label: Label) -> Result<bool> {
        dispatch!(self, g => graph_delete(g, label), t => t.delete(label))
    }

    /// `k` nearest live vectors to `query`, closest first.
    pub fn query<'a>(
        &self,
        query: impl Into<VectorRef<'a>>,
        k: usize,
        config: Option<&QueryConfig>,
    ) -> Result<QueryReply> {
        let query = query.into();
        match (self, query) {
            (VectorIndex::GraphF32(g), VectorRef::F32(q)) => graph_query(g, q, k, config),
            (VectorIndex::GraphF64(g), VectorRef::F64(q)) => graph_query(g, q, k, config),
            (VectorIndex::TieredF32(t), VectorRef::F32(q)) => t.query(q, k, config),
            (VectorIndex::TieredF64(t), VectorRef::F64(q)) => t.query(q, k, config),
            (index, q) => Err(mismatch(index.data_type(), q.data_type())),
        }
    }

    /// Resolve raw query directives into `target`.
    pub fn resolve_params(
        &self,
        params: &[RawParam<'_>],
        target: Option<&mut QueryConfig>,
        kind: QueryKind,
    ) -> std::result::Result<(), ParamError> {
        query::resolve_params(params, target, kind)
    }

    /// Write a snapshot. Only graph indexes can be saved.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        match self {
            VectorIndex::GraphF32(g) => g.save(path),
            VectorIndex::GraphF64(g) => g.save(path),
            _ => Err(IndexError::InvalidParameter(
                "snapshots of tiered indexes are not supported".into(),
            )),
        }
    }
}

/// Graph-only add. Everything that can be checked is checked before the old
/// vector is removed; a failure after that point poisons the graph, since the
/// label would otherwise be silently lost.
fn graph_add<T: Element>(g: &mut ProximityGraph<T>, label: Label, payload: &[T]) -> Result<bool> {
    g.check_poisoned()?;
    if payload.len() != g.dim() {
        return Err(IndexError::DimensionMismatch {
            expected: g.dim(),
            actual: payload.len(),
        });
    }
    let existed = graph_delete(g, label)?;
    match g.add(label, payload) {
        Ok(_) => Ok(!existed),
        Err(e) => {
            if existed || e.is_fatal() {
                g.poison(&e);
            }
            Err(e)
        }
    }
}

/// Tombstone, repair and reclaim in one go.
fn graph_delete<T: Element>(g: &mut ProximityGraph<T>, label: Label) -> Result<bool> {
    g.check_poisoned()?;
    let result = delete_now(g, label);
    g.guard(result)
}

fn delete_now<T: Element>(g: &mut ProximityGraph<T>, label: Label) -> Result<bool> {
    let Some((id, targets)) = g.mark_deleted(label) else {
        return Ok(false);
    };
    for target in &targets {
        g.repair(target.node, target.level)?;
    }
    g.reclaim(id)?;
    Ok(true)
}

fn graph_query<T: Element>(
    g: &ProximityGraph<T>,
    query: &[T],
    k: usize,
    config: Option<&QueryConfig>,
) -> Result<QueryReply> {
    g.check_poisoned()?;
    let ef = config
        .map(|c| c.ef_runtime)
        .filter(|&ef| ef > 0)
        .unwrap_or(g.params().ef_runtime);
    Ok(QueryReply::new(g.guard(g.search(query, k, ef))?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_index() -> VectorIndex {
        VectorIndex::new(
            IndexParams::Graph {
                data_type: DataType::Float32,
                graph: GraphParams::new(2).m(4).ef_construction(32).block_size(8),
            },
            None,
            Arc::new(LogContext::new()),
        )
        .unwrap()
    }

    #[test]
    fn graph_add_query_delete() {
        let mut index = graph_index();
        for i in 0..20u64 {
            assert!(index.add(i, &[i as f32, 0.0][..]).unwrap());
        }
        assert_eq!(index.len(), 20);
        let reply = index.query(&[3.1f32, 0.0][..], 2, None).unwrap();
        assert_eq!(reply.labels(), vec![3, 4]);

        assert!(index.delete(3).unwrap());
        assert!(!index.delete(3).unwrap());
        let reply = index.query(&[3.1f32, 0.0][..], 2, None).unwrap();
        assert_eq!(reply.labels(), vec![4, 2]);
        if let VectorIndex::GraphF32(g) = &index {
            assert_eq!(g.len(), 19);
            g.check_integrity().unwrap();
        }
    }

    #[test]
    fn overwrite_replaces_vector() {
        let mut index = graph_index();
        assert!(index.add(1, &[0.0f32, 0.0][..]).unwrap());
        assert!(!index.add(1, &[9.0f32, 9.0][..]).unwrap());
        assert_eq!(index.len(), 1);
        let reply = index.query(&[9.0f32, 9.0][..], 1, None).unwrap();
        assert_eq!(reply.get(0).map(|r| r.score), Some(0.0));
    }

    #[test]
    fn wrong_element_type_is_rejected() {
        let mut index = graph_index();
        let err = index.add(1, &[0.0f64, 0.0][..]).unwrap_err();
        assert!(matches!(
            err,
            IndexError::DataTypeMismatch {
                expected: DataType::Float32,
                actual: DataType::Float64
            }
        ));
        assert!(index.query(&[0.0f64, 0.0][..], 1, None).is_err());
    }

    #[test]
    fn tiered_requires_submitter() {
        let err = VectorIndex::new(
            IndexParams::Tiered {
                data_type: DataType::Float64,
                graph: GraphParams::new(4),
                tiered: TieredParams::default(),
            },
            None,
            Arc::new(LogContext::new()),
        )
        .unwrap_err();
        assert!(matches!(err, IndexError::InvalidParameter(_)));
    }

    #[test]
    fn params_round_trip_through_json() {
        let params = IndexParams::Tiered {
            data_type: DataType::Float32,
            graph: GraphParams::new(8).m(12),
            tiered: TieredParams {
                flat_buffer_limit: 10,
                swap_job_threshold: 3,
            },
        };
        let json = serde_json::to_string(&params).unwrap();
        let back: IndexParams = serde_json::from_str(&json).unwrap();
        assert_eq!(back, params);
        assert_eq!(back.kind(), IndexKind::Tiered);
        assert_eq!(back.data_type(), DataType::Float32);
    }

    #[test]
    fn invariant_violation_poisons_graph_index() {
        let mut index = graph_index();
        for i in 0..4u64 {
            index.add(i, &[i as f32, 0.0][..]).unwrap();
        }
        if let VectorIndex::GraphF32(g) = &mut index {
            for node in &mut g.nodes {
                node.levels[0].out.push(99);
            }
        }
        let err = index.query(&[0.0f32, 0.0][..], 1, None).unwrap_err();
        assert!(err.is_fatal());

        assert!(matches!(
            index.query(&[0.0f32, 0.0][..], 1, None),
            Err(IndexError::Poisoned)
        ));
        assert!(matches!(index.add(9, &[1.0f32, 1.0][..]), Err(IndexError::Poisoned)));
        assert!(matches!(index.delete(0), Err(IndexError::Poisoned)));
    }

    #[test]
    fn rejected_overwrite_keeps_old_vector() {
        let mut index = graph_index();
        index.add(1, &[2.0f32, 2.0][..]).unwrap();
        let err = index.add(1, &[1.0f32, 2.0, 3.0][..]).unwrap_err();
        assert!(matches!(err, IndexError::DimensionMismatch { .. }));
        assert_eq!(index.len(), 1);
        let reply = index.query(&[2.0f32, 2.0][..], 1, None).unwrap();
        assert_eq!(reply.get(0).map(|r| (r.label, r.score)), Some((1, 0.0)));
    }

    #[test]
    fn unbounded_ef_runtime_from_resolver() {
        let mut index = graph_index();
        for i in 0..5u64 {
            index.add(i, &[i as f32, 0.0][..]).unwrap();
        }
        let mut cfg = QueryConfig::default();
        index
            .resolve_params(
                &[RawParam::new("ef_runtime", "9223372036854775807")],
                Some(&mut cfg),
                QueryKind::Knn,
            )
            .unwrap();
        assert_eq!(cfg.ef_runtime as u64, i64::MAX as u64);
        let reply = index.query(&[0.0f32, 0.0][..], 2, Some(&cfg)).unwrap();
        assert_eq!(reply.labels(), vec![0, 1]);
    }
}

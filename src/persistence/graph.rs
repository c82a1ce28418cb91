//! Graph snapshot writer and reader.
//!
//! Layout after the [`Header`]:
//!
//! ```text
//! params:  block_size u64 | m u64 | ef_construction u64 | ef_runtime u64 | level_mult f64
//! table:   node_count u64 | max_level u32 | entry_point u32 (u32::MAX = none)
//! node*:   label u64 | flags u8 | top_level u32
//!          (neighbor_count u32 | neighbor u32*) per level 0..=top_level
//!          payload: dim elements of the header's data type
//! ```
//!
//! Incoming lists are not stored; they are rebuilt from the out-lists on
//! load, which also checks every reference before the graph is handed out.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::config::{HNSW_MAX_DIM, HNSW_MAX_EF, HNSW_MAX_LEVEL, HNSW_MAX_M, MAX_BLOCK_SIZE};
use crate::distance::Element;
use crate::error::{FormatError, IndexError, Result};
use crate::graph::{GraphParams, Links, Node, ProximityGraph, DEFAULT_LEVEL_SEED};
use crate::log::LogContext;
use crate::store::VectorStore;
use crate::InternalId;

use super::format::{
    read_f64, read_u32, read_u64, read_u8, write_f64, write_u32, write_u64, write_u8,
    AlgorithmType, Header,
};

const NO_ENTRY_POINT: u32 = u32::MAX;
const FLAG_DELETED: u8 = 1;

fn corrupted(msg: impl Into<String>) -> IndexError {
    IndexError::Format(FormatError::Corrupted(msg.into()))
}

fn read_usize<R: Read>(r: &mut R, field: &str) -> Result<usize> {
    let v = read_u64(r).map_err(FormatError::from)?;
    usize::try_from(v).map_err(|_| corrupted(format!("{field} {v} out of range")))
}

/// Read a `u64` field that must lie in `min..=max`.
fn read_bounded<R: Read>(r: &mut R, field: &str, min: usize, max: usize) -> Result<usize> {
    let v = read_usize(r, field)?;
    check_bound(field, v, min, max)?;
    Ok(v)
}

fn check_bound(field: &str, v: usize, min: usize, max: usize) -> Result<()> {
    if (min..=max).contains(&v) {
        Ok(())
    } else {
        Err(corrupted(format!("{field} {v} out of range {min}..={max}")))
    }
}

pub(crate) fn open(path: &Path) -> Result<BufReader<File>> {
    let file = File::open(path).map_err(|source| FormatError::CannotOpen {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(BufReader::new(file))
}

impl<T: Element> ProximityGraph<T> {
    /// Write a snapshot to `path`, replacing any existing file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut w = BufWriter::new(File::create(path.as_ref())?);
        self.write_to(&mut w)?;
        w.flush()?;
        Ok(())
    }

    pub(crate) fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        let p = &self.params;
        Header::new(AlgorithmType::Hnsw, p.dim, T::DATA_TYPE, p.metric).write(w)?;

        write_u64(w, p.block_size as u64)?;
        write_u64(w, p.m as u64)?;
        write_u64(w, p.ef_construction as u64)?;
        write_u64(w, p.ef_runtime as u64)?;
        write_f64(w, p.level_mult())?;

        write_u64(w, self.nodes.len() as u64)?;
        write_u32(w, self.max_level().unwrap_or(0) as u32)?;
        write_u32(w, self.entry_point.unwrap_or(NO_ENTRY_POINT))?;

        for (id, node) in self.nodes.iter().enumerate() {
            let id = id as InternalId;
            write_u64(w, self.store.label(id))?;
            write_u8(w, if self.store.is_deleted(id) { FLAG_DELETED } else { 0 })?;
            write_u32(w, node.top_level() as u32)?;
            for links in &node.levels {
                write_u32(w, links.out.len() as u32)?;
                for &n in &links.out {
                    write_u32(w, n)?;
                }
            }
            for &x in self.store.get(id) {
                x.write_le(w)?;
            }
        }
        Ok(())
    }

    /// Load a snapshot written by [`ProximityGraph::save`].
    pub fn load(path: impl AsRef<Path>, log: Arc<LogContext>) -> Result<Self> {
        let mut r = open(path.as_ref())?;
        let header = Header::read(&mut r, AlgorithmType::Hnsw)?;
        Self::read_body(&mut r, header, log)
    }

    /// Read everything after an already validated header.
    pub(crate) fn read_body<R: Read>(r: &mut R, header: Header, log: Arc<LogContext>) -> Result<Self> {
        if header.data_type != T::DATA_TYPE {
            return Err(FormatError::DataTypeMismatch {
                expected: T::DATA_TYPE,
                found: header.data_type,
            }
            .into());
        }

        check_bound("dimension", header.dim, 1, HNSW_MAX_DIM)?;
        let params = GraphParams {
            dim: header.dim,
            metric: header.metric,
            initial_capacity: 0,
            block_size: read_bounded(r, "block size", 1, MAX_BLOCK_SIZE)?,
            m: read_bounded(r, "M", 2, HNSW_MAX_M)?,
            ef_construction: read_bounded(r, "ef_construction", 1, HNSW_MAX_EF)?,
            ef_runtime: read_bounded(r, "ef_runtime", 1, HNSW_MAX_EF)?,
            seed: DEFAULT_LEVEL_SEED,
        };
        params
            .validate()
            .map_err(|e| corrupted(format!("bad parameters: {e}")))?;
        let level_mult = read_f64(r).map_err(FormatError::from)?;
        if (level_mult - params.level_mult()).abs() > 1e-9 {
            return Err(corrupted(format!(
                "level multiplier {level_mult} does not match M {}",
                params.m
            )));
        }

        let count = read_usize(r, "node count")?;
        if count > InternalId::MAX as usize {
            return Err(corrupted(format!("node count {count} out of range")));
        }
        let max_level = read_u32(r).map_err(FormatError::from)? as usize;
        let entry_point = match read_u32(r).map_err(FormatError::from)? {
            NO_ENTRY_POINT => None,
            ep => Some(ep),
        };

        let mut store = VectorStore::new(params.dim, params.block_size, 0)
            .map_err(|e| corrupted(e.to_string()))?;
        let mut nodes: Vec<Node> = Vec::with_capacity(count.min(1 << 20));
        let mut labels = std::collections::HashMap::new();
        for id in 0..count {
            let label = read_u64(r).map_err(FormatError::from)?;
            let flags = read_u8(r).map_err(FormatError::from)?;
            let top = read_u32(r).map_err(FormatError::from)? as usize;
            if top > HNSW_MAX_LEVEL {
                return Err(corrupted(format!("node {id} has level {top}")));
            }
            let mut node = Node::with_top_level(top);
            for (level, links) in node.levels.iter_mut().enumerate() {
                let degree = read_u32(r).map_err(FormatError::from)? as usize;
                let cap = if level == 0 { params.m0() } else { params.m };
                if degree > cap {
                    return Err(corrupted(format!(
                        "node {id} has {degree} neighbors on level {level}, cap is {cap}"
                    )));
                }
                for _ in 0..degree {
                    links.out.push(read_u32(r).map_err(FormatError::from)?);
                }
            }
            let mut payload = Vec::with_capacity(params.dim);
            for _ in 0..params.dim {
                payload.push(T::read_le(r).map_err(FormatError::from)?);
            }

            let deleted = flags & FLAG_DELETED != 0;
            if !deleted && labels.insert(label, id as InternalId).is_some() {
                return Err(corrupted(format!("label {label} appears twice")));
            }
            store
                .push_raw(label, deleted, payload)
                .map_err(|e| corrupted(format!("block size {}: {e}", params.block_size)))?;
            nodes.push(node);
        }

        rebuild_incoming(&mut nodes)?;

        match entry_point {
            None if count > 0 => return Err(corrupted("missing entry point")),
            Some(ep) if ep as usize >= count => {
                return Err(corrupted(format!("entry point {ep} out of range")))
            }
            Some(ep) if nodes[ep as usize].top_level() != max_level => {
                return Err(corrupted(format!(
                    "entry point {ep} is not on max level {max_level}"
                )))
            }
            _ => {}
        }

        let graph = ProximityGraph {
            rng: StdRng::seed_from_u64(params.seed),
            params,
            store,
            nodes,
            labels,
            entry_point,
            log,
            poisoned: AtomicBool::new(false),
        };
        graph.check_integrity().map_err(|e| corrupted(e.to_string()))?;
        Ok(graph)
    }
}

/// Fill incoming lists from out-lists, rejecting references to missing
/// nodes or levels.
fn rebuild_incoming(nodes: &mut [Node]) -> Result<()> {
    let count = nodes.len();
    let mut edges: Vec<(InternalId, InternalId, usize)> = Vec::new();
    for (id, node) in nodes.iter().enumerate() {
        for (level, links) in node.levels.iter().enumerate() {
            for &to in &links.out {
                if to as usize >= count || to as usize == id {
                    return Err(corrupted(format!(
                        "node {id} on level {level} links to invalid id {to}"
                    )));
                }
                if nodes[to as usize].top_level() < level {
                    return Err(corrupted(format!(
                        "node {id} links to {to} on level {level} above its top level"
                    )));
                }
                edges.push((id as InternalId, to, level));
            }
        }
    }
    for (from, to, level) in edges {
        let links: &mut Links = &mut nodes[to as usize].levels[level];
        links.incoming.push(from);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample() -> ProximityGraph<f32> {
        let mut g = ProximityGraph::new(
            GraphParams::new(3).m(4).ef_construction(20).block_size(16),
            Arc::new(LogContext::new()),
        )
        .unwrap();
        for i in 0..40u64 {
            g.add(i, &[i as f32, (i % 5) as f32, 1.0]).unwrap();
        }
        g.mark_deleted(7).unwrap();
        g
    }

    fn reload(g: &ProximityGraph<f32>) -> Result<ProximityGraph<f32>> {
        let mut buf = Vec::new();
        g.write_to(&mut buf).unwrap();
        let mut r = Cursor::new(buf);
        let header = Header::read(&mut r, AlgorithmType::Hnsw)?;
        ProximityGraph::read_body(&mut r, header, Arc::new(LogContext::new()))
    }

    #[test]
    fn round_trip_preserves_structure() {
        let g = sample();
        let loaded = reload(&g).unwrap();
        assert_eq!(loaded.len(), g.len());
        for id in 0..g.len() as InternalId {
            for level in 0..=g.top_level_of(id) {
                assert_eq!(loaded.neighbors(id, level), g.neighbors(id, level));
                let mut a = loaded.incoming(id, level).to_vec();
                let mut b = g.incoming(id, level).to_vec();
                a.sort_unstable();
                b.sort_unstable();
                assert_eq!(a, b);
            }
            assert_eq!(loaded.vector(id), g.vector(id));
        }
        assert_eq!(loaded.entry_point, g.entry_point);
        assert_eq!(loaded.labels, g.labels);
        assert!(loaded.is_deleted(7));
        assert_eq!(loaded.params().m, 4);
    }

    #[test]
    fn wrong_element_type_is_rejected() {
        let g = sample();
        let mut buf = Vec::new();
        g.write_to(&mut buf).unwrap();
        let mut r = Cursor::new(buf);
        let header = Header::read(&mut r, AlgorithmType::Hnsw).unwrap();
        let err = ProximityGraph::<f64>::read_body(&mut r, header, Arc::new(LogContext::new()))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot load index: Expected FLOAT64 data but got data type: FLOAT32"
        );
    }

    #[test]
    fn dangling_reference_is_rejected() {
        let mut g = sample();
        g.nodes[0].levels[0].out.push(1000);
        let err = reload(&g).unwrap_err();
        assert!(matches!(err, IndexError::Format(FormatError::Corrupted(_))));
    }

    #[test]
    fn truncated_body_is_rejected() {
        let g = sample();
        let mut buf = Vec::new();
        g.write_to(&mut buf).unwrap();
        buf.truncate(buf.len() - 3);
        let mut r = Cursor::new(buf);
        let header = Header::read(&mut r, AlgorithmType::Hnsw).unwrap();
        let err = ProximityGraph::<f32>::read_body(&mut r, header, Arc::new(LogContext::new()))
            .unwrap_err();
        assert!(matches!(err, IndexError::Format(FormatError::Truncated)));
    }
}

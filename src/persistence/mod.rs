//! Single-file binary snapshots.
//!
//! A snapshot holds one proximity graph: a [`format::Header`] followed by the
//! parameter block and the node tables. Loading validates the header field by
//! field and rebuilds the graph's derived state; a failed load returns an
//! error and never a partially usable index.
//!
//! ```rust,ignore
//! graph.save("index.bin")?;
//! let index = tierann::persistence::load_index("index.bin", log)?;
//! ```

pub mod format;
mod graph;

use std::path::Path;
use std::sync::Arc;

use crate::distance::DataType;
use crate::error::Result;
use crate::graph::ProximityGraph;
use crate::index::VectorIndex;
use crate::log::LogContext;

use format::{AlgorithmType, Header};

/// Load a graph snapshot, picking the element type from its header.
pub fn load_index(path: impl AsRef<Path>, log: Arc<LogContext>) -> Result<VectorIndex> {
    let mut r = graph::open(path.as_ref())?;
    let header = Header::read(&mut r, AlgorithmType::Hnsw)?;
    let index = match header.data_type {
        DataType::Float32 => {
            VectorIndex::GraphF32(ProximityGraph::<f32>::read_body(&mut r, header, log)?)
        }
        DataType::Float64 => {
            VectorIndex::GraphF64(ProximityGraph::<f64>::read_body(&mut r, header, log)?)
        }
    };
    Ok(index)
}

//! tierann: a tiered proximity-graph index for approximate nearest neighbor search.
//!
//! Two storage tiers sit behind one index:
//!
//! ```text
//!   add(label, v) ──► StagingBuffer ──(Insert job)──► ProximityGraph
//!                        │ linear scan                 │ HNSW search
//!                        └──────────────┬──────────────┘
//!                                       ▼
//!                              merged QueryReply
//! ```
//!
//! - `graph/`: the multi-layer navigable graph (HNSW): insert, search,
//!   tombstone, repair, reclaim.
//! - `tiered/`: the coordinator. New vectors land in a flat staging buffer and
//!   are migrated into the graph by jobs handed to an external thread pool.
//!   Deletes tombstone graph nodes, repair their neighbors through jobs and
//!   finally reclaim the slot by relocating the last record into it.
//! - `persistence/`: a single versioned binary snapshot of a graph.
//! - `query`: resolution of raw `(name, value)` query directives.
//!
//! The crate never spawns threads. All background work is expressed as
//! [`tiered::Job`] values that the host executes on its own pool.
//!
//! # Critical Nuances
//!
//! ## Reads never wait for jobs
//!
//! A query issued right after `add` may find the vector still staged, already
//! in the graph, or (for a short window) in both. The merge step treats the
//! graph copy as authoritative, so the caller always sees the label once.
//!
//! ## Tombstones are navigable
//!
//! Deleted nodes keep their edges until repaired, and searches keep walking
//! through them. They are only filtered out of results. This keeps recall
//! stable while repairs are still queued.

pub mod config;
pub mod distance;
pub mod error;
pub mod graph;
pub mod heap;
pub mod index;
pub mod log;
pub mod persistence;
pub mod query;
pub mod results;
pub mod store;
pub mod tiered;

pub use distance::{DataType, Element, Metric};
pub use error::{FormatError, IndexError, ParamError, Result};
pub use graph::{GraphParams, ProximityGraph};
pub use index::{IndexKind, VectorIndex, VectorRef};
pub use log::{LogContext, LogLevel};
pub use query::{resolve_params, QueryConfig, QueryKind, RawParam, SearchMode};
pub use results::{QueryReply, QueryResult, ReplyIterator};
pub use tiered::{Job, JobKind, JobSubmitter, TieredIndex, TieredParams};

/// Caller-visible identifier of a vector.
pub type Label = u64;

/// Dense, reusable slot number of a vector inside one tier.
pub type InternalId = u32;

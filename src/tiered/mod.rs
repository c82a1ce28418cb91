//! Tiered index: a flat staging buffer in front of a proximity graph.
//!
//! # Architecture
//!
//! ```text
//!  add ──► StagingBuffer ──Insert job──► ProximityGraph
//!                                         │
//!  delete ─► tombstone ──Repair jobs──► in-neighbors
//!                 │
//!                 └──(all repairs done)──► ready ──GC pass──► reclaim slot
//! ```
//!
//! | Operation | Tier touched | Background work |
//! |-----------|--------------|-----------------|
//! | `add` (new label) | staging | one Insert job |
//! | `add` (staging full) | graph | none |
//! | `delete` (staged) | staging | none |
//! | `delete` (in graph) | graph | one Repair job per stale in-neighbor |
//! | `query` | both | none |
//!
//! Reclamation is not a job kind. Each tombstone gets a reclaim record in the
//! index's ledger; once `swap_job_threshold` records have no pending repairs,
//! the next repair job (or delete) that notices runs a GC pass that frees all
//! of them under the graph write lock.

mod coordinator;
mod jobs;
mod staging;

pub use coordinator::{TieredIndex, TieredParams, TieredStats};
pub use jobs::{Job, JobKind, JobSubmitter, TicketId};
pub use staging::StagingBuffer;

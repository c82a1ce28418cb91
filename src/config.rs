//! Default tuning constants.

/// Vectors per allocation block. Capacity grows and shrinks in these steps.
pub const DEFAULT_BLOCK_SIZE: usize = 1024;

/// Max out-degree on layers above 0. Layer 0 allows twice as many.
pub const HNSW_DEFAULT_M: usize = 16;

/// Beam width used while inserting.
pub const HNSW_DEFAULT_EF_CONSTRUCTION: usize = 200;

/// Beam width used at query time unless overridden by `ef_runtime`.
pub const HNSW_DEFAULT_EF_RUNTIME: usize = 10;

/// Hard cap on drawn levels, keeps a pathological RNG draw from allocating
/// hundreds of empty layers.
pub const HNSW_MAX_LEVEL: usize = 32;

/// Staged vectors allowed before `add` writes straight into the graph.
pub const DEFAULT_FLAT_BUFFER_LIMIT: usize = DEFAULT_BLOCK_SIZE;

/// Ready reclaim jobs that trigger a reclamation pass.
pub const DEFAULT_SWAP_JOB_THRESHOLD: usize = 1024;

/// Largest accepted vector dimension.
pub const HNSW_MAX_DIM: usize = 1 << 16;

/// Largest accepted `m`.
pub const HNSW_MAX_M: usize = 1 << 12;

/// Largest accepted construction and default query beam width. Per-query
/// overrides are not bounded; the search clamps its buffers to the graph.
pub const HNSW_MAX_EF: usize = 1 << 24;

/// Largest accepted allocation block.
pub const MAX_BLOCK_SIZE: usize = 1 << 20;

//! The tiered index: staging buffer in front of a proximity graph.
//!
//! # Locking
//!
//! Three locks, always taken in this order:
//!
//! 1. `graph` (`RwLock`): writers are insert/repair jobs, reclamation, and
//!    `add`/`delete` when they must touch the graph. `add` and `delete` first
//!    take the upgradable read so they serialize among themselves without
//!    blocking queries.
//! 2. `staging` (`RwLock`)
//! 3. `ledger` (`Mutex`): repair/reclaim bookkeeping.
//!
//! Queries take the staging read lock, release it, then take the graph read
//! lock. Jobs are only handed to the submitter after every lock is released.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock, RwLockUpgradableReadGuard};
use serde::{Deserialize, Serialize};

use crate::config::{DEFAULT_FLAT_BUFFER_LIMIT, DEFAULT_SWAP_JOB_THRESHOLD};
use crate::distance::{self, Element, Metric};
use crate::error::{IndexError, ParamError, Result};
use crate::graph::{GraphParams, ProximityGraph};
use crate::log::LogContext;
use crate::query::{self, QueryConfig, QueryKind, RawParam};
use crate::results::{QueryReply, QueryResult, ResultsContainer, UniqueResults};
use crate::Label;

use super::jobs::{Job, JobKind, JobLedger, JobSubmitter, JobTarget, ReclaimId, TicketId};
use super::staging::StagingBuffer;

/// Tiering knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TieredParams {
    /// Staged vectors allowed before `add` writes straight into the graph.
    pub flat_buffer_limit: usize,
    /// Ready reclaims that trigger a reclamation pass.
    pub swap_job_threshold: usize,
}

impl Default for TieredParams {
    fn default() -> Self {
        Self {
            flat_buffer_limit: DEFAULT_FLAT_BUFFER_LIMIT,
            swap_job_threshold: DEFAULT_SWAP_JOB_THRESHOLD,
        }
    }
}

/// Snapshot of the index's queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TieredStats {
    pub staged: usize,
    pub graph_labels: usize,
    pub graph_slots: usize,
    pub pending_inserts: usize,
    pub pending_repairs: usize,
    pub pending_reclaims: usize,
    pub ready_reclaims: usize,
    pub reclaimed: u64,
}

/// Two-tier index.
///
/// `add` stages vectors and queues an insert job; `delete` removes staged
/// vectors directly or tombstones graph nodes and queues their repairs.
/// Tombstones are reclaimed in batches once enough of them have all their
/// repairs done.
pub struct TieredIndex<T> {
    me: Weak<TieredIndex<T>>,
    graph: RwLock<ProximityGraph<T>>,
    staging: RwLock<StagingBuffer<T>>,
    ledger: Mutex<JobLedger>,
    params: TieredParams,
    metric: Metric,
    dim: usize,
    submitter: Arc<dyn JobSubmitter>,
    poisoned: AtomicBool,
    log: Arc<LogContext>,
}

impl<T: Element> TieredIndex<T> {
    pub fn new(
        graph_params: GraphParams,
        params: TieredParams,
        submitter: Arc<dyn JobSubmitter>,
        log: Arc<LogContext>,
    ) -> Result<Arc<Self>> {
        if params.swap_job_threshold == 0 {
            return Err(IndexError::InvalidParameter(
                "swap_job_threshold must be > 0".into(),
            ));
        }
        let metric = graph_params.metric;
        let dim = graph_params.dim;
        let graph = ProximityGraph::new(graph_params, Arc::clone(&log))?;
        Ok(Arc::new_cyclic(|me| Self {
            me: me.clone(),
            graph: RwLock::new(graph),
            staging: RwLock::new(StagingBuffer::new()),
            ledger: Mutex::new(JobLedger::default()),
            params,
            metric,
            dim,
            submitter,
            poisoned: AtomicBool::new(false),
            log,
        }))
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    #[inline]
    pub fn params(&self) -> &TieredParams {
        &self.params
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    /// Live labels across both tiers.
    pub fn len(&self) -> usize {
        let graph = self.graph.read();
        let staging = self.staging.read();
        graph.label_count() + staging.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn staged_len(&self) -> usize {
        self.staging.read().len()
    }

    pub fn graph_len(&self) -> usize {
        self.graph.read().label_count()
    }

    pub fn stats(&self) -> TieredStats {
        let graph = self.graph.read();
        let staging = self.staging.read();
        let ledger = self.ledger.lock();
        TieredStats {
            staged: staging.len(),
            graph_labels: graph.label_count(),
            graph_slots: graph.len(),
            pending_inserts: ledger.pending_inserts,
            pending_repairs: ledger.pending_repairs(),
            pending_reclaims: ledger.pending_reclaims(),
            ready_reclaims: ledger.ready_len(),
            reclaimed: ledger.reclaimed,
        }
    }

    /// Jobs handed out and not yet run or dropped.
    pub fn pending_jobs(&self) -> usize {
        let ledger = self.ledger.lock();
        ledger.pending_inserts + ledger.pending_repairs()
    }

    pub fn ready_reclaims(&self) -> usize {
        self.ledger.lock().ready_len()
    }

    /// Structural check of the graph tier.
    pub fn check_integrity(&self) -> Result<()> {
        self.graph.read().check_integrity()
    }

    fn check_poisoned(&self) -> Result<()> {
        if self.is_poisoned() {
            Err(IndexError::Poisoned)
        } else {
            Ok(())
        }
    }

    fn check_dim(&self, len: usize) -> Result<()> {
        if len == self.dim {
            Ok(())
        } else {
            Err(IndexError::DimensionMismatch {
                expected: self.dim,
                actual: len,
            })
        }
    }

    /// Poison the instance on fatal errors and pass the error on.
    fn guard<R>(&self, result: Result<R>) -> Result<R> {
        if let Err(e) = &result {
            if e.is_fatal() {
                self.poison(e);
            }
        }
        result
    }

    fn poison(&self, e: &IndexError) {
        if !self.poisoned.swap(true, Ordering::AcqRel) {
            self.log.warning(format_args!(
                "Tiered HNSW index is unusable after a fatal error: {e}"
            ));
        }
    }

    fn submit(&self, kinds: Vec<JobKind>) {
        if kinds.is_empty() {
            return;
        }
        let target: Weak<dyn JobTarget> = self.me.clone();
        let jobs = kinds
            .into_iter()
            .map(|kind| Job::new(kind, target.clone()))
            .collect();
        self.submitter.submit(jobs);
    }

    /// Add or overwrite `label`. Returns true if the label is new.
    pub fn add(&self, label: Label, payload: &[T]) -> Result<bool> {
        self.check_poisoned()?;
        self.check_dim(payload.len())?;
        let prepared = distance::prepare(self.metric, payload);
        let mut jobs = Vec::new();
        let result = self.add_locked(label, prepared, &mut jobs);
        let result = self.guard(result);
        self.submit(jobs);
        result
    }

    fn add_locked(&self, label: Label, prepared: Vec<T>, jobs: &mut Vec<JobKind>) -> Result<bool> {
        let graph = self.graph.upgradable_read();
        if graph.contains(label) {
            let mut graph = RwLockUpgradableReadGuard::upgrade(graph);
            self.delete_from_graph(&mut graph, label, jobs)?;
            let mut staging = self.staging.write();
            if staging.len() >= self.params.flat_buffer_limit {
                drop(staging);
                // The old vector is already gone; losing the new one too is fatal.
                if let Err(e) = graph.add_prepared(label, &prepared) {
                    self.poison(&e);
                    return Err(e);
                }
            } else {
                self.stage(&mut staging, label, prepared, jobs);
            }
            return Ok(false);
        }

        let mut staging = self.staging.write();
        if staging.contains(label) {
            self.stage(&mut staging, label, prepared, jobs);
            return Ok(false);
        }
        if staging.len() < self.params.flat_buffer_limit {
            self.stage(&mut staging, label, prepared, jobs);
            return Ok(true);
        }
        drop(staging);
        let mut graph = RwLockUpgradableReadGuard::upgrade(graph);
        graph.add_prepared(label, &prepared)?;
        Ok(true)
    }

    fn stage(
        &self,
        staging: &mut StagingBuffer<T>,
        label: Label,
        prepared: Vec<T>,
        jobs: &mut Vec<JobKind>,
    ) {
        let mut ledger = self.ledger.lock();
        let seq = ledger.next_seq();
        staging.insert(label, prepared, seq);
        ledger.pending_inserts += 1;
        jobs.push(JobKind::Insert { label, seq });
    }

    /// Delete `label` from whichever tier holds it. Returns false if neither
    /// does.
    pub fn delete(&self, label: Label) -> Result<bool> {
        self.check_poisoned()?;
        let mut jobs = Vec::new();
        let result = self.delete_locked(label, &mut jobs);
        let result = self.guard(result);
        self.submit(jobs);
        result
    }

    fn delete_locked(&self, label: Label, jobs: &mut Vec<JobKind>) -> Result<bool> {
        let graph = self.graph.upgradable_read();
        if self.staging.write().remove(label) {
            return Ok(true);
        }
        if !graph.contains(label) {
            return Ok(false);
        }
        let mut graph = RwLockUpgradableReadGuard::upgrade(graph);
        self.delete_from_graph(&mut graph, label, jobs)?;
        Ok(true)
    }

    /// Tombstone `label`, queue repairs of its in-neighbors and reclaim
    /// whatever became ready.
    fn delete_from_graph(
        &self,
        graph: &mut ProximityGraph<T>,
        label: Label,
        jobs: &mut Vec<JobKind>,
    ) -> Result<()> {
        let Some((node, targets)) = graph.mark_deleted(label) else {
            return Ok(());
        };
        let mut ledger = self.ledger.lock();
        let tickets = ledger.on_delete(node, targets.iter().map(|t| (t.node, t.level)));
        jobs.extend(tickets.into_iter().map(|ticket| JobKind::Repair { ticket }));
        self.maybe_reclaim(graph, &mut ledger)
    }

    fn maybe_reclaim(&self, graph: &mut ProximityGraph<T>, ledger: &mut JobLedger) -> Result<()> {
        if ledger.ready_len() >= self.params.swap_job_threshold {
            self.reclamation_pass(graph, ledger)?;
        }
        Ok(())
    }

    /// Reclaim every ready tombstone now, regardless of the threshold.
    /// Returns how many were reclaimed.
    pub fn run_reclamation_pass(&self) -> Result<usize> {
        self.check_poisoned()?;
        let mut graph = self.graph.write();
        let mut ledger = self.ledger.lock();
        let result = self.reclamation_pass(&mut graph, &mut ledger);
        self.guard(result)
    }

    fn reclamation_pass(&self, graph: &mut ProximityGraph<T>, ledger: &mut JobLedger) -> Result<usize> {
        let ready = ledger.drain_ready();
        let n = ready.len();
        if n == 0 {
            return Ok(0);
        }
        self.log.verbose(format_args!(
            "Tiered HNSW index GC: there are {n} ready swap jobs. Start executing {n} swap jobs"
        ));
        for record in ready {
            self.reclaim(graph, ledger, record)?;
        }
        self.log.verbose(format_args!(
            "Tiered HNSW index GC: done executing {n} swap jobs"
        ));
        Ok(n)
    }

    fn reclaim(
        &self,
        graph: &mut ProximityGraph<T>,
        ledger: &mut JobLedger,
        record: ReclaimId,
    ) -> Result<()> {
        let Some(node) = ledger.take_record(record) else {
            return Ok(());
        };
        if let Some(moved) = graph.reclaim(node)? {
            ledger.relocate(moved.from, moved.to);
        }
        ledger.reclaimed += 1;
        Ok(())
    }

    fn run_insert(&self, label: Label, seq: u64) -> Result<()> {
        let mut graph = self.graph.write();
        let payload = self
            .staging
            .read()
            .payload_if_seq(label, seq)
            .map(<[T]>::to_vec);
        let result = match payload {
            Some(payload) => graph.add_prepared(label, &payload).map(|_| {
                self.staging.write().remove_if_seq(label, seq);
            }),
            None => Ok(()),
        };
        let mut ledger = self.ledger.lock();
        ledger.pending_inserts = ledger.pending_inserts.saturating_sub(1);
        result
    }

    fn run_repair(&self, ticket: TicketId) -> Result<()> {
        let mut graph = self.graph.write();
        let mut ledger = self.ledger.lock();
        let Some(t) = ledger.take_ticket(ticket) else {
            return Ok(());
        };
        let result = match t.node {
            Some(node) => graph.repair(node, t.level),
            None => Ok(()),
        };
        ledger.complete(&t.waiting);
        result?;
        self.maybe_reclaim(&mut graph, &mut ledger)
    }

    /// `k` nearest live vectors across both tiers.
    ///
    /// If a label is caught mid-migration in both tiers, the graph's hit is
    /// kept. `config.ef_runtime`, when set, overrides the graph's beam width.
    pub fn query(&self, query: &[T], k: usize, config: Option<&QueryConfig>) -> Result<QueryReply> {
        self.check_poisoned()?;
        self.check_dim(query.len())?;
        let prepared = distance::prepare(self.metric, query);

        let staged = self.staging.read().search(self.metric, &prepared, k);
        let found = {
            let graph = self.graph.read();
            let ef = config
                .map(|c| c.ef_runtime)
                .filter(|&ef| ef > 0)
                .unwrap_or(graph.params().ef_runtime);
            self.guard(graph.search(query, k, ef))?
        };

        let mut merged = UniqueResults::with_capacity(staged.len() + found.len());
        for hit in staged.into_iter().chain(found) {
            merged.emplace(hit);
        }
        let mut results: Vec<QueryResult> = merged.into_results();
        results.sort_by(|a, b| a.score.total_cmp(&b.score).then(a.label.cmp(&b.label)));
        results.truncate(k);
        Ok(QueryReply::new(results))
    }

    /// Resolve raw query directives for this index.
    pub fn resolve_params(
        &self,
        params: &[RawParam<'_>],
        target: Option<&mut QueryConfig>,
        kind: QueryKind,
    ) -> std::result::Result<(), ParamError> {
        query::resolve_params(params, target, kind)
    }
}

impl<T: Element> JobTarget for TieredIndex<T> {
    fn execute_job(&self, kind: JobKind) {
        if self.is_poisoned() {
            self.log.warning(format_args!(
                "Tiered HNSW index: skipping {kind} job on unusable index"
            ));
            return;
        }
        let result = match kind {
            JobKind::Insert { label, seq } => self.run_insert(label, seq),
            JobKind::Repair { ticket } => self.run_repair(ticket),
        };
        if let Err(e) = self.guard(result) {
            self.log.warning(format_args!(
                "Tiered HNSW index: {kind} job failed and was dropped: {e}"
            ));
        }
    }

    fn abandon_job(&self, kind: JobKind) {
        self.log.warning(format_args!(
            "Tiered HNSW index: {kind} job was dropped before it ran"
        ));
        if self.is_poisoned() {
            return;
        }
        let result = match kind {
            // The vector stays staged and keeps answering queries.
            JobKind::Insert { .. } => {
                let mut ledger = self.ledger.lock();
                ledger.pending_inserts = ledger.pending_inserts.saturating_sub(1);
                Ok(())
            }
            // Release the reclaims waiting on it; reclaim scrubs the edges.
            JobKind::Repair { ticket } => {
                let mut graph = self.graph.write();
                let mut ledger = self.ledger.lock();
                match ledger.take_ticket(ticket) {
                    Some(t) => {
                        ledger.complete(&t.waiting);
                        self.maybe_reclaim(&mut graph, &mut ledger)
                    }
                    None => Ok(()),
                }
            }
        };
        if let Err(e) = self.guard(result) {
            self.log.warning(format_args!(
                "Tiered HNSW index: cleanup after dropped {kind} job failed: {e}"
            ));
        }
    }
}

impl<T> std::fmt::Debug for TieredIndex<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TieredIndex")
            .field("dim", &self.dim)
            .field("metric", &self.metric)
            .field("params", &self.params)
            .field("poisoned", &self.poisoned.load(Ordering::Relaxed))
            .finish()
    }
}

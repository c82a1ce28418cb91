//! Background job protocol.
//!
//! The index never runs its own threads. Maintenance work is packaged as
//! [`Job`] values and handed to a host supplied [`JobSubmitter`]; the host
//! runs them on whatever pool it owns by calling [`Job::execute`].
//!
//! A job owns its work item and holds only a weak handle to its index, so a
//! queue that outlives the index simply finds nothing to do. A job that is
//! dropped without being executed is reported back to the index, which logs
//! it and releases whatever the job was holding up.

use std::collections::HashMap;
use std::fmt;
use std::sync::Weak;

use smallvec::SmallVec;

use crate::{InternalId, Label};

pub type TicketId = u64;
pub type ReclaimId = u64;

/// What a job does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// Move the staged entry `label` into the graph if it is still staged by
    /// the job with sequence number `seq`.
    Insert { label: Label, seq: u64 },
    /// Rebuild the out-list of the node tracked by `ticket`. Tombstones are
    /// not jobs: they are freed in batches by the index once their repairs
    /// are done.
    Repair { ticket: TicketId },
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Insert { label, seq } => write!(f, "insert (label {label}, seq {seq})"),
            JobKind::Repair { ticket } => write!(f, "repair (ticket {ticket})"),
        }
    }
}

/// Receiver of job callbacks. Implemented by the tiered index.
pub(crate) trait JobTarget: Send + Sync {
    fn execute_job(&self, kind: JobKind);

    fn abandon_job(&self, kind: JobKind);
}

/// A unit of background work. Move-only; executing consumes it.
pub struct Job {
    kind: Option<JobKind>,
    target: Weak<dyn JobTarget>,
}

impl Job {
    pub(crate) fn new(kind: JobKind, target: Weak<dyn JobTarget>) -> Self {
        Self {
            kind: Some(kind),
            target,
        }
    }

    pub fn kind(&self) -> Option<JobKind> {
        self.kind
    }

    /// Run the job. Does nothing if its index is gone.
    pub fn execute(mut self) {
        if let Some(kind) = self.kind.take() {
            if let Some(target) = self.target.upgrade() {
                target.execute_job(kind);
            }
        }
    }
}

impl Drop for Job {
    fn drop(&mut self) {
        if let Some(kind) = self.kind.take() {
            if let Some(target) = self.target.upgrade() {
                target.abandon_job(kind);
            }
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job").field("kind", &self.kind).finish()
    }
}

/// Host side of the job protocol.
///
/// Jobs are handed over in batches. The submitter must not call back into the
/// index synchronously from `submit` while holding locks of its own that the
/// index's callers might hold.
pub trait JobSubmitter: Send + Sync {
    fn submit(&self, jobs: Vec<Job>);
}

impl<F> JobSubmitter for F
where
    F: Fn(Vec<Job>) + Send + Sync,
{
    fn submit(&self, jobs: Vec<Job>) {
        self(jobs)
    }
}

/// Pending repair of one `(node, level)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RepairTicket {
    /// `None` once the node itself was deleted.
    pub(crate) node: Option<InternalId>,
    pub(crate) level: usize,
    /// Reclaims blocked on this repair.
    pub(crate) waiting: Vec<ReclaimId>,
}

/// Reclaim (swap) job: a tombstone waiting for its in-neighbors to be
/// repaired. Held by the ledger and run by the index's reclamation pass,
/// never handed to the submitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ReclaimRecord {
    pub(crate) node: InternalId,
    pub(crate) pending_repairs: usize,
}

/// Bookkeeping that orders repairs before reclaims.
///
/// Lives behind the index's ledger mutex, which is always taken after the
/// graph lock.
#[derive(Debug, Default)]
pub(crate) struct JobLedger {
    next_seq: u64,
    next_ticket: TicketId,
    next_record: ReclaimId,
    repairs: HashMap<TicketId, RepairTicket>,
    /// Queued `(level, ticket)` pairs per node.
    repair_index: HashMap<InternalId, SmallVec<[(usize, TicketId); 2]>>,
    reclaims: HashMap<ReclaimId, ReclaimRecord>,
    reclaim_by_node: HashMap<InternalId, ReclaimId>,
    ready: Vec<ReclaimId>,
    pub(crate) pending_inserts: usize,
    pub(crate) reclaimed: u64,
}

impl JobLedger {
    pub(crate) fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    pub(crate) fn pending_repairs(&self) -> usize {
        self.repairs.len()
    }

    pub(crate) fn pending_reclaims(&self) -> usize {
        self.reclaims.len()
    }

    pub(crate) fn ready_len(&self) -> usize {
        self.ready.len()
    }

    fn ticket_for(&self, node: InternalId, level: usize) -> Option<TicketId> {
        self.repair_index
            .get(&node)?
            .iter()
            .find(|(l, _)| *l == level)
            .map(|&(_, ticket)| ticket)
    }

    fn unindex(&mut self, node: InternalId, level: usize, ticket: TicketId) {
        if let Some(list) = self.repair_index.get_mut(&node) {
            list.retain(|entry| *entry != (level, ticket));
            if list.is_empty() {
                self.repair_index.remove(&node);
            }
        }
    }

    /// Register the tombstoning of `node` whose live in-neighbors are
    /// `targets`. Returns the tickets that need a new repair job; targets
    /// that already have a queued ticket just join it.
    pub(crate) fn on_delete(
        &mut self,
        node: InternalId,
        targets: impl IntoIterator<Item = (InternalId, usize)>,
    ) -> Vec<TicketId> {
        // Repairs of the deleted node itself are moot now.
        if let Some(stale) = self.repair_index.remove(&node) {
            for (_, ticket) in stale {
                if let Some(t) = self.repairs.get_mut(&ticket) {
                    t.node = None;
                }
            }
        }

        self.next_record += 1;
        let record = self.next_record;
        let mut pending_repairs = 0;
        let mut fresh = Vec::new();
        for (target, level) in targets {
            pending_repairs += 1;
            match self.ticket_for(target, level) {
                Some(ticket) => {
                    if let Some(t) = self.repairs.get_mut(&ticket) {
                        t.waiting.push(record);
                    }
                }
                None => {
                    self.next_ticket += 1;
                    let ticket = self.next_ticket;
                    self.repairs.insert(
                        ticket,
                        RepairTicket {
                            node: Some(target),
                            level,
                            waiting: vec![record],
                        },
                    );
                    self.repair_index
                        .entry(target)
                        .or_default()
                        .push((level, ticket));
                    fresh.push(ticket);
                }
            }
        }

        self.reclaims.insert(
            record,
            ReclaimRecord {
                node,
                pending_repairs,
            },
        );
        self.reclaim_by_node.insert(node, record);
        if pending_repairs == 0 {
            self.ready.push(record);
        }
        fresh
    }

    /// Claim a ticket for execution. Later deletes open a new ticket.
    pub(crate) fn take_ticket(&mut self, ticket: TicketId) -> Option<RepairTicket> {
        let t = self.repairs.remove(&ticket)?;
        if let Some(node) = t.node {
            self.unindex(node, t.level, ticket);
        }
        Some(t)
    }

    /// Count one finished repair against each waiting record.
    pub(crate) fn complete(&mut self, waiting: &[ReclaimId]) {
        for record in waiting {
            if let Some(r) = self.reclaims.get_mut(record) {
                r.pending_repairs = r.pending_repairs.saturating_sub(1);
                if r.pending_repairs == 0 {
                    self.ready.push(*record);
                }
            }
        }
    }

    pub(crate) fn drain_ready(&mut self) -> Vec<ReclaimId> {
        std::mem::take(&mut self.ready)
    }

    /// Remove a record, returning the slot it tracks.
    pub(crate) fn take_record(&mut self, record: ReclaimId) -> Option<InternalId> {
        let r = self.reclaims.remove(&record)?;
        self.ready.retain(|&id| id != record);
        if self.reclaim_by_node.get(&r.node) == Some(&record) {
            self.reclaim_by_node.remove(&r.node);
        }
        Some(r.node)
    }

    /// Follow a record moved from slot `from` to slot `to`.
    pub(crate) fn relocate(&mut self, from: InternalId, to: InternalId) {
        if let Some(moved) = self.repair_index.remove(&from) {
            for &(_, ticket) in &moved {
                if let Some(t) = self.repairs.get_mut(&ticket) {
                    t.node = Some(to);
                }
            }
            self.repair_index.entry(to).or_default().extend(moved);
        }
        if let Some(record) = self.reclaim_by_node.remove(&from) {
            if let Some(r) = self.reclaims.get_mut(&record) {
                r.node = to;
            }
            self.reclaim_by_node.insert(to, record);
        }
    }
}

//! Flat staging tier.
//!
//! Holds vectors that were added but not yet migrated into the graph. Every
//! entry carries the sequence number of the insert job that will migrate it,
//! so a job whose entry was overwritten or deleted in the meantime can tell
//! and do nothing.

use std::collections::HashMap;

use crate::distance::{Element, Metric};
use crate::results::QueryResult;
use crate::{InternalId, Label};

#[derive(Debug, Clone)]
struct StagedEntry<T> {
    label: Label,
    seq: u64,
    payload: Vec<T>,
}

/// Append-mostly buffer answering queries by linear scan.
#[derive(Debug, Clone)]
pub struct StagingBuffer<T> {
    entries: Vec<StagedEntry<T>>,
    positions: HashMap<Label, usize>,
}

impl<T> Default for StagingBuffer<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            positions: HashMap::new(),
        }
    }
}

impl<T: Element> StagingBuffer<T> {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn contains(&self, label: Label) -> bool {
        self.positions.contains_key(&label)
    }

    /// Stage `payload` under `label`. Returns the sequence number it
    /// replaced, if the label was already staged.
    pub fn insert(&mut self, label: Label, payload: Vec<T>, seq: u64) -> Option<u64> {
        match self.positions.get(&label) {
            Some(&pos) => {
                let entry = &mut self.entries[pos];
                let old = entry.seq;
                entry.seq = seq;
                entry.payload = payload;
                Some(old)
            }
            None => {
                self.positions.insert(label, self.entries.len());
                self.entries.push(StagedEntry {
                    label,
                    seq,
                    payload,
                });
                None
            }
        }
    }

    /// Drop `label`. Returns false if it was not staged.
    pub fn remove(&mut self, label: Label) -> bool {
        let Some(pos) = self.positions.remove(&label) else {
            return false;
        };
        self.entries.swap_remove(pos);
        if let Some(moved) = self.entries.get(pos) {
            self.positions.insert(moved.label, pos);
        }
        true
    }

    /// Drop `label` only if it is still staged by job `seq`.
    pub fn remove_if_seq(&mut self, label: Label, seq: u64) -> bool {
        if self.seq_of(label) == Some(seq) {
            self.remove(label)
        } else {
            false
        }
    }

    pub fn seq_of(&self, label: Label) -> Option<u64> {
        self.positions.get(&label).map(|&pos| self.entries[pos].seq)
    }

    /// Payload staged by job `seq`, if that job's entry is still current.
    pub fn payload_if_seq(&self, label: Label, seq: u64) -> Option<&[T]> {
        let entry = &self.entries[*self.positions.get(&label)?];
        (entry.seq == seq).then_some(entry.payload.as_slice())
    }

    /// Exact `k` nearest entries, closest first. `query` must already be
    /// normalized for `metric`. Result ids are staging positions.
    pub fn search(&self, metric: Metric, query: &[T], k: usize) -> Vec<QueryResult> {
        let mut results: Vec<QueryResult> = self
            .entries
            .iter()
            .enumerate()
            .map(|(pos, entry)| QueryResult {
                id: pos as InternalId,
                label: entry.label,
                score: metric.distance(query, &entry.payload),
            })
            .collect();
        results.sort_by(|a, b| a.score.total_cmp(&b.score).then(a.label.cmp(&b.label)));
        results.truncate(k);
        results
    }
}

//! Query results: accumulation containers and the reply handed to callers.

use std::collections::HashMap;
use std::sync::Arc;

use crate::{InternalId, Label};

/// One scored hit. Lower `score` is closer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QueryResult {
    pub id: InternalId,
    pub label: Label,
    pub score: f64,
}

/// Accumulates results before they are materialized into a reply.
pub trait ResultsContainer {
    fn emplace(&mut self, result: QueryResult);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hand the buffer over. Consumes the container.
    fn into_results(self) -> Vec<QueryResult>;
}

/// Keeps every entry, duplicates included.
#[derive(Debug, Default, Clone)]
pub struct DefaultResults {
    results: Vec<QueryResult>,
}

impl DefaultResults {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            results: Vec::with_capacity(capacity),
        }
    }
}

impl ResultsContainer for DefaultResults {
    fn emplace(&mut self, result: QueryResult) {
        self.results.push(result);
    }

    fn len(&self) -> usize {
        self.results.len()
    }

    fn into_results(self) -> Vec<QueryResult> {
        self.results
    }
}

/// Keeps one entry per label: the most recently inserted one.
///
/// Deduplicates by label rather than internal id, since the two tiers number
/// their slots independently.
#[derive(Debug, Default, Clone)]
pub struct UniqueResults {
    results: Vec<QueryResult>,
    by_label: HashMap<Label, usize>,
}

impl UniqueResults {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            results: Vec::with_capacity(capacity),
            by_label: HashMap::with_capacity(capacity),
        }
    }
}

impl ResultsContainer for UniqueResults {
    fn emplace(&mut self, result: QueryResult) {
        match self.by_label.get(&result.label) {
            Some(&slot) => self.results[slot] = result,
            None => {
                self.by_label.insert(result.label, self.results.len());
                self.results.push(result);
            }
        }
    }

    fn len(&self) -> usize {
        self.results.len()
    }

    fn into_results(self) -> Vec<QueryResult> {
        self.results
    }
}

/// Ordered results of one query.
///
/// Iterators share the underlying buffer, so a reply and its iterators can be
/// dropped in any order.
#[derive(Debug, Clone, Default)]
pub struct QueryReply {
    results: Arc<Vec<QueryResult>>,
}

impl QueryReply {
    pub fn new(results: Vec<QueryResult>) -> Self {
        Self {
            results: Arc::new(results),
        }
    }

    pub fn from_container<C: ResultsContainer>(container: C) -> Self {
        Self::new(container.into_results())
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    pub fn as_slice(&self) -> &[QueryResult] {
        &self.results
    }

    pub fn get(&self, pos: usize) -> Option<&QueryResult> {
        self.results.get(pos)
    }

    pub fn labels(&self) -> Vec<Label> {
        self.results.iter().map(|r| r.label).collect()
    }

    pub fn iter(&self) -> ReplyIterator {
        ReplyIterator {
            results: Arc::clone(&self.results),
            pos: 0,
        }
    }

    /// Sort by label, then score.
    pub fn sort_by_id(&mut self) {
        Arc::make_mut(&mut self.results)
            .sort_by(|a, b| a.label.cmp(&b.label).then(a.score.total_cmp(&b.score)));
    }

    /// Sort by score, then label.
    pub fn sort_by_score(&mut self) {
        Arc::make_mut(&mut self.results)
            .sort_by(|a, b| a.score.total_cmp(&b.score).then(a.label.cmp(&b.label)));
    }
}

/// Restartable forward iterator over a [`QueryReply`].
#[derive(Debug, Clone)]
pub struct ReplyIterator {
    results: Arc<Vec<QueryResult>>,
    pos: usize,
}

impl ReplyIterator {
    pub fn has_next(&self) -> bool {
        self.pos < self.results.len()
    }

    /// Rewind to the first result.
    pub fn reset(&mut self) {
        self.pos = 0;
    }

    pub fn position(&self) -> usize {
        self.pos
    }
}

impl Iterator for ReplyIterator {
    type Item = QueryResult;

    fn next(&mut self) -> Option<QueryResult> {
        let item = self.results.get(self.pos).copied()?;
        self.pos += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let rest = self.results.len() - self.pos;
        (rest, Some(rest))
    }
}

impl ExactSizeIterator for ReplyIterator {}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(id: InternalId, label: Label, score: f64) -> QueryResult {
        QueryResult { id, label, score }
    }

    #[test]
    fn default_container_keeps_duplicates() {
        let mut c = DefaultResults::default();
        c.emplace(hit(0, 1, 0.5));
        c.emplace(hit(0, 1, 0.2));
        c.emplace(hit(3, 2, 0.1));
        assert_eq!(c.len(), 3);
        let results = c.into_results();
        assert_eq!(results[1].score, 0.2);
    }

    #[test]
    fn unique_container_keeps_last_score() {
        let mut c = UniqueResults::default();
        c.emplace(hit(0, 1, 0.5));
        c.emplace(hit(1, 2, 0.3));
        c.emplace(hit(7, 1, 0.9));
        assert_eq!(c.len(), 2);
        let results = c.into_results();
        assert_eq!(results[0], hit(7, 1, 0.9));
        assert_eq!(results[1], hit(1, 2, 0.3));
    }

    #[test]
    fn iterator_outlives_reply() {
        let reply = QueryReply::new(vec![hit(0, 10, 0.0), hit(1, 11, 1.0)]);
        let mut it = reply.iter();
        drop(reply);

        assert!(it.has_next());
        assert_eq!(it.next().map(|r| r.label), Some(10));
        assert_eq!(it.next().map(|r| r.label), Some(11));
        assert!(!it.has_next());
        assert_eq!(it.next(), None);
    }

    #[test]
    fn reply_outlives_iterator() {
        let reply = QueryReply::new(vec![hit(0, 10, 0.0)]);
        drop(reply.iter());
        assert_eq!(reply.len(), 1);
    }

    #[test]
    fn reset_rewinds_without_reallocating() {
        let reply = QueryReply::new(vec![hit(0, 10, 0.0), hit(1, 11, 1.0)]);
        let mut it = reply.iter();
        let before = Arc::as_ptr(&it.results);
        assert_eq!(it.by_ref().count(), 2);

        it.reset();
        assert_eq!(it.position(), 0);
        assert_eq!(Arc::as_ptr(&it.results), before);
        assert_eq!(it.count(), 2);
    }

    #[test]
    fn sort_helpers() {
        let mut reply = QueryReply::new(vec![hit(0, 3, 0.1), hit(1, 1, 0.9), hit(2, 2, 0.1)]);
        reply.sort_by_id();
        assert_eq!(reply.labels(), vec![1, 2, 3]);
        reply.sort_by_score();
        assert_eq!(reply.labels(), vec![2, 3, 1]);
    }

    #[test]
    fn sorting_does_not_disturb_live_iterators() {
        let mut reply = QueryReply::new(vec![hit(0, 2, 0.0), hit(1, 1, 0.0)]);
        let it = reply.iter();
        reply.sort_by_id();
        assert_eq!(it.map(|r| r.label).collect::<Vec<_>>(), vec![2, 1]);
        assert_eq!(reply.labels(), vec![1, 2]);
    }
}

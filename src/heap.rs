//! Max-heap with insert-or-update semantics.
//!
//! Search keeps its running result set here: the top is the worst result, and
//! re-reaching a node through another path only updates its priority instead
//! of adding a second entry.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;

/// Totally ordered priority, so float keys can live in ordered collections.
pub trait Priority: Copy + PartialEq {
    fn total_cmp(&self, other: &Self) -> Ordering;
}

impl Priority for f32 {
    #[inline]
    fn total_cmp(&self, other: &Self) -> Ordering {
        f32::total_cmp(self, other)
    }
}

impl Priority for f64 {
    #[inline]
    fn total_cmp(&self, other: &Self) -> Ordering {
        f64::total_cmp(self, other)
    }
}

macro_rules! int_priority {
    ($($t:ty),*) => {$(
        impl Priority for $t {
            #[inline]
            fn total_cmp(&self, other: &Self) -> Ordering {
                self.cmp(other)
            }
        }
    )*};
}

int_priority!(i32, i64, u32, u64, usize);

#[derive(Clone, Copy, Debug)]
struct Key<P>(P);

impl<P: Priority> PartialEq for Key<P> {
    fn eq(&self, other: &Self) -> bool {
        self.0.total_cmp(&other.0) == Ordering::Equal
    }
}

impl<P: Priority> Eq for Key<P> {}

impl<P: Priority> PartialOrd for Key<P> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<P: Priority> Ord for Key<P> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Max-heap keyed by `(priority, value)`. Each value appears at most once.
///
/// Ties on priority go to the larger value.
#[derive(Clone, Debug)]
pub struct UpdatableMaxHeap<P, V> {
    ordered: BTreeSet<(Key<P>, V)>,
    priorities: HashMap<V, P>,
}

impl<P: Priority, V: Ord + Hash + Copy> Default for UpdatableMaxHeap<P, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Priority, V: Ord + Hash + Copy> UpdatableMaxHeap<P, V> {
    pub fn new() -> Self {
        Self {
            ordered: BTreeSet::new(),
            priorities: HashMap::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ordered: BTreeSet::new(),
            priorities: HashMap::with_capacity(capacity),
        }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.priorities.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.size()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.priorities.is_empty()
    }

    /// Insert `value`, or move it to `priority` if already present.
    pub fn emplace(&mut self, priority: P, value: V) {
        if let Some(old) = self.priorities.insert(value, priority) {
            self.ordered.remove(&(Key(old), value));
        }
        self.ordered.insert((Key(priority), value));
    }

    pub fn top(&self) -> Option<(P, V)> {
        self.ordered.last().map(|(k, v)| (k.0, *v))
    }

    pub fn pop(&mut self) -> Option<(P, V)> {
        let (key, value) = self.ordered.pop_last()?;
        self.priorities.remove(&value);
        Some((key.0, value))
    }

    pub fn contains(&self, value: &V) -> bool {
        self.priorities.contains_key(value)
    }

    pub fn priority_of(&self, value: &V) -> Option<P> {
        self.priorities.get(value).copied()
    }

    /// Drain in ascending priority order.
    pub fn into_sorted_vec(self) -> Vec<(P, V)> {
        self.ordered.into_iter().map(|(k, v)| (k.0, v)).collect()
    }
}

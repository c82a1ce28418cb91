//! Dense vector storage with reusable slots.
//!
//! Payloads live in one contiguous arena (`len * dim` elements, AoS) next to
//! per-slot labels and liveness flags. Slot ids are dense: the only way to free
//! one is [`VectorStore::swap_remove`], which moves the last record into the
//! hole. Capacity moves in whole blocks and every change is reported back to
//! the caller as a [`CapacityChange`] so the owner can log it under its own
//! name.

use crate::distance::Element;
use crate::error::{IndexError, Result};
use crate::{InternalId, Label};

const FLAG_DELETED: u8 = 0b0000_0001;

/// Capacity transition caused by an add or a removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityChange {
    pub old: usize,
    pub new: usize,
}

/// Outcome of freeing a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapRemoved {
    /// Slot whose record was moved into the freed slot, if any.
    pub moved_from: Option<InternalId>,
    pub capacity: Option<CapacityChange>,
}

#[derive(Debug, Clone)]
pub struct VectorStore<T> {
    dim: usize,
    block_size: usize,
    capacity: usize,
    data: Vec<T>,
    labels: Vec<Label>,
    flags: Vec<u8>,
}

impl<T: Element> VectorStore<T> {
    /// `initial_capacity` is rounded up to a whole number of blocks.
    pub fn new(dim: usize, block_size: usize, initial_capacity: usize) -> Result<Self> {
        let block_size = block_size.max(1);
        let mut store = Self {
            dim,
            block_size,
            capacity: 0,
            data: Vec::new(),
            labels: Vec::new(),
            flags: Vec::new(),
        };
        let capacity = initial_capacity
            .div_ceil(block_size)
            .checked_mul(block_size)
            .ok_or(IndexError::CapacityOverflow {
                capacity: initial_capacity,
                dim,
            })?;
        if capacity > 0 {
            store.resize(capacity)?;
        }
        Ok(store)
    }

    #[inline]
    pub fn dim(&self) -> usize {
        self.dim
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Append a record. The payload must already have `dim` elements.
    ///
    /// Fails without touching the store if the next block cannot be
    /// allocated.
    pub fn add(&mut self, label: Label, payload: &[T]) -> Result<(InternalId, Option<CapacityChange>)> {
        debug_assert_eq!(payload.len(), self.dim);
        let change = self.grow_if_full()?;
        let id = self.labels.len() as InternalId;
        self.data.extend_from_slice(payload);
        self.labels.push(label);
        self.flags.push(0);
        Ok((id, change))
    }

    fn grow_if_full(&mut self) -> Result<Option<CapacityChange>> {
        if self.len() < self.capacity {
            return Ok(None);
        }
        let wanted = self
            .capacity
            .checked_add(self.block_size)
            .ok_or(IndexError::CapacityOverflow {
                capacity: self.capacity,
                dim: self.dim,
            })?;
        self.resize(wanted).map(Some)
    }

    /// Mark a slot deleted. Returns false if it already was.
    pub fn remove(&mut self, id: InternalId) -> bool {
        let flags = &mut self.flags[id as usize];
        let was_live = *flags & FLAG_DELETED == 0;
        *flags |= FLAG_DELETED;
        was_live
    }

    /// Payload of a slot.
    ///
    /// The view stays valid until the next `swap_remove`, which may move or
    /// drop the slot.
    #[inline]
    pub fn get(&self, id: InternalId) -> &[T] {
        let start = id as usize * self.dim;
        &self.data[start..start + self.dim]
    }

    #[inline]
    pub fn label(&self, id: InternalId) -> Label {
        self.labels[id as usize]
    }

    #[inline]
    pub fn is_deleted(&self, id: InternalId) -> bool {
        self.flags[id as usize] & FLAG_DELETED != 0
    }

    /// Free `id`, moving the last record into it when `id` is not last.
    pub fn swap_remove(&mut self, id: InternalId) -> SwapRemoved {
        let idx = id as usize;
        let last = self.len() - 1;
        let moved_from = if idx != last {
            let (head, tail) = self.data.split_at_mut(last * self.dim);
            head[idx * self.dim..(idx + 1) * self.dim].copy_from_slice(&tail[..self.dim]);
            self.labels[idx] = self.labels[last];
            self.flags[idx] = self.flags[last];
            Some(last as InternalId)
        } else {
            None
        };
        self.data.truncate(last * self.dim);
        self.labels.truncate(last);
        self.flags.truncate(last);

        let wanted = self.len().div_ceil(self.block_size) * self.block_size;
        let capacity = if wanted < self.capacity {
            Some(self.shrink(wanted))
        } else {
            None
        };
        SwapRemoved {
            moved_from,
            capacity,
        }
    }

    /// Reserve room for `new_capacity` slots. Sizes come from callers and
    /// snapshots, so overflow and allocation failure are errors.
    fn resize(&mut self, new_capacity: usize) -> Result<CapacityChange> {
        let dim = self.dim;
        let overflow = || IndexError::CapacityOverflow {
            capacity: new_capacity,
            dim,
        };
        let extra = new_capacity.saturating_sub(self.len());
        let elements = extra.checked_mul(dim).ok_or_else(overflow)?;
        self.data.try_reserve_exact(elements).map_err(|_| overflow())?;
        self.labels.try_reserve_exact(extra).map_err(|_| overflow())?;
        self.flags.try_reserve_exact(extra).map_err(|_| overflow())?;
        let old = self.capacity;
        self.capacity = new_capacity;
        Ok(CapacityChange {
            old,
            new: new_capacity,
        })
    }

    fn shrink(&mut self, new_capacity: usize) -> CapacityChange {
        self.data.shrink_to(new_capacity * self.dim);
        self.labels.shrink_to(new_capacity);
        self.flags.shrink_to(new_capacity);
        let old = self.capacity;
        self.capacity = new_capacity;
        CapacityChange {
            old,
            new: new_capacity,
        }
    }

    /// Restore a record verbatim, used when loading a snapshot.
    pub(crate) fn push_raw(&mut self, label: Label, deleted: bool, payload: Vec<T>) -> Result<()> {
        self.grow_if_full()?;
        self.data.extend(payload);
        self.labels.push(label);
        self.flags.push(if deleted { FLAG_DELETED } else { 0 });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grows_in_blocks() {
        let mut store = VectorStore::<f32>::new(2, 4, 0).unwrap();
        assert_eq!(store.capacity(), 0);

        let (id, change) = store.add(10, &[1.0, 2.0]).unwrap();
        assert_eq!(id, 0);
        assert_eq!(change, Some(CapacityChange { old: 0, new: 4 }));

        for i in 1..4 {
            let (_, change) = store.add(10 + i, &[i as f32, 0.0]).unwrap();
            assert!(change.is_none());
        }
        let (_, change) = store.add(99, &[0.0, 0.0]).unwrap();
        assert_eq!(change, Some(CapacityChange { old: 4, new: 8 }));
    }

    #[test]
    fn initial_capacity_rounds_up() {
        let store = VectorStore::<f64>::new(3, 10, 11).unwrap();
        assert_eq!(store.capacity(), 20);
    }

    #[test]
    fn remove_is_a_tombstone() {
        let mut store = VectorStore::<f32>::new(1, 4, 0).unwrap();
        let (id, _) = store.add(7, &[1.0]).unwrap();
        assert!(store.remove(id));
        assert!(!store.remove(id));
        assert!(store.is_deleted(id));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(id), &[1.0]);
    }

    #[test]
    fn swap_remove_moves_last_record() {
        let mut store = VectorStore::<f32>::new(2, 4, 0).unwrap();
        store.add(100, &[0.0, 0.0]).unwrap();
        store.add(101, &[1.0, 1.0]).unwrap();
        store.add(102, &[2.0, 2.0]).unwrap();

        let removed = store.swap_remove(0);
        assert_eq!(removed.moved_from, Some(2));
        assert_eq!(store.len(), 2);
        assert_eq!(store.label(0), 102);
        assert_eq!(store.get(0), &[2.0, 2.0]);
        assert_eq!(store.get(1), &[1.0, 1.0]);
    }

    #[test]
    fn swap_remove_of_last_shrinks() {
        let mut store = VectorStore::<f32>::new(1, 4, 0).unwrap();
        store.add(1, &[1.0]).unwrap();

        let removed = store.swap_remove(0);
        assert_eq!(removed.moved_from, None);
        assert_eq!(removed.capacity, Some(CapacityChange { old: 4, new: 0 }));
        assert!(store.is_empty());
    }

    #[test]
    fn shrinks_only_when_a_whole_block_is_free() {
        let mut store = VectorStore::<f32>::new(1, 2, 0).unwrap();
        for i in 0..3 {
            store.add(i, &[i as f32]).unwrap();
        }
        assert_eq!(store.capacity(), 4);

        assert_eq!(store.swap_remove(2).capacity, Some(CapacityChange { old: 4, new: 2 }));
        assert_eq!(store.swap_remove(1).capacity, None);
    }

    #[test]
    fn oversized_blocks_fail_instead_of_panicking() {
        let mut store = VectorStore::<f32>::new(1 << 20, 1 << 62, 0).unwrap();
        assert!(matches!(
            store.add(1, &vec![0.0; 1 << 20]),
            Err(IndexError::CapacityOverflow { .. })
        ));
        assert!(store.is_empty());
        assert_eq!(store.capacity(), 0);

        assert!(matches!(
            VectorStore::<f32>::new(4, usize::MAX, usize::MAX),
            Err(IndexError::CapacityOverflow { .. })
        ));
    }
}

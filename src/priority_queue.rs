use std::collections::HashMap;
use std::mem::size_of;

use ahash::RandomState;

use crate::error::{Result, SketchError};
use crate::record::{Count, Key, Record, Slot};

/// Bounded min-heap of `{key, count}` with a key -> heap position index.
///
/// The root always holds the smallest tracked count, so admission of a new
/// key only has to compare against `heap[0]`.
pub(crate) struct KeyHeap {
    index: HashMap<Key, usize, RandomState>,
    heap: Vec<Slot>,
    capacity: usize,
}

impl KeyHeap {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            index: HashMap::with_capacity_and_hasher(capacity, RandomState::new()),
            heap: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Sizes the heap to hold as many slots as fit into `memory` bytes.
    pub(crate) fn from_memory(structure: &'static str, memory: usize) -> Result<Self> {
        let capacity = memory / size_of::<Slot>();
        if capacity == 0 {
            return Err(SketchError::config(
                structure,
                format!("{} bytes cannot hold a single heap entry", memory),
            ));
        }
        Ok(Self::with_capacity(capacity))
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn contains(&self, key: Key) -> bool {
        self.index.contains_key(&key)
    }

    pub(crate) fn query(&self, key: Key) -> Count {
        self.index
            .get(&key)
            .map(|&pos| self.heap[pos].count)
            .unwrap_or(0)
    }

    #[cfg(test)]
    pub(crate) fn min_count(&self) -> Count {
        self.heap.first().map(|slot| slot.count).unwrap_or(0)
    }

    /// Adds `count` to a tracked key, admits a new key while there is room,
    /// or replaces the minimum when `count` beats it. New keys need a
    /// positive count.
    pub(crate) fn insert_or_bump(&mut self, key: Key, count: Count) {
        if let Some(&pos) = self.index.get(&key) {
            self.heap[pos].count += count;
            self.sift_down(pos);
            self.sift_up(pos);
            return;
        }
        if count <= 0 {
            return;
        }

        if self.heap.len() < self.capacity {
            let pos = self.heap.len();
            self.heap.push(Slot::new(key, count));
            self.index.insert(key, pos);
            self.sift_up(pos);
            return;
        }

        if let Some(&root) = self.heap.first() {
            if count > root.count {
                self.index.remove(&root.key);
                self.heap[0] = Slot::new(key, count);
                self.index.insert(key, 0);
                self.sift_down(0);
            }
        }
    }

    /// Tracked entries, highest count first.
    pub(crate) fn records(&self) -> Vec<Record> {
        let mut records: Vec<_> = self
            .heap
            .iter()
            .map(|slot| Record::new(slot.key, slot.count))
            .collect();
        records.sort_unstable();
        records
    }

    fn parent(i: usize) -> usize { (i - 1) >> 1 }
    fn left(i: usize) -> usize { 2 * i + 1 }
    fn right(i: usize) -> usize { 2 * i + 2 }

    fn sift_up(&mut self, mut pos: usize) {
        while pos > 0 {
            let parent = Self::parent(pos);
            if self.heap[parent].count > self.heap[pos].count {
                self.swap_nodes(parent, pos);
                pos = parent;
            } else {
                break;
            }
        }
    }

    fn sift_down(&mut self, mut pos: usize) {
        loop {
            let mut smallest = pos;
            let left = Self::left(pos);
            let right = Self::right(pos);

            if left < self.heap.len() && self.heap[left].count < self.heap[smallest].count {
                smallest = left;
            }
            if right < self.heap.len() && self.heap[right].count < self.heap[smallest].count {
                smallest = right;
            }

            if smallest == pos {
                break;
            }

            self.swap_nodes(pos, smallest);
            pos = smallest;
        }
    }

    fn swap_nodes(&mut self, i: usize, j: usize) {
        self.heap.swap(i, j);
        let key_i = self.heap[i].key;
        let key_j = self.heap[j].key;
        if let Some(pos) = self.index.get_mut(&key_i) {
            *pos = i;
        }
        if let Some(pos) = self.index.get_mut(&key_j) {
            *pos = j;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    fn assert_consistent(heap: &KeyHeap) {
        assert_eq!(heap.index.len(), heap.heap.len());
        for (pos, slot) in heap.heap.iter().enumerate() {
            assert_eq!(heap.index.get(&slot.key), Some(&pos));
            if pos > 0 {
                let parent = KeyHeap::parent(pos);
                assert!(heap.heap[parent].count <= slot.count);
            }
        }
        if let Some(min) = heap.heap.iter().map(|s| s.count).min() {
            assert_eq!(heap.min_count(), min);
        }
    }

    #[test]
    fn test_basic_insertion() {
        let mut heap = KeyHeap::with_capacity(2);
        heap.insert_or_bump(1, 1);
        heap.insert_or_bump(2, 2);
        assert_eq!(heap.records(), vec![Record::new(2, 2), Record::new(1, 1)]);
        assert_eq!(heap.min_count(), 1);
    }

    #[test]
    fn test_bump_existing() {
        let mut heap = KeyHeap::with_capacity(2);
        heap.insert_or_bump(1, 1);
        heap.insert_or_bump(2, 2);
        heap.insert_or_bump(1, 2);
        assert_eq!(heap.query(1), 3);
        assert_eq!(heap.records(), vec![Record::new(1, 3), Record::new(2, 2)]);
        assert_consistent(&heap);
    }

    #[test]
    fn test_eviction_of_minimum() {
        let mut heap = KeyHeap::with_capacity(2);
        heap.insert_or_bump(1, 1);
        heap.insert_or_bump(2, 2);
        heap.insert_or_bump(3, 3);
        heap.insert_or_bump(4, 4);
        heap.insert_or_bump(5, 5);
        assert_eq!(heap.len(), 2, "heap should stay at capacity");
        assert_eq!(heap.records(), vec![Record::new(5, 5), Record::new(4, 4)]);
        assert_eq!(heap.query(1), 0);
        assert!(!heap.contains(3));
        assert_consistent(&heap);
    }

    #[test]
    fn test_no_admission_below_minimum() {
        let mut heap = KeyHeap::with_capacity(1);
        heap.insert_or_bump(1, 10);
        heap.insert_or_bump(2, 10);
        heap.insert_or_bump(3, 4);
        assert_eq!(heap.records(), vec![Record::new(1, 10)]);
    }

    #[test]
    fn test_non_positive_newcomer_not_admitted() {
        let mut heap = KeyHeap::with_capacity(4);
        heap.insert_or_bump(1, 3);
        heap.insert_or_bump(2, 0);
        heap.insert_or_bump(3, -5);
        assert_eq!(heap.len(), 1);
        assert!(!heap.contains(2));
        assert!(!heap.contains(3));
        assert_eq!(heap.records(), vec![Record::new(1, 3)]);
    }

    #[test]
    fn test_zero_memory_rejected() {
        assert!(KeyHeap::from_memory("CountHeap", 7).is_err());
        assert_eq!(KeyHeap::from_memory("CountHeap", 80).unwrap().capacity(), 10);
    }

    #[test]
    fn test_heap_property_random_sequence() {
        let mut rng = SmallRng::seed_from_u64(99);
        let mut heap = KeyHeap::with_capacity(16);
        let mut model: HashMap<Key, Count> = HashMap::new();

        for _ in 0..2_000 {
            let key = rng.random_range(0..64u32);
            let count = rng.random_range(1..5);
            let was_present = heap.contains(key);
            heap.insert_or_bump(key, count);
            if was_present {
                *model.get_mut(&key).unwrap() += count;
            } else if heap.contains(key) {
                model.retain(|k, _| heap.contains(*k));
                model.insert(key, count);
            }
            assert_consistent(&heap);
            for (key, count) in &model {
                assert_eq!(heap.query(*key), *count);
            }
        }
    }
}

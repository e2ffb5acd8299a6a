use tracing::debug;

use crate::error::{stage_len, Result};
use crate::hash::{SeedSequence, StageHash};
use crate::priority_queue::KeyHeap;
use crate::record::{median, Count, Key, Record};
use crate::sketch::Sketch;

/// Count sketch paired with a heap of the keys with the largest estimates.
///
/// Half the budget goes to the counter rows, half to the heap. Queries are
/// answered from the heap only, so untracked keys report 0.
pub struct CountHeap {
    len: usize,
    hashes: Vec<StageHash>,
    signs: Vec<StageHash>,
    counters: Vec<Count>,
    heap: KeyHeap,
}

impl CountHeap {
    pub fn new(memory: usize, stages: usize, slot_size: usize, seed: u64) -> Result<Self> {
        let len = stage_len("CountHeap", memory / 2, stages, slot_size)?;
        let heap = KeyHeap::from_memory("CountHeap", memory / 2)?;
        let mut seeds = SeedSequence::new(seed);
        let hashes = seeds.stage_hashes(stages);
        let signs = seeds.stage_hashes(stages);
        debug!(stages, len, heap = heap.capacity(), "constructed CountHeap");
        Ok(CountHeap {
            len,
            hashes,
            signs,
            counters: vec![0; stages * len],
            heap,
        })
    }

    pub fn stages(&self) -> usize {
        self.hashes.len()
    }

    /// Number of keys currently held by the heap.
    pub fn tracked(&self) -> usize {
        self.heap.len()
    }

    #[inline]
    fn cell(&self, stage: usize, key: Key) -> usize {
        stage * self.len + self.hashes[stage].bucket(key, self.len)
    }
}

impl Sketch for CountHeap {
    fn name(&self) -> &'static str {
        "CountHeap"
    }

    fn insert(&mut self, key: Key, freq: Count) {
        let mut estimates = Vec::with_capacity(self.stages());
        for stage in 0..self.stages() {
            let cell = self.cell(stage, key);
            let sign = self.signs[stage].sign(key);
            self.counters[cell] += freq * sign;
            estimates.push(self.counters[cell] * sign);
        }
        let estimate = median(&mut estimates);

        // Tracked keys grow by the inserted weight; new keys compete with
        // the heap minimum using the sketch estimate.
        if self.heap.contains(key) {
            self.heap.insert_or_bump(key, freq);
        } else {
            self.heap.insert_or_bump(key, estimate);
        }
    }

    fn query(&self, key: Key) -> Result<Count> {
        Ok(self.heap.query(key))
    }

    fn top_k(&self) -> Result<Vec<Record>> {
        Ok(self.heap.records())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heavy_keys_are_tracked() {
        let mut sketch = CountHeap::new(2 * 3 * 4 * 1024, 3, 4, 11).unwrap();
        for key in 0..4u32 {
            for _ in 0..(50 * (key + 1)) {
                sketch.insert(key, 1);
            }
        }
        for noise in 100..140u32 {
            sketch.insert(noise, 1);
        }
        let top = sketch.top_k().unwrap();
        assert_eq!(sketch.tracked(), 44);
        assert_eq!(top[0].key, 3);
        assert_eq!(top[3].key, 0);
        assert_eq!(sketch.query(3).unwrap(), 200);
    }

    #[test]
    fn test_untracked_key_reads_zero() {
        let mut sketch = CountHeap::new(1024, 3, 4, 1).unwrap();
        sketch.insert(1, 1);
        assert_eq!(sketch.query(1).unwrap(), 1);
        assert_eq!(sketch.query(2).unwrap(), 0);
    }

    #[test]
    fn test_cancelled_estimates_stay_out_of_heap() {
        // one counter bucket shared by every key, ten heap entries
        let mut sketch = CountHeap::new(160, 1, 80, 1).unwrap();
        sketch.insert(0, 10);
        for key in 1..10u32 {
            sketch.insert(key, 1);
        }
        let top = sketch.top_k().unwrap();
        assert!(top.iter().all(|record| record.count > 0), "{:?}", top);
        for key in 0..10u32 {
            assert!(sketch.query(key).unwrap() >= 0);
        }
    }

    #[test]
    fn test_rejects_tiny_budget() {
        assert!(CountHeap::new(16, 3, 4, 1).is_err());
    }
}

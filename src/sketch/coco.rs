use std::collections::BTreeMap;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::error::{stage_len, Result};
use crate::hash::{SeedSequence, StageHash};
use crate::record::{median, partial_key, ranked, Count, Key, PartialKey, PartialRecord, Record, Slot};
use crate::sketch::Sketch;
use crate::snapshot::PartialSnapshot;

/// CocoSketch: every stage keeps one `{key, count}` per bucket. The count
/// always absorbs the insert; the key is replaced with probability
/// `freq / count`, so a bucket's key is an unbiased sample of its traffic.
pub struct Coco {
    len: usize,
    hashes: Vec<StageHash>,
    slots: Vec<Slot>,
    rng: SmallRng,
    partials: PartialSnapshot,
}

impl Coco {
    pub fn new(memory: usize, stages: usize, seed: u64) -> Result<Self> {
        let len = stage_len("Coco", memory, stages, std::mem::size_of::<Slot>())?;
        let mut seeds = SeedSequence::new(seed);
        let hashes = seeds.stage_hashes(stages);
        let rng = SmallRng::seed_from_u64(seeds.next_seed());
        debug!(stages, len, "constructed Coco");
        Ok(Coco {
            len,
            hashes,
            slots: vec![Slot::EMPTY; stages * len],
            rng,
            partials: PartialSnapshot::new("Coco"),
        })
    }

    pub fn stages(&self) -> usize {
        self.hashes.len()
    }

    #[inline]
    fn cell(&self, stage: usize, key: Key) -> usize {
        stage * self.len + self.hashes[stage].bucket(key, self.len)
    }

    /// Per-stage counts for every resident group, reduced to their median.
    fn median_by<K, F>(&self, group: F) -> BTreeMap<K, Count>
    where
        K: Ord + Copy,
        F: Fn(Key) -> K,
    {
        let stages = self.stages();
        let mut per_stage: BTreeMap<K, Vec<Count>> = BTreeMap::new();
        for (i, slot) in self.slots.iter().enumerate() {
            if slot.is_empty() {
                continue;
            }
            let row = per_stage
                .entry(group(slot.key))
                .or_insert_with(|| vec![0; stages]);
            row[i / self.len] += slot.count;
        }
        per_stage
            .into_iter()
            .map(|(key, mut counts)| (key, median(&mut counts)))
            .collect()
    }

    fn partial_counts(&self) -> &BTreeMap<PartialKey, Count> {
        self.partials.get_or_build(|| self.median_by(partial_key))
    }
}

impl Sketch for Coco {
    fn name(&self) -> &'static str {
        "Coco"
    }

    fn insert(&mut self, key: Key, freq: Count) {
        self.partials.note_insert();
        for stage in 0..self.stages() {
            let cell = self.cell(stage, key);
            let slot = &mut self.slots[cell];
            slot.count += freq;
            if self.rng.random::<f64>() < freq as f64 / slot.count as f64 {
                slot.key = key;
            }
        }
    }

    fn query(&self, key: Key) -> Result<Count> {
        let mut counts: Vec<Count> = (0..self.stages())
            .map(|stage| {
                let slot = self.slots[self.cell(stage, key)];
                if slot.key == key { slot.count } else { 0 }
            })
            .collect();
        Ok(median(&mut counts))
    }

    fn top_k(&self) -> Result<Vec<Record>> {
        Ok(ranked(&self.median_by(|key| key)))
    }

    /// Snapshot taken on first call; see [`PartialSnapshot`].
    fn partial_top_k(&self) -> Result<Vec<PartialRecord>> {
        Ok(ranked(self.partial_counts()))
    }
}

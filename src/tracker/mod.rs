//! Multi-stage top-k trackers.
//!
//! A tracker takes unit inserts and pushes a carried `{key, weight}` unit
//! through its stages. Whatever falls out of the last stage is returned from
//! [`TopKTracker::insert`] so a downstream estimator can absorb it.
//!
//! Partial-key results are computed on first request and then cached. A
//! tracker that keeps receiving inserts after that serves the stale snapshot
//! and logs a warning once.

use std::collections::BTreeMap;
use std::mem::size_of;

use crate::error::{stage_len, Result};
use crate::hash::{SeedSequence, StageHash};
use crate::record::{merge_counts, partial_key, ranked, Count, Key, PartialKey, PartialRecord, Record, Slot};

mod hashpipe;
pub use hashpipe::HashPipe;

mod elastic;
pub use elastic::ElasticTracker;

mod precision;
pub use precision::Precision;

mod pipeline;
pub use pipeline::{BasicStage, P4Pipeline, Stage, StageSpec, VoteStage};

mod space_saving;
pub use space_saving::SpaceSaving;

pub trait TopKTracker {
    fn name(&self) -> &'static str;

    /// Offers one occurrence of `key`. Returns the unit carried out of the
    /// last stage, or `None` when the structure absorbed it.
    fn insert(&mut self, key: Key) -> Option<Slot>;

    /// Summed weight of `key` over all stages, 0 when not resident.
    fn query(&self, key: Key) -> Count;

    /// Every non-empty slot, across all stages.
    fn residents(&self) -> Vec<Slot>;

    /// Resident weight summed per partial key. Built on first call.
    fn partial_counts(&self) -> &BTreeMap<PartialKey, Count>;

    fn top_k(&self) -> Vec<Record> {
        ranked(&merge_counts(
            self.residents().into_iter().map(|slot| (slot.key, slot.count)),
        ))
    }

    fn query_partial(&self, key: PartialKey) -> Count {
        self.partial_counts().get(&key).copied().unwrap_or(0)
    }

    fn partial_top_k(&self) -> Vec<PartialRecord> {
        ranked(self.partial_counts())
    }

    /// Structure-specific counters reported next to accuracy figures.
    fn diagnostics(&self) -> Vec<(&'static str, u64)> {
        Vec::new()
    }
}

impl<T: TopKTracker + ?Sized> TopKTracker for Box<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn insert(&mut self, key: Key) -> Option<Slot> {
        (**self).insert(key)
    }

    fn query(&self, key: Key) -> Count {
        (**self).query(key)
    }

    fn residents(&self) -> Vec<Slot> {
        (**self).residents()
    }

    fn partial_counts(&self) -> &BTreeMap<PartialKey, Count> {
        (**self).partial_counts()
    }

    fn top_k(&self) -> Vec<Record> {
        (**self).top_k()
    }

    fn query_partial(&self, key: PartialKey) -> Count {
        (**self).query_partial(key)
    }

    fn partial_top_k(&self) -> Vec<PartialRecord> {
        (**self).partial_top_k()
    }

    fn diagnostics(&self) -> Vec<(&'static str, u64)> {
        (**self).diagnostics()
    }
}

pub(crate) fn aggregate_partial(residents: &[Slot]) -> BTreeMap<PartialKey, Count> {
    merge_counts(
        residents
            .iter()
            .map(|slot| (partial_key(slot.key), slot.count)),
    )
}

/// `stages` equally sized arrays of [`Slot`], one hash per stage.
pub(crate) struct SlotStages {
    len: usize,
    hashes: Vec<StageHash>,
    cells: Vec<Slot>,
}

impl SlotStages {
    pub(crate) fn new(structure: &'static str, memory: usize, stages: usize, seeds: &mut SeedSequence) -> Result<Self> {
        let len = stage_len(structure, memory, stages, size_of::<Slot>())?;
        Ok(SlotStages {
            len,
            hashes: seeds.stage_hashes(stages),
            cells: vec![Slot::EMPTY; stages * len],
        })
    }

    pub(crate) fn stages(&self) -> usize {
        self.hashes.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub(crate) fn cell_mut(&mut self, stage: usize, key: Key) -> &mut Slot {
        let pos = stage * self.len + self.hashes[stage].bucket(key, self.len);
        &mut self.cells[pos]
    }

    #[inline]
    fn cell(&self, stage: usize, key: Key) -> &Slot {
        &self.cells[stage * self.len + self.hashes[stage].bucket(key, self.len)]
    }

    pub(crate) fn query(&self, key: Key) -> Count {
        (0..self.stages())
            .map(|stage| self.cell(stage, key))
            .filter(|slot| !slot.is_empty() && slot.key == key)
            .map(|slot| slot.count)
            .sum()
    }

    pub(crate) fn residents(&self) -> Vec<Slot> {
        self.cells.iter().copied().filter(|slot| !slot.is_empty()).collect()
    }
}

use std::collections::BTreeMap;
use std::mem::{self, size_of};

use tracing::debug;

use crate::error::{Result, SketchError};
use crate::hash::{SeedSequence, StageHash};
use crate::record::{Count, Key, PartialKey, Slot};
use crate::snapshot::PartialSnapshot;
use crate::tracker::{aggregate_partial, TopKTracker};

/// One array of a [`P4Pipeline`] together with its admission rule.
pub trait Stage {
    fn len(&self) -> usize;

    /// Offers the carried unit; returns what continues to the next stage.
    fn offer(&mut self, carry: Slot) -> Option<Slot>;

    fn query(&self, key: Key) -> Count;

    /// Appends the stage's non-empty slots to `out`.
    fn collect_residents(&self, out: &mut Vec<Slot>);
}

/// Stage kinds accepted by [`P4Pipeline::with_layout`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StageSpec {
    /// Resident defended by a vote that grows by `lambda` per hit.
    Vote { lambda: Count },
    /// Heavier of resident and carried unit stays.
    Basic,
}

impl StageSpec {
    /// Bytes per bucket relative to a plain [`Slot`].
    fn weight(&self) -> f64 {
        match self {
            StageSpec::Vote { .. } => 1.5,
            StageSpec::Basic => 1.0,
        }
    }

    fn build(&self, len: usize, hash: StageHash) -> Box<dyn Stage> {
        match *self {
            StageSpec::Vote { lambda } => Box::new(VoteStage::new(len, lambda, hash)),
            StageSpec::Basic => Box::new(BasicStage::new(len, hash)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct VoteCell {
    slot: Slot,
    vote: Count,
}

/// Each mismatch costs the resident one vote; at zero it is evicted.
pub struct VoteStage {
    hash: StageHash,
    lambda: Count,
    cells: Vec<VoteCell>,
}

impl VoteStage {
    pub fn new(len: usize, lambda: Count, hash: StageHash) -> Self {
        VoteStage {
            hash,
            lambda,
            cells: vec![VoteCell::default(); len],
        }
    }
}

impl Stage for VoteStage {
    fn len(&self) -> usize {
        self.cells.len()
    }

    fn offer(&mut self, carry: Slot) -> Option<Slot> {
        let pos = self.hash.bucket(carry.key, self.cells.len());
        let cell = &mut self.cells[pos];
        if cell.slot.is_empty() {
            *cell = VoteCell {
                slot: carry,
                vote: self.lambda,
            };
            return None;
        }
        if cell.slot.key == carry.key {
            cell.slot.count += carry.count;
            cell.vote += self.lambda;
            return None;
        }

        cell.vote -= 1;
        if cell.vote <= 0 {
            cell.vote = self.lambda;
            Some(mem::replace(&mut cell.slot, carry))
        } else {
            Some(carry)
        }
    }

    fn query(&self, key: Key) -> Count {
        let slot = self.cells[self.hash.bucket(key, self.cells.len())].slot;
        if !slot.is_empty() && slot.key == key {
            slot.count
        } else {
            0
        }
    }

    fn collect_residents(&self, out: &mut Vec<Slot>) {
        out.extend(self.cells.iter().map(|cell| cell.slot).filter(|slot| !slot.is_empty()));
    }
}

pub struct BasicStage {
    hash: StageHash,
    cells: Vec<Slot>,
}

impl BasicStage {
    pub fn new(len: usize, hash: StageHash) -> Self {
        BasicStage {
            hash,
            cells: vec![Slot::EMPTY; len],
        }
    }
}

impl Stage for BasicStage {
    fn len(&self) -> usize {
        self.cells.len()
    }

    fn offer(&mut self, mut carry: Slot) -> Option<Slot> {
        let pos = self.hash.bucket(carry.key, self.cells.len());
        let resident = &mut self.cells[pos];
        if resident.is_empty() {
            *resident = carry;
            return None;
        }
        if resident.key == carry.key {
            resident.count += carry.count;
            return None;
        }
        if carry.count > resident.count {
            mem::swap(resident, &mut carry);
        }
        Some(carry)
    }

    fn query(&self, key: Key) -> Count {
        let slot = self.cells[self.hash.bucket(key, self.cells.len())];
        if !slot.is_empty() && slot.key == key {
            slot.count
        } else {
            0
        }
    }

    fn collect_residents(&self, out: &mut Vec<Slot>) {
        out.extend(self.cells.iter().copied().filter(|slot| !slot.is_empty()));
    }
}

/// Funnel of stages shrinking geometrically, as laid out on a switch
/// pipeline. The default layout is four vote stages (λ = 8) followed by two
/// basic stages, each half the size of the previous one.
pub struct P4Pipeline {
    stages: Vec<Box<dyn Stage>>,
    partials: PartialSnapshot,
}

impl P4Pipeline {
    pub const DEFAULT_LAYOUT: [StageSpec; 6] = [
        StageSpec::Vote { lambda: 8 },
        StageSpec::Vote { lambda: 8 },
        StageSpec::Vote { lambda: 8 },
        StageSpec::Vote { lambda: 8 },
        StageSpec::Basic,
        StageSpec::Basic,
    ];
    pub const DEFAULT_RATIO: f64 = 0.5;

    pub fn new(memory: usize, seed: u64) -> Result<Self> {
        Self::with_layout(memory, &Self::DEFAULT_LAYOUT, Self::DEFAULT_RATIO, seed)
    }

    /// Sizes stage `i` as `ratio^i` times the first one so that the whole
    /// funnel fits in `memory` bytes.
    pub fn with_layout(memory: usize, layout: &[StageSpec], ratio: f64, seed: u64) -> Result<Self> {
        if layout.is_empty() {
            return Err(SketchError::config("P4Pipeline", "layout has no stages"));
        }
        if !(ratio > 0.0 && ratio.is_finite()) {
            return Err(SketchError::config(
                "P4Pipeline",
                format!("stage ratio {} must be positive", ratio),
            ));
        }
        for spec in layout {
            if let StageSpec::Vote { lambda } = *spec {
                if lambda <= 0 {
                    return Err(SketchError::config(
                        "P4Pipeline",
                        format!("vote stage lambda {} must be positive", lambda),
                    ));
                }
            }
        }

        let mut scale = 1.0;
        let mut units = 0.0;
        for spec in layout {
            units += spec.weight() * scale;
            scale *= ratio;
        }
        let mut len = (memory as f64 / (size_of::<Slot>() as f64 * units)) as usize;

        let mut seeds = SeedSequence::new(seed);
        let mut stages = Vec::with_capacity(layout.len());
        for (i, spec) in layout.iter().enumerate() {
            if len == 0 {
                return Err(SketchError::config(
                    "P4Pipeline",
                    format!("{} bytes leave stage {} without buckets", memory, i),
                ));
            }
            stages.push(spec.build(len, StageHash::new(seeds.next_seed())));
            len = (len as f64 * ratio) as usize;
        }
        let pipeline = P4Pipeline {
            stages,
            partials: PartialSnapshot::new("P4Pipeline"),
        };
        debug!(lens = ?pipeline.stage_lens(), "constructed P4Pipeline");
        Ok(pipeline)
    }

    pub fn stage_lens(&self) -> Vec<usize> {
        self.stages.iter().map(|stage| stage.len()).collect()
    }
}

impl TopKTracker for P4Pipeline {
    fn name(&self) -> &'static str {
        "P4Pipeline"
    }

    fn insert(&mut self, key: Key) -> Option<Slot> {
        self.partials.note_insert();
        let mut carry = Slot::new(key, 1);
        for stage in &mut self.stages {
            carry = stage.offer(carry)?;
        }
        Some(carry)
    }

    fn query(&self, key: Key) -> Count {
        self.stages.iter().map(|stage| stage.query(key)).sum()
    }

    fn residents(&self) -> Vec<Slot> {
        let mut out = Vec::new();
        for stage in &self.stages {
            stage.collect_residents(&mut out);
        }
        out
    }

    fn partial_counts(&self) -> &BTreeMap<PartialKey, Count> {
        self.partials.get_or_build(|| aggregate_partial(&self.residents()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::tests::resident_weight;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_default_geometry() {
        // 1.5 * (1 + 0.5 + 0.25 + 0.125) + 0.0625 + 0.03125 = 2.90625 slots per first-stage bucket,
        // so 23_250 bytes buy exactly 1000 of them
        let pipeline = P4Pipeline::new(23_260, 1).unwrap();
        assert_eq!(pipeline.stage_lens(), vec![1000, 500, 250, 125, 62, 31]);
    }

    #[test]
    fn test_rejects_bad_layouts() {
        assert!(P4Pipeline::with_layout(1 << 16, &[], 0.5, 1).is_err());
        assert!(P4Pipeline::with_layout(1 << 16, &[StageSpec::Basic], 0.0, 1).is_err());
        assert!(P4Pipeline::with_layout(1 << 16, &[StageSpec::Vote { lambda: 0 }], 0.5, 1).is_err());
        // 64 bytes cannot reach the sixth stage
        assert!(P4Pipeline::new(64, 1).is_err());
    }

    #[test]
    fn test_vote_stage_eviction() {
        let mut stage = VoteStage::new(1, 2, StageHash::new(1));
        assert_eq!(stage.offer(Slot::new(1, 1)), None);
        // vote 2 -> 1: the newcomer passes through
        assert_eq!(stage.offer(Slot::new(2, 1)), Some(Slot::new(2, 1)));
        // vote 1 -> 0: resident is evicted, newcomer takes over
        assert_eq!(stage.offer(Slot::new(3, 4)), Some(Slot::new(1, 1)));
        assert_eq!(stage.query(3), 4);
        assert_eq!(stage.offer(Slot::new(3, 1)), None);
        assert_eq!(stage.query(3), 5);
    }

    #[test]
    fn test_basic_stage_keeps_heavier() {
        let mut stage = BasicStage::new(1, StageHash::new(1));
        assert_eq!(stage.offer(Slot::new(1, 3)), None);
        assert_eq!(stage.offer(Slot::new(2, 2)), Some(Slot::new(2, 2)));
        assert_eq!(stage.offer(Slot::new(2, 5)), Some(Slot::new(1, 3)));
        assert_eq!(stage.query(2), 5);
        assert_eq!(stage.query(1), 0);
    }

    #[test]
    fn test_weight_is_conserved() {
        let mut pipeline = P4Pipeline::new(4096, 17).unwrap();
        let mut rng = SmallRng::seed_from_u64(8);
        let mut forwarded = 0i64;
        let total = 20_000;
        for _ in 0..total {
            let key = (rng.random_range(0..60u32)).pow(2);
            if let Some(unit) = pipeline.insert(key) {
                forwarded += unit.count as i64;
            }
        }
        assert_eq!(resident_weight(&pipeline) + forwarded, total);
    }

    #[test]
    fn test_custom_layout() {
        let mut pipeline =
            P4Pipeline::with_layout(8 * 16, &[StageSpec::Basic, StageSpec::Basic], 1.0, 3).unwrap();
        assert_eq!(pipeline.stage_lens(), vec![8, 8]);
        for _ in 0..3 {
            pipeline.insert(11);
        }
        assert_eq!(pipeline.query(11), 3);
        assert_eq!(pipeline.top_k()[0].count, 3);
    }
}

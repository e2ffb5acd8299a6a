use std::collections::BTreeMap;
use std::mem;

use tracing::debug;

use crate::error::Result;
use crate::hash::SeedSequence;
use crate::record::{Count, Key, PartialKey, Slot};
use crate::snapshot::PartialSnapshot;
use crate::tracker::{aggregate_partial, SlotStages, TopKTracker};

const STAGES: usize = 6;

/// HashPipe: the first stage always admits the newcomer and pushes out
/// whatever it displaced; later stages keep the heavier of resident and
/// carried unit.
pub struct HashPipe {
    stages: SlotStages,
    partials: PartialSnapshot,
}

impl HashPipe {
    pub fn new(memory: usize, seed: u64) -> Result<Self> {
        let stages = SlotStages::new("HashPipe", memory, STAGES, &mut SeedSequence::new(seed))?;
        debug!(stages = STAGES, len = stages.len(), "constructed HashPipe");
        Ok(HashPipe {
            stages,
            partials: PartialSnapshot::new("HashPipe"),
        })
    }
}

impl TopKTracker for HashPipe {
    fn name(&self) -> &'static str {
        "HashPipe"
    }

    fn insert(&mut self, key: Key) -> Option<Slot> {
        self.partials.note_insert();

        let first = self.stages.cell_mut(0, key);
        if !first.is_empty() && first.key == key {
            first.count += 1;
            return None;
        }
        let mut carry = mem::replace(first, Slot::new(key, 1)).carried()?;

        for stage in 1..STAGES {
            let resident = self.stages.cell_mut(stage, carry.key);
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
        }
        Some(carry)
    }

    fn query(&self, key: Key) -> Count {
        self.stages.query(key)
    }

    fn residents(&self) -> Vec<Slot> {
        self.stages.residents()
    }

    fn partial_counts(&self) -> &BTreeMap<PartialKey, Count> {
        self.partials.get_or_build(|| aggregate_partial(&self.residents()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use crate::tracker::tests::resident_weight;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_first_stage_admits_newcomer() {
        // one slot per stage: every key collides everywhere
        let mut pipe = HashPipe::new(8 * STAGES, 1).unwrap();
        assert_eq!(pipe.insert(1), None);
        assert_eq!(pipe.insert(1), None);
        // 2 takes stage 0, 1 (count 2) moves down into the empty stage 1
        assert_eq!(pipe.insert(2), None);
        assert_eq!(pipe.query(1), 2);
        assert_eq!(pipe.query(2), 1);
        // 3 pushes 2 out of stage 0; 2 is lighter than 1 and settles in stage 2
        assert_eq!(pipe.insert(3), None);
        assert_eq!(pipe.top_k(), vec![Record::new(1, 2), Record::new(2, 1), Record::new(3, 1)]);
    }

    #[test]
    fn test_light_unit_falls_out() {
        let mut pipe = HashPipe::new(8 * STAGES, 1).unwrap();
        for _ in 0..5 {
            pipe.insert(100);
        }
        for key in 0..STAGES as Key {
            pipe.insert(key);
        }
        // the heavy key survives; one unit of weight 1 was pushed out
        assert_eq!(pipe.query(100), 5);
        let leftover = pipe.insert(50).unwrap();
        assert_eq!(leftover.count, 1);
    }

    #[test]
    fn test_weight_is_conserved() {
        let mut pipe = HashPipe::new(8 * STAGES * 16, 9).unwrap();
        let mut rng = SmallRng::seed_from_u64(3);
        let mut forwarded = 0i64;
        let total = 5000;
        for _ in 0..total {
            let key = rng.random_range(0..400u32);
            if let Some(unit) = pipe.insert(key) {
                forwarded += unit.count as i64;
            }
        }
        assert_eq!(resident_weight(&pipe) + forwarded, total);
    }

    #[test]
    fn test_partial_top_k_is_idempotent() {
        let mut pipe = HashPipe::new(8 * STAGES * 64, 2).unwrap();
        for key in [0x0A00_0001, 0x0A00_0002, 0x0A00_0001, 0x0B00_0003] {
            pipe.insert(key);
        }
        let first = pipe.partial_top_k();
        assert_eq!(first[0], Record::new(0x0A00, 3));
        assert_eq!(pipe.query_partial(0x0B00), 1);
        assert_eq!(pipe.partial_top_k(), first);
    }
}

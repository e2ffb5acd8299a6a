use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::mem::size_of;

use ahash::RandomState;
use tracing::debug;

use crate::error::{Result, SketchError};
use crate::record::{Count, Key, PartialKey, Slot};
use crate::snapshot::PartialSnapshot;
use crate::tracker::{aggregate_partial, TopKTracker};

/// Space-Saving with an exact counter table and a `(count, key)` order.
///
/// A newcomer arriving at a full table takes over the minimum entry with
/// `min + 1`, so tracked counts never underestimate.
pub struct SpaceSaving {
    capacity: usize,
    counts: HashMap<Key, Count, RandomState>,
    order: BTreeSet<(Count, Key)>,
    partials: PartialSnapshot,
}

impl SpaceSaving {
    /// One counter per `Slot`-sized chunk of `memory`.
    pub fn new(memory: usize) -> Result<Self> {
        let capacity = memory / size_of::<Slot>();
        if capacity == 0 {
            return Err(SketchError::config(
                "SpaceSaving",
                format!("{} bytes cannot hold a single counter", memory),
            ));
        }
        debug!(capacity, "constructed SpaceSaving");
        Ok(SpaceSaving {
            capacity,
            counts: HashMap::with_capacity_and_hasher(capacity, RandomState::new()),
            order: BTreeSet::new(),
            partials: PartialSnapshot::new("SpaceSaving"),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    fn bump(&mut self, key: Key, from: Count, to: Count) {
        self.order.remove(&(from, key));
        self.order.insert((to, key));
        self.counts.insert(key, to);
    }
}

impl TopKTracker for SpaceSaving {
    fn name(&self) -> &'static str {
        "SpaceSaving"
    }

    fn insert(&mut self, key: Key) -> Option<Slot> {
        self.partials.note_insert();

        if let Some(&count) = self.counts.get(&key) {
            self.bump(key, count, count + 1);
            return None;
        }
        if self.counts.len() < self.capacity {
            self.bump(key, 0, 1);
            return None;
        }

        let (min, victim) = self.order.pop_first()?;
        self.counts.remove(&victim);
        self.bump(key, min, min + 1);
        Some(Slot::new(victim, min))
    }

    fn query(&self, key: Key) -> Count {
        self.counts.get(&key).copied().unwrap_or(0)
    }

    fn residents(&self) -> Vec<Slot> {
        self.order
            .iter()
            .map(|&(count, key)| Slot::new(key, count))
            .collect()
    }

    fn partial_counts(&self) -> &BTreeMap<PartialKey, Count> {
        self.partials.get_or_build(|| aggregate_partial(&self.residents()))
    }
}

use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Flow identifier read from the trace, e.g. an IPv4 address.
pub type Key = u32;

/// Coarser projection of a [`Key`] used for prefix-level aggregation.
pub type PartialKey = u16;

/// Frequency estimate. Signed because count-sketch arithmetic can dip below zero.
pub type Count = i32;

/// Projects a flow key onto its /16 prefix.
#[inline]
pub fn partial_key(key: Key) -> PartialKey {
    (key >> 16) as PartialKey
}

/// `{key, count}` cell stored in pipeline stages and carried between them.
///
/// A zero count marks an empty cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Slot {
    pub key: Key,
    pub count: Count,
}

impl Slot {
    pub const EMPTY: Slot = Slot { key: 0, count: 0 };

    #[inline]
    pub fn new(key: Key, count: Count) -> Self {
        Slot { key, count }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Maps an empty carried unit to `None`.
    #[inline]
    pub(crate) fn carried(self) -> Option<Slot> {
        if self.count > 0 {
            Some(self)
        } else {
            None
        }
    }
}

/// One entry of a top-k result list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record<K = Key> {
    pub key: K,
    pub count: Count,
}

pub type PartialRecord = Record<PartialKey>;

impl<K> Record<K> {
    pub fn new(key: K, count: Count) -> Self {
        Record { key, count }
    }
}

impl<K: Ord> PartialOrd for Record<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// Sorting a Vec<Record> yields descending count, then ascending key.
impl<K: Ord> Ord for Record<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .count
            .cmp(&self.count)
            .then_with(|| self.key.cmp(&other.key))
    }
}

/// Sums counts per key.
pub(crate) fn merge_counts<K, I>(entries: I) -> BTreeMap<K, Count>
where
    K: Ord,
    I: IntoIterator<Item = (K, Count)>,
{
    let mut merged = BTreeMap::new();
    for (key, count) in entries {
        *merged.entry(key).or_insert(0) += count;
    }
    merged
}

/// Turns a count map into a ranked result list.
pub(crate) fn ranked<K: Ord + Copy>(counts: &BTreeMap<K, Count>) -> Vec<Record<K>> {
    let mut records: Vec<_> = counts
        .iter()
        .map(|(key, count)| Record::new(*key, *count))
        .collect();
    records.sort_unstable();
    records
}

/// Median of a small set of per-stage estimates; mean of the middle pair for even sizes.
pub(crate) fn median(values: &mut [Count]) -> Count {
    values.sort_unstable();
    let n = values.len();
    if n == 0 {
        return 0;
    }
    if n % 2 == 1 {
        values[n / 2]
    } else {
        ((values[n / 2 - 1] as i64 + values[n / 2] as i64) / 2) as Count
    }
}

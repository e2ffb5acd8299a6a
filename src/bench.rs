//! Stream feeding, tracker/estimator composition, and accuracy scoring.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::{Duration, Instant};

use tracing::debug;

use crate::dataset::Dataset;
use crate::error::{Result, SketchError};
use crate::record::{merge_counts, ranked, Count, Key, Record};
use crate::sketch::{Rhhh, Sketch};
use crate::tracker::TopKTracker;

/// A top-k tracker in front of an estimator. Units the tracker cannot keep
/// are handed to the estimator with their weight.
pub struct Composed<T, E> {
    tracker: T,
    estimator: E,
    forwarded: i64,
}

impl<T: TopKTracker, E: Sketch> Composed<T, E> {
    pub fn new(tracker: T, estimator: E) -> Self {
        Composed {
            tracker,
            estimator,
            forwarded: 0,
        }
    }

    pub fn name(&self) -> String {
        format!("{}+{}", self.tracker.name(), self.estimator.name())
    }

    pub fn insert(&mut self, key: Key) {
        if let Some(unit) = self.tracker.insert(key) {
            self.forwarded += unit.count as i64;
            self.estimator.insert(unit.key, unit.count);
        }
    }

    pub fn query(&self, key: Key) -> Result<Count> {
        Ok(self.tracker.query(key) + self.estimator.query(key)?)
    }

    /// Tracker residents merged with whatever the estimator can enumerate.
    pub fn top_k(&self) -> Result<Vec<Record>> {
        let tracked = self.tracker.top_k();
        let estimated = supported(self.estimator.top_k())?.unwrap_or_default();
        let merged = merge_counts(
            tracked
                .into_iter()
                .chain(estimated)
                .map(|record| (record.key, record.count)),
        );
        Ok(ranked(&merged))
    }

    /// Total weight handed to the estimator so far.
    pub fn forwarded_weight(&self) -> i64 {
        self.forwarded
    }

    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    pub fn estimator(&self) -> &E {
        &self.estimator
    }
}

/// Packets pushed through a structure and the time it took.
#[derive(Debug, Clone, Copy)]
pub struct Throughput {
    pub packets: usize,
    pub elapsed: Duration,
}

impl Throughput {
    fn measure<F: FnOnce()>(packets: usize, feed: F) -> Self {
        let start = Instant::now();
        feed();
        Throughput {
            packets,
            elapsed: start.elapsed(),
        }
    }

    /// Million packets per second.
    pub fn mpps(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.packets as f64 / 1_000_000.0 / secs
    }
}

impl fmt::Display for Throughput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} packets in {:.3}s ({:.2} Mpps)",
            self.packets,
            self.elapsed.as_secs_f64(),
            self.mpps()
        )
    }
}

pub fn feed_sketch<S: Sketch + ?Sized>(sketch: &mut S, dataset: &Dataset) -> Throughput {
    Throughput::measure(dataset.total_packets(), || {
        for &key in dataset.keys() {
            sketch.insert(key, 1);
        }
    })
}

/// Carried-out units are discarded; use [`feed_composed`] to keep them.
pub fn feed_tracker<T: TopKTracker + ?Sized>(tracker: &mut T, dataset: &Dataset) -> Throughput {
    Throughput::measure(dataset.total_packets(), || {
        for &key in dataset.keys() {
            let _ = tracker.insert(key);
        }
    })
}

pub fn feed_composed<T: TopKTracker, E: Sketch>(composed: &mut Composed<T, E>, dataset: &Dataset) -> Throughput {
    Throughput::measure(dataset.total_packets(), || {
        for &key in dataset.keys() {
            composed.insert(key);
        }
    })
}

/// Maps an unsupported request to `None`, keeping every other error.
fn supported<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(SketchError::Unsupported { .. }) => Ok(None),
        Err(err) => Err(err),
    }
}

/// The `k` largest entries of an exact ranking, or all of them when fewer exist.
fn truncate<K>(mut truth: Vec<Record<K>>, k: usize) -> Vec<Record<K>> {
    truth.truncate(k);
    truth
}

/// Average absolute and relative error of `estimate` over the `truth` keys.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Errors {
    pub aae: f64,
    pub are: f64,
}

pub fn estimate_errors<K, F>(truth: &[Record<K>], mut estimate: F) -> Result<Errors>
where
    K: Copy,
    F: FnMut(K) -> Result<Count>,
{
    if truth.is_empty() {
        return Err(SketchError::NumericDomain(
            "no ground-truth keys to average over".to_string(),
        ));
    }

    let mut absolute = 0.0;
    let mut relative = 0.0;
    let mut relative_keys = 0usize;
    for record in truth {
        let error = (estimate(record.key)? as f64 - record.count as f64).abs();
        absolute += error;
        if record.count != 0 {
            relative += error / record.count as f64;
            relative_keys += 1;
        }
    }
    if relative_keys == 0 {
        return Err(SketchError::NumericDomain(
            "every ground-truth count is zero; relative error is undefined".to_string(),
        ));
    }

    Ok(Errors {
        aae: absolute / truth.len() as f64,
        are: relative / relative_keys as f64,
    })
}

/// Precision over the first `truth.len()` reported keys and recall over all of them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitRates {
    pub precision: f64,
    pub recall: f64,
}

pub fn hit_rates<K: Ord + Copy>(truth: &[Record<K>], reported: &[Record<K>]) -> HitRates {
    let k = truth.len();
    if k == 0 {
        return HitRates {
            precision: 0.0,
            recall: 0.0,
        };
    }
    let expected: BTreeSet<K> = truth.iter().map(|record| record.key).collect();
    let found: BTreeSet<K> = reported.iter().map(|record| record.key).collect();

    let precise = reported
        .iter()
        .take(k)
        .filter(|record| expected.contains(&record.key))
        .count();
    let recalled = expected.iter().filter(|key| found.contains(key)).count();

    HitRates {
        precision: precise as f64 / k as f64,
        recall: recalled as f64 / k as f64,
    }
}

/// Accuracy at one key granularity.
#[derive(Debug, Clone, PartialEq)]
pub struct Accuracy {
    pub k: usize,
    pub errors: Errors,
    pub hits: Option<HitRates>,
}

impl fmt::Display for Accuracy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "K={} AAE={:.4} ARE={:.6}", self.k, self.errors.aae, self.errors.are)?;
        if let Some(hits) = self.hits {
            write!(f, " PR={:.4} RR={:.4}", hits.precision, hits.recall)?;
        }
        Ok(())
    }
}

/// Full-key accuracy, plus partial-key accuracy where the structure aggregates.
#[derive(Debug, Clone, PartialEq)]
pub struct AccuracyReport {
    pub structure: String,
    pub full: Accuracy,
    pub partial: Option<Accuracy>,
}

impl fmt::Display for AccuracyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.structure, self.full)?;
        if let Some(partial) = &self.partial {
            write!(f, " | partial {}", partial)?;
        }
        Ok(())
    }
}

fn score<K, F>(truth: Vec<Record<K>>, k: usize, estimate: F, reported: Option<Vec<Record<K>>>) -> Result<Accuracy>
where
    K: Ord + Copy,
    F: FnMut(K) -> Result<Count>,
{
    let truth = truncate(truth, k);
    let errors = estimate_errors(&truth, estimate)?;
    let hits = reported.map(|reported| hit_rates(&truth, &reported));
    Ok(Accuracy {
        k: truth.len(),
        errors,
        hits,
    })
}

/// Scores an estimator against the `k` largest flows.
pub fn evaluate_sketch<S: Sketch + ?Sized>(sketch: &S, dataset: &Dataset, k: usize) -> Result<AccuracyReport> {
    let full = score(
        dataset.exact_top_k(),
        k,
        |key| sketch.query(key),
        supported(sketch.top_k())?,
    )?;

    let partial = match supported(sketch.partial_top_k())? {
        Some(reported) => {
            let counts: BTreeMap<_, _> = reported.iter().map(|r| (r.key, r.count)).collect();
            Some(score(
                dataset.exact_partial_top_k(),
                k,
                |key| Ok(counts.get(&key).copied().unwrap_or(0)),
                Some(reported),
            )?)
        }
        None => None,
    };

    Ok(AccuracyReport {
        structure: sketch.name().to_string(),
        full,
        partial,
    })
}

/// Tracker accuracy together with how far it undercounts the keys it holds.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerReport {
    pub accuracy: AccuracyReport,
    pub tracked: usize,
    /// Sum over tracked keys of exact count minus tracked count.
    pub underestimate: i64,
    pub diagnostics: Vec<(&'static str, u64)>,
}

impl fmt::Display for TrackerReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} tracked={} underestimate={}",
            self.accuracy, self.tracked, self.underestimate
        )?;
        for (name, value) in &self.diagnostics {
            write!(f, " {}={}", name, value)?;
        }
        Ok(())
    }
}

pub fn underestimate<T: TopKTracker + ?Sized>(tracker: &T, dataset: &Dataset) -> i64 {
    tracker
        .top_k()
        .iter()
        .map(|record| (dataset.exact_count(record.key) - record.count) as i64)
        .sum()
}

pub fn evaluate_tracker<T: TopKTracker + ?Sized>(tracker: &T, dataset: &Dataset, k: usize) -> Result<TrackerReport> {
    let reported = tracker.top_k();
    let tracked = reported.len();
    let full = score(dataset.exact_top_k(), k, |key| Ok(tracker.query(key)), Some(reported))?;
    let partial = score(
        dataset.exact_partial_top_k(),
        k,
        |key| Ok(tracker.query_partial(key)),
        Some(tracker.partial_top_k()),
    )?;

    Ok(TrackerReport {
        accuracy: AccuracyReport {
            structure: tracker.name().to_string(),
            full,
            partial: Some(partial),
        },
        tracked,
        underestimate: underestimate(tracker, dataset),
        diagnostics: tracker.diagnostics(),
    })
}

/// Scores `tracker.query + estimator.query` against the `k` largest flows.
pub fn evaluate_composed<T: TopKTracker, E: Sketch>(
    composed: &Composed<T, E>,
    dataset: &Dataset,
    k: usize,
) -> Result<AccuracyReport> {
    debug!(
        structure = %composed.name(),
        forwarded = composed.forwarded_weight(),
        "scoring composed structure"
    );
    let full = score(
        dataset.exact_top_k(),
        k,
        |key| composed.query(key),
        Some(composed.top_k()?),
    )?;
    Ok(AccuracyReport {
        structure: composed.name(),
        full,
        partial: None,
    })
}

/// Accuracy of one RHHH level against the exact prefix counts at its mask.
#[derive(Debug, Clone, PartialEq)]
pub struct LevelReport {
    pub level: usize,
    pub mask: Key,
    pub accuracy: Accuracy,
}

impl fmt::Display for LevelReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "level {} mask={:#010x}: {}", self.level, self.mask, self.accuracy)
    }
}

/// Per-level scores; no cross-level combination is attempted.
pub fn evaluate_hierarchy(rhhh: &Rhhh, dataset: &Dataset, k: usize) -> Result<Vec<LevelReport>> {
    (0..rhhh.levels())
        .map(|level| {
            let mask = rhhh.mask(level);
            let accuracy = score(
                dataset.exact_masked_top_k(mask),
                k,
                |key| Ok(rhhh.query_level(key, level)),
                Some(rhhh.level_top_k(level)),
            )?;
            Ok(LevelReport {
                level,
                mask,
                accuracy,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Slot;
    use crate::sketch::{CountMin, Dispatch, HierarchyBackend};
    use crate::tracker::tests::{resident_weight, MockTracker};
    use crate::tracker::{HashPipe, P4Pipeline, SpaceSaving};
    use mockall::predicate::eq;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    fn skewed(packets: usize, seed: u64) -> Dataset {
        let mut rng = SmallRng::seed_from_u64(seed);
        let keys = (0..packets)
            .map(|_| {
                let rank = rng.random_range(1..=2000u32);
                // heavier weight on small ranks
                rng.random_range(1..=rank)
            })
            .collect();
        Dataset::from_keys(keys).unwrap()
    }

    #[test]
    fn test_composed_forwards_carried_units() {
        let mut tracker = MockTracker::new();
        tracker.expect_name().return_const("Mock");
        tracker.expect_insert().with(eq(1)).times(1).returning(|_| None);
        tracker
            .expect_insert()
            .with(eq(2))
            .times(1)
            .returning(|_| Some(Slot::new(9, 4)));
        tracker.expect_query().with(eq(9)).return_const(1);

        let mut composed = Composed::new(tracker, CountMin::new(1024, 2, 4, 1).unwrap());
        composed.insert(1);
        composed.insert(2);

        assert_eq!(composed.forwarded_weight(), 4);
        assert_eq!(composed.estimator().query(9).unwrap(), 4);
        assert_eq!(composed.query(9).unwrap(), 5);
        assert_eq!(composed.name(), "Mock+CM");
    }

    #[test]
    fn test_composed_weight_is_conserved() {
        let dataset = skewed(20_000, 4);
        let mut composed = Composed::new(
            HashPipe::new(8 * 6 * 32, 2).unwrap(),
            CountMin::new(4096, 3, 4, 3).unwrap(),
        );
        feed_composed(&mut composed, &dataset);
        assert!(composed.forwarded_weight() > 0);
        assert_eq!(
            resident_weight(composed.tracker()) + composed.forwarded_weight(),
            dataset.total_packets() as i64
        );
    }

    #[test]
    fn test_composed_top_k_merges_estimator() {
        let dataset = Dataset::from_keys(vec![1, 1, 1, 2]).unwrap();
        let mut composed = Composed::new(
            SpaceSaving::new(8 * 4).unwrap(),
            crate::sketch::ElasticSketch::new(4 * 3 * 4 * 8, 4, 1).unwrap(),
        );
        feed_composed(&mut composed, &dataset);
        // nothing is evicted, so the estimator adds nothing
        assert_eq!(composed.top_k().unwrap(), vec![Record::new(1, 3), Record::new(2, 1)]);
    }

    #[test]
    fn test_estimate_errors() {
        let truth = vec![Record::new(1u32, 10), Record::new(2, 4)];
        let errors = estimate_errors(&truth, |key| Ok(if key == 1 { 12 } else { 3 })).unwrap();
        assert_eq!(errors.aae, 1.5);
        assert_eq!(errors.are, (0.2 + 0.25) / 2.0);
    }

    #[test]
    fn test_estimate_errors_guards_zero_truth() {
        let truth = vec![Record::new(1u32, 0)];
        assert!(matches!(
            estimate_errors(&truth, |_| Ok(3)),
            Err(SketchError::NumericDomain(_))
        ));
        assert!(matches!(
            estimate_errors::<u32, _>(&[], |_| Ok(0)),
            Err(SketchError::NumericDomain(_))
        ));
    }

    #[test]
    fn test_hit_rates() {
        let truth = vec![Record::new(1u32, 9), Record::new(2, 8), Record::new(3, 7), Record::new(4, 6)];
        let reported = vec![
            Record::new(1u32, 9),
            Record::new(7, 8),
            Record::new(3, 7),
            Record::new(8, 6),
            Record::new(4, 1),
        ];
        let hits = hit_rates(&truth, &reported);
        assert_eq!(hits.precision, 0.5);
        assert_eq!(hits.recall, 0.75);
    }

    #[test]
    fn test_evaluate_sketch_without_top_k() {
        let dataset = skewed(5000, 1);
        let mut sketch = CountMin::new(1 << 16, 3, 4, 5).unwrap();
        feed_sketch(&mut sketch, &dataset);
        let report = evaluate_sketch(&sketch, &dataset, 50).unwrap();
        assert_eq!(report.full.k, 50);
        assert!(report.full.hits.is_none());
        assert!(report.partial.is_none());
        assert!(report.full.errors.aae >= 0.0);
        assert!(report.to_string().starts_with("CM: K=50"));
    }

    #[test]
    fn test_evaluate_tracker_on_exact_structure() {
        // a SpaceSaving table larger than the flow count is exact
        let dataset = skewed(5000, 2);
        let mut tracker = SpaceSaving::new(8 * 4096).unwrap();
        feed_tracker(&mut tracker, &dataset);
        let report = evaluate_tracker(&tracker, &dataset, 100).unwrap();
        assert_eq!(report.accuracy.full.errors.aae, 0.0);
        assert_eq!(report.accuracy.full.hits, Some(HitRates { precision: 1.0, recall: 1.0 }));
        assert_eq!(report.underestimate, 0);
        assert_eq!(report.tracked, dataset.total_flows());
        let partial = report.accuracy.partial.unwrap();
        assert_eq!(partial.errors.aae, 0.0);
    }

    #[test]
    fn test_underestimate_counts_lost_weight() {
        let dataset = Dataset::from_keys(vec![5, 5, 5, 6]).unwrap();
        let mut tracker = MockTracker::new();
        tracker
            .expect_residents()
            .return_const(vec![Slot::new(5, 2), Slot::new(6, 1)]);
        assert_eq!(underestimate(&tracker, &dataset), 1);
    }

    #[test]
    fn test_k_is_clamped_to_flow_count() {
        let dataset = Dataset::from_keys(vec![1, 2, 2]).unwrap();
        let mut tracker = P4Pipeline::new(1 << 12, 1).unwrap();
        feed_tracker(&mut tracker, &dataset);
        let report = evaluate_tracker(&tracker, &dataset, 3000).unwrap();
        assert_eq!(report.accuracy.full.k, 2);
        assert_eq!(report.accuracy.full.errors.aae, 0.0);
    }

    #[test]
    fn test_evaluate_hierarchy_reports_every_level() {
        let dataset = skewed(4000, 3);
        let mut rhhh = Rhhh::new(1 << 16, HierarchyBackend::SpaceSaving, Dispatch::RoundRobin, 1).unwrap();
        feed_sketch(&mut rhhh, &dataset);
        let reports = evaluate_hierarchy(&rhhh, &dataset, 10).unwrap();
        assert_eq!(reports.len(), 4);
        assert_eq!(reports[3].mask, 0xffff_ffff);
        assert!(reports.iter().all(|report| report.accuracy.hits.is_some()));
    }

    #[test]
    fn test_throughput_display() {
        let throughput = Throughput {
            packets: 2_000_000,
            elapsed: Duration::from_secs(2),
        };
        assert_eq!(throughput.mpps(), 1.0);
        assert_eq!(throughput.to_string(), "2000000 packets in 2.000s (1.00 Mpps)");
    }
}

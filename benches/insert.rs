use criterion::{criterion_group, criterion_main, Criterion};
use rand::prelude::*;
use std::hint::black_box;

use flowsketch::sketch::{CountMin, ElasticSketch, Fcm};
use flowsketch::tracker::{HashPipe, P4Pipeline, SpaceSaving};
use flowsketch::{Composed, Key, Sketch, TopKTracker};

const MEMORY: usize = 60_000;
const PACKETS: usize = 100_000;

// Small ranks are drawn far more often than large ones.
fn skewed_keys(n: usize) -> Vec<Key> {
    let mut rng = SmallRng::seed_from_u64(7);
    (0..n)
        .map(|_| {
            let rank = rng.random_range(1..=100_000u32);
            rng.random_range(1..=rank)
        })
        .collect()
}

fn benchmark_sketch_insert(c: &mut Criterion) {
    let keys = skewed_keys(PACKETS);
    let mut group = c.benchmark_group("Sketch_insert");
    group.sample_size(40);

    group.bench_function("cm", |b| {
        let mut sketch = CountMin::new(MEMORY, 3, 4, 1).unwrap();
        b.iter(|| {
            for &key in &keys {
                sketch.insert(black_box(key), 1);
            }
        });
    });
    group.bench_function("fcm", |b| {
        let mut sketch = Fcm::new(MEMORY, 4, 1).unwrap();
        b.iter(|| {
            for &key in &keys {
                sketch.insert(black_box(key), 1);
            }
        });
    });
    group.bench_function("elastic", |b| {
        let mut sketch = ElasticSketch::new(MEMORY, 4, 1).unwrap();
        b.iter(|| {
            for &key in &keys {
                sketch.insert(black_box(key), 1);
            }
        });
    });
    group.finish();
}

fn benchmark_tracker_insert(c: &mut Criterion) {
    let keys = skewed_keys(PACKETS);
    let mut group = c.benchmark_group("Tracker_insert");
    group.sample_size(40);

    group.bench_function("hashpipe", |b| {
        let mut tracker = HashPipe::new(MEMORY, 1).unwrap();
        b.iter(|| {
            for &key in &keys {
                black_box(tracker.insert(black_box(key)));
            }
        });
    });
    group.bench_function("p4", |b| {
        let mut tracker = P4Pipeline::new(MEMORY, 1).unwrap();
        b.iter(|| {
            for &key in &keys {
                black_box(tracker.insert(black_box(key)));
            }
        });
    });
    group.bench_function("space_saving", |b| {
        let mut tracker = SpaceSaving::new(MEMORY).unwrap();
        b.iter(|| {
            for &key in &keys {
                black_box(tracker.insert(black_box(key)));
            }
        });
    });
    group.bench_function("p4+cm", |b| {
        let mut composed = Composed::new(
            P4Pipeline::new(MEMORY, 1).unwrap(),
            CountMin::new(MEMORY, 3, 4, 2).unwrap(),
        );
        b.iter(|| {
            for &key in &keys {
                composed.insert(black_box(key));
            }
        });
    });
    group.finish();
}

criterion_group!(benches, benchmark_sketch_insert, benchmark_tracker_insert);
criterion_main!(benches);

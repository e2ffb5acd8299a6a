use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use flowsketch::bench::{
    evaluate_composed, evaluate_hierarchy, evaluate_sketch, evaluate_tracker, feed_composed,
    feed_sketch, feed_tracker,
};
use flowsketch::dataset::DEFAULT_RECORD_SIZE;
use flowsketch::hash::SeedSequence;
use flowsketch::sketch::{
    Coco, CountHeap, CountMin, CountSketch, Dispatch, ElasticSketch, Fcm, HalfCu, HierarchyBackend,
    NitroCm, Rhhh, Univmon,
};
use flowsketch::tracker::{ElasticTracker, HashPipe, P4Pipeline, Precision, SpaceSaving};
use flowsketch::{Composed, Dataset, Result, Sketch, TopKTracker};

/// Counter width of an estimator running alone.
const SLOT_SIZE: usize = 4;
/// Narrower counters for an estimator behind the tracker, which only sees
/// evicted traffic.
const COMPOSED_SLOT_SIZE: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SketchKind {
    Cm,
    Count,
    HalfCu,
    NitroCm,
    Coco,
    Fcm,
    CountHeap,
    Univmon,
    Elastic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum TrackerKind {
    HashPipe,
    Elastic,
    Precision,
    P4,
    SpaceSaving,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    SpaceSaving,
    P4,
}

/// Sketch and top-k tracker accuracy benchmark
#[derive(Parser, Debug)]
#[command(name = "flowsketch")]
#[command(about = "Scores heavy-hitter sketches, top-k trackers and their composition on a packet trace")]
#[command(version)]
struct Args {
    /// Trace of fixed-size records, each starting with a little-endian u32 key
    trace: PathBuf,

    /// Bytes per trace record
    #[arg(long, default_value_t = DEFAULT_RECORD_SIZE)]
    record_size: usize,

    /// Memory budget in bytes; standalone estimators get twice this
    #[arg(short, long, default_value_t = 60_000)]
    memory: usize,

    /// Number of largest flows scored
    #[arg(short, default_value_t = 3000)]
    k: usize,

    /// Base seed for every hash and sampler
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Estimators to run, alone and behind the tracker
    #[arg(long, value_enum, value_delimiter = ',', default_values_t = [
        SketchKind::Cm,
        SketchKind::Count,
        SketchKind::Fcm,
        SketchKind::Univmon,
        SketchKind::NitroCm,
        SketchKind::Elastic,
    ])]
    sketch: Vec<SketchKind>,

    /// Tracker placed in front of each estimator
    #[arg(long, value_enum, default_value_t = TrackerKind::P4)]
    tracker: TrackerKind,

    /// Also run hierarchical heavy hitters with this per-level tracker
    #[arg(long, value_enum)]
    rhhh: Option<Backend>,

    /// Rotate RHHH levels instead of sampling them
    #[arg(long)]
    round_robin: bool,

    /// Hash rows per estimator
    #[arg(long, default_value_t = 4)]
    stages: usize,

    /// NitroCM per-stage update probability
    #[arg(long, default_value_t = 0.1)]
    sample_rate: f64,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

fn build_sketch(
    kind: SketchKind,
    memory: usize,
    slot_size: usize,
    seed: u64,
    args: &Args,
) -> Result<Box<dyn Sketch>> {
    let stages = args.stages;
    Ok(match kind {
        SketchKind::Cm => Box::new(CountMin::new(memory, stages, slot_size, seed)?),
        SketchKind::Count => Box::new(CountSketch::new(memory, stages, slot_size, seed)?),
        SketchKind::HalfCu => Box::new(HalfCu::new(memory, stages, slot_size, seed)?),
        SketchKind::NitroCm => {
            Box::new(NitroCm::new(memory, args.sample_rate, stages, slot_size, seed)?)
        }
        SketchKind::Coco => Box::new(Coco::new(memory, stages, seed)?),
        SketchKind::Fcm => Box::new(Fcm::new(memory, slot_size, seed)?),
        SketchKind::CountHeap => Box::new(CountHeap::new(memory, stages, slot_size, seed)?),
        SketchKind::Univmon => Box::new(Univmon::new(memory, slot_size, seed)?),
        SketchKind::Elastic => Box::new(ElasticSketch::new(memory, slot_size, seed)?),
    })
}

fn build_tracker(kind: TrackerKind, memory: usize, seed: u64) -> Result<Box<dyn TopKTracker>> {
    Ok(match kind {
        TrackerKind::HashPipe => Box::new(HashPipe::new(memory, seed)?),
        TrackerKind::Elastic => Box::new(ElasticTracker::new(memory, seed)?),
        TrackerKind::Precision => Box::new(Precision::new(memory, seed)?),
        TrackerKind::P4 => Box::new(P4Pipeline::new(memory, seed)?),
        TrackerKind::SpaceSaving => Box::new(SpaceSaving::new(memory)?),
    })
}

fn run(args: &Args) -> Result<()> {
    let dataset = Dataset::open(&args.trace, args.record_size)?;
    // one base seed per structure
    let mut seeds = SeedSequence::new(args.seed);

    let mut tracker = build_tracker(args.tracker, args.memory, seeds.next_seed())?;
    let throughput = feed_tracker(&mut tracker, &dataset);
    info!("{} insert: {}", tracker.name(), throughput);
    info!("{}", evaluate_tracker(&tracker, &dataset, args.k)?);

    for &kind in &args.sketch {
        let mut sketch = build_sketch(kind, args.memory * 2, SLOT_SIZE, seeds.next_seed(), args)?;
        let throughput = feed_sketch(&mut sketch, &dataset);
        info!("{} insert: {}", sketch.name(), throughput);
        info!("{}", evaluate_sketch(&sketch, &dataset, args.k)?);

        let mut composed = Composed::new(
            build_tracker(args.tracker, args.memory, seeds.next_seed())?,
            build_sketch(kind, args.memory, COMPOSED_SLOT_SIZE, seeds.next_seed(), args)?,
        );
        let throughput = feed_composed(&mut composed, &dataset);
        info!(
            forwarded = composed.forwarded_weight(),
            "{} insert: {}",
            composed.name(),
            throughput
        );
        info!("{}", evaluate_composed(&composed, &dataset, args.k)?);
    }

    if let Some(backend) = args.rhhh {
        let backend = match backend {
            Backend::SpaceSaving => HierarchyBackend::SpaceSaving,
            Backend::P4 => HierarchyBackend::P4Pipeline,
        };
        let dispatch = if args.round_robin {
            Dispatch::RoundRobin
        } else {
            Dispatch::Random
        };
        let mut rhhh = Rhhh::new(args.memory, backend, dispatch, seeds.next_seed())?;
        let throughput = feed_sketch(&mut rhhh, &dataset);
        info!("RHHH insert: {}", throughput);
        for report in evaluate_hierarchy(&rhhh, &dataset, args.k)? {
            info!("RHHH {}", report);
        }
    }
    Ok(())
}

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = if args.debug {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    run(&args)?;
    Ok(())
}

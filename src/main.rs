use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use tracing::{debug, info};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

use perfetto_builder::reader::{open_trace_reader, TracePacketIterator};
use perfetto_builder::{Annotation, DecodedTrace, EventData, Features, Trace, TraceDecoder, Track};

#[derive(Debug, Parser)]
#[command(name = "perfetto-builder")]
#[command(about = "Build and inspect Perfetto traces")]
#[command(version)]
struct Command {
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Write the reference demo trace
    Demo {
        /// Output file
        #[arg(short, long, default_value = "trace.pftrace")]
        output: PathBuf,

        /// Seed track uuids and counter values for reproducible output
        #[arg(long)]
        seed: Option<u64>,

        #[command(flatten)]
        features: FeatureArgs,
    },
    /// Decode a trace and print a summary of its contents
    Inspect {
        /// Trace file (.gz is decompressed)
        trace: PathBuf,
    },
}

#[derive(Debug, Args)]
struct FeatureArgs {
    /// JSON file with encoding features
    #[arg(long)]
    features: Option<PathBuf>,

    /// Embed every string literally
    #[arg(long)]
    no_interning: bool,

    /// Encode every timestamp as an absolute value
    #[arg(long)]
    no_incremental_timestamps: bool,
}

impl FeatureArgs {
    fn resolve(&self) -> Result<Features> {
        let mut features = match &self.features {
            Some(path) => Features::load(path)
                .with_context(|| format!("Failed to load features from {}", path.display()))?,
            None => Features::default(),
        };
        if self.no_interning {
            features.interning = false;
        }
        if self.no_incremental_timestamps {
            features.incremental_timestamps = false;
        }
        Ok(features)
    }
}

fn demo_trace(features: Features, rng: &mut dyn RngCore, uuid_rng: Box<dyn RngCore + Send>) -> Trace {
    let mut trace = Trace::with_rng(features, uuid_rng);
    let global: Track = Trace::global_track().into();
    trace.register_process(1, "Process");
    let t1: Track = trace.register_thread(1, 1, "Thread").into();
    let t2: Track = trace.register_thread(1, 2, "Thread").into();
    let t3: Track = trace.register_track("HTTP Requests").into();
    let t4: Track = trace.register_track("HTTP Requests").into();
    let t5: Track = trace.register_thread(1, 3, "Thread").into();
    let cpu = trace.register_counter("cpu load", "%");

    let stack: Vec<Annotation> = [("1", "func1"), ("2", "func2"), ("3", "func3")]
        .into_iter()
        .map(Annotation::from)
        .collect();

    trace.start_slice(&t3, 100, "HTTP Request 1 /get", &[]);
    trace.end_slice(&t3, 200);
    trace.start_slice(&t4, 150, "HTTP Request 2 /post", &[]);
    trace.end_slice(&t4, 250);
    trace.start_slice(&t3, 230, "HTTP Request 3 /get", &[]);
    trace.end_slice(&t3, 300);

    for i in 0..50u64 {
        trace.start_slice(&global, i * 100, "global func", &[]);
        trace.end_slice(&global, i * 100 + 50);
    }

    for i in 0..100u64 {
        trace.start_slice(&t1, i * 100, "func1", &stack);
        trace.end_slice(&t1, i * 100 + 50);
        trace.instant(&t1, i * 100 + 60, "Instant event");

        trace.start_slice(&t2, i * 90, "func2", &[]);
        trace.start_slice(&t2, i * 90 + 10, "func2a", &[]);
        trace.end_slice(&t2, i * 90 + 40);
        trace.start_slice(&t2, i * 90 + 40, "func2b", &[]);
        trace.end_slice(&t2, i * 90 + 80);
        trace.end_slice(&t2, i * 90 + 80);

        trace.counter_sample(&cpu, 100 * i, rng.random_range(0..=100));
    }

    for i in 0..20u64 {
        trace.start_slice_with_flow(&t5, i * 100, "Function with flow", &[i], &stack);
        trace.end_slice_with_flow(&t5, i * 100 + 50, &[i.wrapping_sub(1)]);
    }

    trace
}

fn run_demo(output: &Path, seed: Option<u64>, features: Features) -> Result<()> {
    let (mut rng, uuid_rng) = match seed {
        Some(seed) => (
            StdRng::seed_from_u64(seed),
            StdRng::seed_from_u64(seed.wrapping_add(1)),
        ),
        None => (StdRng::from_os_rng(), StdRng::from_os_rng()),
    };
    debug!(?features, ?seed, "building demo trace");

    let trace = demo_trace(features, &mut rng, Box::new(uuid_rng));
    let data = trace.render().context("Failed to render trace")?;
    fs::write(output, &data)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    info!(
        packets = trace.packets().len(),
        bytes = data.len(),
        "wrote {}",
        output.display()
    );
    Ok(())
}

fn decode_file(path: &Path) -> Result<(usize, DecodedTrace)> {
    let reader =
        open_trace_reader(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut decoder = TraceDecoder::new();
    let mut packets = 0;
    for packet in TracePacketIterator::new(reader) {
        let packet = packet.with_context(|| format!("Failed to read {}", path.display()))?;
        decoder
            .push(&packet)
            .with_context(|| format!("Failed to decode packet {packets}"))?;
        packets += 1;
    }
    Ok((packets, decoder.finish()))
}

fn run_inspect(path: &Path) -> Result<()> {
    let (packets, decoded) = decode_file(path)?;

    let mut tracks: BTreeMap<&str, usize> = BTreeMap::new();
    for track in &decoded.tracks {
        let kind = match track {
            Track::Process(_) => "process",
            Track::Thread(_) => "thread",
            Track::Counter(_) => "counter",
            Track::Generic(_) => "track",
        };
        *tracks.entry(kind).or_default() += 1;
    }

    let mut events: BTreeMap<&str, usize> = BTreeMap::new();
    let mut flows = 0;
    for event in &decoded.events {
        let kind = match event.data {
            EventData::SliceBegin { .. } => "slice begin",
            EventData::SliceEnd => "slice end",
            EventData::Instant { .. } => "instant",
            EventData::CounterSample { .. } => "counter sample",
        };
        *events.entry(kind).or_default() += 1;
        flows += event.flow_ids.len();
    }

    println!("{}: {} packets", path.display(), packets);
    println!("tracks:");
    for (kind, count) in &tracks {
        println!("  {kind:<16}{count}");
    }
    println!("events:");
    for (kind, count) in &events {
        println!("  {kind:<16}{count}");
    }
    println!("flow ids: {flows}");

    let first = decoded.events.iter().map(|e| e.timestamp).min();
    let last = decoded.events.iter().map(|e| e.timestamp).max();
    if let (Some(first), Some(last)) = (first, last) {
        println!("time range: {first}..{last}");
    }
    Ok(())
}

fn main() -> Result<()> {
    let opts = Command::parse();

    let level = if opts.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(level.into())
                .from_env_lossy(),
        )
        .init();

    match opts.command {
        Commands::Demo {
            output,
            seed,
            features,
        } => run_demo(&output, seed, features.resolve()?),
        Commands::Inspect { trace } => run_inspect(&trace),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::mock::StepRng;

    #[test]
    fn test_demo_trace_round_trips() {
        let mut rng = StdRng::seed_from_u64(7);
        let trace = demo_trace(Features::default(), &mut rng, Box::new(StepRng::new(1, 1)));

        // 7 descriptors, 6 request events, 100 global, 1000 per-thread, 40 flow.
        assert_eq!(trace.packets().len(), 7 + 6 + 100 + 1000 + 40);

        let decoded = perfetto_builder::decode_bytes(&trace.render().unwrap()).unwrap();
        assert_eq!(decoded.tracks.len(), 7);
        assert_eq!(decoded.events.len(), 6 + 100 + 1000 + 40);
        assert!(decoded
            .events
            .iter()
            .filter_map(|e| e.value())
            .all(|v| (0..=100).contains(&v)));
    }

    #[test]
    fn test_feature_args_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("features.json");
        fs::write(&path, r#"{"interning": true, "incremental-timestamps": true}"#).unwrap();

        let args = FeatureArgs {
            features: Some(path),
            no_interning: true,
            no_incremental_timestamps: false,
        };
        let features = args.resolve().unwrap();
        assert!(!features.interning);
        assert!(features.incremental_timestamps);
    }

    #[test]
    fn test_demo_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo.pftrace");
        run_demo(&path, Some(3), Features::default()).unwrap();

        let (packets, decoded) = decode_file(&path).unwrap();
        assert_eq!(packets, 1 + 7 + 6 + 100 + 1000 + 40);
        assert_eq!(decoded.events.len(), 6 + 100 + 1000 + 40);
    }
}

//! Thin CLI wrapper around `cachesim-core` (§6 "CLI surface"): parses
//! arguments, opens a trace file, drives the hierarchy, and prints a report.
//! Exit code 0 on success, nonzero on usage/config error; the core itself
//! never calls `exit` — every failure here is a typed error translated to a
//! process exit code at this one boundary.

mod trace_reader;

use std::path::PathBuf;
use std::process::ExitCode;

use cachesim_core::{config, DriverConfig, Hierarchy, TraceStream};
use clap::Parser;

use trace_reader::JsonlTraceReader;

/// Replay a memory-reference trace through a configurable cache/TLB hierarchy.
#[derive(Parser, Debug)]
#[command(name = "cachesim", version, about)]
struct Args {
    /// Path to a newline-delimited-JSON trace file.
    trace: PathBuf,

    /// Declarative cache topology file (§4.7). If omitted, a simple
    /// knobs-based hierarchy is built from the other flags.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Number of core slots (knobs mode only).
    #[arg(long, default_value_t = 1)]
    num_cores: u32,
    /// Per-core L1 size in bytes (knobs mode only).
    #[arg(long, default_value_t = 32 * 1024)]
    l1_size: u32,
    /// Per-core L1 associativity (knobs mode only).
    #[arg(long, default_value_t = 8)]
    l1_assoc: u32,
    /// Shared LLC size in bytes (knobs mode only).
    #[arg(long, default_value_t = 1024 * 1024)]
    llc_size: u32,
    /// LLC associativity (knobs mode only).
    #[arg(long, default_value_t = 16)]
    llc_assoc: u32,
    /// Uniform line size in bytes.
    #[arg(long, default_value_t = 64)]
    line_size: u32,
    /// Attach a next-line prefetcher to every L1D (knobs mode only).
    #[arg(long)]
    l1d_prefetch: bool,
    /// Build a snoop filter across per-core L1Ds (knobs mode only).
    #[arg(long)]
    coherence: bool,

    /// References to skip unconditionally before any processing.
    #[arg(long, default_value_t = 0)]
    skip_refs: u64,
    /// References processed before stats reset.
    #[arg(long, default_value_t = 0)]
    warmup_refs: u64,
    /// LLC loaded-fraction at which warm-up is also considered complete.
    #[arg(long, default_value_t = 0.0)]
    warmup_fraction: f64,
    /// References counted after warm-up before the run stops.
    #[arg(long, default_value_t = u64::MAX)]
    sim_refs: u64,

    /// Attach a miss-stride analyzer to the LLC and print recommendations.
    #[arg(long)]
    miss_analyzer: bool,
    /// Write miss-stride recommendations to this CSV path as well as stderr.
    #[arg(long)]
    recommend_csv: Option<PathBuf>,

    /// Increase log verbosity (repeatable).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_hierarchy(args: &Args) -> Result<Hierarchy, cachesim_core::BuildError> {
    let driver = DriverConfig {
        skip_refs: args.skip_refs,
        warmup_refs: args.warmup_refs,
        warmup_fraction: args.warmup_fraction,
        sim_refs: args.sim_refs,
        cpu_scheduling: false,
        core_sharded: false,
    };

    if let Some(config_path) = &args.config {
        let text = std::fs::read_to_string(config_path).map_err(|source| {
            cachesim_core::BuildError::Init(cachesim_core::InitError::UnwritableFile {
                path: config_path.display().to_string(),
                source,
            })
        })?;
        let parsed = config::parse(&text).map_err(cachesim_core::BuildError::Config)?;
        let mut driver = driver;
        driver.cpu_scheduling = parsed.driver.cpu_scheduling;
        driver.core_sharded = parsed.driver.core_sharded;
        driver.skip_refs = parsed.driver.skip_refs;
        driver.warmup_refs = parsed.driver.warmup_refs;
        driver.warmup_fraction = parsed.driver.warmup_fraction;
        driver.sim_refs = parsed.driver.sim_refs;
        Hierarchy::from_config(&parsed, driver)
    } else {
        Hierarchy::from_knobs(
            args.num_cores,
            args.l1_size,
            args.l1_assoc,
            args.llc_size,
            args.llc_assoc,
            args.line_size,
            args.l1d_prefetch,
            args.coherence,
            driver,
        )
    }
}

fn run(args: Args) -> Result<(), String> {
    let mut hierarchy = build_hierarchy(&args).map_err(|e| e.to_string())?;

    if args.miss_analyzer {
        let analyzer = cachesim_core::MissStrideAnalyzer::new(
            args.line_size,
            cachesim_core::AnalyzerConfig::default(),
            args.recommend_csv.as_deref(),
        )
        .map_err(|e| e.to_string())?;
        hierarchy.attach_miss_analyzer(analyzer);
    }

    let mut reader = JsonlTraceReader::open(&args.trace, 0).map_err(|e| e.to_string())?;
    reader.initialize_stream();

    while let Some(record) = reader.next_record() {
        match hierarchy.process_memref(&record) {
            Ok(true) => {}
            Ok(false) => break,
            Err(unhandled) => return Err(unhandled.to_string()),
        }
    }

    print!("{}", hierarchy.print_results());

    if args.miss_analyzer {
        for rec in hierarchy.finalize_miss_analyzer() {
            eprintln!("0x{:x},{},{:?}", rec.pc, rec.stride, rec.locality);
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("cachesim: {message}");
            ExitCode::FAILURE
        }
    }
}

//! Performance-model launcher.
//!
//! Runs a JSON trace through the simulator:
//! 1. **Config:** optional JSON configuration file, defaults otherwise.
//! 2. **Run control:** optional retire limit (`-i`).
//! 3. **Reports:** selectable statistics sections on exit.

use std::path::PathBuf;
use std::process;

use clap::Parser;

use rvperf_core::core::inst_gen::JsonInstGenerator;
use rvperf_core::{Config, Simulator};

#[derive(Parser, Debug)]
#[command(
    name = "rvperf",
    version,
    about = "Cycle-accurate out-of-order RISC-V performance simulator",
    long_about = "Drives the performance model with a JSON instruction trace.\n\nExamples:\n  rvperf traces/dhrystone.json\n  rvperf -c configs/big-core.json -i 1000000 traces/spec.json"
)]
struct Cli {
    /// JSON instruction trace to run.
    trace: PathBuf,

    /// JSON configuration file (defaults when omitted).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Stop after this many retired instructions (0 = run to trace end).
    #[arg(short = 'i', long, default_value_t = 0)]
    insts: u64,

    /// Statistics sections to print (summary, rename, branch, memory, flush).
    #[arg(long)]
    stats: Vec<String>,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => match std::fs::read_to_string(path) {
            Ok(text) => match Config::from_json(&text) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("rvperf: {e}");
                    process::exit(1);
                }
            },
            Err(e) => {
                eprintln!("rvperf: cannot read {}: {e}", path.display());
                process::exit(1);
            }
        },
        None => Config::default(),
    };
    if cli.insts != 0 {
        config.rob.num_insts_to_retire = cli.insts;
    }

    let generator = match JsonInstGenerator::from_file(&cli.trace) {
        Ok(generator) => generator,
        Err(e) => {
            eprintln!("rvperf: {e}");
            process::exit(1);
        }
    };

    let mut sim = match Simulator::new(&config, Box::new(generator)) {
        Ok(sim) => sim,
        Err(e) => {
            eprintln!("rvperf: {e}");
            process::exit(1);
        }
    };

    match sim.run() {
        Ok(()) => {
            sim.stats().print_sections(&cli.stats);
        }
        Err(e) => {
            eprintln!("rvperf: {e}");
            process::exit(1);
        }
    }
}

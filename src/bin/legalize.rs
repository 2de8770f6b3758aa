//! Command line driver: parse MIR, legalize it for a GPU generation, print the result.

use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use gisel_legalize::amdgpu::{AmdgpuLegalizer, Generation, Subtarget};
use gisel_legalize::legalizer::{legalize_functions_parallel, LegalizerConfig};
use gisel_legalize::mir::parse_functions;

#[derive(Parser, Debug)]
#[command(author, version, about = "Legalize generic machine IR for a GPU target", long_about = None)]
struct Args {
    /// MIR file to legalize; standard input if omitted
    file: Option<PathBuf>,

    /// Hardware generation (si, ci, vi or gfx9)
    #[arg(short, long = "gen", default_value = "gfx9")]
    generation: Generation,

    /// Read segment apertures from the queue descriptor instead of hardware registers
    #[arg(long)]
    no_aperture_regs: bool,

    /// Rule applications allowed per instruction
    #[arg(long)]
    max_iterations: Option<usize>,

    /// Print legalization statistics to stderr
    #[arg(long)]
    stats: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = if args.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let text = match &args.file {
        Some(path) => fs::read_to_string(path)?,
        None => {
            let mut buffer = String::new();
            io::stdin().read_to_string(&mut buffer)?;
            buffer
        }
    };

    let subtarget = Subtarget::new(args.generation).with_aperture_regs(!args.no_aperture_regs);
    let mut config = LegalizerConfig::default();
    if let Some(max) = args.max_iterations {
        config = config.with_max_iterations(max);
    }
    let target = AmdgpuLegalizer::with_config(subtarget, config)?;

    let functions = parse_functions(&text, &subtarget)?;
    let (results, stats) = legalize_functions_parallel(&target, functions);

    let mut failed = false;
    for result in &results {
        match &result.result {
            Ok(()) => print!("{}", result.function),
            Err(err) => {
                eprintln!("Error: {}: {err}", result.function.name());
                failed = true;
            }
        }
    }
    if args.stats {
        eprint!("{stats}");
    }

    Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}

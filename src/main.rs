//! Command line front end: compile a BF file and run it on stdin/stdout.
//!
//! Usage: `bff <PROGRAM> [--no-optimize] [--dump-ir] [--max-steps N]`

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use bff::{compile, listing, ExecutionState, OptimisationsFlags, Outcome};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "bff")]
#[command(about = "Compile a BF program to an optimised instruction stream and run it")]
struct Args {
    /// Path to the BF source file
    program: PathBuf,

    /// Translate the program one symbol at a time, with no idioms or passes
    #[arg(long = "no-optimize")]
    no_optimize: bool,

    /// Print the compiled instruction stream instead of running it
    #[arg(long = "dump-ir")]
    dump_ir: bool,

    /// Stop after dispatching this many instructions
    #[arg(long = "max-steps")]
    max_steps: Option<u64>,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn main() -> ExitCode {
    init_logging();
    let args = Args::parse();

    let source = match fs::read(&args.program) {
        Ok(source) => source,
        Err(e) => {
            error!("Could not read {}: {}", args.program.display(), e);
            return ExitCode::FAILURE;
        }
    };

    let flags = if args.no_optimize {
        OptimisationsFlags::empty()
    } else {
        OptimisationsFlags::all()
    };

    let instrs = match compile(&source, flags) {
        Ok(instrs) => instrs,
        Err(e) => {
            let filename = args.program.display().to_string();
            eprintln!("{}", e.to_diagnostic().format(&filename, &source));
            return ExitCode::FAILURE;
        }
    };
    info!(instructions = instrs.len(), "compiled {}", args.program.display());

    if args.dump_ir {
        let stdout = io::stdout();
        let mut handle = stdout.lock();
        if let Err(e) = handle.write_all(listing(&instrs).as_bytes()) {
            error!("Could not write listing: {}", e);
            return ExitCode::FAILURE;
        }
        return ExitCode::SUCCESS;
    }

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut state = ExecutionState::new();
    match state.run(&instrs, stdin.lock(), stdout.lock(), args.max_steps) {
        Ok(Outcome::Completed) => ExitCode::SUCCESS,
        Ok(Outcome::OutOfSteps) => {
            warn!(steps = state.steps, "step limit reached before the program finished");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

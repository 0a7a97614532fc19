//! `wisp` - command-line entry point for the Wisp interpreter.
//!
//! `wisp [path]` runs a file; with no path it drops into a REPL. Argument
//! parsing, exit-code mapping, and `tracing` bring-up live here; everything
//! that actually understands the language lives in `wisp-runtime`.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use wisp_runtime::{run_repl, RunnerConfig, WispError};

#[derive(Parser)]
#[command(name = "wisp")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Interpreter for the Wisp language", long_about = None)]
struct Args {
    /// Wisp source file to run. Omit to start a REPL.
    path: Option<PathBuf>,
}

fn main() -> ExitCode {
    init_logging();
    let args = Args::parse();
    let config = RunnerConfig::from_env();

    let result = match args.path {
        Some(path) => wisp_runtime::interpret(&path, config),
        None => run_repl(config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report(&e);
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

fn report(e: &WispError) {
    eprintln!("{e}");
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("WISP_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

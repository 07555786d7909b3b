//! Quiver CLI binary.

use std::process;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use quiver::cli::args::*;
use quiver::cli::commands::*;

fn main() {
    let args = QuiverArgs::parse();

    // RUST_LOG wins over the -v/-q flags when set.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_directive()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Err(e) = execute_command(args) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

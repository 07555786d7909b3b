//! Command line argument parsing for the Quiver CLI using clap.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

/// Quiver - inspect and maintain posting-list barrels
#[derive(Parser, Debug, Clone)]
#[command(name = "quiver")]
#[command(about = "Inspect and maintain the barrels of a Quiver index")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = None)]
pub struct QuiverArgs {
    /// Verbosity level (0=quiet, 1=normal, 2=verbose, 3=debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode (overrides verbose)
    #[arg(short, long)]
    pub quiet: bool,

    /// Output format
    #[arg(short = 'f', long = "format", default_value = "human")]
    pub output_format: OutputFormat,

    /// Pretty-print JSON output
    #[arg(long)]
    pub pretty: bool,

    /// Index configuration file (JSON)
    #[arg(short, long, value_name = "CONFIG_FILE", env = "QUIVER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

impl QuiverArgs {
    /// Get the effective verbosity level
    pub fn verbosity(&self) -> u8 {
        if self.quiet {
            0
        } else {
            match self.verbose {
                0 => 1,
                n => n + 1,
            }
        }
    }

    /// Default `tracing` filter directive for the verbosity level.
    pub fn log_directive(&self) -> &'static str {
        match self.verbosity() {
            0 => "error",
            1 => "warn",
            2 => "info",
            3 => "debug",
            _ => "trace",
        }
    }
}

/// Available CLI commands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// List the registered barrels
    Barrels(BarrelsArgs),

    /// List the vocabulary of a flushed barrel
    Terms(TermsArgs),

    /// Print the postings of one term
    Dump(DumpArgs),

    /// Merge flushed barrels into a new one
    Merge(MergeArgs),

    /// Rename barrels into base document id order
    Sort(SortArgs),
}

/// Arguments for listing barrels
#[derive(Parser, Debug, Clone)]
pub struct BarrelsArgs {
    /// Path to the index directory
    #[arg(value_name = "INDEX_PATH")]
    pub index_path: PathBuf,
}

/// Arguments for listing a vocabulary
#[derive(Parser, Debug, Clone)]
pub struct TermsArgs {
    /// Path to the index directory
    #[arg(value_name = "INDEX_PATH")]
    pub index_path: PathBuf,

    /// Barrel name
    #[arg(value_name = "BARREL")]
    pub barrel: String,

    /// Maximum number of terms to print
    #[arg(short, long)]
    pub limit: Option<usize>,
}

/// Arguments for dumping a posting
#[derive(Parser, Debug, Clone)]
pub struct DumpArgs {
    /// Path to the index directory
    #[arg(value_name = "INDEX_PATH")]
    pub index_path: PathBuf,

    /// Barrel name
    #[arg(value_name = "BARREL")]
    pub barrel: String,

    /// Term id
    #[arg(value_name = "TERM")]
    pub term: u32,

    /// Start at the first document with an id at or above this one
    #[arg(long)]
    pub from_doc: Option<u32>,

    /// Maximum number of documents to print
    #[arg(short, long)]
    pub limit: Option<usize>,
}

/// Arguments for merging barrels
#[derive(Parser, Debug, Clone)]
pub struct MergeArgs {
    /// Path to the index directory
    #[arg(value_name = "INDEX_PATH")]
    pub index_path: PathBuf,

    /// Barrels to merge (all flushed barrels when omitted)
    #[arg(value_name = "BARREL")]
    pub barrels: Vec<String>,
}

/// Arguments for sorting barrels
#[derive(Parser, Debug, Clone)]
pub struct SortArgs {
    /// Path to the index directory
    #[arg(value_name = "INDEX_PATH")]
    pub index_path: PathBuf,
}

/// Output formats for CLI
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable output
    Human,
    /// JSON output
    Json,
}

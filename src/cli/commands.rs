//! Command implementations for the Quiver CLI.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::barrel::{BarrelRegistry, DiskBarrelReader, merge_barrels};
use crate::cli::args::*;
use crate::cli::output::*;
use crate::config::IndexConfig;
use crate::error::{QuiverError, Result};
use crate::posting::{DocEntry, PostingCursor, PostingEntry};
use crate::storage::FileStorage;

/// Execute a CLI command.
pub fn execute_command(args: QuiverArgs) -> Result<()> {
    let config = load_config(&args)?;

    match &args.command {
        Command::Barrels(barrels_args) => list_barrels(barrels_args, &args),
        Command::Terms(terms_args) => list_terms(terms_args, &args),
        Command::Dump(dump_args) => dump_posting(dump_args, &args),
        Command::Merge(merge_args) => merge(merge_args, &config, &args),
        Command::Sort(sort_args) => sort(sort_args, &args),
    }
}

fn load_config(args: &QuiverArgs) -> Result<IndexConfig> {
    match &args.config {
        Some(path) => {
            debug!(path = %path.display(), "loading index configuration");
            IndexConfig::from_json_file(path)
        }
        None => Ok(IndexConfig::default()),
    }
}

/// Open the registry of an existing index directory.
fn open_registry(index_path: &Path) -> Result<BarrelRegistry> {
    if !index_path.is_dir() {
        return Err(QuiverError::not_found(format!(
            "index directory {} does not exist",
            index_path.display()
        )));
    }

    let storage = FileStorage::new(index_path, Default::default())?;
    BarrelRegistry::open(Arc::new(storage))
}

/// List the registered barrels.
fn list_barrels(args: &BarrelsArgs, cli_args: &QuiverArgs) -> Result<()> {
    let registry = open_registry(&args.index_path)?;
    let snapshot = registry.snapshot();

    output_result(
        &format!("Registry of {}", args.index_path.display()),
        &BarrelListing::from(snapshot.as_ref()),
        cli_args,
    )
}

/// List the vocabulary of a barrel.
fn list_terms(args: &TermsArgs, cli_args: &QuiverArgs) -> Result<()> {
    let registry = open_registry(&args.index_path)?;
    let reader = DiskBarrelReader::from_registry(&registry, &args.barrel)?;

    let limit = args.limit.unwrap_or(usize::MAX);
    let terms = reader
        .terms()
        .iter()
        .take(limit)
        .map(|e| TermRow {
            term: e.term,
            df: e.df,
            ctf: e.ctf,
            offset: e.offset,
        })
        .collect();

    output_result(
        &format!("Vocabulary of barrel {}", args.barrel),
        &TermListing {
            barrel: args.barrel.clone(),
            total_terms: reader.term_count(),
            terms,
        },
        cli_args,
    )
}

/// Print the postings of one term.
fn dump_posting(args: &DumpArgs, cli_args: &QuiverArgs) -> Result<()> {
    let registry = open_registry(&args.index_path)?;
    let reader = DiskBarrelReader::from_registry(&registry, &args.barrel)?;
    let mut cursor = reader.cursor(args.term)?.ok_or_else(|| {
        QuiverError::not_found(format!("term {} not in barrel {}", args.term, args.barrel))
    })?;

    let stats = cursor.term_stats()?;
    let skip_entries = cursor.skip_list().map_or(0, |s| s.len());

    let mut entries = Vec::new();
    if let Some(from) = args.from_doc {
        if cursor.decode_to(from, None)?.is_some()
            && let Some(doc) = cursor.current()
        {
            entries.push(read_current(&mut cursor, doc)?);
        } else {
            debug!(from, "no document at or after the requested id");
        }
    }
    entries.extend(cursor.read_to_end(None)?);
    if let Some(limit) = args.limit {
        entries.truncate(limit);
    }

    output_result(
        &format!("Postings of term {}", args.term),
        &PostingDump {
            barrel: args.barrel.clone(),
            term: args.term,
            df: stats.df,
            ctf: stats.ctf,
            skip_entries,
            documents: entries.into_iter().map(PostingRow::from).collect(),
        },
        cli_args,
    )
}

/// Read the occurrences of the document the cursor was moved to.
fn read_current(cursor: &mut dyn PostingCursor, doc: DocEntry) -> Result<PostingEntry> {
    let mut positions = vec![0; doc.freq as usize];
    let mut sub_positions = vec![0; doc.freq as usize];
    cursor.decode_next_locations(&mut positions, &mut sub_positions)?;

    Ok(PostingEntry {
        doc,
        positions,
        sub_positions,
    })
}

/// Merge barrels.
fn merge(args: &MergeArgs, config: &IndexConfig, cli_args: &QuiverArgs) -> Result<()> {
    let registry = open_registry(&args.index_path)?;
    let start_time = Instant::now();

    let names: Vec<String> = if args.barrels.is_empty() {
        registry
            .snapshot()
            .barrels
            .iter()
            .filter(|b| !b.in_memory)
            .map(|b| b.name.clone())
            .collect()
    } else {
        args.barrels.clone()
    };
    let names: Vec<&str> = names.iter().map(String::as_str).collect();

    let merged = merge_barrels(&registry, &names, config)?;

    output_result(
        &format!("Merged {} barrels", names.len()),
        &MaintenanceResult {
            renames: Vec::new(),
            merged: Some(BarrelRow::from(&merged)),
            duration_ms: start_time.elapsed().as_millis() as u64,
        },
        cli_args,
    )
}

/// Rename barrels into base document id order.
fn sort(args: &SortArgs, cli_args: &QuiverArgs) -> Result<()> {
    let registry = open_registry(&args.index_path)?;
    let start_time = Instant::now();
    let renames = registry.sort()?;

    output_result(
        "Sorted barrels",
        &MaintenanceResult {
            renames,
            merged: None,
            duration_ms: start_time.elapsed().as_millis() as u64,
        },
        cli_args,
    )
}

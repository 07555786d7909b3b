//! Merging flushed barrels.

use tracing::info;

use crate::barrel::info::BarrelInfo;
use crate::barrel::memory::write_barrel_files;
use crate::barrel::reader::DiskBarrelReader;
use crate::barrel::registry::BarrelRegistry;
use crate::config::IndexConfig;
use crate::error::{QuiverError, Result};
use crate::posting::{PostingCursor, PostingTable};

/// Merge flushed barrels into one new barrel and remove the inputs.
///
/// Inputs are replayed in ascending base document id order, so their
/// document ranges must not overlap. The merged barrel takes a fresh name
/// from the registry and is registered before any input is removed.
pub fn merge_barrels(
    registry: &BarrelRegistry,
    names: &[&str],
    config: &IndexConfig,
) -> Result<BarrelInfo> {
    if names.is_empty() {
        return Err(QuiverError::invalid_argument("no barrels to merge"));
    }

    let snapshot = registry.snapshot();
    let mut inputs = Vec::with_capacity(names.len());
    for &name in names {
        let info = snapshot
            .get(name)
            .ok_or_else(|| QuiverError::barrel(format!("barrel {name} is not registered")))?;
        if info.in_memory {
            return Err(QuiverError::barrel(format!(
                "barrel {name} has not been flushed"
            )));
        }
        if inputs.iter().any(|i: &BarrelInfo| i.name == name) {
            return Err(QuiverError::invalid_argument(format!(
                "barrel {name} listed twice"
            )));
        }
        inputs.push(info.clone());
    }
    inputs.sort_by_key(|i| (i.base_doc_id(), i.max_doc_id));

    let mut previous: Option<&BarrelInfo> = None;
    for input in inputs.iter().filter(|i| i.doc_count > 0) {
        if let Some(prev) = previous
            && prev.max_doc_id >= input.base_doc_id()
        {
            return Err(QuiverError::barrel(format!(
                "barrels {} and {} overlap in document ids",
                prev.name, input.name
            )));
        }
        previous = Some(input);
    }

    let mut table = PostingTable::new(config.chunk_pool.clone(), config.skip_list.skip_interval)?;
    for input in &inputs {
        let reader = DiskBarrelReader::from_registry(registry, &input.name)?;
        for entry in reader.terms() {
            let Some(mut cursor) = reader.cursor(entry.term)? else {
                continue;
            };
            for posting in cursor.read_to_end(None)? {
                for (&position, &sub_position) in
                    posting.positions.iter().zip(&posting.sub_positions)
                {
                    table.add_location(
                        entry.term,
                        posting.doc.doc_id,
                        posting.doc.doc_len,
                        position,
                        sub_position,
                    )?;
                }
            }
        }
    }

    let mut merged = BarrelInfo::new(registry.new_barrel()?);
    for input in &inputs {
        for (&collection, &base) in &input.base_doc_ids {
            merged
                .base_doc_ids
                .entry(collection)
                .and_modify(|b| *b = (*b).min(base))
                .or_insert(base);
        }
        if input.doc_count > 0 {
            merged.max_doc_id = merged.max_doc_id.max(input.max_doc_id);
        }
        merged.doc_count += input.doc_count;
        merged.is_update |= input.is_update;
    }
    merged.in_memory = false;

    let storage = registry.storage();
    let terms = write_barrel_files(storage.as_ref(), &merged.name, &mut table, &config.skip_list)?;
    registry.add_barrel(merged.clone())?;

    for input in &inputs {
        registry.remove_barrel(&input.name)?;
    }

    info!(
        barrel = %merged.name,
        inputs = inputs.len(),
        docs = merged.doc_count,
        terms = terms.len(),
        "merged barrels"
    );
    Ok(merged)
}

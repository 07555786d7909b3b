//! The active, in-memory barrel.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::barrel::info::{BarrelInfo, CollectionId};
use crate::barrel::reader::{TermEntry, write_vocabulary};
use crate::barrel::registry::{BarrelLease, BarrelRegistry};
use crate::barrel::{DOC_FILE_EXTENSION, POSITION_FILE_EXTENSION, barrel_file};
use crate::config::IndexConfig;
use crate::error::{QuiverError, Result};
use crate::posting::{DirtyFlag, InMemoryCursor, PostingTable, SkipListConfig, TermStats};
use crate::storage::Storage;
use crate::{DocId, TermId};

/// One occurrence of a term in a document being indexed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TermOccurrence {
    pub term: TermId,
    pub position: u32,
    pub sub_position: u32,
}

impl TermOccurrence {
    pub fn new(term: TermId, position: u32) -> Self {
        TermOccurrence {
            term,
            position,
            sub_position: 0,
        }
    }
}

/// Barrel accepting documents and serving live cursors until it is flushed.
#[derive(Debug)]
pub struct MemoryBarrel {
    name: String,
    table: Arc<RwLock<PostingTable>>,
    dirty: DirtyFlag,
    info: Mutex<BarrelInfo>,
    config: IndexConfig,
    lease: Option<BarrelLease>,
}

impl MemoryBarrel {
    /// A barrel that is not tracked by any registry.
    pub fn new(name: impl Into<String>, config: IndexConfig) -> Result<Self> {
        config.validate()?;
        let name = name.into();
        let table = PostingTable::new(
            config.chunk_pool.clone(),
            config.skip_list.skip_interval,
        )?;

        Ok(MemoryBarrel {
            info: Mutex::new(BarrelInfo::new(&name)),
            name,
            table: Arc::new(RwLock::new(table)),
            dirty: DirtyFlag::new(),
            config,
            lease: None,
        })
    }

    /// Reserve a name in `registry` and register the new barrel.
    pub fn create(registry: &BarrelRegistry, config: IndexConfig) -> Result<Self> {
        let name = registry.new_barrel()?;
        let mut barrel = Self::new(&name, config)?;
        registry.add_barrel(BarrelInfo::new(&name))?;

        let lease = registry.attach(&name)?;
        barrel.dirty = lease.dirty_flag();
        barrel.lease = Some(lease);
        Ok(barrel)
    }

    /// Current name; follows renames made through the registry.
    pub fn name(&self) -> String {
        match &self.lease {
            Some(lease) => lease.name(),
            None => self.name.clone(),
        }
    }

    pub fn info(&self) -> BarrelInfo {
        self.info.lock().clone()
    }

    pub fn doc_count(&self) -> u32 {
        self.info.lock().doc_count
    }

    /// Whether the barrel was flushed or removed and no longer accepts reads
    /// or writes.
    pub fn is_stale(&self) -> bool {
        self.dirty.is_dirty()
    }

    /// Index one document.
    ///
    /// Document ids must be strictly increasing. Occurrences may come in any
    /// order; they are indexed sorted by term and position, and the document
    /// length is their count. Occurrences of one term must not overlap: each
    /// starts at or after the previous `position + sub_position`. A document
    /// breaking either rule is rejected before anything is written. A failure
    /// part way through leaves the barrel inconsistent, so it is marked stale.
    pub fn insert_document(
        &self,
        collection: CollectionId,
        doc_id: DocId,
        occurrences: &[TermOccurrence],
    ) -> Result<()> {
        if self.dirty.is_dirty() {
            return Err(QuiverError::stale_segment(self.name()));
        }

        let mut info = self.info.lock();
        if info.doc_count > 0 && doc_id <= info.max_doc_id {
            return Err(QuiverError::contract(format!(
                "document {doc_id} is not above {} in barrel {}",
                info.max_doc_id,
                self.name()
            )));
        }

        let mut sorted = occurrences.to_vec();
        sorted.sort_unstable_by_key(|o| (o.term, o.position, o.sub_position));
        check_occurrences(doc_id, &sorted)?;
        let doc_length = u32::try_from(sorted.len()).map_err(|_| {
            QuiverError::invalid_argument(format!("document {doc_id} has too many occurrences"))
        })?;

        let mut table = self.table.write();
        for occurrence in &sorted {
            if let Err(e) = table.add_location(
                occurrence.term,
                doc_id,
                doc_length,
                occurrence.position,
                occurrence.sub_position,
            ) {
                warn!(barrel = %self.name(), doc_id, error = %e, "insert failed, barrel is now stale");
                self.dirty.mark();
                return Err(e);
            }
        }

        info.record_document(collection, doc_id);
        Ok(())
    }

    /// A live cursor over `term`, or `None` when no document contains it.
    pub fn cursor(&self, term: TermId) -> Option<InMemoryCursor> {
        if !self.table.read().contains(term) {
            return None;
        }
        Some(InMemoryCursor::new(
            self.name(),
            term,
            Arc::clone(&self.table),
            self.dirty.clone(),
        ))
    }

    pub fn term_stats(&self, term: TermId) -> Option<TermStats> {
        self.table.read().get(term).map(|p| TermStats {
            df: p.df(),
            tdf: p.tdf(),
            ctf: p.ctf(),
        })
    }

    /// Number of distinct terms.
    pub fn term_count(&self) -> usize {
        self.table.read().len()
    }

    pub fn memory_usage(&self) -> usize {
        self.table.read().memory_usage()
    }

    /// Whether the arena outgrew the configured flush threshold.
    pub fn should_flush(&self) -> bool {
        self.memory_usage() >= self.config.flush_threshold
    }

    /// Write the barrel's files to `storage`.
    ///
    /// Live cursors fail with [`QuiverError::StaleSegment`] afterwards and the
    /// chunks go back to the pool.
    ///
    /// The files are named after the barrel's current name. A registry rename
    /// waits until they are written.
    pub fn flush(&self, storage: &dyn Storage) -> Result<BarrelInfo> {
        let _files = self.lease.as_ref().map(|lease| lease.lock_files());
        let name = self.name();
        if self.dirty.is_dirty() {
            return Err(QuiverError::stale_segment(name));
        }

        let mut info = self.info.lock();
        let mut table = self.table.write();
        let terms = write_barrel_files(storage, &name, &mut table, &self.config.skip_list)?;

        self.dirty.mark();
        table.clear();
        info.name = name;
        info.in_memory = false;

        info!(
            barrel = %info.name,
            docs = info.doc_count,
            terms = terms.len(),
            "flushed barrel"
        );
        Ok(info.clone())
    }

    /// Flush into the registry's storage and record the completed flush.
    ///
    /// Returns the registered metadata, whose name is the barrel's name at
    /// the time the flush was recorded.
    pub fn flush_into(&self, registry: &BarrelRegistry) -> Result<BarrelInfo> {
        let info = self.flush(registry.storage().as_ref())?;
        match &self.lease {
            Some(lease) => registry.complete_flush(lease, info),
            None => {
                registry.flush_completed(info.clone())?;
                Ok(info)
            }
        }
    }
}

/// Reject occurrences of one term that overlap. `sorted` is ordered by term,
/// position and sub-position.
fn check_occurrences(doc_id: DocId, sorted: &[TermOccurrence]) -> Result<()> {
    for pair in sorted.windows(2) {
        let (prev, next) = (pair[0], pair[1]);
        let end = prev.position.saturating_add(prev.sub_position);
        if prev.term == next.term && next.position < end {
            return Err(QuiverError::contract(format!(
                "term {} at position {} overlaps the occurrence ending at {end} in document {doc_id}",
                next.term, next.position
            )));
        }
    }
    Ok(())
}

/// Serialize every posting of `table` into the files of barrel `name`.
///
/// Terms are written in ascending order; the returned vocabulary is what was
/// stored in the `.voc` file.
pub fn write_barrel_files(
    storage: &dyn Storage,
    name: &str,
    table: &mut PostingTable,
    skip_config: &SkipListConfig,
) -> Result<Vec<TermEntry>> {
    let mut doc_out = storage.create_output(&barrel_file(name, DOC_FILE_EXTENSION))?;
    let mut pos_out = storage.create_output(&barrel_file(name, POSITION_FILE_EXTENSION))?;

    let mut vocabulary = Vec::with_capacity(table.len());
    for term in table.sorted_terms() {
        let Some((posting, pool)) = table.posting_mut(term) else {
            continue;
        };
        if posting.df() == 0 {
            continue;
        }

        let flushed = posting.write(pool, skip_config, &mut *doc_out, &mut *pos_out)?;
        vocabulary.push(TermEntry {
            term,
            offset: flushed.doc_range.start,
            df: flushed.descriptor.df,
            ctf: flushed.descriptor.ctf,
        });
    }

    doc_out.flush_and_sync()?;
    doc_out.close()?;
    pos_out.flush_and_sync()?;
    pos_out.close()?;
    write_vocabulary(storage, name, &vocabulary)?;

    debug!(barrel = name, terms = vocabulary.len(), "wrote barrel files");
    Ok(vocabulary)
}

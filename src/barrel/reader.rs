//! Reading flushed barrels.

use std::sync::Arc;

use tracing::debug;

use crate::TermId;
use crate::barrel::registry::{BarrelLease, BarrelRegistry};
use crate::barrel::{
    DOC_FILE_EXTENSION, POSITION_FILE_EXTENSION, VOCABULARY_FILE_EXTENSION, barrel_file,
};
use crate::error::{QuiverError, Result};
use crate::posting::{DirtyFlag, OnDiskCursor, TermStats};
use crate::storage::{Storage, StructReader, StructWriter};

const VOCABULARY_MAGIC: u32 = 0x5156_4F43; // "QVOC"
const VOCABULARY_VERSION: u8 = 1;

/// Vocabulary entry of one flushed term.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TermEntry {
    pub term: TermId,
    /// Offset of the term's descriptor in the doc file.
    pub offset: u64,
    pub df: u32,
    pub ctf: u64,
}

/// Write the vocabulary of barrel `name`. Entries must be sorted by term.
pub fn write_vocabulary(storage: &dyn Storage, name: &str, entries: &[TermEntry]) -> Result<()> {
    let output = storage.create_output(&barrel_file(name, VOCABULARY_FILE_EXTENSION))?;
    let mut writer = StructWriter::new(output);

    writer.write_u32(VOCABULARY_MAGIC)?;
    writer.write_u8(VOCABULARY_VERSION)?;
    writer.write_varint(entries.len() as u64)?;

    let mut previous = 0;
    for entry in entries {
        // Terms are delta coded, the first against zero.
        let gap = entry.term.checked_sub(previous).ok_or_else(|| {
            QuiverError::contract(format!("vocabulary term {} follows {previous}", entry.term))
        })?;
        writer.write_varint(gap as u64)?;
        writer.write_varint(entry.offset)?;
        writer.write_varint(entry.df as u64)?;
        writer.write_varint(entry.ctf)?;
        previous = entry.term;
    }

    writer.close()
}

/// Read and verify the vocabulary of barrel `name`.
pub fn read_vocabulary(storage: &dyn Storage, name: &str) -> Result<Vec<TermEntry>> {
    let file = barrel_file(name, VOCABULARY_FILE_EXTENSION);
    let mut reader = StructReader::new(storage.open_input(&file)?)?;

    let magic = reader.read_u32()?;
    if magic != VOCABULARY_MAGIC {
        return Err(QuiverError::corruption(format!(
            "{file}: bad magic {magic:#x}"
        )));
    }
    let version = reader.read_u8()?;
    if version != VOCABULARY_VERSION {
        return Err(QuiverError::corruption(format!(
            "{file}: unsupported version {version}"
        )));
    }

    let count = reader.read_varint()?;
    let mut entries = Vec::with_capacity(count.min(1 << 20) as usize);
    let mut next_term: u64 = 0;
    for _ in 0..count {
        next_term += reader.read_varint()?;
        let term = TermId::try_from(next_term).map_err(|_| {
            QuiverError::corruption(format!("{file}: term id {next_term} overflows"))
        })?;
        let offset = reader.read_varint()?;
        let df = u32::try_from(reader.read_varint()?)
            .map_err(|_| QuiverError::corruption(format!("{file}: df of term {term} overflows")))?;
        let ctf = reader.read_varint()?;
        entries.push(TermEntry {
            term,
            offset,
            df,
            ctf,
        });
    }

    if !reader.verify_checksum()? {
        return Err(QuiverError::corruption(format!("{file}: checksum mismatch")));
    }
    reader.close()?;
    Ok(entries)
}

/// Read access to the terms of one flushed barrel.
#[derive(Debug)]
pub struct DiskBarrelReader {
    name: String,
    storage: Arc<dyn Storage>,
    terms: Vec<TermEntry>,
    dirty: DirtyFlag,
    lease: Option<BarrelLease>,
}

impl DiskBarrelReader {
    /// Open barrel `name` directly from storage. Cursors fail once `dirty` is
    /// marked.
    pub fn open(storage: Arc<dyn Storage>, name: &str, dirty: DirtyFlag) -> Result<Self> {
        let terms = read_vocabulary(storage.as_ref(), name)?;
        debug!(barrel = name, terms = terms.len(), "opened barrel");

        Ok(DiskBarrelReader {
            name: name.to_string(),
            storage,
            terms,
            dirty,
            lease: None,
        })
    }

    /// Open a flushed barrel of `registry`, holding a lease on it for the
    /// lifetime of the reader.
    pub fn from_registry(registry: &BarrelRegistry, name: &str) -> Result<Self> {
        let snapshot = registry.snapshot();
        let info = snapshot
            .get(name)
            .ok_or_else(|| QuiverError::barrel(format!("barrel {name} is not registered")))?;
        if info.in_memory {
            return Err(QuiverError::barrel(format!(
                "barrel {name} has not been flushed"
            )));
        }

        let lease = registry.attach(name)?;
        let mut reader = {
            let _files = lease.lock_files();
            Self::open(Arc::clone(registry.storage()), name, lease.dirty_flag())?
        };
        reader.lease = Some(lease);
        Ok(reader)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Vocabulary sorted by term.
    pub fn terms(&self) -> &[TermEntry] {
        &self.terms
    }

    pub fn term_count(&self) -> usize {
        self.terms.len()
    }

    pub fn is_stale(&self) -> bool {
        self.dirty.is_dirty()
    }

    pub fn lookup(&self, term: TermId) -> Option<&TermEntry> {
        self.terms
            .binary_search_by_key(&term, |e| e.term)
            .ok()
            .map(|i| &self.terms[i])
    }

    /// Term statistics recorded in the vocabulary.
    pub fn term_stats(&self, term: TermId) -> Option<TermStats> {
        self.lookup(term).map(|e| TermStats {
            df: e.df,
            tdf: e.df,
            ctf: e.ctf,
        })
    }

    /// A cursor over `term`, or `None` when the barrel does not contain it.
    pub fn cursor(&self, term: TermId) -> Result<Option<OnDiskCursor>> {
        let Some(entry) = self.lookup(term) else {
            return Ok(None);
        };
        if self.dirty.is_dirty() {
            return Err(QuiverError::stale_segment(format!(
                "{} (term {term})",
                self.name
            )));
        }

        let _files = self.lease.as_ref().map(|lease| lease.lock_files());
        let doc_input = self
            .storage
            .open_input(&barrel_file(&self.name, DOC_FILE_EXTENSION))?;
        let pos_input = self
            .storage
            .open_input(&barrel_file(&self.name, POSITION_FILE_EXTENSION))?;

        OnDiskCursor::open(
            self.name.clone(),
            term,
            doc_input,
            pos_input,
            entry.offset,
            self.dirty.clone(),
        )
        .map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use std::io::Write;

    fn entries() -> Vec<TermEntry> {
        vec![
            TermEntry {
                term: 3,
                offset: 0,
                df: 2,
                ctf: 5,
            },
            TermEntry {
                term: 900,
                offset: 41,
                df: 1,
                ctf: 1,
            },
        ]
    }

    #[test]
    fn test_vocabulary_round_trip() {
        let storage = MemoryStorage::new_default();
        write_vocabulary(&storage, "_0", &entries()).unwrap();
        assert_eq!(read_vocabulary(&storage, "_0").unwrap(), entries());

        write_vocabulary(&storage, "_1", &[]).unwrap();
        assert!(read_vocabulary(&storage, "_1").unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_vocabulary() {
        let storage = MemoryStorage::new_default();
        write_vocabulary(&storage, "_0", &entries()).unwrap();

        let mut bytes = Vec::new();
        std::io::Read::read_to_end(&mut storage.open_input("_0.voc").unwrap(), &mut bytes)
            .unwrap();
        let last = bytes.len() - 5;
        bytes[last] ^= 0x01;
        storage.create_output("_0.voc").unwrap().write_all(&bytes).unwrap();

        assert!(matches!(
            read_vocabulary(&storage, "_0"),
            Err(QuiverError::Corruption(_))
        ));
    }

    #[test]
    fn test_lookup_and_stale_reader() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new_default());
        write_vocabulary(storage.as_ref(), "_0", &entries()).unwrap();

        let dirty = DirtyFlag::new();
        let reader = DiskBarrelReader::open(storage, "_0", dirty.clone()).unwrap();
        assert_eq!(reader.term_count(), 2);
        assert_eq!(reader.term_stats(900).unwrap().ctf, 1);
        assert!(reader.lookup(4).is_none());
        assert!(reader.cursor(4).unwrap().is_none());

        dirty.mark();
        assert!(matches!(
            reader.cursor(3),
            Err(QuiverError::StaleSegment(_))
        ));
    }
}

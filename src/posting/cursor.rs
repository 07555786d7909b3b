//! Posting cursors.
//!
//! [`InMemoryCursor`] reads a term straight from the live chunk chains of an
//! active barrel, taking the table's read lock for the duration of each call
//! only. [`OnDiskCursor`] reads a flushed term from the barrel's doc and
//! position files and uses the term's skip list, if it has one, to jump
//! ahead in [`PostingCursor::decode_to`].

use std::io::{Read, Seek, SeekFrom};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use crate::error::{QuiverError, Result};
use crate::posting::decoder::{DecodeState, StreamLimits};
use crate::posting::skip::SkipList;
use crate::posting::source::{ChainPosition, ChainSource, StreamSource};
use crate::posting::table::PostingTable;
use crate::posting::{ChunkDescriptor, DirtyFlag, DocumentFilter, PostingDescriptor};
use crate::storage::StorageInput;
use crate::util::varint;
use crate::{DocId, TermId};

pub use crate::posting::decoder::{CursorState, DocEntry, PostingEntry};

/// Statistics of one term.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TermStats {
    pub df: u32,
    pub tdf: u32,
    pub ctf: u64,
}

/// Decoding interface shared by live and flushed postings.
pub trait PostingCursor: Send {
    /// Term this cursor decodes.
    fn term(&self) -> TermId;

    fn state(&self) -> CursorState;

    /// Statistics of the unfiltered posting.
    fn term_stats(&self) -> Result<TermStats>;

    /// The document the cursor is positioned on.
    fn current(&self) -> Option<DocEntry>;

    /// Decode up to `docs.len()` entries.
    ///
    /// All three buffers must have the same length. Returns `None` once the
    /// posting is exhausted, otherwise the number of entries copied, which is
    /// smaller than the number decoded when `filter` deletes some of them.
    fn decode_next(
        &mut self,
        docs: &mut [DocId],
        freqs: &mut [u32],
        doc_lens: &mut [u32],
        filter: Option<&dyn DocumentFilter>,
    ) -> Result<Option<usize>>;

    /// Fill `out` with the next positions of the documents decoded by the
    /// last batch.
    fn decode_next_positions(&mut self, out: &mut [u32]) -> Result<usize>;

    /// Fill `positions` and `sub_positions` with the next occurrences of the
    /// documents decoded by the last batch.
    fn decode_next_locations(
        &mut self,
        positions: &mut [u32],
        sub_positions: &mut [u32],
    ) -> Result<usize>;

    /// Decode one group of positions per entry of `freqs`, which must match
    /// the frequencies of the decoded documents.
    fn decode_positions_grouped(&mut self, out: &mut [u32], freqs: &[u32]) -> Result<usize>;

    /// Move to the first live document with id `>= target`.
    fn decode_to(
        &mut self,
        target: DocId,
        filter: Option<&dyn DocumentFilter>,
    ) -> Result<Option<DocId>>;

    /// Restart position deltas from zero without moving the document cursor.
    fn reset_position(&mut self);

    /// Decode every remaining entry together with its occurrences.
    fn read_to_end(&mut self, filter: Option<&dyn DocumentFilter>) -> Result<Vec<PostingEntry>> {
        const BATCH: usize = 128;

        let mut docs = [0; BATCH];
        let mut freqs = [0; BATCH];
        let mut lens = [0; BATCH];
        let mut entries = Vec::new();

        while let Some(count) = self.decode_next(&mut docs, &mut freqs, &mut lens, filter)? {
            let total: usize = freqs[..count].iter().map(|&f| f as usize).sum();
            let mut positions = vec![0; total];
            let mut sub_positions = vec![0; total];
            self.decode_next_locations(&mut positions, &mut sub_positions)?;

            let mut offset = 0;
            for i in 0..count {
                let end = offset + freqs[i] as usize;
                entries.push(PostingEntry {
                    doc: DocEntry {
                        doc_id: docs[i],
                        freq: freqs[i],
                        doc_len: lens[i],
                    },
                    positions: positions[offset..end].to_vec(),
                    sub_positions: sub_positions[offset..end].to_vec(),
                });
                offset = end;
            }
        }
        Ok(entries)
    }
}

fn check_dirty(dirty: &DirtyFlag, source: &str, term: TermId) -> Result<()> {
    if dirty.is_dirty() {
        warn!(source, term, "read attempted on a stale posting");
        return Err(QuiverError::stale_segment(format!(
            "{source} (term {term})"
        )));
    }
    Ok(())
}

/// Cursor over a term of an active, unflushed barrel.
#[derive(Debug)]
pub struct InMemoryCursor {
    source: String,
    term: TermId,
    table: Arc<RwLock<PostingTable>>,
    dirty: DirtyFlag,
    state: DecodeState,
    docs_at: ChainPosition,
    positions_at: ChainPosition,
}

impl InMemoryCursor {
    pub fn new(
        source: impl Into<String>,
        term: TermId,
        table: Arc<RwLock<PostingTable>>,
        dirty: DirtyFlag,
    ) -> Self {
        InMemoryCursor {
            source: source.into(),
            term,
            table,
            dirty,
            state: DecodeState::new(),
            docs_at: ChainPosition::default(),
            positions_at: ChainPosition::default(),
        }
    }

    /// Run `f` against sources resumed from the saved chain positions.
    fn with_sources<R>(
        &mut self,
        f: impl FnOnce(
            &mut DecodeState,
            &mut ChainSource<'_>,
            &mut ChainSource<'_>,
            &StreamLimits,
        ) -> Result<R>,
    ) -> Result<R> {
        check_dirty(&self.dirty, &self.source, self.term)?;

        let table = self.table.read();
        let posting = table
            .get(self.term)
            .ok_or_else(|| QuiverError::stale_segment(format!("{} (term {})", self.source, self.term)))?;
        let limits = StreamLimits {
            df: posting.df(),
            committed: posting.tdf(),
            live: posting.pending_doc(),
        };

        let mut docs = ChainSource::resume(table.pool(), posting.doc_head(), self.docs_at);
        let mut positions =
            ChainSource::resume(table.pool(), posting.position_head(), self.positions_at);
        let result = f(&mut self.state, &mut docs, &mut positions, &limits);

        self.docs_at = docs.position();
        self.positions_at = positions.position();
        result
    }
}

impl PostingCursor for InMemoryCursor {
    fn term(&self) -> TermId {
        self.term
    }

    fn state(&self) -> CursorState {
        self.state.state()
    }

    fn term_stats(&self) -> Result<TermStats> {
        check_dirty(&self.dirty, &self.source, self.term)?;
        let table = self.table.read();
        let posting = table
            .get(self.term)
            .ok_or_else(|| QuiverError::stale_segment(self.source.clone()))?;
        Ok(TermStats {
            df: posting.df(),
            tdf: posting.tdf(),
            ctf: posting.ctf(),
        })
    }

    fn current(&self) -> Option<DocEntry> {
        self.state.current()
    }

    fn decode_next(
        &mut self,
        docs: &mut [DocId],
        freqs: &mut [u32],
        doc_lens: &mut [u32],
        filter: Option<&dyn DocumentFilter>,
    ) -> Result<Option<usize>> {
        self.with_sources(|state, doc_source, _, limits| {
            state.decode_next(doc_source, limits, docs, freqs, doc_lens, filter)
        })
    }

    fn decode_next_positions(&mut self, out: &mut [u32]) -> Result<usize> {
        self.with_sources(|state, _, positions, _| state.decode_next_positions(positions, out))
    }

    fn decode_next_locations(
        &mut self,
        positions: &mut [u32],
        sub_positions: &mut [u32],
    ) -> Result<usize> {
        self.with_sources(|state, _, source, _| {
            state.decode_next_locations(source, positions, sub_positions)
        })
    }

    fn decode_positions_grouped(&mut self, out: &mut [u32], freqs: &[u32]) -> Result<usize> {
        self.with_sources(|state, _, positions, _| {
            state.decode_positions_grouped(positions, out, freqs)
        })
    }

    fn decode_to(
        &mut self,
        target: DocId,
        filter: Option<&dyn DocumentFilter>,
    ) -> Result<Option<DocId>> {
        self.with_sources(|state, docs, _, limits| state.decode_to(docs, limits, target, filter))
    }

    fn reset_position(&mut self) {
        self.state.reset_position();
    }
}

/// Cursor over a term of a flushed barrel.
#[derive(Debug)]
pub struct OnDiskCursor {
    source: String,
    term: TermId,
    descriptor: PostingDescriptor,
    last_doc_id: DocId,
    docs: StreamSource,
    positions: StreamSource,
    skip: Option<SkipList>,
    dirty: DirtyFlag,
    state: DecodeState,
}

impl OnDiskCursor {
    /// Open the posting whose descriptor starts at `offset` in the doc file.
    pub fn open(
        source: impl Into<String>,
        term: TermId,
        mut doc_input: Box<dyn StorageInput>,
        mut pos_input: Box<dyn StorageInput>,
        offset: u64,
        dirty: DirtyFlag,
    ) -> Result<Self> {
        let source = source.into();
        check_dirty(&dirty, &source, term)?;

        let doc_size = doc_input.size()?;
        doc_input.seek(SeekFrom::Start(offset))?;
        let (descriptor, descriptor_len) = PostingDescriptor::read_from(&mut doc_input)?;
        let (chunk, chunk_header_len) = ChunkDescriptor::read_from(&mut doc_input)?;

        if descriptor.tdf != descriptor.df {
            return Err(QuiverError::corruption(format!(
                "term {term} flushed with {} of {} documents committed",
                descriptor.tdf, descriptor.df
            )));
        }

        let doc_base = offset + (descriptor_len + chunk_header_len) as u64;
        let skip_header = doc_base
            .checked_add(chunk.chunk_len)
            .filter(|&end| end < doc_size)
            .ok_or_else(|| QuiverError::corruption(format!("term {term} doc stream truncated")))?;
        doc_input.seek(SeekFrom::Start(skip_header))?;
        let (skip_len, skip_len_bytes) = varint::read_u64(&mut doc_input)?;

        let expected = chunk_header_len as u64 + chunk.chunk_len + skip_len_bytes as u64 + skip_len;
        if expected != descriptor.doc_stream_len || skip_header + skip_len_bytes as u64 + skip_len > doc_size {
            return Err(QuiverError::corruption(format!(
                "term {term} doc stream length {} disagrees with its sections ({expected})",
                descriptor.doc_stream_len
            )));
        }

        let skip = if skip_len > 0 {
            let mut bytes = vec![0u8; skip_len as usize];
            doc_input.read_exact(&mut bytes)?;
            Some(SkipList::decode(&bytes)?)
        } else {
            None
        };

        let trailer_at = descriptor.position_stream_offset + descriptor.position_stream_len;
        if trailer_at >= pos_input.size()? {
            return Err(QuiverError::corruption(format!(
                "term {term} position stream truncated"
            )));
        }
        pos_input.seek(SeekFrom::Start(trailer_at))?;
        let (trailer, _) = varint::read_u64(&mut pos_input)?;
        if trailer != descriptor.position_stream_len {
            return Err(QuiverError::corruption(format!(
                "term {term} position trailer {trailer} disagrees with descriptor {}",
                descriptor.position_stream_len
            )));
        }

        let docs = StreamSource::new(doc_input, doc_base, chunk.chunk_len)?;
        let positions = StreamSource::new(
            pos_input,
            descriptor.position_stream_offset,
            descriptor.position_stream_len,
        )?;

        Ok(OnDiskCursor {
            source,
            term,
            descriptor,
            last_doc_id: chunk.last_doc_id,
            docs,
            positions,
            skip,
            dirty,
            state: DecodeState::new(),
        })
    }

    pub fn descriptor(&self) -> &PostingDescriptor {
        &self.descriptor
    }

    /// Last document of the posting.
    pub fn last_doc_id(&self) -> DocId {
        self.last_doc_id
    }

    pub fn skip_list(&self) -> Option<&SkipList> {
        self.skip.as_ref()
    }

    fn limits(&self) -> StreamLimits {
        StreamLimits::committed(self.descriptor.df)
    }
}

impl PostingCursor for OnDiskCursor {
    fn term(&self) -> TermId {
        self.term
    }

    fn state(&self) -> CursorState {
        self.state.state()
    }

    fn term_stats(&self) -> Result<TermStats> {
        check_dirty(&self.dirty, &self.source, self.term)?;
        Ok(TermStats {
            df: self.descriptor.df,
            tdf: self.descriptor.tdf,
            ctf: self.descriptor.ctf,
        })
    }

    fn current(&self) -> Option<DocEntry> {
        self.state.current()
    }

    fn decode_next(
        &mut self,
        docs: &mut [DocId],
        freqs: &mut [u32],
        doc_lens: &mut [u32],
        filter: Option<&dyn DocumentFilter>,
    ) -> Result<Option<usize>> {
        check_dirty(&self.dirty, &self.source, self.term)?;
        let limits = self.limits();
        self.state
            .decode_next(&mut self.docs, &limits, docs, freqs, doc_lens, filter)
    }

    fn decode_next_positions(&mut self, out: &mut [u32]) -> Result<usize> {
        check_dirty(&self.dirty, &self.source, self.term)?;
        self.state.decode_next_positions(&mut self.positions, out)
    }

    fn decode_next_locations(
        &mut self,
        positions: &mut [u32],
        sub_positions: &mut [u32],
    ) -> Result<usize> {
        check_dirty(&self.dirty, &self.source, self.term)?;
        self.state
            .decode_next_locations(&mut self.positions, positions, sub_positions)
    }

    fn decode_positions_grouped(&mut self, out: &mut [u32], freqs: &[u32]) -> Result<usize> {
        check_dirty(&self.dirty, &self.source, self.term)?;
        self.state
            .decode_positions_grouped(&mut self.positions, out, freqs)
    }

    fn decode_to(
        &mut self,
        target: DocId,
        filter: Option<&dyn DocumentFilter>,
    ) -> Result<Option<DocId>> {
        check_dirty(&self.dirty, &self.source, self.term)?;

        // Checkpoints cover the document they name, so look strictly below
        // the target to avoid stepping past it.
        if target > 0
            && let Some(skip) = &self.skip
            && let Some(point) = skip.skip_to(target - 1)
            && self.state.can_jump_to(&point)
        {
            self.docs.seek_to(point.entry.doc_offset)?;
            self.positions.seek_to(point.entry.pos_offset)?;
            self.state.jump_to(&point);
        }

        let limits = self.limits();
        self.state.decode_to(&mut self.docs, &limits, target, filter)
    }

    fn reset_position(&mut self) {
        self.state.reset_position();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::posting::chunk::ChunkPoolConfig;
    use crate::posting::skip::SkipListConfig;
    use crate::posting::writer::InMemoryPosting;
    use crate::posting::ChunkPool;
    use crate::storage::{MemoryStorage, Storage};
    use std::io::Write;

    fn live_table(occurrences: &[(DocId, u32)]) -> Arc<RwLock<PostingTable>> {
        let mut table = PostingTable::new(ChunkPoolConfig::default(), 16).unwrap();
        for &(doc, pos) in occurrences {
            table.add_location(1, doc, 50, pos, 0).unwrap();
        }
        Arc::new(RwLock::new(table))
    }

    fn flush(occurrences: &[(DocId, u32)], skip: &SkipListConfig) -> (MemoryStorage, u64) {
        let mut pool = ChunkPool::new(ChunkPoolConfig::default()).unwrap();
        let mut posting = InMemoryPosting::new(skip.skip_interval);
        for &(doc, pos) in occurrences {
            posting.add_location(&mut pool, doc, 50, pos, 0).unwrap();
        }

        let storage = MemoryStorage::new_default();
        let mut dfp = storage.create_output("_0.dfp").unwrap();
        let mut pop = storage.create_output("_0.pop").unwrap();
        // A leading byte so the posting does not start at offset zero.
        dfp.write_all(&[0xAB]).unwrap();
        let flushed = posting.write(&mut pool, skip, &mut *dfp, &mut *pop).unwrap();
        dfp.close().unwrap();
        pop.close().unwrap();
        (storage, flushed.doc_range.start)
    }

    fn open(storage: &MemoryStorage, offset: u64, dirty: DirtyFlag) -> Result<OnDiskCursor> {
        OnDiskCursor::open(
            "_0",
            1,
            storage.open_input("_0.dfp").unwrap(),
            storage.open_input("_0.pop").unwrap(),
            offset,
            dirty,
        )
    }

    #[test]
    fn test_in_memory_cursor_sees_live_document() {
        let table = live_table(&[(1, 0), (1, 5), (3, 2)]);
        let mut cursor = InMemoryCursor::new("_0", 1, Arc::clone(&table), DirtyFlag::new());

        let entries = cursor.read_to_end(None).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].doc.doc_id, 1);
        assert_eq!(entries[0].positions, vec![0, 5]);
        assert_eq!(entries[1].doc.freq, 1);
        assert_eq!(entries[1].positions, vec![2]);

        let stats = cursor.term_stats().unwrap();
        assert_eq!((stats.df, stats.tdf, stats.ctf), (2, 1, 3));
    }

    #[test]
    fn test_in_memory_cursor_tolerates_growth() {
        let table = live_table(&[(1, 0), (4, 1)]);
        let mut cursor = InMemoryCursor::new("_0", 1, Arc::clone(&table), DirtyFlag::new());

        let (mut d, mut f, mut l) = ([0; 4], [0; 4], [0; 4]);
        assert_eq!(cursor.decode_next(&mut d, &mut f, &mut l, None).unwrap(), Some(2));
        assert_eq!(&f[..2], &[1, 1]);

        // Document 4 picks up another occurrence, then document 9 arrives.
        {
            let mut table = table.write();
            table.add_location(1, 4, 50, 6, 0).unwrap();
            table.add_location(1, 9, 50, 3, 0).unwrap();
        }

        assert_eq!(cursor.decode_next(&mut d, &mut f, &mut l, None).unwrap(), Some(1));
        assert_eq!((d[0], f[0]), (9, 1));
        let mut out = [0; 1];
        cursor.decode_next_positions(&mut out).unwrap();
        assert_eq!(out, [3]);
    }

    #[test]
    fn test_dirty_cursor_fails_fast() {
        let table = live_table(&[(1, 0)]);
        let dirty = DirtyFlag::new();
        let mut cursor = InMemoryCursor::new("_0", 1, table, dirty.clone());
        dirty.mark();

        let err = cursor.decode_to(0, None).unwrap_err();
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_on_disk_matches_in_memory() {
        let occurrences: Vec<(DocId, u32)> = (0..300u32)
            .flat_map(|i| (0..(i % 3 + 1)).map(move |p| (i * 5 + 2, p * 4)))
            .collect();
        let table = live_table(&occurrences);
        let mut memory = InMemoryCursor::new("_0", 1, table, DirtyFlag::new());

        let (storage, offset) = flush(&occurrences, &SkipListConfig::default());
        let mut disk = open(&storage, offset, DirtyFlag::new()).unwrap();
        assert!(disk.skip_list().is_some());
        assert_eq!(disk.last_doc_id(), 299 * 5 + 2);

        assert_eq!(memory.read_to_end(None).unwrap(), disk.read_to_end(None).unwrap());
        assert_eq!(disk.state(), CursorState::Exhausted);
    }

    #[test]
    fn test_skip_assisted_decode_to() {
        let occurrences: Vec<(DocId, u32)> = (0..500u32).map(|i| (i * 4 + 1, i % 7)).collect();
        let skip = SkipListConfig {
            skip_interval: 4,
            level_factor: 2,
            max_levels: 5,
            threshold: 8,
        };
        let (storage, offset) = flush(&occurrences, &skip);

        for target in [0, 1, 2, 17, 64, 65, 66, 1000, 1997, 1998, 5000] {
            let mut cursor = open(&storage, offset, DirtyFlag::new()).unwrap();
            let expected = occurrences.iter().map(|o| o.0).find(|&d| d >= target);
            assert_eq!(cursor.decode_to(target, None).unwrap(), expected, "target {target}");

            if let Some(doc) = expected {
                let mut out = [0; 1];
                cursor.decode_next_positions(&mut out).unwrap();
                assert_eq!(out[0], ((doc - 1) / 4) % 7);
            }
        }

        // Successive targets only move forward.
        let mut cursor = open(&storage, offset, DirtyFlag::new()).unwrap();
        assert_eq!(cursor.decode_to(400, None).unwrap(), Some(401));
        assert_eq!(cursor.decode_to(100, None).unwrap(), Some(401));
        assert_eq!(cursor.decode_to(1200, None).unwrap(), Some(1201));
    }

    #[test]
    fn test_corrupt_trailer() {
        let (storage, offset) = flush(&[(1, 0), (2, 0)], &SkipListConfig::default());
        let mut bytes = Vec::new();
        storage.open_input("_0.pop").unwrap().read_to_end(&mut bytes).unwrap();
        *bytes.last_mut().unwrap() += 1;
        storage.create_output("_0.pop").unwrap().write_all(&bytes).unwrap();

        let err = open(&storage, offset, DirtyFlag::new()).unwrap_err();
        assert!(matches!(err, QuiverError::Corruption(_)));
    }
}

//! In-memory posting accumulator.
//!
//! Each term of the active barrel owns an [`InMemoryPosting`] with two chunk
//! chains: the doc stream holds `(doc gap, term freq, doc length)` triples and
//! the position stream holds `(position gap, sub position)` pairs, one run per
//! document. The gap of a new document is written as soon as the document is
//! seen; its frequency and length follow once the next document arrives or
//! the posting is committed.

use std::ops::Range;

use crate::DocId;
use crate::error::{QuiverError, Result};
use crate::posting::chunk::{ChunkId, ChunkPool, CompressedPostingList};
use crate::posting::skip::{SkipListConfig, SkipListWriter};
use crate::posting::{ChunkDescriptor, PostingDescriptor};
use crate::storage::StorageOutput;
use crate::util::varint;

/// Where a posting landed in the barrel files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushedPosting {
    /// Byte range of the term in the doc file, descriptor included.
    pub doc_range: Range<u64>,
    /// Byte range of the term in the position file, trailer included.
    pub position_range: Range<u64>,
    pub descriptor: PostingDescriptor,
}

/// Live accumulator for one term.
#[derive(Debug)]
pub struct InMemoryPosting {
    doc_list: CompressedPostingList,
    pos_list: CompressedPostingList,
    skip: SkipListWriter,
    last_doc_id: DocId,
    last_position: u32,
    cur_tf: u32,
    cur_doc_len: u32,
    df: u32,
    tdf: u32,
    ctf: u64,
    pending: bool,
}

impl InMemoryPosting {
    pub fn new(skip_interval: u32) -> Self {
        InMemoryPosting {
            doc_list: CompressedPostingList::new(),
            pos_list: CompressedPostingList::new(),
            skip: SkipListWriter::new(skip_interval),
            last_doc_id: 0,
            last_position: 0,
            cur_tf: 0,
            cur_doc_len: 0,
            df: 0,
            tdf: 0,
            ctf: 0,
            pending: false,
        }
    }

    /// Record one occurrence of the term.
    ///
    /// Documents must arrive in non-decreasing id order and, within a
    /// document, positions must not move backwards past the previous
    /// `position + sub_position`.
    pub fn add_location(
        &mut self,
        pool: &mut ChunkPool,
        doc_id: DocId,
        doc_length: u32,
        position: u32,
        sub_position: u32,
    ) -> Result<()> {
        if self.df > 0 && doc_id == self.last_doc_id {
            if !self.pending {
                return Err(QuiverError::contract(format!(
                    "document {doc_id} was already committed"
                )));
            }
            if position < self.last_position {
                return Err(QuiverError::contract(format!(
                    "position {position} precedes {} in document {doc_id}",
                    self.last_position
                )));
            }

            self.pos_list
                .encode_u32(pool, position - self.last_position)?;
            self.pos_list.encode_u32(pool, sub_position)?;
            self.cur_tf += 1;
            self.cur_doc_len = doc_length;
            self.last_position = position.saturating_add(sub_position);
            return Ok(());
        }

        if self.df > 0 && doc_id < self.last_doc_id {
            return Err(QuiverError::contract(format!(
                "document {doc_id} arrived after {}",
                self.last_doc_id
            )));
        }

        self.commit(pool)?;

        self.doc_list.encode_u32(pool, doc_id - self.last_doc_id)?;
        self.pos_list.encode_u32(pool, position)?;
        self.pos_list.encode_u32(pool, sub_position)?;

        self.last_doc_id = doc_id;
        self.last_position = position.saturating_add(sub_position);
        self.cur_tf = 1;
        self.cur_doc_len = doc_length;
        self.df += 1;
        self.pending = true;
        Ok(())
    }

    /// Write the pending document's frequency and length to the doc stream.
    ///
    /// Committing twice is a no-op, so the frequency is never counted twice.
    pub fn commit(&mut self, pool: &mut ChunkPool) -> Result<()> {
        if !self.pending {
            return Ok(());
        }

        self.doc_list.encode_u32(pool, self.cur_tf)?;
        self.doc_list.encode_u32(pool, self.cur_doc_len)?;
        self.ctf += self.cur_tf as u64;
        self.tdf += 1;
        self.pending = false;

        self.skip.observe(
            self.tdf,
            self.last_doc_id,
            self.doc_list.real_size() as u64,
            self.pos_list.real_size() as u64,
        );
        Ok(())
    }

    /// Serialize the posting to the doc and position outputs.
    ///
    /// Afterwards the on-disk copy is the canonical one and the posting can be
    /// reset.
    pub fn write(
        &mut self,
        pool: &mut ChunkPool,
        skip_config: &SkipListConfig,
        doc_out: &mut dyn StorageOutput,
        pos_out: &mut dyn StorageOutput,
    ) -> Result<FlushedPosting> {
        self.commit(pool)?;

        let pos_start = pos_out.position();
        let pos_len = self.pos_list.write_to(pool, pos_out)?;
        varint::write_u64(pos_out, pos_len)?;
        let pos_end = pos_out.position();

        let skip_bytes = self.skip.finish(skip_config, self.df)?;
        let chunk = ChunkDescriptor {
            chunk_len: self.doc_list.real_size() as u64,
            last_doc_id: self.last_doc_id,
        };
        let descriptor = PostingDescriptor {
            doc_stream_len: chunk.encoded_len() as u64
                + chunk.chunk_len
                + varint::encoded_len_u64(skip_bytes.len() as u64) as u64
                + skip_bytes.len() as u64,
            df: self.df,
            tdf: self.tdf,
            ctf: self.ctf,
            position_stream_offset: pos_start,
            position_stream_len: pos_len,
        };

        let doc_start = doc_out.position();
        descriptor.write_to(doc_out)?;
        chunk.write_to(doc_out)?;
        let written = self.doc_list.write_to(pool, doc_out)?;
        if written != chunk.chunk_len {
            return Err(QuiverError::contract(format!(
                "doc chain wrote {written} bytes, expected {}",
                chunk.chunk_len
            )));
        }
        varint::write_u64(doc_out, skip_bytes.len() as u64)?;
        doc_out.write_all(&skip_bytes)?;
        let doc_end = doc_out.position();

        Ok(FlushedPosting {
            doc_range: doc_start..doc_end,
            position_range: pos_start..pos_end,
            descriptor,
        })
    }

    /// Release both chains and clear every counter.
    pub fn reset(&mut self, pool: &mut ChunkPool) {
        self.doc_list.reset(pool);
        self.pos_list.reset(pool);
        self.skip.reset();
        self.last_doc_id = 0;
        self.last_position = 0;
        self.cur_tf = 0;
        self.cur_doc_len = 0;
        self.df = 0;
        self.tdf = 0;
        self.ctf = 0;
        self.pending = false;
    }

    pub fn df(&self) -> u32 {
        self.df
    }

    pub fn tdf(&self) -> u32 {
        self.tdf
    }

    /// Collection term frequency, including the pending document.
    pub fn ctf(&self) -> u64 {
        if self.pending {
            self.ctf + self.cur_tf as u64
        } else {
            self.ctf
        }
    }

    pub fn last_doc_id(&self) -> DocId {
        self.last_doc_id
    }

    /// Frequency and length of the document not yet committed.
    pub fn pending_doc(&self) -> Option<(u32, u32)> {
        self.pending.then_some((self.cur_tf, self.cur_doc_len))
    }

    pub fn doc_head(&self) -> Option<ChunkId> {
        self.doc_list.head()
    }

    pub fn position_head(&self) -> Option<ChunkId> {
        self.pos_list.head()
    }

    /// Bytes held by both chains, slack included.
    pub fn memory_usage(&self) -> usize {
        self.doc_list.total_size() + self.pos_list.total_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::posting::chunk::ChunkPoolConfig;
    use crate::posting::source::{ByteSource, ChainPosition, ChainSource};
    use crate::storage::{MemoryStorage, Storage};

    fn pool() -> ChunkPool {
        ChunkPool::new(ChunkPoolConfig::default()).unwrap()
    }

    #[test]
    fn test_statistics() {
        let mut pool = pool();
        let mut posting = InMemoryPosting::new(16);

        posting.add_location(&mut pool, 1, 10, 0, 0).unwrap();
        posting.add_location(&mut pool, 1, 10, 5, 0).unwrap();
        assert_eq!(posting.df(), 1);
        assert_eq!(posting.tdf(), 0);
        assert_eq!(posting.ctf(), 2);
        assert_eq!(posting.pending_doc(), Some((2, 10)));

        posting.add_location(&mut pool, 3, 7, 2, 0).unwrap();
        assert_eq!(posting.df(), 2);
        assert_eq!(posting.tdf(), 1);
        assert_eq!(posting.ctf(), 3);

        posting.commit(&mut pool).unwrap();
        posting.commit(&mut pool).unwrap();
        assert_eq!(posting.tdf(), 2);
        assert_eq!(posting.ctf(), 3);
        assert_eq!(posting.pending_doc(), None);
    }

    #[test]
    fn test_stream_layout() {
        let mut pool = pool();
        let mut posting = InMemoryPosting::new(16);
        posting.add_location(&mut pool, 4, 9, 3, 1).unwrap();
        posting.add_location(&mut pool, 4, 9, 10, 0).unwrap();
        posting.add_location(&mut pool, 6, 2, 1, 0).unwrap();
        posting.commit(&mut pool).unwrap();

        let mut docs = ChainSource::resume(&pool, posting.doc_head(), ChainPosition::default());
        let triples: Vec<u32> = (0..6).map(|_| docs.read_u32().unwrap()).collect();
        assert_eq!(triples, vec![4, 2, 9, 2, 1, 2]);

        let mut positions =
            ChainSource::resume(&pool, posting.position_head(), ChainPosition::default());
        let pairs: Vec<u32> = (0..6).map(|_| positions.read_u32().unwrap()).collect();
        // 10 - (3 + 1) = 6; the second document starts again from zero.
        assert_eq!(pairs, vec![3, 1, 6, 0, 1, 0]);
    }

    #[test]
    fn test_contract_violations() {
        let mut pool = pool();
        let mut posting = InMemoryPosting::new(16);
        posting.add_location(&mut pool, 5, 1, 10, 0).unwrap();

        let err = posting.add_location(&mut pool, 5, 1, 4, 0).unwrap_err();
        assert!(err.is_contract_violation());

        let err = posting.add_location(&mut pool, 2, 1, 0, 0).unwrap_err();
        assert!(err.is_contract_violation());

        posting.commit(&mut pool).unwrap();
        let err = posting.add_location(&mut pool, 5, 1, 20, 0).unwrap_err();
        assert!(err.is_contract_violation());
    }

    #[test]
    fn test_write_layout() {
        let mut pool = pool();
        let mut posting = InMemoryPosting::new(16);
        posting.add_location(&mut pool, 1, 3, 0, 0).unwrap();
        posting.add_location(&mut pool, 1, 3, 5, 0).unwrap();
        posting.add_location(&mut pool, 3, 8, 2, 0).unwrap();

        let storage = MemoryStorage::new_default();
        let mut dfp = storage.create_output("_0.dfp").unwrap();
        let mut pop = storage.create_output("_0.pop").unwrap();
        let flushed = posting
            .write(&mut pool, &SkipListConfig::default(), &mut *dfp, &mut *pop)
            .unwrap();

        let descriptor = flushed.descriptor;
        assert_eq!(descriptor.df, 2);
        assert_eq!(descriptor.tdf, 2);
        assert_eq!(descriptor.ctf, 3);
        assert_eq!(descriptor.position_stream_offset, 0);
        assert_eq!(descriptor.position_stream_len, 6);
        assert_eq!(flushed.position_range, 0..7);
        assert_eq!(
            flushed.doc_range.end - flushed.doc_range.start,
            descriptor.encoded_len() as u64 + descriptor.doc_stream_len
        );

        posting.reset(&mut pool);
        assert_eq!(posting.df(), 0);
        assert_eq!(pool.stats().live_chunks, 0);
    }

    #[test]
    fn test_long_posting_spans_chunks() {
        let mut pool = ChunkPool::new(ChunkPoolConfig {
            min_chunk_size: 16,
            max_chunk_size: 64,
            ..ChunkPoolConfig::default()
        })
        .unwrap();
        let mut posting = InMemoryPosting::new(16);

        for doc in 0..1000u32 {
            posting.add_location(&mut pool, doc * 3, 100, doc, 0).unwrap();
        }
        posting.commit(&mut pool).unwrap();

        assert_eq!(posting.df(), 1000);
        assert_eq!(posting.ctf(), 1000);
        assert!(posting.memory_usage() > 64);
        assert_eq!(posting.skip.len(), 62);
    }
}

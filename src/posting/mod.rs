//! Posting list storage.
//!
//! A posting list records, for one term, every document the term occurs in
//! together with its frequency, the document length and the positions of each
//! occurrence. Postings are accumulated in memory by [`InMemoryPosting`] on top
//! of chunk chains from a [`ChunkPool`], and decoded either straight from those
//! live chains ([`InMemoryCursor`]) or from the files written at flush time
//! ([`OnDiskCursor`]). Both readers implement [`PostingCursor`].

pub mod chunk;
pub mod cursor;
pub mod decoder;
pub mod skip;
pub mod source;
pub mod table;
pub mod writer;

use std::io::{Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ahash::AHashSet;
use bit_vec::BitVec;

use crate::DocId;
use crate::error::Result;
use crate::util::varint;

pub use chunk::{ChunkId, ChunkPool, ChunkPoolConfig, CompressedPostingList, PostingChunk};
pub use cursor::{
    CursorState, DocEntry, InMemoryCursor, OnDiskCursor, PostingCursor, PostingEntry, TermStats,
};
pub use skip::{SkipEntry, SkipList, SkipListConfig, SkipListWriter};
pub use table::PostingTable;
pub use writer::{FlushedPosting, InMemoryPosting};

/// A predicate telling decoders which documents are deleted.
///
/// Deleted documents are still decoded, so term statistics stay those of the
/// unfiltered index; they are only left out of the caller's buffers.
pub trait DocumentFilter: Send + Sync {
    /// Whether `doc_id` is deleted.
    fn is_deleted(&self, doc_id: DocId) -> bool;
}

impl DocumentFilter for BitVec {
    fn is_deleted(&self, doc_id: DocId) -> bool {
        self.get(doc_id as usize).unwrap_or(false)
    }
}

impl DocumentFilter for AHashSet<DocId> {
    fn is_deleted(&self, doc_id: DocId) -> bool {
        self.contains(&doc_id)
    }
}

/// Shared flag marking a posting source as no longer safe to read.
///
/// Cursors check it before every decode call and fail with
/// [`QuiverError::StaleSegment`](crate::error::QuiverError::StaleSegment) once
/// it is set.
#[derive(Debug, Clone, Default)]
pub struct DirtyFlag(Arc<AtomicBool>);

impl DirtyFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_dirty(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Whether both handles share the same flag.
    pub fn same_as(&self, other: &DirtyFlag) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Header written in front of every term's doc stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PostingDescriptor {
    /// Bytes following this descriptor that belong to the term.
    pub doc_stream_len: u64,
    /// Document frequency.
    pub df: u32,
    /// Documents whose frequency and length were committed.
    pub tdf: u32,
    /// Collection term frequency.
    pub ctf: u64,
    /// Offset of the term's run in the position file.
    pub position_stream_offset: u64,
    /// Length of that run, excluding its trailer.
    pub position_stream_len: u64,
}

impl PostingDescriptor {
    pub fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> Result<usize> {
        let mut written = varint::write_u64(out, self.doc_stream_len)?;
        written += varint::write_u32(out, self.df)?;
        written += varint::write_u32(out, self.tdf)?;
        written += varint::write_u64(out, self.ctf)?;
        written += varint::write_u64(out, self.position_stream_offset)?;
        written += varint::write_u64(out, self.position_stream_len)?;
        Ok(written)
    }

    /// Read a descriptor, returning it with the number of bytes consumed.
    pub fn read_from<R: Read + ?Sized>(input: &mut R) -> Result<(Self, usize)> {
        let (doc_stream_len, a) = varint::read_u64(input)?;
        let (df, b) = varint::read_u32(input)?;
        let (tdf, c) = varint::read_u32(input)?;
        let (ctf, d) = varint::read_u64(input)?;
        let (position_stream_offset, e) = varint::read_u64(input)?;
        let (position_stream_len, f) = varint::read_u64(input)?;

        let descriptor = PostingDescriptor {
            doc_stream_len,
            df,
            tdf,
            ctf,
            position_stream_offset,
            position_stream_len,
        };
        Ok((descriptor, a + b + c + d + e + f))
    }

    pub fn encoded_len(&self) -> usize {
        varint::encoded_len_u64(self.doc_stream_len)
            + varint::encoded_len_u32(self.df)
            + varint::encoded_len_u32(self.tdf)
            + varint::encoded_len_u64(self.ctf)
            + varint::encoded_len_u64(self.position_stream_offset)
            + varint::encoded_len_u64(self.position_stream_len)
    }
}

/// Header in front of a term's doc triples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkDescriptor {
    /// Length of the encoded doc triples.
    pub chunk_len: u64,
    /// Last document in the chunk.
    pub last_doc_id: DocId,
}

impl ChunkDescriptor {
    pub fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> Result<usize> {
        let written = varint::write_u64(out, self.chunk_len)?;
        Ok(written + varint::write_u32(out, self.last_doc_id)?)
    }

    pub fn read_from<R: Read + ?Sized>(input: &mut R) -> Result<(Self, usize)> {
        let (chunk_len, a) = varint::read_u64(input)?;
        let (last_doc_id, b) = varint::read_u32(input)?;
        Ok((
            ChunkDescriptor {
                chunk_len,
                last_doc_id,
            },
            a + b,
        ))
    }

    pub fn encoded_len(&self) -> usize {
        varint::encoded_len_u64(self.chunk_len) + varint::encoded_len_u32(self.last_doc_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_descriptor_layout() {
        let descriptor = PostingDescriptor {
            doc_stream_len: 300,
            df: 2,
            tdf: 2,
            ctf: 3,
            position_stream_offset: 1 << 40,
            position_stream_len: 6,
        };

        let mut buf = Vec::new();
        let written = descriptor.write_to(&mut buf).unwrap();
        assert_eq!(written, buf.len());
        assert_eq!(written, descriptor.encoded_len());

        let (decoded, consumed) = PostingDescriptor::read_from(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(decoded, descriptor);
        assert_eq!(consumed, written);
    }

    #[test]
    fn test_truncated_descriptor() {
        let descriptor = ChunkDescriptor {
            chunk_len: 1000,
            last_doc_id: 77,
        };
        let mut buf = Vec::new();
        descriptor.write_to(&mut buf).unwrap();
        buf.pop();

        assert!(ChunkDescriptor::read_from(&mut Cursor::new(&buf)).is_err());
    }

    #[test]
    fn test_document_filters() {
        let mut deleted = BitVec::from_elem(8, false);
        deleted.set(3, true);
        assert!(deleted.is_deleted(3));
        assert!(!deleted.is_deleted(2));
        assert!(!deleted.is_deleted(100));

        let set: AHashSet<DocId> = [5, 9].into_iter().collect();
        assert!(set.is_deleted(9));
        assert!(!set.is_deleted(6));
    }

    #[test]
    fn test_dirty_flag_is_shared() {
        let flag = DirtyFlag::new();
        let lease = flag.clone();
        assert!(!lease.is_dirty());
        flag.mark();
        assert!(lease.is_dirty());
        assert!(flag.same_as(&lease));
        assert!(!flag.same_as(&DirtyFlag::new()));
    }
}

//! Byte sources the posting decoder reads from.
//!
//! [`ChainSource`] walks a live chunk chain and never reads past a chunk's
//! used size, so a writer may keep appending while a reader resumes from a
//! saved [`ChainPosition`]. [`StreamSource`] reads a bounded byte range of a
//! flushed file.

use std::io::{Seek, SeekFrom};

use crate::error::{QuiverError, Result};
use crate::posting::chunk::{ChunkId, ChunkPool};
use crate::storage::StorageInput;
use crate::util::varint;

/// Sequential reader of varbyte integers.
pub trait ByteSource {
    fn read_u32(&mut self) -> Result<u32>;

    fn read_u64(&mut self) -> Result<u64>;

    /// Bytes consumed from the start of the stream.
    fn offset(&self) -> u64;
}

/// Saved position inside a chunk chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChainPosition {
    chunk: Option<ChunkId>,
    pos: usize,
    offset: u64,
}

/// Reader over a chunk chain borrowed from its pool.
#[derive(Debug)]
pub struct ChainSource<'a> {
    pool: &'a ChunkPool,
    at: ChainPosition,
}

impl<'a> ChainSource<'a> {
    /// Resume reading the chain starting at `head` from `at`.
    pub fn resume(pool: &'a ChunkPool, head: Option<ChunkId>, at: ChainPosition) -> Self {
        let mut at = at;
        if at.chunk.is_none() && at.offset == 0 {
            at.chunk = head;
        }
        ChainSource { pool, at }
    }

    pub fn position(&self) -> ChainPosition {
        self.at
    }

    /// The unread, written bytes of the current chunk, moving to the next
    /// chunk when the current one is consumed.
    fn available(&mut self) -> Result<&'a [u8]> {
        loop {
            let Some(id) = self.at.chunk else {
                return Err(QuiverError::contract("read past the end of the chunk chain"));
            };
            let chunk = self.pool.get(id)?;
            if self.at.pos < chunk.used_size() {
                return Ok(&chunk.bytes()[self.at.pos..]);
            }
            match chunk.next() {
                Some(next) => {
                    self.at.chunk = Some(next);
                    self.at.pos = 0;
                }
                None => {
                    return Err(QuiverError::contract(
                        "read past the last written byte of the chunk chain",
                    ));
                }
            }
        }
    }

    fn advance(&mut self, consumed: usize) {
        self.at.pos += consumed;
        self.at.offset += consumed as u64;
    }
}

impl ByteSource for ChainSource<'_> {
    fn read_u32(&mut self) -> Result<u32> {
        let (value, consumed) = varint::decode_u32(self.available()?)?;
        self.advance(consumed);
        Ok(value)
    }

    fn read_u64(&mut self) -> Result<u64> {
        let (value, consumed) = varint::decode_u64(self.available()?)?;
        self.advance(consumed);
        Ok(value)
    }

    fn offset(&self) -> u64 {
        self.at.offset
    }
}

/// Reader over `[base, base + len)` of a storage input.
#[derive(Debug)]
pub struct StreamSource {
    input: Box<dyn StorageInput>,
    base: u64,
    len: u64,
    offset: u64,
}

impl StreamSource {
    pub fn new(mut input: Box<dyn StorageInput>, base: u64, len: u64) -> Result<Self> {
        let size = input.size()?;
        if base.checked_add(len).is_none_or(|end| end > size) {
            return Err(QuiverError::corruption(format!(
                "stream range {base}+{len} lies outside a {size} byte file"
            )));
        }
        input.seek(SeekFrom::Start(base))?;

        Ok(StreamSource {
            input,
            base,
            len,
            offset: 0,
        })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Jump to `offset` bytes from the start of the range.
    pub fn seek_to(&mut self, offset: u64) -> Result<()> {
        if offset > self.len {
            return Err(QuiverError::corruption(format!(
                "seek to {offset} past a {} byte stream",
                self.len
            )));
        }
        self.input.seek(SeekFrom::Start(self.base + offset))?;
        self.offset = offset;
        Ok(())
    }

    fn check_remaining(&self) -> Result<()> {
        if self.offset >= self.len {
            return Err(QuiverError::contract("read past the end of the stream"));
        }
        Ok(())
    }

    fn consume(&mut self, consumed: usize) -> Result<()> {
        self.offset += consumed as u64;
        if self.offset > self.len {
            return Err(QuiverError::corruption("value runs past the end of the stream"));
        }
        Ok(())
    }
}

impl ByteSource for StreamSource {
    fn read_u32(&mut self) -> Result<u32> {
        self.check_remaining()?;
        let (value, consumed) = varint::read_u32(&mut self.input)?;
        self.consume(consumed)?;
        Ok(value)
    }

    fn read_u64(&mut self) -> Result<u64> {
        self.check_remaining()?;
        let (value, consumed) = varint::read_u64(&mut self.input)?;
        self.consume(consumed)?;
        Ok(value)
    }

    fn offset(&self) -> u64 {
        self.offset
    }
}

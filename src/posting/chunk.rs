//! Chunked byte storage for posting streams.
//!
//! A [`ChunkPool`] is an arena of byte blocks addressed by [`ChunkId`]. A
//! [`CompressedPostingList`] owns a forward-linked chain of those blocks and
//! appends varbyte-encoded integers to its tail; bytes are never moved once
//! written, and the chain only shrinks through [`CompressedPostingList::reset`],
//! which hands every block back to the pool at once.
//!
//! Chunk capacities grow geometrically from the previous chunk of the same
//! chain, rounded up to a power of two and capped by
//! [`ChunkPoolConfig::max_chunk_size`]. When the arena budget cannot fit that
//! size the pool falls back to a small "uptight" chunk; when even that fails
//! the caller grows the arena once and retries, and a second failure is
//! reported as [`QuiverError::OutOfMemory`].

use std::io::Write;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{QuiverError, Result};
use crate::util::varint;

/// Index of a chunk inside its [`ChunkPool`].
pub type ChunkId = u32;

/// Free bytes a tail chunk must have before a 32-bit value is appended.
pub const VARINT32_HEADROOM: usize = 7;

/// Free bytes a tail chunk must have before a 64-bit value is appended.
pub const VARINT64_HEADROOM: usize = 11;

/// Allocation policy of a [`ChunkPool`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkPoolConfig {
    /// Capacity of the first chunk of a chain.
    pub min_chunk_size: usize,

    /// Ceiling for geometric growth.
    pub max_chunk_size: usize,

    /// Multiplier applied to the previous chunk's capacity.
    pub growth_factor: f64,

    /// Capacity used when the grown size does not fit in the arena.
    pub uptight_chunk_size: usize,

    /// Initial arena budget in bytes.
    pub arena_size: usize,

    /// Bytes added to the budget each time the arena grows.
    pub arena_growth: usize,

    /// Hard limit the arena budget never exceeds.
    pub max_arena_size: usize,
}

impl Default for ChunkPoolConfig {
    fn default() -> Self {
        ChunkPoolConfig {
            min_chunk_size: 32,
            max_chunk_size: 16 * 1024,
            growth_factor: 2.0,
            uptight_chunk_size: 64,
            arena_size: 64 * 1024 * 1024,
            arena_growth: 16 * 1024 * 1024,
            max_arena_size: 1024 * 1024 * 1024,
        }
    }
}

impl ChunkPoolConfig {
    /// Check the policy for values the pool cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.min_chunk_size < VARINT64_HEADROOM {
            return Err(QuiverError::config(format!(
                "min_chunk_size must be at least {VARINT64_HEADROOM} bytes"
            )));
        }
        if self.uptight_chunk_size < VARINT64_HEADROOM {
            return Err(QuiverError::config(format!(
                "uptight_chunk_size must be at least {VARINT64_HEADROOM} bytes"
            )));
        }
        if self.max_chunk_size < self.min_chunk_size {
            return Err(QuiverError::config(
                "max_chunk_size must not be smaller than min_chunk_size",
            ));
        }
        if !(self.growth_factor >= 1.0) {
            return Err(QuiverError::config("growth_factor must be at least 1.0"));
        }
        if self.arena_size > self.max_arena_size {
            return Err(QuiverError::config(
                "arena_size must not exceed max_arena_size",
            ));
        }
        Ok(())
    }
}

/// One allocated byte block in a posting chain.
#[derive(Debug)]
pub struct PostingChunk {
    data: Box<[u8]>,
    used: usize,
    next: Option<ChunkId>,
}

impl PostingChunk {
    fn new(capacity: usize) -> Self {
        PostingChunk {
            data: vec![0u8; capacity].into_boxed_slice(),
            used: 0,
            next: None,
        }
    }

    /// Total bytes the chunk can hold.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Bytes written so far.
    pub fn used_size(&self) -> usize {
        self.used
    }

    /// Bytes still free.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.used
    }

    /// The written prefix of the chunk.
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.used]
    }

    /// The chunk linked after this one.
    pub fn next(&self) -> Option<ChunkId> {
        self.next
    }
}

/// Counters describing pool activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkPoolStats {
    /// Chunks currently live.
    pub live_chunks: usize,
    /// Bytes held by live chunks.
    pub allocated_bytes: usize,
    /// Allocations that fell back to the uptight size.
    pub uptight_fallbacks: u64,
    /// Times the arena budget was grown.
    pub arena_grows: u64,
}

/// Arena of posting chunks.
#[derive(Debug)]
pub struct ChunkPool {
    config: ChunkPoolConfig,
    slots: Vec<Option<PostingChunk>>,
    free_slots: Vec<ChunkId>,
    arena_limit: usize,
    stats: ChunkPoolStats,
}

impl ChunkPool {
    /// Create a pool with the given policy.
    pub fn new(config: ChunkPoolConfig) -> Result<Self> {
        config.validate()?;
        let arena_limit = config.arena_size;

        Ok(ChunkPool {
            config,
            slots: Vec::new(),
            free_slots: Vec::new(),
            arena_limit,
            stats: ChunkPoolStats::default(),
        })
    }

    /// The pool's allocation policy.
    pub fn config(&self) -> &ChunkPoolConfig {
        &self.config
    }

    /// Current activity counters.
    pub fn stats(&self) -> ChunkPoolStats {
        self.stats
    }

    /// Current arena budget.
    pub fn arena_limit(&self) -> usize {
        self.arena_limit
    }

    /// Capacity the growth policy picks after a chunk of `prev_capacity` bytes.
    ///
    /// `prev_capacity` is zero for the first chunk of a chain.
    pub fn next_chunk_size(&self, prev_capacity: usize, min_size: usize) -> usize {
        let grown = if prev_capacity == 0 {
            self.config.min_chunk_size
        } else {
            (prev_capacity as f64 * self.config.growth_factor) as usize
        };

        let bucket = grown
            .max(self.config.min_chunk_size)
            .next_power_of_two()
            .min(self.config.max_chunk_size);

        bucket.max(min_size)
    }

    /// Allocate a chunk sized by the growth policy.
    ///
    /// Returns `None` when neither the grown size nor the uptight size fits in
    /// the current arena budget; the caller is expected to [`grow_arena`] and
    /// retry once.
    ///
    /// [`grow_arena`]: ChunkPool::grow_arena
    pub fn allocate(&mut self, prev_capacity: usize, min_size: usize) -> Option<ChunkId> {
        let preferred = self.next_chunk_size(prev_capacity, min_size);
        if let Some(id) = self.try_allocate(preferred) {
            return Some(id);
        }

        let uptight = self.config.uptight_chunk_size.max(min_size);
        if uptight < preferred
            && let Some(id) = self.try_allocate(uptight)
        {
            self.stats.uptight_fallbacks += 1;
            debug!(preferred, uptight, "chunk allocation fell back to uptight size");
            return Some(id);
        }

        None
    }

    fn try_allocate(&mut self, capacity: usize) -> Option<ChunkId> {
        if self.stats.allocated_bytes + capacity > self.arena_limit {
            return None;
        }

        let chunk = PostingChunk::new(capacity);
        let id = match self.free_slots.pop() {
            Some(id) => {
                self.slots[id as usize] = Some(chunk);
                id
            }
            None => {
                self.slots.push(Some(chunk));
                (self.slots.len() - 1) as ChunkId
            }
        };

        self.stats.live_chunks += 1;
        self.stats.allocated_bytes += capacity;
        Some(id)
    }

    /// Raise the arena budget by one growth step.
    pub fn grow_arena(&mut self) -> Result<()> {
        if self.arena_limit >= self.config.max_arena_size {
            return Err(QuiverError::out_of_memory(format!(
                "chunk arena exhausted at {} bytes",
                self.arena_limit
            )));
        }

        let previous = self.arena_limit;
        self.arena_limit = self
            .arena_limit
            .saturating_add(self.config.arena_growth.max(1))
            .min(self.config.max_arena_size);
        self.stats.arena_grows += 1;
        debug!(previous, limit = self.arena_limit, "grew chunk arena");
        Ok(())
    }

    /// Borrow a live chunk.
    pub fn get(&self, id: ChunkId) -> Result<&PostingChunk> {
        self.slots
            .get(id as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| QuiverError::contract(format!("chunk {id} is not live")))
    }

    fn get_mut(&mut self, id: ChunkId) -> Result<&mut PostingChunk> {
        self.slots
            .get_mut(id as usize)
            .and_then(Option::as_mut)
            .ok_or_else(|| QuiverError::contract(format!("chunk {id} is not live")))
    }

    /// Release every chunk of the chain starting at `head`.
    fn release_chain(&mut self, head: Option<ChunkId>) {
        let mut cursor = head;
        while let Some(id) = cursor {
            let Some(chunk) = self.slots.get_mut(id as usize).and_then(Option::take) else {
                break;
            };
            self.stats.live_chunks -= 1;
            self.stats.allocated_bytes -= chunk.capacity();
            self.free_slots.push(id);
            cursor = chunk.next;
        }
    }
}

/// The chunk chain holding one stream (doc list or position list) of one term.
#[derive(Debug, Default)]
pub struct CompressedPostingList {
    head: Option<ChunkId>,
    tail: Option<ChunkId>,
    tail_capacity: usize,
    chunk_count: usize,
    total_size: usize,
    total_unused: usize,
    written: usize,
}

impl CompressedPostingList {
    /// Create an empty chain; no chunk is allocated until the first write.
    pub fn new() -> Self {
        Self::default()
    }

    /// First chunk of the chain.
    pub fn head(&self) -> Option<ChunkId> {
        self.head
    }

    /// Number of linked chunks.
    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    /// Sum of the capacities of all linked chunks.
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    /// Slack left behind in chunks that are no longer the tail.
    pub fn unused_size(&self) -> usize {
        self.total_unused
    }

    /// Bytes actually written, excluding every chunk's trailing slack.
    pub fn real_size(&self) -> usize {
        self.written
    }

    /// Append a 32-bit value.
    pub fn encode_u32(&mut self, pool: &mut ChunkPool, value: u32) -> Result<()> {
        let tail = self.reserve(pool, VARINT32_HEADROOM)?;
        let chunk = pool.get_mut(tail)?;
        let len = varint::encode_u32_into(value, &mut chunk.data[chunk.used..]);
        chunk.used += len;
        self.written += len;
        Ok(())
    }

    /// Append a 64-bit value.
    pub fn encode_u64(&mut self, pool: &mut ChunkPool, value: u64) -> Result<()> {
        let tail = self.reserve(pool, VARINT64_HEADROOM)?;
        let chunk = pool.get_mut(tail)?;
        let len = varint::encode_u64_into(value, &mut chunk.data[chunk.used..]);
        chunk.used += len;
        self.written += len;
        Ok(())
    }

    /// Make sure the tail has `headroom` free bytes, linking a new chunk if not.
    fn reserve(&mut self, pool: &mut ChunkPool, headroom: usize) -> Result<ChunkId> {
        if let Some(tail) = self.tail {
            let remaining = pool.get(tail)?.remaining();
            if remaining >= headroom {
                return Ok(tail);
            }
        }

        let id = match pool.allocate(self.tail_capacity, headroom) {
            Some(id) => id,
            None => {
                pool.grow_arena()?;
                pool.allocate(self.tail_capacity, headroom).ok_or_else(|| {
                    QuiverError::out_of_memory("no chunk available after growing the arena")
                })?
            }
        };

        self.append(pool, id)?;
        Ok(id)
    }

    /// Link `id` after the current tail and update the accounting.
    fn append(&mut self, pool: &mut ChunkPool, id: ChunkId) -> Result<()> {
        let capacity = pool.get(id)?.capacity();

        match self.tail {
            Some(tail) => {
                let old_tail = pool.get_mut(tail)?;
                self.total_unused += old_tail.remaining();
                old_tail.next = Some(id);
            }
            None => self.head = Some(id),
        }

        self.tail = Some(id);
        self.tail_capacity = capacity;
        self.chunk_count += 1;
        self.total_size += capacity;
        Ok(())
    }

    /// Copy the written bytes of every chunk, in order, to `out`.
    pub fn write_to<W: Write + ?Sized>(&self, pool: &ChunkPool, out: &mut W) -> Result<u64> {
        let mut total = 0u64;
        let mut cursor = self.head;
        while let Some(id) = cursor {
            let chunk = pool.get(id)?;
            out.write_all(chunk.bytes())?;
            total += chunk.used_size() as u64;
            cursor = chunk.next();
        }
        Ok(total)
    }

    /// Drop the whole chain, returning its chunks to the pool.
    pub fn reset(&mut self, pool: &mut ChunkPool) {
        pool.release_chain(self.head);
        *self = Self::default();
    }
}

//! Term to posting map of an active barrel.

use ahash::AHashMap;

use crate::error::Result;
use crate::posting::chunk::{ChunkPool, ChunkPoolConfig};
use crate::posting::writer::InMemoryPosting;
use crate::{DocId, TermId};

/// All live postings of one barrel together with the pool their chunks
/// come from.
#[derive(Debug)]
pub struct PostingTable {
    pool: ChunkPool,
    postings: AHashMap<TermId, InMemoryPosting>,
    skip_interval: u32,
}

impl PostingTable {
    pub fn new(pool_config: ChunkPoolConfig, skip_interval: u32) -> Result<Self> {
        Ok(PostingTable {
            pool: ChunkPool::new(pool_config)?,
            postings: AHashMap::new(),
            skip_interval,
        })
    }

    /// Record one occurrence of `term`, creating its posting on first use.
    pub fn add_location(
        &mut self,
        term: TermId,
        doc_id: DocId,
        doc_length: u32,
        position: u32,
        sub_position: u32,
    ) -> Result<()> {
        let skip_interval = self.skip_interval;
        let posting = self
            .postings
            .entry(term)
            .or_insert_with(|| InMemoryPosting::new(skip_interval));
        posting.add_location(&mut self.pool, doc_id, doc_length, position, sub_position)
    }

    pub fn get(&self, term: TermId) -> Option<&InMemoryPosting> {
        self.postings.get(&term)
    }

    /// The posting of `term` with mutable access to the pool it writes to.
    pub fn posting_mut(&mut self, term: TermId) -> Option<(&mut InMemoryPosting, &mut ChunkPool)> {
        let posting = self.postings.get_mut(&term)?;
        Some((posting, &mut self.pool))
    }

    pub fn pool(&self) -> &ChunkPool {
        &self.pool
    }

    pub fn contains(&self, term: TermId) -> bool {
        self.postings.contains_key(&term)
    }

    pub fn len(&self) -> usize {
        self.postings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.postings.is_empty()
    }

    /// Term ids in ascending order.
    pub fn sorted_terms(&self) -> Vec<TermId> {
        let mut terms: Vec<TermId> = self.postings.keys().copied().collect();
        terms.sort_unstable();
        terms
    }

    /// Bytes held by the chunk arena.
    pub fn memory_usage(&self) -> usize {
        self.pool.stats().allocated_bytes
    }

    /// Drop every posting and return all chunks to the pool.
    pub fn clear(&mut self) {
        for posting in self.postings.values_mut() {
            posting.reset(&mut self.pool);
        }
        self.postings.clear();
    }
}

//! Multi-level skip list over a flushed doc stream.
//!
//! Level 0 holds one checkpoint after every `skip_interval`-th document: the
//! document id together with the doc-stream and position-stream offsets just
//! past that document. Level `L` holds every `level_factor^L`-th level-0
//! checkpoint, up to `max_levels` levels. Only level 0 is serialized; the
//! upper levels are rebuilt when the list is loaded.

use std::io::Cursor;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::DocId;
use crate::error::{QuiverError, Result};
use crate::util::varint;

/// Shape of the skip lists built at flush time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SkipListConfig {
    /// Documents between two level-0 checkpoints.
    pub skip_interval: u32,

    /// Spacing multiplier between consecutive levels.
    pub level_factor: u32,

    /// Maximum number of levels.
    pub max_levels: usize,

    /// Skip lists are only built for terms whose DF exceeds this value.
    pub threshold: u32,
}

impl Default for SkipListConfig {
    fn default() -> Self {
        SkipListConfig {
            skip_interval: 16,
            level_factor: 4,
            max_levels: 6,
            threshold: 16,
        }
    }
}

impl SkipListConfig {
    pub fn validate(&self) -> Result<()> {
        if self.skip_interval == 0 {
            return Err(QuiverError::config("skip_interval must be positive"));
        }
        if self.level_factor < 2 {
            return Err(QuiverError::config("level_factor must be at least 2"));
        }
        if self.max_levels == 0 {
            return Err(QuiverError::config("max_levels must be positive"));
        }
        Ok(())
    }
}

/// One checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkipEntry {
    /// Last document covered by the checkpoint.
    pub doc_id: DocId,
    /// Doc-stream offset just past that document's triple.
    pub doc_offset: u64,
    /// Position-stream offset just past that document's positions.
    pub pos_offset: u64,
}

/// Result of [`SkipList::skip_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkipPoint {
    pub entry: SkipEntry,
    /// Number of documents decoded once the reader resumes at this point.
    pub decoded: u32,
}

/// Collects checkpoints while a posting is being written.
#[derive(Debug, Clone, Default)]
pub struct SkipListWriter {
    skip_interval: u32,
    entries: Vec<SkipEntry>,
}

impl SkipListWriter {
    pub fn new(skip_interval: u32) -> Self {
        SkipListWriter {
            skip_interval: skip_interval.max(1),
            entries: Vec::new(),
        }
    }

    /// Record the stream offsets after the `committed`-th document.
    pub fn observe(&mut self, committed: u32, doc_id: DocId, doc_offset: u64, pos_offset: u64) {
        if committed > 0 && committed % self.skip_interval == 0 {
            self.entries.push(SkipEntry {
                doc_id,
                doc_offset,
                pos_offset,
            });
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialize the collected checkpoints, or return an empty buffer when
    /// `df` does not exceed the configured threshold.
    pub fn finish(&self, config: &SkipListConfig, df: u32) -> Result<Vec<u8>> {
        if df <= config.threshold || self.entries.is_empty() {
            return Ok(Vec::new());
        }

        let mut buf = Vec::with_capacity(16 + self.entries.len() * 6);
        varint::write_u32(&mut buf, self.skip_interval)?;
        varint::write_u32(&mut buf, config.level_factor)?;
        varint::write_u32(&mut buf, config.max_levels as u32)?;
        varint::write_u32(&mut buf, self.entries.len() as u32)?;

        let mut prev = SkipEntry {
            doc_id: 0,
            doc_offset: 0,
            pos_offset: 0,
        };
        for entry in &self.entries {
            varint::write_u32(&mut buf, entry.doc_id - prev.doc_id)?;
            varint::write_u64(&mut buf, entry.doc_offset - prev.doc_offset)?;
            varint::write_u64(&mut buf, entry.pos_offset - prev.pos_offset)?;
            prev = *entry;
        }

        debug!(df, checkpoints = self.entries.len(), bytes = buf.len(), "built skip list");
        Ok(buf)
    }

    pub fn reset(&mut self) {
        self.entries.clear();
    }
}

/// A loaded, read-only skip list.
#[derive(Debug, Clone)]
pub struct SkipList {
    skip_interval: u32,
    entries: Vec<SkipEntry>,
    /// Level-0 indices present on each level above 0.
    levels: Vec<Vec<u32>>,
}

impl SkipList {
    /// Load a skip list serialized by [`SkipListWriter::finish`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let mut input = Cursor::new(bytes);
        let (skip_interval, _) = varint::read_u32(&mut input)?;
        let (level_factor, _) = varint::read_u32(&mut input)?;
        let (max_levels, _) = varint::read_u32(&mut input)?;
        let (count, _) = varint::read_u32(&mut input)?;

        if skip_interval == 0 || level_factor < 2 || max_levels == 0 {
            return Err(QuiverError::corruption("invalid skip list header"));
        }
        if count as usize > bytes.len() {
            return Err(QuiverError::corruption("skip list count exceeds its length"));
        }

        let mut entries = Vec::with_capacity(count as usize);
        let mut prev = SkipEntry {
            doc_id: 0,
            doc_offset: 0,
            pos_offset: 0,
        };
        for i in 0..count {
            let (doc_delta, _) = varint::read_u32(&mut input)?;
            let (doc_offset_delta, _) = varint::read_u64(&mut input)?;
            let (pos_offset_delta, _) = varint::read_u64(&mut input)?;

            if i > 0 && doc_delta == 0 {
                return Err(QuiverError::corruption("skip checkpoints out of order"));
            }
            let entry = SkipEntry {
                doc_id: prev
                    .doc_id
                    .checked_add(doc_delta)
                    .ok_or_else(|| QuiverError::corruption("skip doc id overflow"))?,
                doc_offset: prev
                    .doc_offset
                    .checked_add(doc_offset_delta)
                    .ok_or_else(|| QuiverError::corruption("skip doc offset overflow"))?,
                pos_offset: prev
                    .pos_offset
                    .checked_add(pos_offset_delta)
                    .ok_or_else(|| QuiverError::corruption("skip position offset overflow"))?,
            };
            entries.push(entry);
            prev = entry;
        }

        if input.position() as usize != bytes.len() {
            return Err(QuiverError::corruption("trailing bytes after skip list"));
        }

        Ok(Self::from_entries(
            skip_interval,
            level_factor,
            max_levels as usize,
            entries,
        ))
    }

    fn from_entries(
        skip_interval: u32,
        level_factor: u32,
        max_levels: usize,
        entries: Vec<SkipEntry>,
    ) -> Self {
        let mut levels = Vec::new();
        let mut spacing = level_factor as usize;
        for _ in 1..max_levels {
            if spacing > entries.len() {
                break;
            }
            let level: Vec<u32> = (spacing - 1..entries.len())
                .step_by(spacing)
                .map(|i| i as u32)
                .collect();
            levels.push(level);
            spacing = spacing.saturating_mul(level_factor as usize);
        }

        SkipList {
            skip_interval,
            entries,
            levels,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of levels, including level 0.
    pub fn level_count(&self) -> usize {
        if self.entries.is_empty() {
            0
        } else {
            self.levels.len() + 1
        }
    }

    pub fn entries(&self) -> &[SkipEntry] {
        &self.entries
    }

    /// Find the last checkpoint whose document id does not exceed `target`.
    pub fn skip_to(&self, target: DocId) -> Option<SkipPoint> {
        let mut best: Option<usize> = None;

        for level in self.levels.iter().rev() {
            let start = match best {
                Some(b) => level.partition_point(|&i| i as usize <= b),
                None => 0,
            };
            for &i in &level[start..] {
                if self.entries[i as usize].doc_id > target {
                    break;
                }
                best = Some(i as usize);
            }
        }

        let start = best.map_or(0, |b| b + 1);
        for i in start..self.entries.len() {
            if self.entries[i].doc_id > target {
                break;
            }
            best = Some(i);
        }

        best.map(|i| SkipPoint {
            entry: self.entries[i],
            decoded: (i as u32 + 1) * self.skip_interval,
        })
    }
}

//! Decode state shared by the in-memory and on-disk cursors.
//!
//! The state knows nothing about where bytes come from: every call receives
//! the doc and position [`ByteSource`]s plus a [`StreamLimits`] snapshot of how
//! many documents may be read. Positions are consumed lazily. Each decoded
//! document queues a position group; groups the caller never reads are
//! counted and skipped right before the next group is opened.

use std::collections::VecDeque;

use crate::DocId;
use crate::error::{QuiverError, Result};
use crate::posting::DocumentFilter;
use crate::posting::skip::SkipPoint;
use crate::posting::source::ByteSource;

/// Cursor lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CursorState {
    Uninitialized,
    Active,
    Exhausted,
}

/// One decoded posting entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DocEntry {
    pub doc_id: DocId,
    pub freq: u32,
    pub doc_len: u32,
}

/// A decoded entry together with its occurrences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostingEntry {
    pub doc: DocEntry,
    pub positions: Vec<u32>,
    pub sub_positions: Vec<u32>,
}

/// How much of the doc stream may be read during one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamLimits {
    /// Documents in the stream.
    pub df: u32,
    /// Documents whose frequency and length are in the stream.
    pub committed: u32,
    /// Frequency and length of the uncommitted last document.
    pub live: Option<(u32, u32)>,
}

impl StreamLimits {
    /// Limits of a fully committed stream.
    pub fn committed(df: u32) -> Self {
        StreamLimits {
            df,
            committed: df,
            live: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PositionGroup {
    freq: u32,
    keep: bool,
}

#[derive(Debug)]
pub struct DecodeState {
    state: CursorState,
    last_doc_id: DocId,
    decoded: u32,
    current: Option<DocEntry>,
    /// Frequency handed out for a document whose group was not committed yet.
    live_tail: Option<u32>,
    groups: VecDeque<PositionGroup>,
    group_left: u32,
    skip_positions: u64,
    last_position: u32,
}

impl Default for DecodeState {
    fn default() -> Self {
        Self::new()
    }
}

impl DecodeState {
    pub fn new() -> Self {
        DecodeState {
            state: CursorState::Uninitialized,
            last_doc_id: 0,
            decoded: 0,
            current: None,
            live_tail: None,
            groups: VecDeque::new(),
            group_left: 0,
            skip_positions: 0,
            last_position: 0,
        }
    }

    pub fn state(&self) -> CursorState {
        self.state
    }

    pub fn current(&self) -> Option<DocEntry> {
        self.current
    }

    /// Documents decoded so far, filtered ones included.
    pub fn decoded(&self) -> u32 {
        self.decoded
    }

    pub fn reset_position(&mut self) {
        self.last_position = 0;
    }

    /// Queue every unread position of earlier documents for skipping.
    fn drop_pending_groups(&mut self) {
        self.skip_positions += self.group_left as u64;
        self.group_left = 0;
        for group in self.groups.drain(..) {
            self.skip_positions += group.freq as u64;
        }
    }

    /// Read the committed frequency of a document handed out while still
    /// pending, and skip the positions added to it since.
    fn settle_live_tail<S: ByteSource>(&mut self, docs: &mut S, limits: &StreamLimits) -> Result<()> {
        let Some(handed_out) = self.live_tail else {
            return Ok(());
        };
        if limits.committed < self.decoded {
            return Ok(());
        }

        let freq = docs.read_u32()?;
        let _doc_len = docs.read_u32()?;
        if freq < handed_out {
            return Err(QuiverError::corruption(format!(
                "document {} shrank from {handed_out} to {freq} occurrences",
                self.last_doc_id
            )));
        }
        self.skip_positions += (freq - handed_out) as u64;
        self.live_tail = None;
        Ok(())
    }

    /// Decode the next document, or `None` once the stream is exhausted.
    fn decode_one<S: ByteSource>(
        &mut self,
        docs: &mut S,
        limits: &StreamLimits,
    ) -> Result<Option<DocEntry>> {
        self.settle_live_tail(docs, limits)?;

        if self.decoded >= limits.df {
            self.state = CursorState::Exhausted;
            self.current = None;
            return Ok(None);
        }
        self.state = CursorState::Active;

        let gap = docs.read_u32()?;
        if self.decoded > 0 && gap == 0 {
            return Err(QuiverError::corruption(format!(
                "document {} repeated in doc stream",
                self.last_doc_id
            )));
        }
        let doc_id = self
            .last_doc_id
            .checked_add(gap)
            .ok_or_else(|| QuiverError::corruption("document id overflow"))?;

        let (freq, doc_len) = if self.decoded < limits.committed {
            (docs.read_u32()?, docs.read_u32()?)
        } else {
            let live = limits.live.ok_or_else(|| {
                QuiverError::contract("uncommitted document without live counters")
            })?;
            self.live_tail = Some(live.0);
            live
        };

        self.decoded += 1;
        self.last_doc_id = doc_id;
        Ok(Some(DocEntry {
            doc_id,
            freq,
            doc_len,
        }))
    }

    /// Decode up to `docs_out.len()` documents into the output buffers.
    ///
    /// Returns `None` once the stream is exhausted, otherwise the number of
    /// entries copied; deleted documents are decoded but not copied.
    pub fn decode_next<S: ByteSource>(
        &mut self,
        docs: &mut S,
        limits: &StreamLimits,
        docs_out: &mut [DocId],
        freqs_out: &mut [u32],
        lens_out: &mut [u32],
        filter: Option<&dyn DocumentFilter>,
    ) -> Result<Option<usize>> {
        if freqs_out.len() != docs_out.len() || lens_out.len() != docs_out.len() {
            return Err(QuiverError::contract("decode buffers differ in length"));
        }

        self.drop_pending_groups();

        let mut decoded = 0;
        let mut copied = 0;
        while decoded < docs_out.len() {
            let Some(entry) = self.decode_one(docs, limits)? else {
                break;
            };
            decoded += 1;

            let keep = !filter.is_some_and(|f| f.is_deleted(entry.doc_id));
            self.groups.push_back(PositionGroup {
                freq: entry.freq,
                keep,
            });
            if keep {
                docs_out[copied] = entry.doc_id;
                freqs_out[copied] = entry.freq;
                lens_out[copied] = entry.doc_len;
                copied += 1;
                self.current = Some(entry);
            } else {
                self.current = None;
            }
        }

        if decoded == 0 && !docs_out.is_empty() {
            return Ok(None);
        }
        Ok(Some(copied))
    }

    /// Advance to the first live document with id `>= target`.
    ///
    /// Its position group becomes the next one read.
    pub fn decode_to<S: ByteSource>(
        &mut self,
        docs: &mut S,
        limits: &StreamLimits,
        target: DocId,
        filter: Option<&dyn DocumentFilter>,
    ) -> Result<Option<DocId>> {
        if let Some(current) = self.current
            && current.doc_id >= target
        {
            return Ok(Some(current.doc_id));
        }

        self.drop_pending_groups();
        self.current = None;

        while let Some(entry) = self.decode_one(docs, limits)? {
            if entry.doc_id >= target && !filter.is_some_and(|f| f.is_deleted(entry.doc_id)) {
                self.groups.push_back(PositionGroup {
                    freq: entry.freq,
                    keep: true,
                });
                self.current = Some(entry);
                return Ok(Some(entry.doc_id));
            }
            self.skip_positions += entry.freq as u64;
        }
        Ok(None)
    }

    /// Whether a skip checkpoint lies ahead of the cursor.
    pub fn can_jump_to(&self, point: &SkipPoint) -> bool {
        self.state != CursorState::Exhausted
            && point.decoded > self.decoded
            && self.current.is_none_or(|c| c.doc_id < point.entry.doc_id)
    }

    /// Reposition the document state at a skip checkpoint.
    ///
    /// The caller has already moved both sources to the checkpoint offsets.
    pub fn jump_to(&mut self, point: &SkipPoint) {
        self.groups.clear();
        self.group_left = 0;
        self.skip_positions = 0;
        self.last_position = 0;
        self.live_tail = None;
        self.current = None;
        self.decoded = point.decoded;
        self.last_doc_id = point.entry.doc_id;
        self.state = CursorState::Active;
    }

    /// Open the next position group that belongs to a live document.
    fn open_group<S: ByteSource>(&mut self, positions: &mut S) -> Result<u32> {
        let freq = loop {
            let group = self
                .groups
                .pop_front()
                .ok_or_else(|| QuiverError::contract("no decoded document has positions left"))?;
            if group.keep {
                break group.freq;
            }
            self.skip_positions += group.freq as u64;
        };

        while self.skip_positions > 0 {
            positions.read_u32()?;
            positions.read_u32()?;
            self.skip_positions -= 1;
        }

        self.group_left = freq;
        self.last_position = 0;
        Ok(freq)
    }

    /// Read one `(position, sub position)` pair of the open group.
    fn read_location<S: ByteSource>(&mut self, positions: &mut S) -> Result<(u32, u32)> {
        let gap = positions.read_u32()?;
        let sub_position = positions.read_u32()?;
        let position = self
            .last_position
            .checked_add(gap)
            .ok_or_else(|| QuiverError::corruption("position overflow"))?;
        self.last_position = position.saturating_add(sub_position);
        self.group_left -= 1;
        Ok((position, sub_position))
    }

    /// Decode `out.len()` positions, continuing into the next document's
    /// group whenever the current one runs out.
    pub fn decode_next_positions<S: ByteSource>(
        &mut self,
        positions: &mut S,
        out: &mut [u32],
    ) -> Result<usize> {
        for slot in out.iter_mut() {
            if self.group_left == 0 {
                self.open_group(positions)?;
            }
            *slot = self.read_location(positions)?.0;
        }
        Ok(out.len())
    }

    /// Like [`decode_next_positions`](Self::decode_next_positions), also
    /// returning each occurrence's sub position.
    pub fn decode_next_locations<S: ByteSource>(
        &mut self,
        positions: &mut S,
        out: &mut [u32],
        sub_out: &mut [u32],
    ) -> Result<usize> {
        if sub_out.len() != out.len() {
            return Err(QuiverError::contract("location buffers differ in length"));
        }
        for (slot, sub_slot) in out.iter_mut().zip(sub_out.iter_mut()) {
            if self.group_left == 0 {
                self.open_group(positions)?;
            }
            (*slot, *sub_slot) = self.read_location(positions)?;
        }
        Ok(out.len())
    }

    /// Decode one full group per entry of `freqs` into `out`.
    pub fn decode_positions_grouped<S: ByteSource>(
        &mut self,
        positions: &mut S,
        out: &mut [u32],
        freqs: &[u32],
    ) -> Result<usize> {
        let total: u64 = freqs.iter().map(|&f| f as u64).sum();
        if total > out.len() as u64 {
            return Err(QuiverError::contract(format!(
                "position buffer holds {} entries, {total} requested",
                out.len()
            )));
        }

        let mut written = 0;
        for &freq in freqs {
            self.skip_positions += self.group_left as u64;
            self.group_left = 0;

            let actual = self.open_group(positions)?;
            if actual != freq {
                return Err(QuiverError::contract(format!(
                    "expected {freq} positions, document has {actual}"
                )));
            }
            for slot in &mut out[written..written + freq as usize] {
                *slot = self.read_location(positions)?.0;
            }
            written += freq as usize;
        }
        Ok(written)
    }
}

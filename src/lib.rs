//! # Quiver
//!
//! Posting-list storage for inverted indexes.
//!
//! ## Features
//!
//! - Append-only chunked posting buffers with a configurable growth policy
//! - Varbyte-compressed doc and position streams
//! - Real-time cursors over unflushed postings
//! - Multi-level skip lists for flushed postings
//! - Barrel (segment) registry with crash-safe XML metadata
//! - Pluggable storage backends

pub mod barrel;
pub mod cli;
pub mod config;
pub mod error;
pub mod posting;
pub mod storage;
pub mod util;

/// Document identifier inside a barrel family.
pub type DocId = u32;

/// Term identifier produced by the analyzer.
pub type TermId = u32;

pub mod prelude {
    pub use crate::barrel::{
        BarrelEvent, BarrelInfo, BarrelRegistry, DiskBarrelReader, MemoryBarrel, merge_barrels,
    };
    pub use crate::config::IndexConfig;
    pub use crate::error::{QuiverError, Result};
    pub use crate::posting::{DocumentFilter, PostingCursor};
    pub use crate::storage::{FileStorage, MemoryStorage, Storage};
    pub use crate::{DocId, TermId};
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Barrels: the unit of indexing, flushing and merging.
//!
//! A barrel starts as a [`MemoryBarrel`] that accepts documents and serves
//! live cursors. Flushing writes three files named after the barrel:
//!
//! - `<name>.dfp`: per-term descriptors, doc triples and skip lists
//! - `<name>.pop`: per-term position runs
//! - `<name>.voc`: the checksummed vocabulary mapping terms to `.dfp` offsets
//!
//! Flushed barrels are read through a [`DiskBarrelReader`] and may be merged
//! with [`merge_barrels`]. The set of barrels, and the names they get, is
//! owned by the [`BarrelRegistry`].

pub mod info;
pub mod memory;
pub mod merge;
pub mod persist;
pub mod reader;
pub mod registry;

pub use info::{BarrelInfo, CollectionId, CompressionKind};
pub use memory::{MemoryBarrel, TermOccurrence, write_barrel_files};
pub use merge::merge_barrels;
pub use persist::PersistedRegistry;
pub use reader::{DiskBarrelReader, TermEntry, read_vocabulary, write_vocabulary};
pub use registry::{BarrelEvent, BarrelLease, BarrelRegistry, BarrelSnapshot};

/// Doc stream file extension.
pub const DOC_FILE_EXTENSION: &str = "dfp";

/// Position stream file extension.
pub const POSITION_FILE_EXTENSION: &str = "pop";

/// Vocabulary file extension.
pub const VOCABULARY_FILE_EXTENSION: &str = "voc";

/// Every file a flushed barrel owns.
pub const BARREL_FILE_EXTENSIONS: [&str; 3] = [
    DOC_FILE_EXTENSION,
    POSITION_FILE_EXTENSION,
    VOCABULARY_FILE_EXTENSION,
];

/// File name of one of a barrel's files.
pub fn barrel_file(name: &str, extension: &str) -> String {
    format!("{name}.{extension}")
}

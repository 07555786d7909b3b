//! Index configuration.
//!
//! Every section has defaults, so a JSON file only needs to name the values
//! it changes:
//!
//! ```
//! use quiver::config::IndexConfig;
//!
//! let config: IndexConfig =
//!     serde_json::from_str(r#"{ "skip_list": { "skip_interval": 32 } }"#).unwrap();
//! assert_eq!(config.skip_list.skip_interval, 32);
//! assert_eq!(config.chunk_pool.min_chunk_size, 32);
//! ```

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{QuiverError, Result};
use crate::posting::{ChunkPoolConfig, SkipListConfig};
use crate::storage::StorageConfig;

/// Configuration shared by every barrel of an index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    /// Chunk allocation policy of in-memory barrels.
    pub chunk_pool: ChunkPoolConfig,

    /// Skip lists built at flush time.
    pub skip_list: SkipListConfig,

    /// Storage backend settings.
    pub storage: StorageConfig,

    /// Arena bytes after which an in-memory barrel asks to be flushed.
    pub flush_threshold: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        IndexConfig {
            chunk_pool: ChunkPoolConfig::default(),
            skip_list: SkipListConfig::default(),
            storage: StorageConfig::default(),
            flush_threshold: 32 * 1024 * 1024,
        }
    }
}

impl IndexConfig {
    /// Load a configuration from a JSON file and validate it.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let config: IndexConfig = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every section for unusable values.
    pub fn validate(&self) -> Result<()> {
        self.chunk_pool.validate()?;
        self.skip_list.validate()?;

        if self.storage.buffer_size == 0 {
            return Err(QuiverError::config("storage.buffer_size must be positive"));
        }
        if self.flush_threshold == 0 {
            return Err(QuiverError::config("flush_threshold must be positive"));
        }
        if self.flush_threshold > self.chunk_pool.max_arena_size {
            return Err(QuiverError::config(
                "flush_threshold must not exceed chunk_pool.max_arena_size",
            ));
        }
        Ok(())
    }
}

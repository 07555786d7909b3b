//! Storage abstraction layer.
//!
//! Barrel files are read and written through the [`Storage`] trait so the
//! posting engine runs the same way against a directory ([`FileStorage`]) or
//! an in-memory map ([`MemoryStorage`]).

pub mod file;
pub mod memory;
pub mod structured;
pub mod traits;

// Re-export commonly used types
pub use file::*;
pub use memory::*;
pub use structured::*;
pub use traits::*;

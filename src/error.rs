//! Error types for the Quiver library.
//!
//! All fallible operations return [`Result`], whose error side is the
//! [`QuiverError`] enum. The variants follow the failure classes of the
//! posting engine:
//!
//! - allocation exhaustion of the chunk arena ([`QuiverError::OutOfMemory`]),
//! - I/O and storage failures ([`QuiverError::Io`], [`QuiverError::Storage`]),
//! - reads against a barrel that was removed or merged away
//!   ([`QuiverError::StaleSegment`], recoverable),
//! - misuse of the decode/encode contracts ([`QuiverError::ContractViolation`]),
//! - damaged on-disk data ([`QuiverError::Corruption`]).
//!
//! # Examples
//!
//! ```
//! use quiver::error::{QuiverError, Result};
//!
//! fn lookup() -> Result<()> {
//!     Err(QuiverError::stale_segment("_3"))
//! }
//!
//! match lookup() {
//!     Err(e) if e.is_recoverable() => println!("re-resolve: {e}"),
//!     Err(e) => eprintln!("Error: {e}"),
//!     Ok(()) => {}
//! }
//! ```

use std::io;

use thiserror::Error;

/// The main error type for Quiver operations.
#[derive(Error, Debug)]
pub enum QuiverError {
    /// I/O errors (short reads and writes, missing files, ...)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Storage backend errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// The chunk arena could not supply another chunk, even after growing once.
    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    /// A reader touched a barrel that has been removed or merged away.
    #[error("Stale segment: {0}")]
    StaleSegment(String),

    /// Caller broke a decode or encode contract (decoding past DF, mismatched counts, ...).
    #[error("Contract violation: {0}")]
    ContractViolation(String),

    /// On-disk data failed validation.
    #[error("Corrupt data: {0}")]
    Corruption(String),

    /// Barrel registry errors
    #[error("Barrel error: {0}")]
    Barrel(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// XML serialization/deserialization errors
    #[error("XML error: {0}")]
    Xml(String),

    /// Bad arguments and missing inputs
    #[error("Error: {0}")]
    Other(String),
}

/// Result type alias for operations that may fail with QuiverError.
pub type Result<T> = std::result::Result<T, QuiverError>;

impl QuiverError {
    /// Create a new storage error.
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        QuiverError::Storage(msg.into())
    }

    /// Create a new out-of-memory error.
    pub fn out_of_memory<S: Into<String>>(msg: S) -> Self {
        QuiverError::OutOfMemory(msg.into())
    }

    /// Create a new stale-segment error.
    pub fn stale_segment<S: Into<String>>(barrel: S) -> Self {
        QuiverError::StaleSegment(barrel.into())
    }

    /// Create a new contract violation error.
    pub fn contract<S: Into<String>>(msg: S) -> Self {
        QuiverError::ContractViolation(msg.into())
    }

    /// Create a new corruption error.
    pub fn corruption<S: Into<String>>(msg: S) -> Self {
        QuiverError::Corruption(msg.into())
    }

    /// Create a new barrel registry error.
    pub fn barrel<S: Into<String>>(msg: S) -> Self {
        QuiverError::Barrel(msg.into())
    }

    /// Create a new configuration error.
    pub fn config<S: Into<String>>(msg: S) -> Self {
        QuiverError::Config(msg.into())
    }

    /// Create a new XML error.
    pub fn xml<S: Into<String>>(msg: S) -> Self {
        QuiverError::Xml(msg.into())
    }

    /// Create a new invalid argument error.
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        QuiverError::Other(format!("Invalid argument: {}", msg.into()))
    }

    /// Create a new not found error.
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        QuiverError::Other(format!("Not found: {}", msg.into()))
    }

    /// Whether the caller can retry after re-resolving against the current barrel set.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, QuiverError::StaleSegment(_))
    }

    /// Whether this error reports a programming mistake rather than an environmental failure.
    pub fn is_contract_violation(&self) -> bool {
        matches!(self, QuiverError::ContractViolation(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_construction() {
        let error = QuiverError::not_found("barrel _4");
        assert_eq!(error.to_string(), "Error: Not found: barrel _4");

        let error = QuiverError::stale_segment("_7");
        assert_eq!(error.to_string(), "Stale segment: _7");

        let error = QuiverError::contract("decode past DF");
        assert_eq!(error.to_string(), "Contract violation: decode past DF");
    }

    #[test]
    fn test_error_classes() {
        assert!(QuiverError::stale_segment("_1").is_recoverable());
        assert!(!QuiverError::corruption("bad varint").is_recoverable());
        assert!(QuiverError::contract("x").is_contract_violation());

        let io_error = QuiverError::from(io::Error::new(io::ErrorKind::UnexpectedEof, "short"));
        assert!(!io_error.is_contract_violation());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "File not found");
        let quiver_error = QuiverError::from(io_error);

        match quiver_error {
            QuiverError::Io(_) => {} // Expected
            _ => panic!("Expected IO error variant"),
        }
    }
}

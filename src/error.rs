//! Error types for AtlasCol
//!
//! Provides a unified error type for all operations.
//!
//! Row keys outside a store's capacity are not represented here: they are
//! caller bugs and panic at the point of the lookup, like slice indexing.

use std::path::PathBuf;

use thiserror::Error;

use crate::column::ValueKind;

/// Result type alias using AtlasError
pub type Result<T> = std::result::Result<T, AtlasError>;

/// Unified error type for AtlasCol operations
#[derive(Debug, Error)]
pub enum AtlasError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to open file handle for '{}': {source}", path.display())]
    FileOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // -------------------------------------------------------------------------
    // File Identity Errors
    // -------------------------------------------------------------------------
    #[error(
        "The file key has changed during a refresh for '{}'! Downstream readers assume \
         that a file path always refers to the same physical file. If you are sure the \
         file has not been recreated, this may indicate a filesystem bug. To disable \
         this safety check (not advised), set '{property}=false'.",
        path.display()
    )]
    FileIdentityChanged { path: PathBuf, property: &'static str },

    // -------------------------------------------------------------------------
    // Column Contract Errors
    // -------------------------------------------------------------------------
    #[error("Unsupported reinterpretation from {from} to {to}")]
    UnsupportedReinterpretation { from: ValueKind, to: ValueKind },

    #[error("Invalid block: {0}")]
    InvalidBlock(String),

    #[error("Column kind mismatch: expected {expected}, found {found}")]
    KindMismatch { expected: ValueKind, found: ValueKind },

    // -------------------------------------------------------------------------
    // Temporal Errors
    // -------------------------------------------------------------------------
    #[error("Timestamp out of nanosecond range: {0}")]
    TimestampOutOfRange(String),

    #[error("Unknown time zone: {0}")]
    UnknownZone(String),

    // -------------------------------------------------------------------------
    // Column File Errors
    // -------------------------------------------------------------------------
    #[error("Column file error: {0}")]
    ColumnFile(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<bincode::Error> for AtlasError {
    fn from(err: bincode::Error) -> Self {
        AtlasError::Serialization(err.to_string())
    }
}

//! # AtlasCol
//!
//! Block-structured, immutable column storage with:
//! - Shift/mask row addressing over flat or two-level block directories
//! - Lock-free reads once a column is loaded
//! - Zero-copy reinterpretation of `i64` nanos as instants or zoned date-times
//! - File handles that can be closed underneath readers and reopened safely,
//!   with a device/inode identity check on every reopen
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Query / Engine (consumers)                  │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ get / get_chunk / reinterpret
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                 column::DynColumn                           │
//! │     ImmutableColumnStore<T>  ◄──  TimeColumnStore<Codec>    │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ bulk load
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                 disk::ColumnFileReader                      │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │ read_exact_at
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                 file::FileHandleAccessor                    │
//! │       (refresh on close, file-key safety check)             │
//! └─────────────────────────────────────────────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod column;
pub mod file;
pub mod disk;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{AtlasError, Result};
pub use config::Config;
pub use column::{
    BlockLayout, ColumnSource, DynColumn, ImmutableColumnStore, Primitive, RowKey,
    TimeColumnStore, Value, ValueKind,
};
pub use file::{FileHandle, FileHandleAccessor, FileKey};
pub use disk::{ColumnFileReader, ColumnFileWriter};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of AtlasCol
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

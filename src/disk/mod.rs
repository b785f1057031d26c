//! Disk Module
//!
//! Flat column files: one column's values, row after row, readable block by
//! block through a [`FileHandleAccessor`](crate::file::FileHandleAccessor).
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Header (6 bytes)                                        │
//! │   Magic: "ATCL" (4) | Version: u16 (2)                  │
//! ├─────────────────────────────────────────────────────────┤
//! │ Data (row_count * width bytes)                          │
//! │   value 0 | value 1 | ... (little endian, fixed width)  │
//! │   temporal columns store i64 nanos since the epoch      │
//! ├─────────────────────────────────────────────────────────┤
//! │ Meta (variable)                                         │
//! │   bincode(ColumnFileMeta)                               │
//! ├─────────────────────────────────────────────────────────┤
//! │ Trailer (16 bytes)                                      │
//! │   MetaOffset: u64 (8) | MetaLen: u32 (4) | MetaCRC (4)  │
//! └─────────────────────────────────────────────────────────┘
//! ```

mod reader;
mod writer;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::column::{parse_zone, ValueKind};
use crate::error::Result;

pub use reader::ColumnFileReader;
pub use writer::ColumnFileWriter;

// =============================================================================
// Shared Constants (used by writer and reader)
// =============================================================================

/// Magic bytes identifying an AtlasCol column file
pub(crate) const MAGIC: &[u8; 4] = b"ATCL";

/// Current column file format version
pub(crate) const VERSION: u16 = 1;

/// Header size: Magic (4) + Version (2) = 6 bytes
pub(crate) const HEADER_SIZE: u64 = 6;

/// Trailer size: MetaOffset (8) + MetaLen (4) + MetaCRC (4) = 16 bytes
pub(crate) const TRAILER_SIZE: u64 = 16;

// =============================================================================
// Column File Metadata
// =============================================================================

/// Logical kind as persisted; the zone travels separately as its IANA name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoredKind {
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Instant,
    ZonedDateTime,
}

impl StoredKind {
    pub(crate) fn split(kind: ValueKind) -> (Self, Option<Tz>) {
        match kind {
            ValueKind::Byte => (StoredKind::Byte, None),
            ValueKind::Char => (StoredKind::Char, None),
            ValueKind::Short => (StoredKind::Short, None),
            ValueKind::Int => (StoredKind::Int, None),
            ValueKind::Long => (StoredKind::Long, None),
            ValueKind::Float => (StoredKind::Float, None),
            ValueKind::Double => (StoredKind::Double, None),
            ValueKind::Instant => (StoredKind::Instant, None),
            ValueKind::ZonedDateTime(zone) => (StoredKind::ZonedDateTime, Some(zone)),
        }
    }

    /// Encoded width of one value in bytes
    pub fn width(&self) -> usize {
        match self {
            StoredKind::Byte => 1,
            StoredKind::Char | StoredKind::Short => 2,
            StoredKind::Int | StoredKind::Float => 4,
            StoredKind::Long
            | StoredKind::Double
            | StoredKind::Instant
            | StoredKind::ZonedDateTime => 8,
        }
    }
}

/// Metadata block of a column file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnFileMeta {
    pub kind: StoredKind,
    /// IANA zone name for zoned columns
    pub zone: Option<String>,
    /// log2 of the values per block used when loading
    pub block_shift: u32,
    pub row_count: u64,
    /// CRC32 over the data section
    pub data_crc: u32,
}

impl ColumnFileMeta {
    /// Logical kind, resolving the stored zone name
    pub fn value_kind(&self) -> Result<ValueKind> {
        Ok(match self.kind {
            StoredKind::Byte => ValueKind::Byte,
            StoredKind::Char => ValueKind::Char,
            StoredKind::Short => ValueKind::Short,
            StoredKind::Int => ValueKind::Int,
            StoredKind::Long => ValueKind::Long,
            StoredKind::Float => ValueKind::Float,
            StoredKind::Double => ValueKind::Double,
            StoredKind::Instant => ValueKind::Instant,
            StoredKind::ZonedDateTime => {
                ValueKind::ZonedDateTime(parse_zone(self.zone.as_deref().unwrap_or("UTC"))?)
            }
        })
    }

    /// Size of the data section in bytes
    pub fn data_len(&self) -> u64 {
        self.row_count * self.kind.width() as u64
    }
}

/// Kind of the values physically stored for `kind`
pub(crate) fn storage_kind(kind: ValueKind) -> ValueKind {
    if kind.is_temporal() {
        ValueKind::Long
    } else {
        kind
    }
}

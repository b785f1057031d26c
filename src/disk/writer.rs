//! Column File Writer
//!
//! Streams one column's values to a new column file.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use bytes::{BufMut, BytesMut};
use chrono::{DateTime, TimeZone};

use crate::column::{epoch_nanos, BlockLayout, Primitive, ValueKind, NULL_NANOS};
use crate::error::{AtlasError, Result};

use super::{storage_kind, ColumnFileMeta, StoredKind, HEADER_SIZE, MAGIC, VERSION};

/// Writer for a new column file
pub struct ColumnFileWriter {
    /// Output file path
    path: PathBuf,
    /// Buffered writer for performance
    writer: BufWriter<File>,
    kind: ValueKind,
    block_shift: u32,
    row_count: u64,
    /// Running CRC hasher for data section
    data_hasher: crc32fast::Hasher,
    /// Scratch buffer for one encoded value
    scratch: BytesMut,
}

impl ColumnFileWriter {
    /// Create (or truncate) a column file for values of `kind`
    ///
    /// Writes the header immediately; call `append*` then `finish()`.
    pub fn create(path: &Path, kind: ValueKind, block_shift: u32) -> Result<Self> {
        if block_shift > BlockLayout::MAX_BLOCK_SHIFT {
            return Err(AtlasError::Config(format!(
                "block_shift {} exceeds maximum {}",
                block_shift,
                BlockLayout::MAX_BLOCK_SHIFT
            )));
        }

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;

        let mut writer = BufWriter::new(file);
        writer.write_all(MAGIC)?;
        writer.write_all(&VERSION.to_le_bytes())?;

        Ok(Self {
            path: path.to_path_buf(),
            writer,
            kind,
            block_shift,
            row_count: 0,
            data_hasher: crc32fast::Hasher::new(),
            scratch: BytesMut::with_capacity(8),
        })
    }

    /// Append one value. Temporal columns take `i64` nanos.
    pub fn append<T: Primitive>(&mut self, value: T) -> Result<()> {
        let expected = storage_kind(self.kind);
        if T::KIND != expected {
            return Err(AtlasError::KindMismatch {
                expected,
                found: T::KIND,
            });
        }

        self.scratch.clear();
        value.put_le(&mut self.scratch);
        self.writer.write_all(&self.scratch)?;
        self.data_hasher.update(&self.scratch);
        self.row_count += 1;
        Ok(())
    }

    pub fn append_all<T: Primitive>(&mut self, values: &[T]) -> Result<()> {
        for &value in values {
            self.append(value)?;
        }
        Ok(())
    }

    /// Append a date-time (or null) to a temporal column
    pub fn append_time<Z: TimeZone>(&mut self, value: Option<&DateTime<Z>>) -> Result<()> {
        if !self.kind.is_temporal() {
            return Err(AtlasError::KindMismatch {
                expected: self.kind,
                found: ValueKind::Instant,
            });
        }
        let nanos = match value {
            Some(value) => epoch_nanos(value)?,
            None => NULL_NANOS,
        };
        self.append(nanos)
    }

    /// Number of values written so far
    pub fn row_count(&self) -> u64 {
        self.row_count
    }

    /// Write the meta block and trailer, sync, and return the metadata
    pub fn finish(mut self) -> Result<ColumnFileMeta> {
        let (kind, zone) = StoredKind::split(self.kind);
        let meta = ColumnFileMeta {
            kind,
            zone: zone.map(|z| z.name().to_string()),
            block_shift: self.block_shift,
            row_count: self.row_count,
            data_crc: self.data_hasher.finalize(),
        };

        let meta_offset = HEADER_SIZE + meta.data_len();
        let meta_bytes = bincode::serialize(&meta)?;
        let meta_crc = crc32fast::hash(&meta_bytes);

        let mut trailer = BytesMut::with_capacity(super::TRAILER_SIZE as usize);
        trailer.put_u64_le(meta_offset);
        trailer.put_u32_le(meta_bytes.len() as u32);
        trailer.put_u32_le(meta_crc);

        self.writer.write_all(&meta_bytes)?;
        self.writer.write_all(&trailer)?;
        self.writer.flush()?;

        let file = self.writer.into_inner().map_err(|e| {
            AtlasError::ColumnFile(format!("Failed to flush column file: {}", e))
        })?;
        file.sync_all()?;

        tracing::debug!(
            path = %self.path.display(),
            kind = %self.kind,
            rows = meta.row_count,
            "Wrote column file"
        );

        Ok(meta)
    }
}

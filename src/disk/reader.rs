//! Column File Reader
//!
//! Validates a column file and sources its blocks through a
//! [`FileHandleAccessor`], so a handle closed mid-load is reopened (and
//! identity-checked) transparently.

use std::path::Path;

use bytes::Buf;

use crate::column::{BlockLayout, DynColumn, ImmutableColumnStore, Primitive, ValueKind};
use crate::config::Config;
use crate::error::{AtlasError, Result};
use crate::file::FileHandleAccessor;

use super::{storage_kind, ColumnFileMeta, HEADER_SIZE, MAGIC, TRAILER_SIZE, VERSION};

/// Reader for column files
pub struct ColumnFileReader {
    accessor: FileHandleAccessor,
    meta: ColumnFileMeta,
    kind: ValueKind,
    layout: BlockLayout,
}

impl ColumnFileReader {
    /// Open a column file with a plain read-only accessor
    pub fn open(path: &Path, config: &Config) -> Result<Self> {
        let accessor = FileHandleAccessor::open(path, config)?;
        Self::from_accessor(accessor, config)
    }

    /// Read and validate header, trailer and metadata through `accessor`
    pub fn from_accessor(accessor: FileHandleAccessor, config: &Config) -> Result<Self> {
        let file_size = accessor.size()?;
        if file_size < HEADER_SIZE + TRAILER_SIZE {
            return Err(AtlasError::ColumnFile(format!(
                "{}: file too small ({} bytes)",
                accessor, file_size
            )));
        }

        let mut header = [0u8; HEADER_SIZE as usize];
        accessor.read_exact_at(&mut header, 0)?;
        if &header[0..4] != MAGIC {
            return Err(AtlasError::ColumnFile(format!(
                "{}: invalid magic {:?}",
                accessor,
                &header[0..4]
            )));
        }
        let version = (&header[4..6]).get_u16_le();
        if version != VERSION {
            return Err(AtlasError::ColumnFile(format!(
                "{}: unsupported version {}",
                accessor, version
            )));
        }

        let mut trailer = [0u8; TRAILER_SIZE as usize];
        accessor.read_exact_at(&mut trailer, file_size - TRAILER_SIZE)?;
        let mut cursor = &trailer[..];
        let meta_offset = cursor.get_u64_le();
        let meta_len = u64::from(cursor.get_u32_le());
        let meta_crc = cursor.get_u32_le();

        if meta_offset
            .checked_add(meta_len)
            .map_or(true, |end| end + TRAILER_SIZE != file_size)
        {
            return Err(AtlasError::ColumnFile(format!(
                "{}: trailer points outside the file (offset {}, len {}, size {})",
                accessor, meta_offset, meta_len, file_size
            )));
        }

        let mut meta_bytes = vec![0u8; meta_len as usize];
        accessor.read_exact_at(&mut meta_bytes, meta_offset)?;
        if crc32fast::hash(&meta_bytes) != meta_crc {
            return Err(AtlasError::ColumnFile(format!(
                "{}: metadata checksum mismatch",
                accessor
            )));
        }
        let meta: ColumnFileMeta = bincode::deserialize(&meta_bytes)?;

        if meta
            .row_count
            .checked_mul(meta.kind.width() as u64)
            .map_or(true, |len| HEADER_SIZE + len != meta_offset)
        {
            return Err(AtlasError::ColumnFile(format!(
                "{}: {} rows do not fit a {} byte data section",
                accessor,
                meta.row_count,
                meta_offset - HEADER_SIZE
            )));
        }

        let kind = meta.value_kind()?;
        let layout = BlockLayout::new(meta.block_shift, config.page_shift, meta.row_count.max(1))?;

        Ok(Self {
            accessor,
            meta,
            kind,
            layout,
        })
    }

    pub fn meta(&self) -> &ColumnFileMeta {
        &self.meta
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    /// Layout of stores loaded from this file
    pub fn layout(&self) -> &BlockLayout {
        &self.layout
    }

    pub fn accessor(&self) -> &FileHandleAccessor {
        &self.accessor
    }

    pub fn row_count(&self) -> u64 {
        self.meta.row_count
    }

    /// Number of (possibly partial) blocks holding data
    pub fn block_count(&self) -> u64 {
        (self.meta.row_count + self.layout.block_mask()) >> self.layout.block_shift()
    }

    /// Decode one block; the last block may be shorter than the block size
    pub fn read_block<T: Primitive>(&self, block_index: u64) -> Result<Vec<T>> {
        self.check_kind::<T>()?;
        let bytes = self.read_block_bytes(block_index, T::WIDTH)?;
        Ok(decode(&bytes))
    }

    /// Bulk-load every block into a frozen store, verifying the data checksum
    pub fn load<T: Primitive>(&self) -> Result<ImmutableColumnStore<T>> {
        self.check_kind::<T>()?;

        let mut loader = ImmutableColumnStore::<T>::loader(self.layout);
        let mut hasher = crc32fast::Hasher::new();
        for block_index in 0..self.block_count() {
            let bytes = self.read_block_bytes(block_index, T::WIDTH)?;
            hasher.update(&bytes);
            let values: Vec<T> = decode(&bytes);
            loader.fill_from(self.layout.block_start(block_index), &values);
        }

        if hasher.finalize() != self.meta.data_crc {
            return Err(AtlasError::ColumnFile(format!(
                "{}: data checksum mismatch",
                self.accessor
            )));
        }

        tracing::debug!(
            path = %self.accessor,
            kind = %self.kind,
            rows = self.meta.row_count,
            blocks = self.block_count(),
            "Loaded column file"
        );

        Ok(loader.finish())
    }

    /// Load the column as its declared kind
    pub fn load_column(&self) -> Result<DynColumn> {
        match self.kind {
            ValueKind::Byte => Ok(DynColumn::Byte(self.load()?)),
            ValueKind::Char => Ok(DynColumn::Char(self.load()?)),
            ValueKind::Short => Ok(DynColumn::Short(self.load()?)),
            ValueKind::Int => Ok(DynColumn::Int(self.load()?)),
            ValueKind::Long => Ok(DynColumn::Long(self.load()?)),
            ValueKind::Float => Ok(DynColumn::Float(self.load()?)),
            ValueKind::Double => Ok(DynColumn::Double(self.load()?)),
            ValueKind::Instant | ValueKind::ZonedDateTime(_) => {
                self.load::<i64>()?.reinterpret(self.kind)
            }
        }
    }

    fn check_kind<T: Primitive>(&self) -> Result<()> {
        let expected = storage_kind(self.kind);
        if T::KIND != expected {
            return Err(AtlasError::KindMismatch {
                expected,
                found: T::KIND,
            });
        }
        Ok(())
    }

    fn read_block_bytes(&self, block_index: u64, width: usize) -> Result<Vec<u8>> {
        if block_index >= self.block_count() {
            return Err(AtlasError::ColumnFile(format!(
                "{}: block {} beyond {} blocks",
                self.accessor,
                block_index,
                self.block_count()
            )));
        }
        let start = self.layout.block_start(block_index);
        let rows = (self.meta.row_count - start).min(self.layout.block_size() as u64);

        let mut bytes = vec![0u8; rows as usize * width];
        self.accessor
            .read_exact_at(&mut bytes, HEADER_SIZE + start * width as u64)?;
        Ok(bytes)
    }
}

fn decode<T: Primitive>(bytes: &[u8]) -> Vec<T> {
    let mut cursor = bytes;
    let mut values = Vec::with_capacity(bytes.len() / T::WIDTH);
    while cursor.has_remaining() {
        values.push(T::get_le(&mut cursor));
    }
    values
}

//! Immutable Column Store
//!
//! A column over a frozen [`BlockDirectory`]. The only way to populate one is
//! through a [`BlockLoader`], which is consumed when the store is created, so
//! every reader sees fully populated blocks.

use std::ops::Range;
use std::sync::Arc;

use crate::error::Result;

use super::directory::{BlockDirectory, BlockLayout, BlockSlice, BlockSlices, ChunkIter};
use super::{ColumnSource, DynColumn, Primitive, RowKey, ValueKind};

/// Column whose values never change once constructed.
///
/// ## Concurrency:
/// - Reads take `&self`, never lock, never allocate
/// - Cloning shares the directory (`Arc`), it does not copy blocks
#[derive(Clone)]
pub struct ImmutableColumnStore<T: Primitive> {
    directory: Arc<BlockDirectory<T>>,
}

impl<T: Primitive> ImmutableColumnStore<T> {
    /// Start a bulk load for a new store
    pub fn loader(layout: BlockLayout) -> BlockLoader<T> {
        BlockLoader {
            directory: BlockDirectory::new(layout),
        }
    }

    /// Adopt caller-built blocks without copying; `blocks[i]` becomes block `i`.
    ///
    /// Every block must hold exactly `layout.block_size()` values.
    pub fn from_blocks(layout: BlockLayout, blocks: Vec<Box<[T]>>) -> Result<Self> {
        let mut loader = Self::loader(layout);
        for (block_index, block) in blocks.into_iter().enumerate() {
            loader.adopt_block(block_index as u64, block)?;
        }
        Ok(loader.finish())
    }

    /// Copy `values` into a new store starting at row key 0
    pub fn from_values(layout: BlockLayout, values: &[T]) -> Self {
        let mut loader = Self::loader(layout);
        loader.fill_from(0, values);
        loader.finish()
    }

    pub fn layout(&self) -> &BlockLayout {
        self.directory.layout()
    }

    /// The shared directory backing this store
    pub fn directory(&self) -> &Arc<BlockDirectory<T>> {
        &self.directory
    }

    /// True when both stores read the same blocks
    pub fn shares_directory(&self, other: &ImmutableColumnStore<T>) -> bool {
        Arc::ptr_eq(&self.directory, &other.directory)
    }

    /// Per-block views over `range`, for vectorized consumers
    pub fn block_slices(&self, range: Range<RowKey>) -> BlockSlices<'_, T> {
        self.directory.block_slices(range)
    }

    /// Append the values of `range` to `dest`, one block sub-range at a time
    pub fn fill_chunk(&self, range: Range<RowKey>, dest: &mut Vec<T>) {
        dest.reserve((range.end.saturating_sub(range.start)) as usize);
        for slice in self.directory.block_slices(range) {
            match slice {
                BlockSlice::Values(values) => dest.extend_from_slice(values),
                BlockSlice::Absent(len) => dest.resize(dest.len() + len, T::NULL),
            }
        }
    }

    /// Zero-copy view of this store as `target`
    pub fn reinterpret(&self, target: ValueKind) -> Result<DynColumn> {
        T::reinterpret(self, target)
    }
}

impl<T: Primitive> ColumnSource for ImmutableColumnStore<T> {
    type Value = T;
    type Chunk<'a> = ChunkIter<'a, T>
    where
        Self: 'a;

    fn kind(&self) -> ValueKind {
        T::KIND
    }

    #[inline]
    fn get(&self, row_key: RowKey) -> T {
        self.directory.get(row_key)
    }

    fn get_chunk(&self, range: Range<RowKey>) -> ChunkIter<'_, T> {
        self.directory.chunk(range)
    }
}

impl<T: Primitive> std::fmt::Debug for ImmutableColumnStore<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImmutableColumnStore")
            .field("kind", &T::KIND)
            .field("layout", self.layout())
            .field("allocated_blocks", &self.directory.allocated_blocks())
            .finish()
    }
}

// =============================================================================
// Bulk Loading
// =============================================================================

/// Population handle for an [`ImmutableColumnStore`].
///
/// Blocks are allocated lazily as rows are written; rows never written read
/// back as `T::NULL`. Row keys at or beyond the layout's capacity panic.
pub struct BlockLoader<T: Primitive> {
    directory: BlockDirectory<T>,
}

impl<T: Primitive> BlockLoader<T> {
    pub fn layout(&self) -> &BlockLayout {
        self.directory.layout()
    }

    pub fn set(&mut self, row_key: RowKey, value: T) {
        let layout = *self.directory.layout();
        assert!(
            row_key < layout.capacity(),
            "row key {} out of range for capacity {}",
            row_key,
            layout.capacity()
        );
        self.directory.block_mut(layout.block_index(row_key))[layout.offset(row_key)] = value;
    }

    /// Copy a contiguous run of values starting at `start`
    pub fn fill_from(&mut self, start: RowKey, values: &[T]) {
        let layout = *self.directory.layout();
        assert!(
            start
                .checked_add(values.len() as u64)
                .is_some_and(|end| end <= layout.capacity()),
            "{} values at row key {} exceed capacity {}",
            values.len(),
            start,
            layout.capacity()
        );

        let mut row_key = start;
        let mut remaining = values;
        while !remaining.is_empty() {
            let offset = layout.offset(row_key);
            let take = remaining.len().min(layout.block_size() - offset);
            let block = self.directory.block_mut(layout.block_index(row_key));
            block[offset..offset + take].copy_from_slice(&remaining[..take]);
            remaining = &remaining[take..];
            row_key += take as u64;
        }
    }

    /// Install a whole block without copying it
    pub fn adopt_block(&mut self, block_index: u64, block: Box<[T]>) -> Result<()> {
        self.directory.install_block(block_index, block)
    }

    /// Freeze the loaded blocks into a store
    pub fn finish(self) -> ImmutableColumnStore<T> {
        ImmutableColumnStore {
            directory: Arc::new(self.directory),
        }
    }
}

//! Block Directory
//!
//! Maps row keys to (block index, offset) and owns the dense blocks.
//!
//! ## Addressing
//! ```text
//!   row key k (u64)
//!   ┌───────────────────────────────┬──────────────────┐
//!   │ block index  (k >> shift)     │ offset (k & mask)│
//!   └───────────────────────────────┴──────────────────┘
//!
//!   two-level: block index is split again
//!   ┌────────────────┬──────────────┐
//!   │ page (bi >> p) │ slot (bi & m)│
//!   └────────────────┴──────────────┘
//! ```
//!
//! Slot vectors grow on demand, so memory follows the blocks actually
//! touched rather than the configured capacity.

use std::ops::Range;

use crate::error::{AtlasError, Result};

use super::{Primitive, RowKey};

// =============================================================================
// Block Layout
// =============================================================================

/// Shape of a block directory: block size, page size and row-key capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockLayout {
    block_shift: u32,
    page_shift: u32,
    capacity: u64,
}

impl BlockLayout {
    /// Largest supported block: 1G values
    pub const MAX_BLOCK_SHIFT: u32 = 30;

    /// Largest supported directory page: 16M blocks
    pub const MAX_PAGE_SHIFT: u32 = 24;

    /// Largest supported row-key capacity
    pub const MAX_CAPACITY: u64 = 1 << 62;

    /// Largest page table a two-level directory may need: 1M page pointers
    pub const MAX_DIRECTORY_PAGES: u64 = 1 << 20;

    pub fn new(block_shift: u32, page_shift: u32, capacity: u64) -> Result<Self> {
        if block_shift > Self::MAX_BLOCK_SHIFT {
            return Err(AtlasError::Config(format!(
                "block_shift {} exceeds maximum {}",
                block_shift,
                Self::MAX_BLOCK_SHIFT
            )));
        }
        if page_shift > Self::MAX_PAGE_SHIFT {
            return Err(AtlasError::Config(format!(
                "page_shift {} exceeds maximum {}",
                page_shift,
                Self::MAX_PAGE_SHIFT
            )));
        }
        if capacity == 0 || capacity > Self::MAX_CAPACITY {
            return Err(AtlasError::Config(format!(
                "capacity must be in 1..={}, got {}",
                Self::MAX_CAPACITY,
                capacity
            )));
        }
        let layout = Self {
            block_shift,
            page_shift,
            capacity,
        };
        // The page table grows to the highest written page, so its full
        // length has to be allocatable
        let pages = layout.page_count();
        if layout.is_two_level() && pages > Self::MAX_DIRECTORY_PAGES {
            return Err(AtlasError::Config(format!(
                "capacity {} needs {} directory pages, maximum {}",
                capacity,
                pages,
                Self::MAX_DIRECTORY_PAGES
            )));
        }
        Ok(layout)
    }

    pub fn block_shift(&self) -> u32 {
        self.block_shift
    }

    pub fn page_shift(&self) -> u32 {
        self.page_shift
    }

    /// Number of values per block
    pub fn block_size(&self) -> usize {
        1usize << self.block_shift
    }

    pub fn block_mask(&self) -> u64 {
        (1u64 << self.block_shift) - 1
    }

    /// Exclusive upper bound on row keys
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    #[inline]
    pub fn block_index(&self, row_key: RowKey) -> u64 {
        row_key >> self.block_shift
    }

    #[inline]
    pub fn offset(&self, row_key: RowKey) -> usize {
        (row_key & self.block_mask()) as usize
    }

    /// First row key held by `block_index`
    #[inline]
    pub fn block_start(&self, block_index: u64) -> RowKey {
        block_index << self.block_shift
    }

    /// Number of blocks needed to cover the capacity
    pub fn block_count(&self) -> u64 {
        (self.capacity + self.block_mask()) >> self.block_shift
    }

    /// Number of directory pages needed to cover the capacity
    pub fn page_count(&self) -> u64 {
        let page_mask = (1u64 << self.page_shift) - 1;
        (self.block_count() + page_mask) >> self.page_shift
    }

    /// Whether directories with this layout use a page indirection
    pub fn is_two_level(&self) -> bool {
        self.block_count() > (1u64 << self.page_shift)
    }

    #[inline]
    fn check_row_key(&self, row_key: RowKey) {
        assert!(
            row_key < self.capacity,
            "row key {} out of range for capacity {}",
            row_key,
            self.capacity
        );
    }

    #[inline]
    fn check_range(&self, range: &Range<RowKey>) {
        assert!(
            range.start <= range.end && range.end <= self.capacity,
            "row key range {:?} out of range for capacity {}",
            range,
            self.capacity
        );
    }
}

// =============================================================================
// Block Directory
// =============================================================================

type Block<T> = Box<[T]>;

enum Slots<T> {
    Flat(Vec<Option<Block<T>>>),
    Paged(Vec<Option<Box<[Option<Block<T>>]>>>),
}

/// Owner of a column's blocks.
///
/// Reads take `&self` and never allocate. Blocks are created through
/// `&mut self` only, which the immutable store restricts to its loader.
pub struct BlockDirectory<T: Primitive> {
    layout: BlockLayout,
    slots: Slots<T>,
    allocated: usize,
}

impl<T: Primitive> BlockDirectory<T> {
    /// Create an empty directory; no blocks are allocated
    pub fn new(layout: BlockLayout) -> Self {
        let slots = if layout.is_two_level() {
            Slots::Paged(Vec::new())
        } else {
            Slots::Flat(Vec::new())
        };
        Self {
            layout,
            slots,
            allocated: 0,
        }
    }

    pub fn layout(&self) -> &BlockLayout {
        &self.layout
    }

    /// Number of blocks currently allocated
    pub fn allocated_blocks(&self) -> usize {
        self.allocated
    }

    /// The block at `block_index`, if it has been allocated
    #[inline]
    pub fn block(&self, block_index: u64) -> Option<&[T]> {
        match &self.slots {
            Slots::Flat(blocks) => blocks.get(block_index as usize)?.as_deref(),
            Slots::Paged(pages) => {
                let page_mask = (1u64 << self.layout.page_shift) - 1;
                let page = pages
                    .get((block_index >> self.layout.page_shift) as usize)?
                    .as_ref()?;
                page[(block_index & page_mask) as usize].as_deref()
            }
        }
    }

    /// Value at `row_key`, or `T::NULL` for an unallocated block.
    ///
    /// # Panics
    /// If `row_key` is at or beyond the layout's capacity.
    #[inline]
    pub fn get(&self, row_key: RowKey) -> T {
        self.layout.check_row_key(row_key);
        match self.block(self.layout.block_index(row_key)) {
            Some(block) => block[self.layout.offset(row_key)],
            None => T::NULL,
        }
    }

    /// Value-by-value iterator over `range`
    pub fn chunk(&self, range: Range<RowKey>) -> ChunkIter<'_, T> {
        self.layout.check_range(&range);
        ChunkIter {
            directory: self,
            next: range.start,
            end: range.end,
            cached_index: u64::MAX,
            cached: None,
        }
    }

    /// Per-block views over `range`
    pub fn block_slices(&self, range: Range<RowKey>) -> BlockSlices<'_, T> {
        self.layout.check_range(&range);
        BlockSlices {
            directory: self,
            next: range.start,
            end: range.end,
        }
    }

    /// Mutable access to a block, allocating it (filled with `T::NULL`) on first use
    pub(crate) fn block_mut(&mut self, block_index: u64) -> &mut [T] {
        let block_size = self.layout.block_size();
        if self.slot_mut(block_index).is_none() {
            self.allocated += 1;
        }
        self.slot_mut(block_index)
            .get_or_insert_with(|| vec![T::NULL; block_size].into_boxed_slice())
    }

    /// Adopt a caller-built block without copying it
    pub(crate) fn install_block(&mut self, block_index: u64, block: Block<T>) -> Result<()> {
        if block.len() != self.layout.block_size() {
            return Err(AtlasError::InvalidBlock(format!(
                "block {} has {} values, expected {}",
                block_index,
                block.len(),
                self.layout.block_size()
            )));
        }
        if block_index >= self.layout.block_count() {
            return Err(AtlasError::InvalidBlock(format!(
                "block {} beyond capacity {} ({} blocks)",
                block_index,
                self.layout.capacity,
                self.layout.block_count()
            )));
        }
        let slot = self.slot_mut(block_index);
        let replaced = slot.replace(block).is_some();
        if !replaced {
            self.allocated += 1;
        }
        Ok(())
    }

    fn slot_mut(&mut self, block_index: u64) -> &mut Option<Block<T>> {
        assert!(
            block_index < self.layout.block_count(),
            "block index {} out of range ({} blocks)",
            block_index,
            self.layout.block_count()
        );
        let page_shift = self.layout.page_shift;
        match &mut self.slots {
            Slots::Flat(blocks) => {
                let index = block_index as usize;
                if blocks.len() <= index {
                    blocks.resize_with(index + 1, || None);
                }
                &mut blocks[index]
            }
            Slots::Paged(pages) => {
                let page_index = (block_index >> page_shift) as usize;
                if pages.len() <= page_index {
                    pages.resize_with(page_index + 1, || None);
                }
                let page = pages[page_index].get_or_insert_with(|| {
                    (0..1usize << page_shift)
                        .map(|_| None)
                        .collect::<Vec<_>>()
                        .into_boxed_slice()
                });
                let page_mask = (1u64 << page_shift) - 1;
                &mut page[(block_index & page_mask) as usize]
            }
        }
    }
}

// =============================================================================
// Chunk Iteration
// =============================================================================

/// Lazy iterator over the values of a row-key range.
///
/// Cloning restarts from the clone point, so a fresh clone taken before
/// iteration replays the whole range.
#[derive(Clone)]
pub struct ChunkIter<'a, T: Primitive> {
    directory: &'a BlockDirectory<T>,
    next: RowKey,
    end: RowKey,
    cached_index: u64,
    cached: Option<&'a [T]>,
}

impl<'a, T: Primitive> Iterator for ChunkIter<'a, T> {
    type Item = T;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let row_key = self.next;
        self.next += 1;

        let layout = &self.directory.layout;
        let block_index = layout.block_index(row_key);
        if block_index != self.cached_index {
            self.cached = self.directory.block(block_index);
            self.cached_index = block_index;
        }
        Some(match self.cached {
            Some(block) => block[layout.offset(row_key)],
            None => T::NULL,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.end - self.next) as usize;
        (remaining, Some(remaining))
    }
}

impl<T: Primitive> ExactSizeIterator for ChunkIter<'_, T> {}

/// One block's contribution to a range
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BlockSlice<'a, T> {
    /// Borrowed values from an allocated block
    Values(&'a [T]),
    /// A run of rows in an unallocated block
    Absent(usize),
}

impl<T> BlockSlice<'_, T> {
    pub fn len(&self) -> usize {
        match self {
            BlockSlice::Values(values) => values.len(),
            BlockSlice::Absent(len) => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Iterator over the per-block pieces of a range
#[derive(Clone)]
pub struct BlockSlices<'a, T: Primitive> {
    directory: &'a BlockDirectory<T>,
    next: RowKey,
    end: RowKey,
}

impl<'a, T: Primitive> Iterator for BlockSlices<'a, T> {
    type Item = BlockSlice<'a, T>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let layout = &self.directory.layout;
        let block_index = layout.block_index(self.next);
        let offset = layout.offset(self.next);
        let stop = self.end.min(layout.block_start(block_index + 1));
        let len = (stop - self.next) as usize;
        self.next = stop;

        Some(match self.directory.block(block_index) {
            Some(block) => BlockSlice::Values(&block[offset..offset + len]),
            None => BlockSlice::Absent(len),
        })
    }
}

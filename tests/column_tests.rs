//! Tests for block-structured column stores
//!
//! These tests verify:
//! - Shift/mask addressing agrees with division
//! - Point and range reads across block boundaries
//! - Absent-value sentinels for every primitive kind
//! - Two-level directories for large capacities
//! - Zero-copy reinterpretation and its failure modes

use std::sync::Arc;
use std::thread;

use atlascol::column::{BlockSlice, ImmutableColumnStore, Primitive};
use atlascol::{AtlasError, BlockLayout, ColumnSource, Config, DynColumn, Value, ValueKind};

// =============================================================================
// Helper Functions
// =============================================================================

/// Layout with `1 << block_shift` values per block and a flat directory
fn layout(block_shift: u32, capacity: u64) -> BlockLayout {
    BlockLayout::new(block_shift, 12, capacity).unwrap()
}

/// Block size 4, rows 0..10 holding 10..=19
fn ten_rows() -> ImmutableColumnStore<i64> {
    let values: Vec<i64> = (10..20).collect();
    ImmutableColumnStore::from_values(layout(2, 64), &values)
}

fn assert_absent<T: Primitive>() {
    let store = ImmutableColumnStore::<T>::from_values(layout(2, 32), &[]);
    assert!(store.get(0).is_null());
    assert!(store.get(31).is_null());
    assert!(store.get(31).into_value() == Value::Null);
}

// =============================================================================
// Addressing Tests
// =============================================================================

#[test]
fn test_block_addressing_matches_division() {
    for shift in [0u32, 1, 2, 5, 10] {
        let layout = layout(shift, 1 << 20);
        let block_size = 1u64 << shift;
        for k in [0u64, 1, 3, 4, 7, 1023, 1024, 99_999, (1 << 20) - 1] {
            assert_eq!(layout.block_index(k), k / block_size);
            assert_eq!(layout.offset(k) as u64, k % block_size);
            assert_eq!(
                layout.block_index(k) * block_size + layout.offset(k) as u64,
                k
            );
        }
    }
}

// =============================================================================
// Read Tests
// =============================================================================

#[test]
fn test_ten_rows_in_blocks_of_four() {
    let store = ten_rows();

    assert_eq!(store.get(0), 10);
    assert_eq!(store.get(9), 19);

    let chunk: Vec<i64> = store.get_chunk(2..6).collect();
    assert_eq!(chunk, vec![12, 13, 14, 15]);

    assert_eq!(store.get(10), i64::NULL);
    assert_eq!(store.get(40), i64::NULL);
    assert_eq!(store.directory().allocated_blocks(), 3);
}

#[test]
fn test_chunk_is_restartable() {
    let store = ten_rows();
    let chunk = store.get_chunk(1..9);

    let first: Vec<i64> = chunk.clone().collect();
    let second: Vec<i64> = chunk.collect();
    assert_eq!(first, second);
    assert_eq!(first.len(), 8);
}

#[test]
fn test_empty_chunk() {
    let store = ten_rows();
    assert_eq!(store.get_chunk(5..5).count(), 0);
}

#[test]
fn test_fill_chunk_pads_unallocated_blocks() {
    let store = ten_rows();
    let mut dest = Vec::new();
    store.fill_chunk(8..14, &mut dest);
    assert_eq!(dest, vec![18, 19, i64::NULL, i64::NULL, i64::NULL, i64::NULL]);
}

#[test]
fn test_block_slices_follow_block_boundaries() {
    let store = ten_rows();
    let lens: Vec<usize> = store.block_slices(3..17).map(|s| s.len()).collect();
    assert_eq!(lens, vec![1, 4, 4, 4, 1]);

    let slices: Vec<BlockSlice<'_, i64>> = store.block_slices(3..17).collect();
    assert!(matches!(slices[0], BlockSlice::Values(&[13])));
    assert!(matches!(slices[3], BlockSlice::Absent(4)));
}

#[test]
#[should_panic(expected = "out of range")]
fn test_get_beyond_capacity_panics() {
    let store = ten_rows();
    store.get(64);
}

#[test]
#[should_panic]
fn test_chunk_beyond_capacity_panics() {
    let store = ten_rows();
    let _ = store.get_chunk(60..65);
}

#[test]
fn test_absent_sentinel_for_every_kind() {
    assert_absent::<i8>();
    assert_absent::<u16>();
    assert_absent::<i16>();
    assert_absent::<i32>();
    assert_absent::<i64>();
    assert_absent::<f32>();
    assert_absent::<f64>();
}

#[test]
fn test_layout_rejects_unallocatable_directory() {
    // 2^58 blocks in 2^54 pages: the page table alone could never be allocated
    let err = BlockLayout::new(4, 4, 1 << 62).unwrap_err();
    assert!(matches!(err, AtlasError::Config(_)));
    assert!(err.to_string().contains("directory pages"));

    // Same shapes through the configuration
    let config = Config::builder()
        .block_shift(4)
        .page_shift(4)
        .max_row_count(1 << 62)
        .build();
    assert!(matches!(config.block_layout(), Err(AtlasError::Config(_))));

    // The defaults stay well inside the limit
    let layout = Config::default().block_layout().unwrap();
    assert!(layout.page_count() <= BlockLayout::MAX_DIRECTORY_PAGES);

    // A large but addressable capacity still builds and reads lazily
    let layout = BlockLayout::new(16, 12, 1 << 40).unwrap();
    let store = ImmutableColumnStore::<i64>::from_values(layout, &[1, 2]);
    assert_eq!(store.get((1 << 40) - 1), i64::NULL);
}

#[test]
fn test_two_level_directory_reads() {
    // 2^4 blocks per page, so 1000 blocks of 4 values need a second level
    let layout = BlockLayout::new(2, 4, 4000).unwrap();
    assert!(layout.is_two_level());
    assert_eq!(layout.page_shift(), 4);
    assert_eq!(layout.page_count(), 63);

    let mut loader = ImmutableColumnStore::<i32>::loader(layout);
    loader.set(0, 7);
    loader.set(2222, 42);
    loader.set(3999, -1);
    let store = loader.finish();

    assert_eq!(store.get(0), 7);
    assert_eq!(store.get(2222), 42);
    assert_eq!(store.get(3999), -1);
    assert_eq!(store.get(1000), i32::NULL);
    assert_eq!(store.directory().allocated_blocks(), 3);
}

#[test]
fn test_from_blocks_adopts_without_reindexing() {
    let layout = layout(2, 16);
    let blocks: Vec<Box<[i16]>> = vec![
        vec![1, 2, 3, 4].into_boxed_slice(),
        vec![5, 6, 7, 8].into_boxed_slice(),
    ];
    let store = ImmutableColumnStore::from_blocks(layout, blocks).unwrap();
    assert_eq!(store.get_chunk(2..7).collect::<Vec<_>>(), vec![3, 4, 5, 6, 7]);
    assert_eq!(store.get(8), i16::NULL);
}

#[test]
fn test_from_blocks_rejects_short_block() {
    let blocks: Vec<Box<[i16]>> = vec![vec![1, 2, 3].into_boxed_slice()];
    let result = ImmutableColumnStore::from_blocks(layout(2, 16), blocks);
    assert!(matches!(result, Err(AtlasError::InvalidBlock(_))));
}

#[test]
fn test_concurrent_readers_see_same_values() {
    let store = Arc::new(ImmutableColumnStore::from_values(
        layout(3, 1 << 12),
        &(0..4096).collect::<Vec<i32>>(),
    ));

    let handles: Vec<_> = (0..8)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for k in (t..4096).step_by(8) {
                    assert_eq!(store.get(k as u64), k as i32);
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

// =============================================================================
// Reinterpretation Tests
// =============================================================================

#[test]
fn test_long_reinterprets_as_instant_without_copying() {
    let store = ten_rows();
    let column = store.reinterpret(ValueKind::Instant).unwrap();

    let instant = column.as_instant().unwrap();
    assert!(instant.nanos().shares_directory(&store));
    assert_eq!(instant.get_nanos(3), 13);
}

#[test]
fn test_identity_reinterpretation_shares_blocks() {
    let store = ImmutableColumnStore::from_values(layout(2, 8), &[1.5f64, 2.5]);
    let column = store.reinterpret(ValueKind::Double).unwrap();
    match column {
        DynColumn::Double(view) => assert!(view.shares_directory(&store)),
        other => panic!("unexpected column {:?}", other),
    }
}

#[test]
fn test_unsupported_reinterpretation_fails() {
    let store = ImmutableColumnStore::from_values(layout(2, 8), &[1i32, 2]);
    let err = store.reinterpret(ValueKind::Instant).unwrap_err();
    assert!(matches!(
        err,
        AtlasError::UnsupportedReinterpretation {
            from: ValueKind::Int,
            to: ValueKind::Instant
        }
    ));

    let longs = ten_rows();
    assert!(longs.reinterpret(ValueKind::Double).is_err());
}

#[test]
fn test_dyn_column_values() {
    let column = DynColumn::Char(ImmutableColumnStore::from_values(
        layout(2, 8),
        &[u16::from(b'a'), u16::NULL],
    ));
    assert_eq!(column.kind(), ValueKind::Char);
    assert_eq!(column.capacity(), 8);
    assert_eq!(column.get_value(0), Value::Char(u16::from(b'a')));
    assert_eq!(column.get_value(1), Value::Null);
    assert_eq!(column.get_value(0).to_string(), "a");
}

//! Tests for file handles and the file handle accessor
//!
//! These tests verify:
//! - File keys identify physical files, not paths
//! - Closed handles are detected and refreshed
//! - Concurrent refreshes of one stale handle open exactly one new handle
//! - A reopened file with a different key is rejected (or logged when the
//!   safety check is disabled)

use std::fs::{self, File};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use parking_lot::Mutex;

use atlascol::config::SAFETY_CHECK_PROPERTY;
use atlascol::file::{is_closed_error, FileHandleFactory, HandleState};
use atlascol::{AtlasError, Config, FileHandle, FileHandleAccessor, FileKey};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_file(contents: &[u8]) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("data.col");
    let mut file = File::create(&path).unwrap();
    file.write_all(contents).unwrap();
    file.sync_all().unwrap();
    (temp_dir, path)
}

fn config(safety_check: bool) -> Config {
    Config::builder().file_key_safety_check(safety_check).build()
}

/// Factory that counts how many handles it has opened
fn counting_factory() -> (Arc<AtomicUsize>, Arc<dyn FileHandleFactory>) {
    let opens = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&opens);
    let factory = move |path: &Path| -> io::Result<Arc<FileHandle>> {
        counter.fetch_add(1, Ordering::SeqCst);
        FileHandle::open(path).map(Arc::new)
    };
    let factory: Arc<dyn FileHandleFactory> = Arc::new(factory);
    (opens, factory)
}

type Handles = Arc<Mutex<Vec<Arc<FileHandle>>>>;

/// Factory whose first handle has the real key and every later one a foreign
/// key. The foreign handles it hands out are kept for inspection.
fn identity_changing_factory() -> (Handles, Arc<dyn FileHandleFactory>) {
    let opens = AtomicUsize::new(0);
    let foreign: Handles = Arc::new(Mutex::new(Vec::new()));
    let issued = Arc::clone(&foreign);
    let factory = move |path: &Path| -> io::Result<Arc<FileHandle>> {
        if opens.fetch_add(1, Ordering::SeqCst) == 0 {
            return FileHandle::open(path).map(Arc::new);
        }
        let handle = Arc::new(FileHandle::with_key(
            path,
            File::open(path)?,
            FileKey::new(0, 999),
        ));
        issued.lock().push(Arc::clone(&handle));
        Ok(handle)
    };
    let factory: Arc<dyn FileHandleFactory> = Arc::new(factory);
    (foreign, factory)
}

// =============================================================================
// FileHandle Tests
// =============================================================================

#[test]
fn test_same_file_has_same_key() {
    let (_temp, path) = setup_temp_file(b"hello");

    let a = FileHandle::open(&path).unwrap();
    let b = FileHandle::open(&path).unwrap();
    assert!(a.equals_file_key(&b));
    assert_eq!(a.key(), b.key());
}

#[test]
fn test_file_key_parts() {
    let key = FileKey::new(3, 7);
    assert_eq!(key.dev(), 3);
    assert_eq!(key.ino(), 7);
    assert_eq!(key.to_string(), "3:7");
    assert_ne!(key, FileKey::new(3, 8));
    assert_ne!(key, FileKey::new(4, 7));
}

#[test]
#[cfg(unix)]
fn test_different_files_have_different_keys() {
    let (temp, path) = setup_temp_file(b"one");
    let other = temp.path().join("other.col");
    fs::write(&other, b"two").unwrap();

    let a = FileHandle::open(&path).unwrap();
    let b = FileHandle::open(&other).unwrap();
    assert!(!a.equals_file_key(&b));
}

#[test]
fn test_handle_reads() {
    let (_temp, path) = setup_temp_file(b"0123456789");
    let handle = FileHandle::open(&path).unwrap();

    let mut buf = [0u8; 4];
    handle.read_exact_at(&mut buf, 3).unwrap();
    assert_eq!(&buf, b"3456");
    assert_eq!(handle.size().unwrap(), 10);

    let err = handle.read_exact_at(&mut buf, 8).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnexpectedEof);
}

#[test]
fn test_close_is_idempotent() {
    let (_temp, path) = setup_temp_file(b"abc");
    let handle = FileHandle::open(&path).unwrap();

    assert!(handle.is_open());
    handle.close();
    handle.close();
    assert!(!handle.is_open());

    let err = handle.size().unwrap_err();
    assert!(is_closed_error(&err));
}

#[test]
fn test_close_waits_for_in_flight_reads() {
    const READERS: usize = 4;

    let contents: Vec<u8> = (0..=255).collect();
    let (_temp, path) = setup_temp_file(&contents);
    let handle = FileHandle::open(&path).unwrap();
    let barrier = Barrier::new(READERS + 1);

    thread::scope(|scope| {
        let readers: Vec<_> = (0..READERS)
            .map(|t| {
                let handle = &handle;
                let barrier = &barrier;
                scope.spawn(move || {
                    let mut buf = [0u8; 64];
                    let mut completed = 0u64;
                    barrier.wait();
                    loop {
                        let offset = (completed * 13 + t as u64) % 192;
                        match handle.read_exact_at(&mut buf, offset) {
                            // A read that was let through finished in full
                            Ok(()) => {
                                assert_eq!(buf[0], offset as u8);
                                assert_eq!(buf[63], (offset + 63) as u8);
                                completed += 1;
                            }
                            Err(err) => {
                                assert!(is_closed_error(&err), "unexpected error {err}");
                                return completed;
                            }
                        }
                    }
                })
            })
            .collect();

        barrier.wait();
        thread::yield_now();
        handle.close();

        // close() has returned, so no read can still be using the file
        assert!(!handle.is_open());
        let err = handle.read_exact_at(&mut [0u8; 1], 0).unwrap_err();
        assert!(is_closed_error(&err));

        for reader in readers {
            reader.join().unwrap();
        }
    });
}

// =============================================================================
// Accessor State Tests
// =============================================================================

#[test]
fn test_accessor_opens_eagerly() {
    let (_temp, path) = setup_temp_file(b"abc");
    let (opens, factory) = counting_factory();

    let accessor = FileHandleAccessor::with_factory(factory, &path, &config(true)).unwrap();
    assert_eq!(opens.load(Ordering::SeqCst), 1);
    assert!(accessor.path().is_absolute());
    assert!(accessor.state().is_valid());
    assert_eq!(accessor.refresh_count(), 0);
}

#[test]
fn test_accessor_open_missing_file_fails() {
    let temp = TempDir::new().unwrap();
    let err = FileHandleAccessor::open(temp.path().join("missing.col"), &config(true)).unwrap_err();
    assert!(matches!(err, AtlasError::FileOpen { .. }));
}

#[test]
fn test_closed_handle_reports_stale() {
    let (_temp, path) = setup_temp_file(b"abc");
    let accessor = FileHandleAccessor::open(&path, &config(true)).unwrap();

    accessor.current().close();
    match accessor.state() {
        HandleState::Stale(handle) => assert!(!handle.is_open()),
        HandleState::Valid(_) => panic!("closed handle reported valid"),
    }

    let fresh = accessor.handle().unwrap();
    assert!(fresh.is_open());
    assert!(accessor.state().is_valid());
    assert_eq!(accessor.refresh_count(), 1);
}

#[test]
fn test_refresh_with_outdated_previous_is_a_no_op() {
    let (_temp, path) = setup_temp_file(b"abc");
    let (opens, factory) = counting_factory();
    let accessor = FileHandleAccessor::with_factory(factory, &path, &config(true)).unwrap();

    let first = accessor.current();
    let second = accessor.refresh(&first).unwrap();
    assert_eq!(opens.load(Ordering::SeqCst), 2);

    // `first` is no longer current, so nothing is reopened
    let third = accessor.refresh(&first).unwrap();
    assert!(Arc::ptr_eq(&second, &third));
    assert_eq!(opens.load(Ordering::SeqCst), 2);
}

#[test]
fn test_replaced_handle_is_released() {
    let (_temp, path) = setup_temp_file(b"abc");
    let accessor = FileHandleAccessor::open(&path, &config(true)).unwrap();

    let first = accessor.current();
    // Test local, the accessor's cell, and nothing else
    assert_eq!(Arc::strong_count(&first), 2);

    let second = accessor.refresh(&first).unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    // The accessor let go of the old handle as soon as it was replaced
    assert_eq!(Arc::strong_count(&first), 1);
    assert_eq!(Arc::strong_count(&second), 2);

    drop(accessor);
    assert_eq!(Arc::strong_count(&second), 1);
}

// =============================================================================
// Concurrent Refresh Tests
// =============================================================================

#[test]
fn test_concurrent_refresh_opens_once() {
    const THREADS: usize = 16;

    let (_temp, path) = setup_temp_file(b"shared");
    let (opens, factory) = counting_factory();
    let accessor = FileHandleAccessor::with_factory(factory, &path, &config(true)).unwrap();

    let stale = accessor.current();
    stale.close();

    let barrier = Barrier::new(THREADS);
    let results: Vec<Arc<FileHandle>> = thread::scope(|scope| {
        let workers: Vec<_> = (0..THREADS)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    accessor.refresh(&stale).unwrap()
                })
            })
            .collect();
        workers.into_iter().map(|w| w.join().unwrap()).collect()
    });

    // One open at construction, one for the refresh
    assert_eq!(opens.load(Ordering::SeqCst), 2);
    assert_eq!(accessor.refresh_count(), 1);
    for handle in &results {
        assert!(Arc::ptr_eq(handle, &results[0]));
        assert!(handle.is_open());
    }
    assert!(Arc::ptr_eq(&accessor.current(), &results[0]));
}

#[test]
fn test_concurrent_reads_survive_a_close() {
    let contents: Vec<u8> = (0..=255).collect();
    let (_temp, path) = setup_temp_file(&contents);
    let accessor = FileHandleAccessor::open(&path, &config(true)).unwrap();

    thread::scope(|scope| {
        for t in 0..4 {
            let accessor = &accessor;
            scope.spawn(move || {
                let mut buf = [0u8; 16];
                for i in 0..200u64 {
                    let offset = (i * 16 + t * 4) % 240;
                    accessor.read_exact_at(&mut buf, offset).unwrap();
                    assert_eq!(buf[0], offset as u8);
                }
            });
        }
        // A single out-of-band close: each reader recovers from it at most once
        scope.spawn(|| {
            thread::yield_now();
            accessor.current().close();
        });
    });
}

// =============================================================================
// Identity Check Tests
// =============================================================================

#[test]
fn test_identity_mismatch_fails_and_keeps_stale_handle() {
    let (_temp, path) = setup_temp_file(b"abc");
    let (foreign, factory) = identity_changing_factory();
    let accessor = FileHandleAccessor::with_factory(factory, &path, &config(true)).unwrap();

    let stale = accessor.current();
    stale.close();

    let err = accessor.refresh(&stale).unwrap_err();
    match &err {
        AtlasError::FileIdentityChanged { property, .. } => {
            assert_eq!(*property, SAFETY_CHECK_PROPERTY)
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(err.to_string().contains(SAFETY_CHECK_PROPERTY));

    assert!(Arc::ptr_eq(&accessor.current(), &stale));
    assert_eq!(accessor.refresh_count(), 0);

    // Reads fail the same way rather than touching the foreign file
    let mut buf = [0u8; 1];
    assert!(matches!(
        accessor.read_exact_at(&mut buf, 0),
        Err(AtlasError::FileIdentityChanged { .. })
    ));

    // Every rejected handle was closed before the error came back
    let foreign = foreign.lock();
    assert_eq!(foreign.len(), 2);
    for handle in foreign.iter() {
        assert!(!handle.is_open());
        assert!(is_closed_error(&handle.size().unwrap_err()));
    }
}

#[test]
fn test_identity_mismatch_installs_when_check_disabled() {
    let (_temp, path) = setup_temp_file(b"abc");
    let (foreign, factory) = identity_changing_factory();
    let accessor = FileHandleAccessor::with_factory(factory, &path, &config(false)).unwrap();
    assert!(!accessor.safety_check_enabled());

    let stale = accessor.current();
    stale.close();

    let fresh = accessor.refresh(&stale).unwrap();
    assert_eq!(fresh.key(), FileKey::new(0, 999));
    assert!(fresh.is_open());
    assert!(Arc::ptr_eq(&accessor.current(), &fresh));
    assert!(Arc::ptr_eq(&foreign.lock()[0], &fresh));
    assert_eq!(accessor.refresh_count(), 1);
}

#[test]
#[cfg(unix)]
fn test_replaced_file_is_detected() {
    let (temp, path) = setup_temp_file(b"original");
    let accessor = FileHandleAccessor::open(&path, &config(true)).unwrap();

    // Keep the original inode alive under another name so it cannot be reused
    fs::rename(&path, temp.path().join("moved.col")).unwrap();
    fs::write(&path, b"replacement").unwrap();

    accessor.current().close();
    let mut buf = [0u8; 8];
    assert!(matches!(
        accessor.read_exact_at(&mut buf, 0),
        Err(AtlasError::FileIdentityChanged { .. })
    ));
}

#[test]
fn test_refresh_io_failure_propagates() {
    let (_temp, path) = setup_temp_file(b"abc");
    let (opens, factory) = counting_factory();
    let accessor = FileHandleAccessor::with_factory(factory, &path, &config(true)).unwrap();

    accessor.current().close();
    fs::remove_file(&path).unwrap();

    let mut buf = [0u8; 1];
    let err = accessor.read_exact_at(&mut buf, 0).unwrap_err();
    assert!(matches!(err, AtlasError::FileOpen { .. }));
    // Exactly one reopen attempt, no retry loop
    assert_eq!(opens.load(Ordering::SeqCst), 2);
}

// =============================================================================
// Configuration Tests
// =============================================================================

#[test]
fn test_safety_check_from_env() {
    std::env::set_var(SAFETY_CHECK_PROPERTY, "false");
    let config = Config::from_env().unwrap();
    assert!(!config.file_key_safety_check);

    std::env::set_var(SAFETY_CHECK_PROPERTY, "maybe");
    assert!(matches!(Config::from_env(), Err(AtlasError::Config(_))));

    std::env::remove_var(SAFETY_CHECK_PROPERTY);
    assert!(Config::from_env().unwrap().file_key_safety_check);
}

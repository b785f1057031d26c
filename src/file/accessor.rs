//! File Handle Accessor
//!
//! Long-lived owner of one path's current [`FileHandle`].
//!
//! ## Refresh Protocol
//! ```text
//!   caller: refresh(previous)
//!      │
//!      ├── current != previous ──────────────► return current   (no lock)
//!      │
//!      ▼
//!   lock(refresh_lock)
//!      ├── current != previous ──────────────► return current   (lost the race)
//!      ▼
//!   open new handle via factory
//!      ├── key(new) != key(current)
//!      │     ├── safety check on ──► close new, FileIdentityChanged
//!      │     └── safety check off ─► warn, continue
//!      ▼
//!   swap new handle in, return it
//! ```
//!
//! The current handle lives in an `ArcSwap`, so the common "handle still
//! valid" path is a single atomic load. A replaced handle is released as soon
//! as its last reader drops it.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::config::{Config, SAFETY_CHECK_PROPERTY};
use crate::error::{AtlasError, Result};

use super::handle::{is_closed_error, FileHandle};

// =============================================================================
// Handle Factories
// =============================================================================

/// Opens handles for a path. Must be deterministic for a given path.
///
/// Handles are shared: a factory may keep its own reference to observe
/// what the accessor does with them (a rejected handle is closed).
pub trait FileHandleFactory: Send + Sync {
    fn open(&self, path: &Path) -> io::Result<Arc<FileHandle>>;
}

impl<F> FileHandleFactory for F
where
    F: Fn(&Path) -> io::Result<Arc<FileHandle>> + Send + Sync,
{
    fn open(&self, path: &Path) -> io::Result<Arc<FileHandle>> {
        self(path)
    }
}

/// Plain read-only `File::open`
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOnlyFactory;

impl FileHandleFactory for ReadOnlyFactory {
    fn open(&self, path: &Path) -> io::Result<Arc<FileHandle>> {
        FileHandle::open(path).map(Arc::new)
    }
}

// =============================================================================
// Handle State
// =============================================================================

/// Snapshot of the accessor's current handle
#[derive(Debug, Clone)]
pub enum HandleState {
    /// The handle is open and usable
    Valid(Arc<FileHandle>),
    /// The handle was closed out of band and must be refreshed
    Stale(Arc<FileHandle>),
}

impl HandleState {
    pub fn handle(&self) -> &Arc<FileHandle> {
        match self {
            HandleState::Valid(handle) | HandleState::Stale(handle) => handle,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, HandleState::Valid(_))
    }
}

// =============================================================================
// Accessor
// =============================================================================

/// Stable access to a file whose handle may be closed underneath readers.
///
/// ## Concurrency:
/// - `current()` / `state()`: one atomic load, no lock
/// - `refresh()`: serialized by `refresh_lock`, entered only when the caller's
///   handle is still current; at most one new handle per stale generation
pub struct FileHandleAccessor {
    factory: Arc<dyn FileHandleFactory>,
    path: PathBuf,
    current: ArcSwap<FileHandle>,
    refresh_lock: Mutex<()>,
    safety_check: bool,
    refreshes: AtomicU64,
}

impl FileHandleAccessor {
    /// Accessor for `path` using plain read-only handles
    pub fn open(path: impl AsRef<Path>, config: &Config) -> Result<Self> {
        Self::with_factory(Arc::new(ReadOnlyFactory), path, config)
    }

    /// Accessor for `path` whose handles come from `factory`.
    ///
    /// The path is made absolute and the first handle is opened immediately.
    pub fn with_factory(
        factory: Arc<dyn FileHandleFactory>,
        path: impl AsRef<Path>,
        config: &Config,
    ) -> Result<Self> {
        let path = std::path::absolute(path.as_ref())?;
        let handle = make_handle(factory.as_ref(), &path)?;

        tracing::debug!(
            path = %path.display(),
            key = %handle.key(),
            safety_check = config.file_key_safety_check,
            "Opened file handle accessor"
        );

        Ok(Self {
            factory,
            path,
            current: ArcSwap::new(handle),
            refresh_lock: Mutex::new(()),
            safety_check: config.file_key_safety_check,
            refreshes: AtomicU64::new(0),
        })
    }

    /// Absolute path of the accessed file
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn safety_check_enabled(&self) -> bool {
        self.safety_check
    }

    /// Number of successful refreshes so far
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    /// The current handle, whatever its state
    pub fn current(&self) -> Arc<FileHandle> {
        self.current.load_full()
    }

    /// The current handle, tagged by whether it is still open
    pub fn state(&self) -> HandleState {
        let handle = self.current();
        if handle.is_open() {
            HandleState::Valid(handle)
        } else {
            HandleState::Stale(handle)
        }
    }

    /// A usable handle, refreshing a stale one first
    pub fn handle(&self) -> Result<Arc<FileHandle>> {
        match self.state() {
            HandleState::Valid(handle) => Ok(handle),
            HandleState::Stale(handle) => self.refresh(&handle),
        }
    }

    /// Replace `previous` with a freshly opened handle if it is still current,
    /// then return the (possibly new) current handle.
    ///
    /// Fails with [`AtlasError::FileIdentityChanged`] if the reopened file is
    /// a different physical file and the safety check is enabled; the stale
    /// handle then stays current.
    pub fn refresh(&self, previous: &Arc<FileHandle>) -> Result<Arc<FileHandle>> {
        let current = self.current();
        if !Arc::ptr_eq(&current, previous) {
            return Ok(current);
        }

        let _guard = self.refresh_lock.lock();

        let current = self.current();
        if !Arc::ptr_eq(&current, previous) {
            return Ok(current);
        }

        let fresh = make_handle(self.factory.as_ref(), &self.path)?;
        if !current.equals_file_key(&fresh) {
            if self.safety_check {
                tracing::error!(
                    path = %self.path.display(),
                    old_key = %current.key(),
                    new_key = %fresh.key(),
                    "File key changed during refresh"
                );
                fresh.close();
                return Err(AtlasError::FileIdentityChanged {
                    path: self.path.clone(),
                    property: SAFETY_CHECK_PROPERTY,
                });
            }
            tracing::warn!(
                path = %self.path.display(),
                old_key = %current.key(),
                new_key = %fresh.key(),
                "File key changed during refresh; continuing because the safety check is disabled"
            );
        }

        self.current.store(Arc::clone(&fresh));
        let generation = self.refreshes.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::info!(path = %self.path.display(), generation, "Refreshed file handle");

        Ok(fresh)
    }

    /// Fill `buf` from `offset`, recovering once from a handle closed underneath us
    pub fn read_exact_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        self.with_handle(|handle| handle.read_exact_at(buf, offset))
    }

    /// Current file size in bytes
    pub fn size(&self) -> Result<u64> {
        self.with_handle(|handle| handle.size())
    }

    /// Run `op` on a valid handle. If the handle is closed while `op` runs,
    /// refresh once and run `op` again; any second failure is returned as is.
    fn with_handle<R>(&self, mut op: impl FnMut(&FileHandle) -> io::Result<R>) -> Result<R> {
        let handle = self.handle()?;
        match op(&*handle) {
            Err(err) if is_closed_error(&err) => {
                tracing::debug!(path = %self.path.display(), "Handle closed during read, refreshing");
                let handle = self.refresh(&handle)?;
                Ok(op(&*handle)?)
            }
            other => Ok(other?),
        }
    }
}

fn make_handle(factory: &dyn FileHandleFactory, path: &Path) -> Result<Arc<FileHandle>> {
    factory.open(path).map_err(|source| AtlasError::FileOpen {
        path: path.to_path_buf(),
        source,
    })
}

impl fmt::Display for FileHandleAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

impl fmt::Debug for FileHandleAccessor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileHandleAccessor")
            .field("path", &self.path)
            .field("current", &self.current())
            .field("safety_check", &self.safety_check)
            .field("refreshes", &self.refresh_count())
            .finish()
    }
}

//! File Handle
//!
//! One open OS file plus the identity key captured when it was opened.

use std::fmt;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

// =============================================================================
// File Key
// =============================================================================

/// Identity of the physical file behind a handle (device + inode)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileKey {
    dev: u64,
    ino: u64,
}

impl FileKey {
    pub fn new(dev: u64, ino: u64) -> Self {
        Self { dev, ino }
    }

    pub fn dev(&self) -> u64 {
        self.dev
    }

    pub fn ino(&self) -> u64 {
        self.ino
    }

    /// Key of an open file
    #[cfg(unix)]
    pub fn of(file: &File) -> io::Result<Self> {
        use std::os::unix::fs::MetadataExt;

        let meta = file.metadata()?;
        Ok(Self {
            dev: meta.dev(),
            ino: meta.ino(),
        })
    }

    /// Key of an open file.
    ///
    /// Without stable access to volume serial numbers and file indexes,
    /// the creation time stands in for the inode.
    #[cfg(not(unix))]
    pub fn of(file: &File) -> io::Result<Self> {
        use std::time::UNIX_EPOCH;

        let meta = file.metadata()?;
        let created = meta.created().or_else(|_| meta.modified())?;
        let nanos = created
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Ok(Self { dev: 0, ino: nanos })
    }
}

impl fmt::Display for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.dev, self.ino)
    }
}

// =============================================================================
// Closed-Handle Errors
// =============================================================================

/// Marker carried inside the `io::Error` returned by reads on a closed handle
#[derive(Debug)]
struct HandleClosed {
    path: PathBuf,
}

impl fmt::Display for HandleClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file handle for '{}' is closed", self.path.display())
    }
}

impl std::error::Error for HandleClosed {}

/// True if `err` came from using a handle after it was closed
pub fn is_closed_error(err: &io::Error) -> bool {
    err.get_ref()
        .is_some_and(|inner| inner.is::<HandleClosed>())
}

// =============================================================================
// File Handle
// =============================================================================

/// A closeable, shareable read-only file handle.
///
/// ## Concurrency:
/// - Reads hold a shared lock on the file for the duration of one call.
///   `read_exact_at` keeps it across all of its positional reads.
/// - `close()` marks the handle closed at once, then takes the exclusive lock
///   to release the file. It blocks until every in-flight call has returned,
///   including one stuck in a slow OS read; it never interrupts a read.
/// - Every read that starts after `close()` returns fails with a
///   closed-handle error ([`is_closed_error`])
/// - `close()` may be called any number of times from any thread
pub struct FileHandle {
    path: PathBuf,
    key: FileKey,
    file: RwLock<Option<File>>,
    open: AtomicBool,
}

impl FileHandle {
    /// Open `path` read-only and capture its file key
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        Self::from_file(path, file)
    }

    /// Wrap an already open file, reading its key from the OS
    pub fn from_file(path: impl Into<PathBuf>, file: File) -> io::Result<Self> {
        let key = FileKey::of(&file)?;
        Ok(Self::with_key(path, file, key))
    }

    /// Wrap an already open file with a caller-supplied key
    pub fn with_key(path: impl Into<PathBuf>, file: File, key: FileKey) -> Self {
        Self {
            path: path.into(),
            key,
            file: RwLock::new(Some(file)),
            open: AtomicBool::new(true),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn key(&self) -> FileKey {
        self.key
    }

    /// Compare identity keys only
    pub fn equals_file_key(&self, other: &FileHandle) -> bool {
        self.key == other.key
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Release the OS file. Idempotent.
    ///
    /// Waits for in-flight reads on this handle to finish first.
    pub fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            let file = self.file.write().take();
            drop(file);
            tracing::debug!(path = %self.path.display(), key = %self.key, "Closed file handle");
        }
    }

    /// Read up to `buf.len()` bytes at `offset`
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let guard = self.file.read();
        let file = guard.as_ref().ok_or_else(|| self.closed_error())?;
        positional_read(file, buf, offset)
    }

    /// Fill `buf` from `offset`, failing with `UnexpectedEof` if the file is too short
    pub fn read_exact_at(&self, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
        let guard = self.file.read();
        let file = guard.as_ref().ok_or_else(|| self.closed_error())?;
        while !buf.is_empty() {
            match positional_read(file, buf, offset) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("short read from '{}' at offset {}", self.path.display(), offset),
                    ))
                }
                Ok(n) => {
                    let rest = buf;
                    buf = &mut rest[n..];
                    offset += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Current file size in bytes
    pub fn size(&self) -> io::Result<u64> {
        let guard = self.file.read();
        let file = guard.as_ref().ok_or_else(|| self.closed_error())?;
        Ok(file.metadata()?.len())
    }

    fn closed_error(&self) -> io::Error {
        io::Error::new(
            io::ErrorKind::Other,
            HandleClosed {
                path: self.path.clone(),
            },
        )
    }
}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileHandle")
            .field("path", &self.path)
            .field("key", &self.key)
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(unix)]
fn positional_read(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    file.read_at(buf, offset)
}

#[cfg(windows)]
fn positional_read(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}

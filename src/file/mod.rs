//! File Module
//!
//! OS file handles backing disk-resident column data.
//!
//! ## Responsibilities
//! - Own one open file per [`FileHandle`], closeable from any thread
//! - Capture the file's identity (device + inode) at open time
//! - Reopen closed handles through [`FileHandleAccessor`] and refuse to
//!   continue if the path now names a different physical file

mod accessor;
mod handle;

pub use accessor::{FileHandleAccessor, FileHandleFactory, HandleState, ReadOnlyFactory};
pub use handle::{is_closed_error, FileHandle, FileKey};

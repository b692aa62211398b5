//! Byte streams and the backends they run over.
//!
//! A [`Stream`] is opened either read-only or write-only. Reads and writes go
//! to a [`Backend`]: an OS file ([`OsFile`]) or a growable in-memory buffer
//! ([`MemoryBuffer`]). When the content carries an LZ10/LZ11 header the
//! stream transparently works on the decompressed bytes instead.
//!
//! Every container codec implements [`FileFormat`] and talks to streams only.

use std::io::SeekFrom;

use crate::Result;

pub mod buffer;
pub mod file;
pub mod format;
pub mod stream;

pub use buffer::MemoryBuffer;
pub use file::OsFile;
pub use format::FileFormat;
pub use stream::{Compression, Stream, Whence};

/// Access mode of an open stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    Read,
    Write,
}

/// Raw byte storage underneath a [`Stream`].
///
/// `read` may return fewer bytes than requested; 0 means end of content.
/// `seek` may move past the end; a later write zero-fills the gap.
pub trait Backend {
    fn open(&mut self, mode: FileMode) -> Result<()>;
    fn size(&mut self) -> Result<u64>;
    fn seek(&mut self, pos: SeekFrom) -> Result<u64>;
    fn position(&mut self) -> Result<u64>;
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
    fn write_all(&mut self, buf: &[u8]) -> Result<()>;
    fn close(&mut self) -> Result<()>;
}

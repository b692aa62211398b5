//! Growable in-memory byte buffer with a cursor.

use std::io::SeekFrom;

use super::{Backend, FileMode};
use crate::{Error, Result};

/// An owned, growable byte buffer with a read/write cursor.
///
/// Not `Clone`: content moves with the value. Writing past the end grows the
/// buffer, zero-filling any gap between the old end and the cursor.
#[derive(Debug, Default)]
pub struct MemoryBuffer {
    data: Vec<u8>,
    offset: usize,
}

impl MemoryBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap existing bytes; the cursor starts at 0.
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data, offset: 0 }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Current cursor position.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    fn seek_impl(&mut self, pos: SeekFrom) -> Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n as i128),
            SeekFrom::Current(d) => Some(self.offset as i128 + d as i128),
            SeekFrom::End(d) => Some(self.data.len() as i128 + d as i128),
        };
        let target = target
            .filter(|&t| t >= 0)
            .and_then(|t| usize::try_from(t).ok())
            .ok_or(Error::InvalidRange)?;
        self.offset = target;
        Ok(target as u64)
    }

    fn read_impl(&mut self, buf: &mut [u8]) -> usize {
        // The cursor may sit past the end after a seek; that reads nothing.
        let start = self.offset.min(self.data.len());
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        self.offset += n;
        n
    }

    fn write_impl(&mut self, buf: &[u8]) {
        let end = self.offset + buf.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[self.offset..end].copy_from_slice(buf);
        self.offset = end;
    }
}

impl Backend for MemoryBuffer {
    /// Rewinds the cursor; opening for write discards the old content.
    fn open(&mut self, mode: FileMode) -> Result<()> {
        if mode == FileMode::Write {
            self.data.clear();
        }
        self.offset = 0;
        Ok(())
    }

    fn size(&mut self) -> Result<u64> {
        Ok(self.data.len() as u64)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        self.seek_impl(pos)
    }

    fn position(&mut self) -> Result<u64> {
        Ok(self.offset as u64)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.read_impl(buf))
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        self.write_impl(buf);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.offset = 0;
        Ok(())
    }
}

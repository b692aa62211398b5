//! OS file backend.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::{Backend, FileMode};
use crate::{Error, Result};

#[derive(Debug)]
enum Handle {
    Reader(BufReader<File>),
    Writer(BufWriter<File>),
}

/// A file on disk, opened read-only (`rb`) or truncated for writing (`wb`).
#[derive(Debug)]
pub struct OsFile {
    path: PathBuf,
    handle: Option<Handle>,
}

impl OsFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            handle: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn handle(&mut self) -> Result<&mut Handle> {
        self.handle.as_mut().ok_or(Error::NotOpen)
    }
}

impl Backend for OsFile {
    fn open(&mut self, mode: FileMode) -> Result<()> {
        if self.handle.is_some() {
            return Err(Error::AlreadyOpen);
        }
        self.handle = Some(match mode {
            FileMode::Read => Handle::Reader(BufReader::new(File::open(&self.path)?)),
            FileMode::Write => Handle::Writer(BufWriter::new(File::create(&self.path)?)),
        });
        Ok(())
    }

    fn size(&mut self) -> Result<u64> {
        let len = match self.handle()? {
            Handle::Reader(r) => r.get_ref().metadata()?.len(),
            Handle::Writer(w) => {
                w.flush()?;
                w.get_ref().metadata()?.len()
            }
        };
        Ok(len)
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let off = match self.handle()? {
            Handle::Reader(r) => r.seek(pos)?,
            Handle::Writer(w) => w.seek(pos)?,
        };
        Ok(off)
    }

    fn position(&mut self) -> Result<u64> {
        let off = match self.handle()? {
            Handle::Reader(r) => r.stream_position()?,
            Handle::Writer(w) => w.stream_position()?,
        };
        Ok(off)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.handle()? {
            Handle::Reader(r) => Ok(r.read(buf)?),
            Handle::Writer(_) => Err(Error::ReadNotSupported),
        }
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        match self.handle()? {
            Handle::Writer(w) => Ok(w.write_all(buf)?),
            Handle::Reader(_) => Err(Error::WriteNotSupported),
        }
    }

    fn close(&mut self) -> Result<()> {
        match self.handle.take() {
            Some(Handle::Writer(mut w)) => {
                w.flush()?;
                Ok(())
            }
            Some(Handle::Reader(_)) => Ok(()),
            None => Err(Error::NotOpen),
        }
    }
}

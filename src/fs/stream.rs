//! Seekable stream with transparent LZ compression.

use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use tracing::{debug, warn};

use super::{Backend, FileMode, MemoryBuffer, OsFile};
use crate::compression::lz::{self, LzFormat};
use crate::utils::align_up;
use crate::{Error, Result};

/// Initial scratch window for terminated-string reads.
const STRING_SCRATCH_SIZE: usize = 0x200;

/// Compression handling requested when opening a [`Stream`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    /// Sniff the LZ header on read. Treated as [`Compression::None`] on write.
    #[default]
    Auto,
    /// Raw pass-through.
    None,
    /// Content is (or will be) LZ-compressed with the given variant.
    Lz(LzFormat),
}

/// Seek origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// Offset from the start of the logical content.
    Begin,
    /// Offset from the current position.
    Current,
}

/// A read-only or write-only session over a [`Backend`].
///
/// When the content is compressed, every read, write and seek goes to an
/// in-memory shadow buffer holding the decompressed bytes. On close, a
/// compressed write session compresses the shadow buffer and writes it to the
/// backend in one call.
#[derive(Debug)]
pub struct Stream<B: Backend> {
    backend: B,
    mode: Option<FileMode>,
    lz: Option<LzFormat>,
    shadow: Option<MemoryBuffer>,
}

impl Stream<OsFile> {
    /// A closed stream over the file at `path`.
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self::new(OsFile::new(path))
    }
}

impl Stream<MemoryBuffer> {
    /// A closed stream over an empty memory buffer.
    pub fn memory() -> Self {
        Self::new(MemoryBuffer::new())
    }

    /// A closed stream over existing bytes.
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self::new(MemoryBuffer::from_vec(data))
    }

    /// The backing bytes. Close a write session first so compressed output
    /// has been flushed.
    pub fn into_bytes(self) -> Vec<u8> {
        self.backend.into_vec()
    }
}

impl<B: Backend> Stream<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            mode: None,
            lz: None,
            shadow: None,
        }
    }

    pub fn into_inner(self) -> B {
        self.backend
    }

    pub fn is_open(&self) -> bool {
        self.mode.is_some()
    }

    pub fn mode(&self) -> Option<FileMode> {
        self.mode
    }

    /// The LZ variant in effect for this session, if any.
    pub fn compression(&self) -> Option<LzFormat> {
        self.lz
    }

    pub fn is_compressed(&self) -> bool {
        self.lz.is_some()
    }

    /// Open for reading, auto-detecting LZ compression.
    pub fn open_read(&mut self) -> Result<()> {
        self.open_read_with(Compression::Auto)
    }

    /// Open for reading with an explicit compression choice.
    pub fn open_read_with(&mut self, compression: Compression) -> Result<()> {
        if self.is_open() {
            return Err(Error::AlreadyOpen);
        }
        self.backend.open(FileMode::Read)?;

        let lz = match self.prepare_read(compression) {
            Ok(lz) => lz,
            Err(e) => {
                // The sniff error is the one reported.
                if let Err(close) = self.backend.close() {
                    warn!(error = %close, "close after failed open");
                }
                return Err(e);
            }
        };

        debug!(compression = ?lz, "stream opened for read");
        self.lz = lz;
        self.mode = Some(FileMode::Read);
        Ok(())
    }

    /// Open for writing. With [`Compression::Lz`] all writes are buffered and
    /// compressed on [`Stream::close`].
    pub fn open_write(&mut self, compression: Compression) -> Result<()> {
        if self.is_open() {
            return Err(Error::AlreadyOpen);
        }
        self.backend.open(FileMode::Write)?;

        let lz = match compression {
            Compression::Lz(format) => Some(format),
            Compression::Auto | Compression::None => None,
        };
        self.shadow = lz.map(|_| MemoryBuffer::new());

        debug!(compression = ?lz, "stream opened for write");
        self.lz = lz;
        self.mode = Some(FileMode::Write);
        Ok(())
    }

    /// Peek the first word of the backing content for an LZ header.
    fn prepare_read(&mut self, compression: Compression) -> Result<Option<LzFormat>> {
        let lz = match compression {
            Compression::Auto => self.sniff_lz()?,
            Compression::None => None,
            Compression::Lz(format) => Some(format),
        };
        if let Some(format) = lz {
            self.load_shadow(format)?;
        }
        Ok(lz)
    }

    fn sniff_lz(&mut self) -> Result<Option<LzFormat>> {
        if self.backend.size()? < 4 {
            return Ok(None);
        }
        let mut word = [0u8; 4];
        read_fully(&mut self.backend, &mut word)?;
        self.backend.seek(SeekFrom::Start(0))?;
        Ok(LzFormat::detect(u32::from_le_bytes(word)))
    }

    fn load_shadow(&mut self, format: LzFormat) -> Result<()> {
        let size = usize::try_from(self.backend.size()?).map_err(|_| Error::InvalidRange)?;
        let mut packed = vec![0u8; size];
        self.backend.seek(SeekFrom::Start(0))?;
        read_fully(&mut self.backend, &mut packed)?;

        let unpacked = lz::decompress(&packed)?;
        if unpacked.format != format {
            return Err(Error::InvalidLzFormat(unpacked.format as u8));
        }
        self.shadow = Some(MemoryBuffer::from_vec(unpacked.data));
        Ok(())
    }

    fn check_read(&self) -> Result<()> {
        match self.mode {
            None => Err(Error::NotOpen),
            Some(FileMode::Write) => Err(Error::ReadNotSupported),
            Some(FileMode::Read) => Ok(()),
        }
    }

    fn check_write(&self) -> Result<()> {
        match self.mode {
            None => Err(Error::NotOpen),
            Some(FileMode::Read) => Err(Error::WriteNotSupported),
            Some(FileMode::Write) => Ok(()),
        }
    }

    /// The logical content: the shadow buffer if compressed, else the backend.
    fn target(&mut self) -> &mut dyn Backend {
        match self.shadow.as_mut() {
            Some(shadow) => shadow,
            None => &mut self.backend,
        }
    }

    fn seek_from(&mut self, pos: SeekFrom) -> Result<u64> {
        if !self.is_open() {
            return Err(Error::NotOpen);
        }
        if let SeekFrom::Current(d) = pos {
            let cur = self.target().position()?;
            if (cur as i128) + (d as i128) < 0 {
                return Err(Error::InvalidRange);
            }
        }
        self.target().seek(pos)
    }

    /// Move the cursor.
    pub fn seek_to(&mut self, offset: i64, whence: Whence) -> Result<u64> {
        match whence {
            Whence::Begin => {
                let offset = u64::try_from(offset).map_err(|_| Error::InvalidRange)?;
                self.seek_from(SeekFrom::Start(offset))
            }
            Whence::Current => self.seek_from(SeekFrom::Current(offset)),
        }
    }

    /// Seek to an absolute offset.
    pub fn set_offset(&mut self, offset: u64) -> Result<()> {
        self.seek_from(SeekFrom::Start(offset))?;
        Ok(())
    }

    /// Current cursor position.
    pub fn offset(&mut self) -> Result<u64> {
        if !self.is_open() {
            return Err(Error::NotOpen);
        }
        self.target().position()
    }

    /// Size of the logical (decompressed) content.
    pub fn size(&mut self) -> Result<u64> {
        if !self.is_open() {
            return Err(Error::NotOpen);
        }
        self.target().size()
    }

    /// Fill `buf` completely or fail with [`Error::UnexpectedEof`].
    pub fn read_into(&mut self, buf: &mut [u8]) -> Result<()> {
        self.check_read()?;
        read_fully(self.target(), buf)
    }

    /// Read exactly `len` bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.read_into(&mut buf)?;
        Ok(buf)
    }

    /// Write all of `buf` at the cursor.
    pub fn write_bytes(&mut self, buf: &[u8]) -> Result<()> {
        self.check_write()?;
        self.target().write_all(buf)
    }

    /// Read bytes up to (not including) `terminator`, leaving the cursor just
    /// past it.
    ///
    /// Scans a 0x200-byte window first; if no terminator is found the window
    /// is doubled and the scan retried once before failing with
    /// [`Error::UnterminatedString`].
    pub fn read_terminated(&mut self, terminator: u8) -> Result<Vec<u8>> {
        let start = self.offset()?;
        let available = self.size()?.saturating_sub(start);
        if available == 0 {
            return Err(Error::UnexpectedEof);
        }
        let available = usize::try_from(available).unwrap_or(usize::MAX);

        let mut scratch = STRING_SCRATCH_SIZE;
        for _ in 0..2 {
            let len = scratch.min(available);
            let buf = self.read_bytes(len)?;
            if let Some(i) = buf.iter().position(|&b| b == terminator) {
                self.set_offset(start + i as u64 + 1)?;
                return Ok(buf[..i].to_vec());
            }
            self.set_offset(start)?;
            if len == available {
                break;
            }
            scratch *= 2;
        }

        Err(Error::UnterminatedString)
    }

    /// Read a null-terminated string (lossy UTF-8).
    pub fn read_null_terminated_string(&mut self) -> Result<String> {
        let bytes = self.read_terminated(0)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Write zeros until the cursor is a multiple of `align`. Returns the
    /// number of padding bytes written.
    pub fn write_alignment_padding(&mut self, align: u64) -> Result<u64> {
        let cur = self.offset()?;
        let pad = align_up(cur, align) - cur;
        if pad > 0 {
            let zeros = vec![0u8; pad as usize];
            self.write_bytes(&zeros)?;
        }
        Ok(pad)
    }

    /// Close the session. A compressed write session is compressed and
    /// flushed to the backend here.
    pub fn close(&mut self) -> Result<()> {
        let mode = self.mode.take().ok_or(Error::NotOpen)?;
        let lz = self.lz.take();
        let shadow = self.shadow.take();

        let flushed = match (mode, lz, shadow) {
            (FileMode::Write, Some(format), Some(shadow)) => self.flush_compressed(format, shadow),
            _ => Ok(()),
        };
        let closed = self.backend.close();

        debug!(?mode, compression = ?lz, "stream closed");
        flushed.and(closed)
    }

    fn flush_compressed(&mut self, format: LzFormat, shadow: MemoryBuffer) -> Result<()> {
        let packed = lz::compress(shadow.as_slice(), format)?;
        self.backend.seek(SeekFrom::Start(0))?;
        self.backend.write_all(&packed)
    }
}

/// Loop over partial reads until `buf` is full.
fn read_fully<T: Backend + ?Sized>(backend: &mut T, buf: &mut [u8]) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = backend.read(&mut buf[filled..])?;
        if n == 0 {
            return Err(Error::UnexpectedEof);
        }
        filled += n;
    }
    Ok(())
}

impl<B: Backend> Read for Stream<B> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.check_read()?;
        Ok(self.target().read(buf)?)
    }
}

impl<B: Backend> Write for Stream<B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<B: Backend> Seek for Stream<B> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        Ok(self.seek_from(pos)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::{le_u32, put_le_u32};

    #[test]
    fn open_twice_and_closed_use() {
        let mut s = Stream::from_bytes(vec![1, 2, 3, 4]);
        assert!(matches!(s.read_bytes(1), Err(Error::NotOpen)));
        s.open_read().unwrap();
        assert!(matches!(s.open_read(), Err(Error::AlreadyOpen)));
        assert!(matches!(s.write_bytes(&[0]), Err(Error::WriteNotSupported)));
        s.close().unwrap();
        assert!(matches!(s.close(), Err(Error::NotOpen)));
        assert!(matches!(s.size(), Err(Error::NotOpen)));
    }

    /// Claims 16 bytes but fails every read.
    #[derive(Debug, Default)]
    struct BrokenBackend {
        open: bool,
    }

    impl Backend for BrokenBackend {
        fn open(&mut self, _: FileMode) -> Result<()> {
            if self.open {
                return Err(Error::AlreadyOpen);
            }
            self.open = true;
            Ok(())
        }
        fn size(&mut self) -> Result<u64> {
            Ok(16)
        }
        fn seek(&mut self, _: SeekFrom) -> Result<u64> {
            Ok(0)
        }
        fn position(&mut self) -> Result<u64> {
            Ok(0)
        }
        fn read(&mut self, _: &mut [u8]) -> Result<usize> {
            Err(Error::Io(io::Error::other("device gone")))
        }
        fn write_all(&mut self, _: &[u8]) -> Result<()> {
            Ok(())
        }
        fn close(&mut self) -> Result<()> {
            self.open = false;
            Ok(())
        }
    }

    #[test]
    fn failed_sniff_closes_backend() {
        let mut s = Stream::new(BrokenBackend::default());
        assert!(matches!(s.open_read(), Err(Error::Io(_))));
        assert!(!s.is_open());
        // A leaked backend would report AlreadyOpen here.
        assert!(matches!(s.open_read(), Err(Error::Io(_))));
        assert!(!s.into_inner().open);
    }

    #[test]
    fn write_mode_rejects_reads() {
        let mut s = Stream::memory();
        s.open_write(Compression::None).unwrap();
        assert!(matches!(s.read_bytes(1), Err(Error::ReadNotSupported)));
        s.close().unwrap();
    }

    #[test]
    fn uncompressed_passthrough() {
        let mut s = Stream::from_bytes(b"NARC\x01\x02".to_vec());
        s.open_read().unwrap();
        assert!(!s.is_compressed());
        assert_eq!(s.read_bytes(4).unwrap(), b"NARC");
        assert_eq!(s.size().unwrap(), 6);
        assert!(matches!(s.read_bytes(4), Err(Error::UnexpectedEof)));
        s.close().unwrap();
    }

    #[test]
    fn tiny_content_is_not_sniffed() {
        let mut s = Stream::from_bytes(vec![0x10, 0x00]);
        s.open_read().unwrap();
        assert!(!s.is_compressed());
        s.close().unwrap();
    }

    #[test]
    fn compressed_write_then_auto_read() {
        let payload: Vec<u8> = b"message ".iter().copied().cycle().take(400).collect();

        let mut s = Stream::memory();
        s.open_write(Compression::Lz(LzFormat::Lz10)).unwrap();
        s.write_bytes(&payload[..100]).unwrap();
        // Relative seek forward leaves a zero-filled gap in the shadow buffer.
        s.seek_to(8, Whence::Current).unwrap();
        s.set_offset(100).unwrap();
        s.write_bytes(&payload[100..]).unwrap();
        s.close().unwrap();

        let packed = s.into_bytes();
        assert_eq!(packed[0], 0x10);
        assert!(packed.len() < payload.len());

        let mut s = Stream::from_bytes(packed);
        s.open_read().unwrap();
        assert_eq!(s.compression(), Some(LzFormat::Lz10));
        assert_eq!(s.size().unwrap(), 400);
        assert_eq!(s.read_bytes(400).unwrap(), payload);
        s.close().unwrap();
    }

    #[test]
    fn forced_format_mismatch() {
        let packed = lz::compress(b"abcdabcd", LzFormat::Lz11).unwrap();
        let mut s = Stream::from_bytes(packed);
        assert!(matches!(
            s.open_read_with(Compression::Lz(LzFormat::Lz10)),
            Err(Error::InvalidLzFormat(0x11))
        ));
        assert!(!s.is_open());
    }

    #[test]
    fn io_traits_carry_typed_errors() {
        let mut s = Stream::memory();
        s.open_write(Compression::None).unwrap();
        put_le_u32(&mut s, 0xDEC0_0621).unwrap();
        s.close().unwrap();

        let mut s = Stream::from_bytes(s.into_bytes());
        s.open_read_with(Compression::None).unwrap();
        assert_eq!(le_u32(&mut s).unwrap(), 0xDEC0_0621);
        assert!(matches!(le_u32(&mut s), Err(Error::UnexpectedEof)));
        assert!(matches!(put_le_u32(&mut s, 0), Err(Error::WriteNotSupported)));
    }

    #[test]
    fn terminated_strings() {
        let mut data = b"first\0second\0".to_vec();
        let long = vec![b'x'; 0x300];
        data.extend_from_slice(&long);
        data.push(0);
        data.extend_from_slice(&vec![b'y'; 0x500]);
        data.push(0);
        data.extend_from_slice(b"tail");

        let mut s = Stream::from_bytes(data);
        s.open_read_with(Compression::None).unwrap();
        assert_eq!(s.read_null_terminated_string().unwrap(), "first");
        assert_eq!(s.read_null_terminated_string().unwrap(), "second");
        // Longer than the first window: found after one doubling.
        assert_eq!(s.read_terminated(0).unwrap(), long);
        // Longer than the doubled window: gives up.
        let before = s.offset().unwrap();
        assert!(matches!(s.read_terminated(0), Err(Error::UnterminatedString)));
        assert_eq!(s.offset().unwrap(), before);
        s.set_offset(before + 0x501).unwrap();
        assert!(matches!(s.read_terminated(0), Err(Error::UnterminatedString)));
        s.set_offset(before + 0x505).unwrap();
        assert!(matches!(s.read_terminated(0), Err(Error::UnexpectedEof)));
    }

    #[test]
    fn alignment_padding() {
        let mut s = Stream::memory();
        s.open_write(Compression::None).unwrap();
        s.write_bytes(&[1, 2, 3]).unwrap();
        assert_eq!(s.write_alignment_padding(0x10).unwrap(), 13);
        assert_eq!(s.write_alignment_padding(0x10).unwrap(), 0);
        s.close().unwrap();
        assert_eq!(s.into_bytes().len(), 0x10);
    }

    #[test]
    fn os_file_roundtrip_compressed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");

        let mut s = Stream::file(&path);
        s.open_write(Compression::Lz(LzFormat::Lz11)).unwrap();
        s.write_bytes(&[7u8; 2048]).unwrap();
        s.close().unwrap();
        assert!(std::fs::metadata(&path).unwrap().len() < 64);

        let mut s = Stream::file(&path);
        s.open_read().unwrap();
        assert_eq!(s.compression(), Some(LzFormat::Lz11));
        assert_eq!(s.read_bytes(2048).unwrap(), vec![7u8; 2048]);
        s.close().unwrap();
    }

    #[test]
    fn os_file_missing_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = Stream::file(dir.path().join("missing.bin"));
        assert!(matches!(s.open_read(), Err(Error::Io(_))));
    }
}

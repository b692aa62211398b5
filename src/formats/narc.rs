//! NARC (Nitro ARChive) - generic NitroFS container.
//!
//! ## Layout
//! ```text
//! [0x00] Nitro header  (0x10 bytes)
//! [0x10] BTAF block    (0x0C header + FAT entries), 4-aligned
//! [...]  BTNF block    (0x08 header + FNT), 4-aligned
//! [...]  GMIF block    (0x08 header + file data), 4-aligned
//! ```
//!
//! ## Nitro header (0x10 bytes)
//! ```text
//! [0x00] Magic "NARC"          (4 bytes)
//! [0x04] ByteOrder (0xFFFE)    (u16)
//! [0x06] Version (0x0100)      (u16)
//! [0x08] FileSize              (u32)
//! [0x0C] HeaderSize (0x10)     (u16)
//! [0x0E] BlockCount (3)        (u16)
//! ```
//!
//! ## Blocks
//! ```text
//! [0x00] Magic                 (4 bytes: "BTAF", "BTNF", "GMIF")
//! [0x04] BlockSize             (u32, including this header)
//! BTAF only:
//! [0x08] EntryCount            (u16)
//! [0x0A] Reserved              (2 bytes)
//! ```
//!
//! FAT ranges are relative to the start of the GMIF payload.

use std::io::{Read, Write};

use tracing::debug;

use super::nitrofs::{AllocationEntry, NitroFs};
use crate::fs::{Backend, FileFormat, Stream};
use crate::utils::{le_u16, le_u32, magic, offset_u32, put_le_u16, put_le_u32};
use crate::{Error, Result};

const NARC_MAGIC: &[u8; 4] = b"NARC";
const FAT_MAGIC: &[u8; 4] = b"BTAF";
const FNT_MAGIC: &[u8; 4] = b"BTNF";
const FIMG_MAGIC: &[u8; 4] = b"GMIF";

/// Block and file alignment.
pub const SECTION_ALIGNMENT: u64 = 0x4;

const FAT_BLOCK_HEADER_SIZE: u64 = 0x0C;
const BLOCK_HEADER_SIZE: u64 = 0x08;

/// The common header of Nitro container files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NitroHeader {
    pub byte_order: u16,
    pub version: u16,
    pub file_size: u32,
    pub header_size: u16,
    pub block_count: u16,
}

impl Default for NitroHeader {
    fn default() -> Self {
        Self {
            byte_order: NitroHeader::BYTE_ORDER,
            version: NitroHeader::VERSION,
            file_size: 0,
            header_size: NitroHeader::SIZE as u16,
            block_count: 3,
        }
    }
}

impl NitroHeader {
    pub const SIZE: u64 = 0x10;
    pub const BYTE_ORDER: u16 = 0xFFFE;
    pub const VERSION: u16 = 0x0100;

    fn read<R: Read>(r: &mut R, expected: &[u8; 4]) -> Result<Self> {
        magic(r, expected)?;
        let header = Self {
            byte_order: le_u16(r)?,
            version: le_u16(r)?,
            file_size: le_u32(r)?,
            header_size: le_u16(r)?,
            block_count: le_u16(r)?,
        };
        if header.byte_order != Self::BYTE_ORDER {
            return Err(Error::Parse("unsupported byte order"));
        }
        if (header.header_size as u64) < Self::SIZE {
            return Err(Error::Parse("unexpected header size"));
        }
        Ok(header)
    }

    fn write<W: Write>(&self, w: &mut W, magic: &[u8; 4]) -> Result<()> {
        w.write_all(magic)?;
        put_le_u16(w, self.byte_order)?;
        put_le_u16(w, self.version)?;
        put_le_u32(w, self.file_size)?;
        put_le_u16(w, self.header_size)?;
        put_le_u16(w, self.block_count)
    }
}

/// Read a block header, returning its declared size.
fn read_block<R: Read>(r: &mut R, expected: &[u8; 4], min_size: u64) -> Result<u32> {
    magic(r, expected)?;
    let size = le_u32(r)?;
    if (size as u64) < min_size {
        return Err(Error::InvalidRange);
    }
    Ok(size)
}

fn write_block<W: Write>(w: &mut W, magic: &[u8; 4], size: u32) -> Result<()> {
    w.write_all(magic)?;
    put_le_u32(w, size)
}

/// A parsed NARC archive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Narc {
    pub header: NitroHeader,
    pub fat_entry_count: u16,
    pub fat_block_size: u32,
    pub fnt_block_size: u32,
    pub fimg_block_size: u32,
    pub fs: NitroFs,
}

impl Narc {
    pub fn new(fs: NitroFs) -> Self {
        Self {
            fs,
            ..Default::default()
        }
    }

    fn fat_offset(&self) -> u64 {
        self.header.header_size as u64 + FAT_BLOCK_HEADER_SIZE
    }

    fn fnt_block_offset(&self) -> u64 {
        self.header.header_size as u64 + self.fat_block_size as u64
    }

    fn fimg_block_offset(&self) -> u64 {
        self.fnt_block_offset() + self.fnt_block_size as u64
    }
}

impl FileFormat for Narc {
    fn read_validate<B: Backend>(&mut self, s: &mut Stream<B>) -> Result<()> {
        s.set_offset(0)?;
        self.header = NitroHeader::read(s, NARC_MAGIC)?;
        let file_size = s.size()?;

        s.set_offset(self.header.header_size as u64)?;
        self.fat_block_size = read_block(s, FAT_MAGIC, FAT_BLOCK_HEADER_SIZE)?;
        self.fat_entry_count = le_u16(s)?;
        if FAT_BLOCK_HEADER_SIZE + self.fat_entry_count as u64 * AllocationEntry::SIZE
            > self.fat_block_size as u64
        {
            return Err(Error::InvalidRange);
        }

        s.set_offset(self.fnt_block_offset())?;
        self.fnt_block_size = read_block(s, FNT_MAGIC, BLOCK_HEADER_SIZE)?;

        let fimg_offset = self.fimg_block_offset();
        if fimg_offset + BLOCK_HEADER_SIZE > file_size {
            return Err(Error::InvalidRange);
        }
        s.set_offset(fimg_offset)?;
        self.fimg_block_size = read_block(s, FIMG_MAGIC, BLOCK_HEADER_SIZE)?;
        Ok(())
    }

    fn read_all<B: Backend>(&mut self, s: &mut Stream<B>) -> Result<()> {
        let fnt_offset = self.fnt_block_offset() + BLOCK_HEADER_SIZE;
        let file_data_offset = self.fimg_block_offset() + BLOCK_HEADER_SIZE;
        self.fs = NitroFs::read(s, file_data_offset, self.fat_offset(), fnt_offset)?;
        debug!(files = self.fs.file_count(), "read NARC");
        Ok(())
    }

    fn write_to<B: Backend>(&mut self, s: &mut Stream<B>) -> Result<()> {
        let tables = self.fs.write(SECTION_ALIGNMENT)?;
        self.header = NitroHeader::default();

        // BTAF
        s.set_offset(NitroHeader::SIZE + FAT_BLOCK_HEADER_SIZE)?;
        tables.write_fat(s, 0)?;
        s.write_alignment_padding(SECTION_ALIGNMENT)?;
        let fat_end = s.offset()?;
        self.fat_entry_count = u16::try_from(tables.fat.len())
            .map_err(|_| Error::Parse("too many NARC files"))?;
        self.fat_block_size = offset_u32(fat_end - NitroHeader::SIZE)?;
        s.set_offset(NitroHeader::SIZE)?;
        write_block(s, FAT_MAGIC, self.fat_block_size)?;
        put_le_u16(s, self.fat_entry_count)?;
        put_le_u16(s, 0)?;

        // BTNF
        s.set_offset(fat_end + BLOCK_HEADER_SIZE)?;
        tables.write_fnt(s)?;
        s.write_alignment_padding(SECTION_ALIGNMENT)?;
        let fnt_end = s.offset()?;
        self.fnt_block_size = offset_u32(fnt_end - fat_end)?;
        s.set_offset(fat_end)?;
        write_block(s, FNT_MAGIC, self.fnt_block_size)?;

        // GMIF
        s.set_offset(fnt_end + BLOCK_HEADER_SIZE)?;
        s.write_bytes(&tables.file_data)?;
        s.write_alignment_padding(SECTION_ALIGNMENT)?;
        let fimg_end = s.offset()?;
        self.fimg_block_size = offset_u32(fimg_end - fnt_end)?;
        s.set_offset(fnt_end)?;
        write_block(s, FIMG_MAGIC, self.fimg_block_size)?;

        self.header.file_size = offset_u32(fimg_end)?;
        s.set_offset(0)?;
        self.header.write(s, NARC_MAGIC)?;
        s.set_offset(fimg_end)?;

        debug!(
            files = tables.fat.len(),
            file_size = fimg_end,
            "wrote NARC"
        );
        Ok(())
    }
}

//! Utility container (`utility.bin`) - a bare NitroFS with a four-field header.
//!
//! ## Layout (as written)
//! ```text
//! [0x00] FntOffset   (u32)
//! [0x04] FntSize     (u32)
//! [0x08] FatOffset   (u32)
//! [0x0C] FatSize     (u32)
//! [0x20] FNT, 0x20-aligned
//! [...]  FAT, 0x20-aligned
//! [...]  File data, each file 0x20-aligned
//! ```
//!
//! FAT ranges are absolute file offsets.

use tracing::debug;

use super::nitrofs::NitroFs;
use crate::fs::{Backend, FileFormat, Stream};
use crate::utils::{align_up, le_u32, offset_u32, put_le_u32};
use crate::{Error, Result};

/// Section and file alignment.
pub const SECTION_ALIGNMENT: u64 = 0x20;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UtilityHeader {
    pub fnt_offset: u32,
    pub fnt_size: u32,
    pub fat_offset: u32,
    pub fat_size: u32,
}

impl UtilityHeader {
    pub const SIZE: u64 = 0x10;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Utility {
    pub header: UtilityHeader,
    pub fs: NitroFs,
}

fn in_bounds(offset: u32, size: u32, file_size: u64) -> bool {
    offset as u64 + size as u64 <= file_size
}

impl FileFormat for Utility {
    fn read_validate<B: Backend>(&mut self, s: &mut Stream<B>) -> Result<()> {
        s.set_offset(0)?;
        let header = UtilityHeader {
            fnt_offset: le_u32(s)?,
            fnt_size: le_u32(s)?,
            fat_offset: le_u32(s)?,
            fat_size: le_u32(s)?,
        };

        let file_size = s.size()?;
        if !in_bounds(header.fnt_offset, header.fnt_size, file_size)
            || !in_bounds(header.fat_offset, header.fat_size, file_size)
        {
            return Err(Error::InvalidRange);
        }
        self.header = header;
        Ok(())
    }

    fn read_all<B: Backend>(&mut self, s: &mut Stream<B>) -> Result<()> {
        self.fs = NitroFs::read(
            s,
            0,
            self.header.fat_offset as u64,
            self.header.fnt_offset as u64,
        )?;
        debug!(files = self.fs.file_count(), "read utility container");
        Ok(())
    }

    fn write_to<B: Backend>(&mut self, s: &mut Stream<B>) -> Result<()> {
        let tables = self.fs.write(SECTION_ALIGNMENT)?;

        s.set_offset(UtilityHeader::SIZE)?;
        s.write_alignment_padding(SECTION_ALIGNMENT)?;

        self.header.fnt_offset = offset_u32(s.offset()?)?;
        self.header.fnt_size = offset_u32(tables.fnt_size())?;
        tables.write_fnt(s)?;
        s.write_alignment_padding(SECTION_ALIGNMENT)?;

        // The FAT needs the file data offset, which follows it.
        self.header.fat_offset = offset_u32(s.offset()?)?;
        self.header.fat_size = offset_u32(tables.fat_size())?;
        let file_data_offset = offset_u32(align_up(
            self.header.fat_offset as u64 + tables.fat_size(),
            SECTION_ALIGNMENT,
        ))?;
        tables.write_fat(s, file_data_offset)?;
        s.write_alignment_padding(SECTION_ALIGNMENT)?;

        s.write_bytes(&tables.file_data)?;
        let end = s.offset()?;

        s.set_offset(0)?;
        for v in [
            self.header.fnt_offset,
            self.header.fnt_size,
            self.header.fat_offset,
            self.header.fat_size,
        ] {
            put_le_u32(s, v)?;
        }
        s.set_offset(end)?;

        debug!(
            files = tables.fat.len(),
            file_data_offset,
            size = end,
            "wrote utility container"
        );
        Ok(())
    }
}

//! NDS / DSi cartridge image (`.nds`).
//!
//! ## Layout (as written)
//! ```text
//! [0x0000] Header                  (0x200 bytes; see below)
//! [0x4000] ARM9 code + optional footer (0x0C bytes), 0x200-aligned
//! [...]    ARM9 overlay table      (n × 0x20), 0x200-aligned, omitted if empty
//! [...]    ARM7 code, 0x200-aligned
//! [...]    ARM7 overlay table, 0x200-aligned, omitted if empty
//! [...]    FNT, immediately followed by the FAT, 0x200-aligned
//! [...]    Banner                  (0x840 bytes), 0x200-aligned
//! [...]    File data, each file 0x200-aligned; the image ends 4-aligned
//! ```
//!
//! ## Header (0x200 bytes)
//! ```text
//! [0x000] GameTitle               (12 bytes ASCII, not necessarily null-terminated)
//! [0x00C] GameCode                (4 bytes)
//! [0x010] DeveloperCode           (2 bytes)
//! [0x012] UnitCode                (u8: 0 = NDS, 2 = NDS+DSi, 3 = DSi)
//! [0x013] EncryptionSeedSelect    (u8)
//! [0x014] DeviceCapacity          (u8: 128 KiB << n)
//! [0x015] Reserved                (7 bytes)
//! [0x01C] GameRevision            (u16)
//! [0x01E] Version                 (u8)
//! [0x01F] AutostartFlags          (u8)
//! [0x020] ARM9 rom offset, entry, RAM address, size (4 × u32)
//! [0x030] ARM7 rom offset, entry, RAM address, size (4 × u32)
//! [0x040] FNT offset, size; FAT offset, size        (4 × u32)
//! [0x050] ARM9 overlay table offset, size; ARM7 overlay table offset, size
//! [0x060] Normal / secure card control settings     (2 × u32)
//! [0x068] BannerOffset            (u32)
//! [0x06C] SecureAreaCrc, SecureTransferTimeout       (2 × u16)
//! [0x070] ARM9 / ARM7 autoload    (2 × u32)
//! [0x078] SecureAreaDisable       (u64)
//! [0x080] RomSize, HeaderSize     (2 × u32)
//! [0x088] Reserved                (56 bytes)
//! [0x0C0] NintendoLogo            (156 bytes)
//! [0x15C] NintendoLogoCrc         (u16, CRC16 of the logo)
//! [0x15E] HeaderCrc               (u16, CRC16 of [0x000..0x15E])
//! [0x160] Debug rom offset, size, RAM address, reserved (4 × u32)
//! [0x170] Reserved                (0x90 bytes)
//! ```
//!
//! ## Banner (0x840 bytes)
//! ```text
//! [0x000] Version (u8), Reserved (u8), Crc16 (u16, over [0x020..0x840])
//! [0x004] Reserved                (28 bytes)
//! [0x020] Icon bitmap             (0x200 bytes, 4bpp 32×32 tiles)
//! [0x220] Icon palette            (0x20 bytes, 16 × BGR555)
//! [0x240] Titles                  (6 × 128 UTF-16LE units: ja, en, fr, de, it, es)
//! ```
//!
//! The ARM9 footer (`0xDEC00621`, params offset, unknown) sits right after the
//! ARM9 code and points at the start-module parameters inside that code. A
//! null-separated list of SDK library names follows the parameters.

use std::io::{Read, Write};

use tracing::{debug, trace};

use super::nitrofs::{NitroFile, NitroFs};
use crate::crc::crc16;
use crate::fs::{Backend, FileFormat, Stream, Whence};
use crate::utils::{
    bytesa, bytesv, fixed_string, le_u16, le_u32, le_u64, offset_u32, put_le_u16, put_le_u32,
    put_le_u64, put_u8, set_fixed_string, u8,
};
use crate::{Error, Result};

/// Every section of a written image starts on this boundary.
pub const SECTION_ALIGNMENT: u64 = 0x200;

/// Offset of the ARM9 code in written images; also the declared header size.
pub const ARM9_BASE_ROM_OFFSET: u64 = 0x4000;

/// UTF-16 units per banner title.
pub const BANNER_TITLE_LENGTH: usize = 128;

/// Number of bytes covered by the header CRC.
const HEADER_CRC_LENGTH: usize = 0x15E;

/// Number of consecutive empty names tolerated inside the lib symbol list.
const MAX_SYMBOL_PADDING: usize = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum UnitCode {
    #[default]
    Nds = 0x00,
    NdsDsi = 0x02,
    Dsi = 0x03,
}

impl TryFrom<u8> for UnitCode {
    type Error = Error;

    fn try_from(v: u8) -> Result<Self> {
        match v {
            0x00 => Ok(Self::Nds),
            0x02 => Ok(Self::NdsDsi),
            0x03 => Ok(Self::Dsi),
            other => Err(Error::InvalidUnitCode(other)),
        }
    }
}

/// Banner title languages, in table order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    Japanese,
    English,
    French,
    German,
    Italian,
    Spanish,
}

impl Language {
    pub const COUNT: usize = 6;
}

/// Load parameters of one processor's code blob.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CodeSection {
    pub rom_offset: u32,
    pub entry_address: u32,
    pub ram_address: u32,
    pub rom_size: u32,
}

impl CodeSection {
    fn read<R: Read>(r: &mut R) -> Result<Self> {
        Ok(Self {
            rom_offset: le_u32(r)?,
            entry_address: le_u32(r)?,
            ram_address: le_u32(r)?,
            rom_size: le_u32(r)?,
        })
    }

    fn write<W: Write>(&self, w: &mut W) -> Result<()> {
        put_le_u32(w, self.rom_offset)?;
        put_le_u32(w, self.entry_address)?;
        put_le_u32(w, self.ram_address)?;
        put_le_u32(w, self.rom_size)
    }
}

/// The 0x200-byte cartridge header.
///
/// Offsets and sizes are recomputed by [`Rom::write_to`]; values read from an
/// image describe that image only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RomHeader {
    pub game_title: [u8; 12],
    pub game_code: [u8; 4],
    pub developer_code: [u8; 2],
    pub unit_code: UnitCode,
    pub encryption_seed_select: u8,
    pub device_capacity: u8,
    pub reserved_1: [u8; 7],
    pub game_revision: u16,
    pub version: u8,
    pub autostart_flags: u8,
    pub arm9: CodeSection,
    pub arm7: CodeSection,
    pub fnt_offset: u32,
    pub fnt_size: u32,
    pub fat_offset: u32,
    pub fat_size: u32,
    pub arm9_overlay_table_offset: u32,
    pub arm9_overlay_table_size: u32,
    pub arm7_overlay_table_offset: u32,
    pub arm7_overlay_table_size: u32,
    pub normal_card_control: u32,
    pub secure_card_control: u32,
    pub banner_offset: u32,
    pub secure_area_crc: u16,
    pub secure_transfer_timeout: u16,
    pub arm9_autoload: u32,
    pub arm7_autoload: u32,
    pub secure_area_disable: u64,
    pub rom_size: u32,
    pub header_size: u32,
    pub reserved_2: [u8; 56],
    pub nintendo_logo: [u8; 156],
    pub nintendo_logo_crc: u16,
    pub header_crc: u16,
    pub debug_rom_offset: u32,
    pub debug_rom_size: u32,
    pub debug_ram_address: u32,
    pub reserved_3: u32,
    pub reserved_4: [u8; 0x90],
}

impl Default for RomHeader {
    fn default() -> Self {
        Self {
            game_title: [0; 12],
            game_code: [0; 4],
            developer_code: [0; 2],
            unit_code: UnitCode::Nds,
            encryption_seed_select: 0,
            device_capacity: 0,
            reserved_1: [0; 7],
            game_revision: 0,
            version: 0,
            autostart_flags: 0,
            arm9: CodeSection::default(),
            arm7: CodeSection::default(),
            fnt_offset: 0,
            fnt_size: 0,
            fat_offset: 0,
            fat_size: 0,
            arm9_overlay_table_offset: 0,
            arm9_overlay_table_size: 0,
            arm7_overlay_table_offset: 0,
            arm7_overlay_table_size: 0,
            normal_card_control: 0,
            secure_card_control: 0,
            banner_offset: 0,
            secure_area_crc: 0,
            secure_transfer_timeout: 0,
            arm9_autoload: 0,
            arm7_autoload: 0,
            secure_area_disable: 0,
            rom_size: 0,
            header_size: 0,
            reserved_2: [0; 56],
            nintendo_logo: [0; 156],
            nintendo_logo_crc: 0,
            header_crc: 0,
            debug_rom_offset: 0,
            debug_rom_size: 0,
            debug_ram_address: 0,
            reserved_3: 0,
            reserved_4: [0; 0x90],
        }
    }
}

impl RomHeader {
    pub const SIZE: u64 = 0x200;

    pub fn read<R: Read>(r: &mut R) -> Result<Self> {
        Ok(Self {
            game_title: bytesa(r)?,
            game_code: bytesa(r)?,
            developer_code: bytesa(r)?,
            unit_code: UnitCode::try_from(u8(r)?)?,
            encryption_seed_select: u8(r)?,
            device_capacity: u8(r)?,
            reserved_1: bytesa(r)?,
            game_revision: le_u16(r)?,
            version: u8(r)?,
            autostart_flags: u8(r)?,
            arm9: CodeSection::read(r)?,
            arm7: CodeSection::read(r)?,
            fnt_offset: le_u32(r)?,
            fnt_size: le_u32(r)?,
            fat_offset: le_u32(r)?,
            fat_size: le_u32(r)?,
            arm9_overlay_table_offset: le_u32(r)?,
            arm9_overlay_table_size: le_u32(r)?,
            arm7_overlay_table_offset: le_u32(r)?,
            arm7_overlay_table_size: le_u32(r)?,
            normal_card_control: le_u32(r)?,
            secure_card_control: le_u32(r)?,
            banner_offset: le_u32(r)?,
            secure_area_crc: le_u16(r)?,
            secure_transfer_timeout: le_u16(r)?,
            arm9_autoload: le_u32(r)?,
            arm7_autoload: le_u32(r)?,
            secure_area_disable: le_u64(r)?,
            rom_size: le_u32(r)?,
            header_size: le_u32(r)?,
            reserved_2: bytesa(r)?,
            nintendo_logo: bytesa(r)?,
            nintendo_logo_crc: le_u16(r)?,
            header_crc: le_u16(r)?,
            debug_rom_offset: le_u32(r)?,
            debug_rom_size: le_u32(r)?,
            debug_ram_address: le_u32(r)?,
            reserved_3: le_u32(r)?,
            reserved_4: bytesa(r)?,
        })
    }

    pub fn write<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_all(&self.game_title)?;
        w.write_all(&self.game_code)?;
        w.write_all(&self.developer_code)?;
        put_u8(w, self.unit_code as u8)?;
        put_u8(w, self.encryption_seed_select)?;
        put_u8(w, self.device_capacity)?;
        w.write_all(&self.reserved_1)?;
        put_le_u16(w, self.game_revision)?;
        put_u8(w, self.version)?;
        put_u8(w, self.autostart_flags)?;
        self.arm9.write(w)?;
        self.arm7.write(w)?;
        for v in [
            self.fnt_offset,
            self.fnt_size,
            self.fat_offset,
            self.fat_size,
            self.arm9_overlay_table_offset,
            self.arm9_overlay_table_size,
            self.arm7_overlay_table_offset,
            self.arm7_overlay_table_size,
            self.normal_card_control,
            self.secure_card_control,
            self.banner_offset,
        ] {
            put_le_u32(w, v)?;
        }
        put_le_u16(w, self.secure_area_crc)?;
        put_le_u16(w, self.secure_transfer_timeout)?;
        put_le_u32(w, self.arm9_autoload)?;
        put_le_u32(w, self.arm7_autoload)?;
        put_le_u64(w, self.secure_area_disable)?;
        put_le_u32(w, self.rom_size)?;
        put_le_u32(w, self.header_size)?;
        w.write_all(&self.reserved_2)?;
        w.write_all(&self.nintendo_logo)?;
        put_le_u16(w, self.nintendo_logo_crc)?;
        put_le_u16(w, self.header_crc)?;
        put_le_u32(w, self.debug_rom_offset)?;
        put_le_u32(w, self.debug_rom_size)?;
        put_le_u32(w, self.debug_ram_address)?;
        put_le_u32(w, self.reserved_3)?;
        w.write_all(&self.reserved_4)?;
        Ok(())
    }

    /// CRC16 of the header bytes preceding the header CRC field.
    pub fn compute_crc(&self) -> Result<u16> {
        let mut buf = Vec::with_capacity(Self::SIZE as usize);
        self.write(&mut buf)?;
        Ok(crc16(&buf[..HEADER_CRC_LENGTH]))
    }

    pub fn compute_logo_crc(&self) -> u16 {
        crc16(&self.nintendo_logo)
    }

    pub fn game_title(&self) -> String {
        fixed_string(&self.game_title)
    }

    pub fn set_game_title(&mut self, title: &str) {
        set_fixed_string(&mut self.game_title, title);
    }

    pub fn game_code(&self) -> String {
        fixed_string(&self.game_code)
    }

    pub fn set_game_code(&mut self, code: &str) {
        set_fixed_string(&mut self.game_code, code);
    }

    pub fn developer_code(&self) -> String {
        fixed_string(&self.developer_code)
    }

    pub fn set_developer_code(&mut self, code: &str) {
        set_fixed_string(&mut self.developer_code, code);
    }
}

/// Icon and multilingual titles shown by the system menu.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Banner {
    pub version: u8,
    pub reserved_1: u8,
    /// Recomputed by [`Rom::write_to`].
    pub crc16: u16,
    pub reserved_2: [u8; 28],
    pub icon_chr: [u8; 0x200],
    pub icon_plt: [u8; 0x20],
    pub titles: [[u16; BANNER_TITLE_LENGTH]; Language::COUNT],
}

impl Default for Banner {
    fn default() -> Self {
        Self {
            version: 1,
            reserved_1: 0,
            crc16: 0,
            reserved_2: [0; 28],
            icon_chr: [0; 0x200],
            icon_plt: [0; 0x20],
            titles: [[0; BANNER_TITLE_LENGTH]; Language::COUNT],
        }
    }
}

impl Banner {
    pub const SIZE: u64 = 0x840;
    const CRC_START: usize = 0x20;

    pub fn read<R: Read>(r: &mut R) -> Result<Self> {
        let version = u8(r)?;
        let reserved_1 = u8(r)?;
        let crc16 = le_u16(r)?;
        let reserved_2 = bytesa(r)?;
        let icon_chr = bytesa(r)?;
        let icon_plt = bytesa(r)?;
        let mut titles = [[0u16; BANNER_TITLE_LENGTH]; Language::COUNT];
        for title in &mut titles {
            for unit in title.iter_mut() {
                *unit = le_u16(r)?;
            }
        }
        Ok(Self {
            version,
            reserved_1,
            crc16,
            reserved_2,
            icon_chr,
            icon_plt,
            titles,
        })
    }

    pub fn write<W: Write>(&self, w: &mut W) -> Result<()> {
        put_u8(w, self.version)?;
        put_u8(w, self.reserved_1)?;
        put_le_u16(w, self.crc16)?;
        w.write_all(&self.reserved_2)?;
        w.write_all(&self.icon_chr)?;
        w.write_all(&self.icon_plt)?;
        for unit in self.titles.iter().flatten() {
            put_le_u16(w, *unit)?;
        }
        Ok(())
    }

    /// CRC16 over the icon and title region.
    pub fn compute_crc(&self) -> Result<u16> {
        let mut buf = Vec::with_capacity(Self::SIZE as usize);
        self.write(&mut buf)?;
        Ok(crc16(&buf[Self::CRC_START..]))
    }

    /// The title for `lang`, cut at the first null unit.
    pub fn title(&self, lang: Language) -> String {
        let units = &self.titles[lang as usize];
        let end = units.iter().position(|&u| u == 0).unwrap_or(units.len());
        String::from_utf16_lossy(&units[..end])
    }

    /// Set the title for `lang`, truncating to [`BANNER_TITLE_LENGTH`] units.
    pub fn set_title(&mut self, lang: Language, title: &str) {
        let units = &mut self.titles[lang as usize];
        units.fill(0);
        for (slot, unit) in units.iter_mut().zip(title.encode_utf16()) {
            *slot = unit;
        }
    }
}

/// One overlay table entry (0x20 bytes).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OverlayEntry {
    pub id: u32,
    pub ram_address: u32,
    pub ram_size: u32,
    pub bss_size: u32,
    pub static_init_start: u32,
    pub static_init_end: u32,
    /// ID of the external filesystem file holding the overlay code.
    pub file_id: u32,
    pub compressed_size_and_flags: u32,
}

impl OverlayEntry {
    pub const SIZE: u64 = 0x20;

    pub fn read<R: Read>(r: &mut R) -> Result<Self> {
        Ok(Self {
            id: le_u32(r)?,
            ram_address: le_u32(r)?,
            ram_size: le_u32(r)?,
            bss_size: le_u32(r)?,
            static_init_start: le_u32(r)?,
            static_init_end: le_u32(r)?,
            file_id: le_u32(r)?,
            compressed_size_and_flags: le_u32(r)?,
        })
    }

    pub fn write<W: Write>(&self, w: &mut W) -> Result<()> {
        for v in [
            self.id,
            self.ram_address,
            self.ram_size,
            self.bss_size,
            self.static_init_start,
            self.static_init_end,
            self.file_id,
            self.compressed_size_and_flags,
        ] {
            put_le_u32(w, v)?;
        }
        Ok(())
    }

    /// Size of the overlay when compressed (low 24 bits), 0 if stored raw.
    pub fn compressed_size(&self) -> u32 {
        self.compressed_size_and_flags & 0x00FF_FFFF
    }

    pub fn is_compressed(&self) -> bool {
        self.compressed_size_and_flags & 0x0100_0000 != 0
    }
}

/// Marker appended to the ARM9 code by the SDK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NitroFooter {
    pub code: u32,
    /// Offset of [`StartModuleParams`] relative to the ARM9 code start.
    pub start_module_params_offset: u32,
    pub unk: u32,
}

impl NitroFooter {
    pub const CODE: u32 = 0xDEC0_0621;

    fn read<R: Read>(r: &mut R) -> Result<Self> {
        Ok(Self {
            code: le_u32(r)?,
            start_module_params_offset: le_u32(r)?,
            unk: le_u32(r)?,
        })
    }

    fn write<W: Write>(&self, w: &mut W) -> Result<()> {
        put_le_u32(w, self.code)?;
        put_le_u32(w, self.start_module_params_offset)?;
        put_le_u32(w, self.unk)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartModuleParams {
    pub autoload_list_start: u32,
    pub autoload_list_end: u32,
    pub autoload_start: u32,
    pub static_bss_start: u32,
    pub static_bss_end: u32,
    pub compressed_static_end: u32,
    pub sdk_version: u32,
    pub nitro_code_le: u32,
    pub nitro_code_be: u32,
}

impl StartModuleParams {
    pub const SIZE: u64 = 0x24;

    pub fn read<R: Read>(r: &mut R) -> Result<Self> {
        Ok(Self {
            autoload_list_start: le_u32(r)?,
            autoload_list_end: le_u32(r)?,
            autoload_start: le_u32(r)?,
            static_bss_start: le_u32(r)?,
            static_bss_end: le_u32(r)?,
            compressed_static_end: le_u32(r)?,
            sdk_version: le_u32(r)?,
            nitro_code_le: le_u32(r)?,
            nitro_code_be: le_u32(r)?,
        })
    }
}

/// A parsed cartridge image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Rom {
    pub header: RomHeader,
    pub banner: Banner,
    pub arm9: Vec<u8>,
    pub arm7: Vec<u8>,
    pub footer: Option<NitroFooter>,
    /// Read from inside the ARM9 code; written back as part of it.
    pub start_module_params: Option<StartModuleParams>,
    pub lib_symbols: Vec<String>,
    pub arm9_overlays: Vec<OverlayEntry>,
    pub arm7_overlays: Vec<OverlayEntry>,
    pub fs: NitroFs,
}

/// Device capacity code for an image of `rom_size` bytes: the size rounded up
/// to a power of two, at least 128 KiB, as `128 KiB << code`.
pub fn capacity_code(rom_size: u64) -> u8 {
    let capacity = rom_size.max(1).next_power_of_two().max(0x20000);
    (capacity.trailing_zeros() - 17) as u8
}

fn check_region(offset: u32, size: u32, file_size: u64) -> Result<()> {
    if offset as u64 + size as u64 > file_size {
        return Err(Error::InvalidRange);
    }
    Ok(())
}

impl Rom {
    /// The external file holding the code of `entry`.
    pub fn overlay_file(&self, entry: &OverlayEntry) -> Result<&NitroFile> {
        let id = u16::try_from(entry.file_id).map_err(|_| Error::InvalidOverlayFileId(entry.file_id))?;
        self.fs.find_file_by_id(id)
    }

    fn check_overlays(&self) -> Result<()> {
        let ext_count = self.fs.ext_files.len() as u32;
        for entry in self.arm9_overlays.iter().chain(&self.arm7_overlays) {
            if entry.file_id >= ext_count {
                return Err(Error::InvalidOverlayFileId(entry.file_id));
            }
        }
        Ok(())
    }

    /// Read the lib symbol list, which ends at `end` (the end of the ARM9 code).
    fn read_lib_symbols<B: Backend>(s: &mut Stream<B>, end: u64) -> Result<Vec<String>> {
        let mut symbols = Vec::new();
        loop {
            let mut symbol = next_symbol(s, end)?;
            if symbol.is_empty() {
                // Names may be separated by alignment nulls.
                for skipped in 1..=MAX_SYMBOL_PADDING {
                    symbol = next_symbol(s, end)?;
                    if !symbol.is_empty() {
                        trace!(skipped, "skipped lib symbol padding");
                        break;
                    }
                }
            }
            if symbol.is_empty() {
                break;
            }
            symbols.push(symbol);
        }
        Ok(symbols)
    }

    fn read_overlay_table<B: Backend>(s: &mut Stream<B>, offset: u32, size: u32) -> Result<Vec<OverlayEntry>> {
        let count = size as u64 / OverlayEntry::SIZE;
        s.set_offset(offset as u64)?;
        (0..count).map(|_| OverlayEntry::read(s)).collect()
    }

    /// Write a code blob and return its (offset, size).
    fn write_code<B: Backend>(
        s: &mut Stream<B>,
        code: &[u8],
        footer: Option<&NitroFooter>,
    ) -> Result<(u32, u32)> {
        let offset = offset_u32(s.offset()?)?;
        s.write_bytes(code)?;
        if let Some(footer) = footer {
            footer.write(s)?;
        }
        s.write_alignment_padding(SECTION_ALIGNMENT)?;
        Ok((offset, offset_u32(code.len() as u64)?))
    }

    /// Write an overlay table and return its (offset, size), or zeros if empty.
    fn write_overlay_table<B: Backend>(s: &mut Stream<B>, table: &[OverlayEntry]) -> Result<(u32, u32)> {
        if table.is_empty() {
            return Ok((0, 0));
        }
        let offset = offset_u32(s.offset()?)?;
        for entry in table {
            entry.write(s)?;
        }
        s.write_alignment_padding(SECTION_ALIGNMENT)?;
        Ok((offset, offset_u32(table.len() as u64 * OverlayEntry::SIZE)?))
    }
}

/// Read one lib symbol name. At `end` the list is over; a name crossing it
/// is unterminated.
fn next_symbol<B: Backend>(s: &mut Stream<B>, end: u64) -> Result<String> {
    if s.offset()? >= end {
        return Ok(String::new());
    }
    let symbol = s.read_null_terminated_string()?;
    if s.offset()? > end {
        return Err(Error::UnterminatedString);
    }
    Ok(symbol)
}

impl FileFormat for Rom {
    /// Reads the header and checks the unit code and logo CRC before touching
    /// anything else, then bounds-checks the declared regions and reads the
    /// banner.
    fn read_validate<B: Backend>(&mut self, s: &mut Stream<B>) -> Result<()> {
        s.set_offset(0)?;
        let header = RomHeader::read(s)?;

        let computed = header.compute_logo_crc();
        if computed != header.nintendo_logo_crc {
            return Err(Error::LogoCrcMismatch {
                stored: header.nintendo_logo_crc,
                computed,
            });
        }

        let file_size = s.size()?;
        check_region(header.arm9.rom_offset, header.arm9.rom_size, file_size)?;
        check_region(header.arm7.rom_offset, header.arm7.rom_size, file_size)?;
        check_region(header.fnt_offset, header.fnt_size, file_size)?;
        check_region(header.fat_offset, header.fat_size, file_size)?;
        check_region(header.arm9_overlay_table_offset, header.arm9_overlay_table_size, file_size)?;
        check_region(header.arm7_overlay_table_offset, header.arm7_overlay_table_size, file_size)?;

        // Some homebrew images carry no banner.
        self.banner = if header.banner_offset == 0 {
            Banner::default()
        } else {
            check_region(header.banner_offset, Banner::SIZE as u32, file_size)?;
            s.set_offset(header.banner_offset as u64)?;
            Banner::read(s)?
        };

        debug!(
            title = %header.game_title(),
            code = %header.game_code(),
            unit = ?header.unit_code,
            "validated ROM header"
        );
        self.header = header;
        Ok(())
    }

    fn read_all<B: Backend>(&mut self, s: &mut Stream<B>) -> Result<()> {
        let h = &self.header;

        // File offsets are absolute in cartridge images.
        self.fs = NitroFs::read(s, 0, h.fat_offset as u64, h.fnt_offset as u64)?;

        s.set_offset(h.arm9.rom_offset as u64)?;
        self.arm9 = bytesv(s, h.arm9.rom_size as usize)?;
        s.set_offset(h.arm7.rom_offset as u64)?;
        self.arm7 = bytesv(s, h.arm7.rom_size as usize)?;

        self.footer = None;
        self.start_module_params = None;
        self.lib_symbols.clear();

        let arm9_end = h.arm9.rom_offset as u64 + h.arm9.rom_size as u64;
        if s.size()? >= arm9_end + 4 {
            s.set_offset(arm9_end)?;
            if le_u32(s)? == NitroFooter::CODE {
                s.set_offset(arm9_end)?;
                let footer = NitroFooter::read(s)?;
                s.set_offset(h.arm9.rom_offset as u64 + footer.start_module_params_offset as u64)?;
                self.start_module_params = Some(StartModuleParams::read(s)?);
                self.lib_symbols = Self::read_lib_symbols(s, arm9_end)?;
                self.footer = Some(footer);
            }
        }

        self.arm9_overlays =
            Self::read_overlay_table(s, h.arm9_overlay_table_offset, h.arm9_overlay_table_size)?;
        self.arm7_overlays =
            Self::read_overlay_table(s, h.arm7_overlay_table_offset, h.arm7_overlay_table_size)?;

        debug!(
            arm9 = self.arm9.len(),
            arm7 = self.arm7.len(),
            arm9_overlays = self.arm9_overlays.len(),
            arm7_overlays = self.arm7_overlays.len(),
            lib_symbols = self.lib_symbols.len(),
            files = self.fs.file_count(),
            "read ROM"
        );
        Ok(())
    }

    fn write_to<B: Backend>(&mut self, s: &mut Stream<B>) -> Result<()> {
        self.check_overlays()?;
        let tables = self.fs.write(SECTION_ALIGNMENT)?;

        s.set_offset(ARM9_BASE_ROM_OFFSET)?;
        self.header.header_size = ARM9_BASE_ROM_OFFSET as u32;

        let (offset, size) = Self::write_code(s, &self.arm9, self.footer.as_ref())?;
        self.header.arm9.rom_offset = offset;
        self.header.arm9.rom_size = size;
        (self.header.arm9_overlay_table_offset, self.header.arm9_overlay_table_size) =
            Self::write_overlay_table(s, &self.arm9_overlays)?;

        let (offset, size) = Self::write_code(s, &self.arm7, None)?;
        self.header.arm7.rom_offset = offset;
        self.header.arm7.rom_size = size;
        (self.header.arm7_overlay_table_offset, self.header.arm7_overlay_table_size) =
            Self::write_overlay_table(s, &self.arm7_overlays)?;

        self.header.fnt_offset = offset_u32(s.offset()?)?;
        tables.write_fnt(s)?;
        self.header.fnt_size = offset_u32(tables.fnt_size())?;

        // The FAT follows the FNT directly but needs the file data offset,
        // so reserve it and fill it in last.
        self.header.fat_offset = offset_u32(s.offset()?)?;
        self.header.fat_size = offset_u32(tables.fat_size())?;
        s.seek_to(tables.fat_size() as i64, Whence::Current)?;
        s.write_alignment_padding(SECTION_ALIGNMENT)?;

        self.header.banner_offset = offset_u32(s.offset()?)?;
        self.banner.crc16 = self.banner.compute_crc()?;
        self.banner.write(s)?;
        s.write_alignment_padding(SECTION_ALIGNMENT)?;

        let file_data_offset = offset_u32(s.offset()?)?;
        s.write_bytes(&tables.file_data)?;
        s.write_alignment_padding(4)?;

        let rom_size = s.offset()?;
        self.header.rom_size = offset_u32(rom_size)?;
        self.header.device_capacity = capacity_code(rom_size);

        s.set_offset(self.header.fat_offset as u64)?;
        tables.write_fat(s, file_data_offset)?;

        self.header.nintendo_logo_crc = self.header.compute_logo_crc();
        self.header.header_crc = self.header.compute_crc()?;
        s.set_offset(0)?;
        self.header.write(s)?;

        debug!(
            rom_size,
            capacity = self.header.device_capacity,
            fnt_offset = self.header.fnt_offset,
            banner_offset = self.header.banner_offset,
            file_data_offset,
            "wrote ROM"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::nitrofs::NitroDirectory;
    use crate::fs::Compression;
    use rstest::rstest;

    fn sample_rom() -> Rom {
        let mut rom = Rom::default();
        rom.header.set_game_title("TWLKIT TEST");
        rom.header.set_game_code("ATKE");
        rom.header.set_developer_code("01");
        rom.header.unit_code = UnitCode::NdsDsi;
        for (i, b) in rom.header.nintendo_logo.iter_mut().enumerate() {
            *b = (i * 7) as u8;
        }
        rom.header.arm9.entry_address = 0x0200_0800;
        rom.header.arm9.ram_address = 0x0200_0000;
        rom.header.arm7.ram_address = 0x0238_0000;

        rom.banner.set_title(Language::English, "twlkit\nTest ROM");
        rom.banner.set_title(Language::Japanese, "テスト");
        rom.banner.icon_plt[0] = 0x1F;

        // Code, then start-module params at 0x40, then lib names.
        let mut arm9 = vec![0xE1u8; 0x40];
        for v in [1u32, 2, 3, 4, 5, 6, 0x0505_0000, 0xDEC0_0621, 0x2106_C0DE] {
            arm9.extend_from_slice(&v.to_le_bytes());
        }
        arm9.extend_from_slice(b"[SDK+NINTENDO:BACKUP]\0\0\0\0[SDK+ABIWRAP]\0");
        arm9.extend_from_slice(&[0; 8]);
        arm9.extend_from_slice(&[0xAB; 4]);
        rom.arm9 = arm9;
        rom.footer = Some(NitroFooter {
            code: NitroFooter::CODE,
            start_module_params_offset: 0x40,
            unk: 0,
        });
        rom.start_module_params = Some(StartModuleParams {
            autoload_list_start: 1,
            autoload_list_end: 2,
            autoload_start: 3,
            static_bss_start: 4,
            static_bss_end: 5,
            compressed_static_end: 6,
            sdk_version: 0x0505_0000,
            nitro_code_le: 0xDEC0_0621,
            nitro_code_be: 0x2106_C0DE,
        });
        rom.lib_symbols = vec!["[SDK+NINTENDO:BACKUP]".into(), "[SDK+ABIWRAP]".into()];
        rom.arm7 = vec![0x7A; 0x123];

        rom.fs.ext_files.push(NitroFile::new("", vec![0x09; 0x30]));
        rom.fs.ext_files.push(NitroFile::new("", vec![0x07; 0x10]));
        rom.arm9_overlays.push(OverlayEntry {
            id: 0,
            ram_address: 0x0210_0000,
            ram_size: 0x30,
            file_id: 0,
            ..Default::default()
        });
        rom.arm7_overlays.push(OverlayEntry {
            id: 0,
            file_id: 1,
            ..Default::default()
        });

        let mut data = NitroDirectory::new("data");
        data.files.push(NitroFile::new("msg.bmg", b"MESGbmg1".to_vec()));
        rom.fs.root.dirs.push(data);
        rom.fs.root.files.push(NitroFile::new("readme.txt", b"hello".to_vec()));
        rom
    }

    fn write_bytes(rom: &mut Rom) -> Vec<u8> {
        let mut s = Stream::memory();
        s.open_write(Compression::None).unwrap();
        rom.write_to(&mut s).unwrap();
        s.close().unwrap();
        s.into_bytes()
    }

    fn parse_bytes(data: Vec<u8>) -> Result<Rom> {
        let mut s = Stream::from_bytes(data);
        s.open_read_with(Compression::None)?;
        Rom::parse(&mut s)
    }

    #[rstest]
    #[case(0, 0)]
    #[case(0x4000, 0)]
    #[case(0x20000, 0)]
    #[case(0x20001, 1)]
    #[case(0x100000, 3)]
    #[case(0x0100_0000, 7)]
    #[case(0x0100_0001, 8)]
    fn capacity_codes(#[case] size: u64, #[case] code: u8) {
        assert_eq!(capacity_code(size), code);
    }

    #[test]
    fn roundtrip() {
        let mut rom = sample_rom();
        let bytes = write_bytes(&mut rom);
        let back = parse_bytes(bytes.clone()).unwrap();

        assert_eq!(back, rom);
        assert_eq!(back.header.game_title(), "TWLKIT TEST");
        assert_eq!(back.banner.title(Language::Japanese), "テスト");
        assert_eq!(
            back.lib_symbols,
            ["[SDK+NINTENDO:BACKUP]", "[SDK+ABIWRAP]"]
        );
        assert_eq!(back.start_module_params.unwrap().sdk_version, 0x0505_0000);
        assert_eq!(back.overlay_file(&back.arm7_overlays[0]).unwrap().data, [0x07; 0x10]);
        assert_eq!(back.fs.find_file_by_path("data/msg.bmg").unwrap().id, 3);

        // Rewriting a parsed image is byte-stable.
        let mut again = back;
        assert_eq!(write_bytes(&mut again), bytes);
    }

    #[test]
    fn layout_is_aligned() {
        let mut rom = sample_rom();
        let bytes = write_bytes(&mut rom);
        let h = &rom.header;

        assert_eq!(h.arm9.rom_offset, 0x4000);
        assert_eq!(h.header_size, 0x4000);
        assert_eq!(h.arm9_overlay_table_offset % 0x200, 0);
        assert_eq!(h.arm7.rom_offset % 0x200, 0);
        assert_eq!(h.fat_offset, h.fnt_offset + h.fnt_size);
        assert_eq!(h.banner_offset % 0x200, 0);
        assert_eq!(h.rom_size as usize, bytes.len());
        assert_eq!(bytes.len() % 4, 0);
        assert_eq!(h.header_crc, crc16(&bytes[..0x15E]));
        assert_eq!(rom.banner.crc16, crc16(&bytes[h.banner_offset as usize + 0x20..][..0x820]));
        // The footer follows the ARM9 code directly.
        let footer_at = (h.arm9.rom_offset + h.arm9.rom_size) as usize;
        assert_eq!(&bytes[footer_at..footer_at + 4], &NitroFooter::CODE.to_le_bytes());
    }

    #[test]
    fn logo_crc_mismatch_fails_validation() {
        let mut rom = sample_rom();
        let mut bytes = write_bytes(&mut rom);
        bytes[0xC0] ^= 0xFF;
        assert!(matches!(
            parse_bytes(bytes),
            Err(Error::LogoCrcMismatch { .. })
        ));
    }

    #[test]
    fn invalid_unit_code() {
        let mut rom = sample_rom();
        let mut bytes = write_bytes(&mut rom);
        bytes[0x12] = 0x01;
        assert!(matches!(parse_bytes(bytes), Err(Error::InvalidUnitCode(0x01))));
    }

    #[test]
    fn banner_out_of_bounds() {
        let mut rom = sample_rom();
        let mut bytes = write_bytes(&mut rom);
        let len = bytes.len() as u32;
        bytes[0x68..0x6C].copy_from_slice(&(len - 0x10).to_le_bytes());
        assert!(matches!(parse_bytes(bytes), Err(Error::InvalidRange)));
    }

    #[test]
    fn overlay_must_reference_external_file() {
        let mut rom = sample_rom();
        rom.arm9_overlays[0].file_id = 2;
        let mut s = Stream::memory();
        s.open_write(Compression::None).unwrap();
        assert!(matches!(
            rom.write_to(&mut s),
            Err(Error::InvalidOverlayFileId(2))
        ));
    }

    #[test]
    fn no_footer() {
        let mut rom = sample_rom();
        rom.footer = None;
        let back = parse_bytes(write_bytes(&mut rom)).unwrap();
        assert!(back.footer.is_none());
        assert!(back.start_module_params.is_none());
        assert!(back.lib_symbols.is_empty());
    }

    #[test]
    fn lib_symbols_stop_at_arm9_end() {
        let mut rom = sample_rom();
        // Code and start-module params, then one name ending on the last byte.
        rom.arm9.truncate(0x64);
        rom.arm9.extend_from_slice(b"a\0");
        rom.lib_symbols = vec!["a".into()];
        let back = parse_bytes(write_bytes(&mut rom)).unwrap();
        assert_eq!(back.lib_symbols, ["a"]);
        assert_eq!(back, rom);
    }

    #[test]
    fn lib_symbol_crossing_arm9_end() {
        let mut rom = sample_rom();
        rom.arm9.truncate(0x64);
        rom.arm9.extend_from_slice(b"abc");
        assert!(matches!(
            parse_bytes(write_bytes(&mut rom)),
            Err(Error::UnterminatedString)
        ));
    }
}

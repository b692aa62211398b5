//! BMG (Binary MessaGe) - message tables.
//!
//! ## Layout
//! ```text
//! [0x00] Header  (0x20 bytes)
//! [0x20] INF1    (0x10 header + entry_count × entry_size), padded to 0x20
//! [...]  DAT1    (0x08 header + encoded messages), padded to 0x20
//! [...]  MID1    (0x10 header + entry_count × u32), padded to 0x20; optional
//! ```
//!
//! ## Header (0x20 bytes)
//! ```text
//! [0x00] Magic "MESGbmg1"   (8 bytes)
//! [0x08] FileSize           (u32)
//! [0x0C] SectionCount       (u32: 2, or 3 with MID1)
//! [0x10] Encoding           (u8: 1 = CP1252, 2 = UTF-16, 3 = Shift-JIS, 4 = UTF-8)
//! [0x11] Reserved           (15 bytes)
//! ```
//!
//! ## INF1 (0x10 bytes + entries)
//! ```text
//! [0x00] Magic "INF1"       (4 bytes)
//! [0x04] BlockSize          (u32)
//! [0x08] EntryCount         (u16)
//! [0x0A] EntrySize          (u16: 4 + attribute bytes)
//! [0x0C] FileId             (u16)
//! [0x0E] Reserved           (u16)
//! entry: DataOffset (u32, relative to the DAT1 payload), Attributes[EntrySize - 4]
//! ```
//!
//! ## DAT1 (0x08 bytes + messages)
//! Each message is a run of characters in the table encoding ending with a
//! null character. The character `0x1A` starts an escape: it is followed by a
//! one-byte length (covering the `0x1A` character, the length byte and the
//! payload) and the raw payload bytes. The payload starts with a single null
//! character that no entry points at.
//!
//! ## MID1 (0x10 bytes + IDs)
//! ```text
//! [0x00] Magic "MID1"       (4 bytes)
//! [0x04] BlockSize          (u32)
//! [0x08] IdCount            (u16)
//! [0x0A] Format             (u8)
//! [0x0B] Info               (u8)
//! [0x0C] Reserved           (u32)
//! ```

#[cfg(feature = "interchange")]
pub mod interchange;
pub mod tokens;

use std::io::Read;

use tracing::debug;

use crate::fs::{Backend, FileFormat, Stream};
use crate::utils::{align_up, bytesa, bytesv, le_u16, le_u32, magic, offset_u32, put_le_u16, put_le_u32, put_u8, u8};
use crate::{Error, Result};

pub use tokens::{EscapeError, format_message, parse_message};
use tokens::TokenBuilder;

const HEADER_MAGIC: &[u8; 8] = b"MESGbmg1";
const INF_MAGIC: &[u8; 4] = b"INF1";
const DAT_MAGIC: &[u8; 4] = b"DAT1";
const MID_MAGIC: &[u8; 4] = b"MID1";

const HEADER_SIZE: u64 = 0x20;
const INF_HEADER_SIZE: u64 = 0x10;
const DAT_HEADER_SIZE: u64 = 0x08;
const MID_HEADER_SIZE: u64 = 0x10;

/// Every section starts on this boundary.
pub const DATA_ALIGNMENT: u64 = 0x20;

/// Width of the data offset at the start of each INF1 entry.
const OFFSET_SIZE: usize = 4;

/// Starts an escape sequence inside message text.
pub const ESCAPE_CHARACTER: u16 = 0x1A;

/// Text encoding of a message table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum Encoding {
    Cp1252 = 1,
    #[default]
    Utf16 = 2,
    ShiftJis = 3,
    Utf8 = 4,
}

impl TryFrom<u8> for Encoding {
    type Error = Error;

    fn try_from(v: u8) -> Result<Self> {
        match v {
            1 => Ok(Self::Cp1252),
            2 => Ok(Self::Utf16),
            3 => Ok(Self::ShiftJis),
            4 => Ok(Self::Utf8),
            other => Err(Error::InvalidEncoding(other)),
        }
    }
}

impl Encoding {
    /// Bytes per code unit. Only UTF-16 and UTF-8 are supported.
    pub fn char_size(self) -> Result<usize> {
        match self {
            Self::Utf16 => Ok(2),
            Self::Utf8 => Ok(1),
            other => Err(Error::UnsupportedEncoding(other)),
        }
    }

    fn read_unit<R: Read>(self, r: &mut R) -> Result<u16> {
        match self {
            Self::Utf16 => le_u16(r),
            Self::Utf8 => Ok(u8(r)? as u16),
            other => Err(Error::UnsupportedEncoding(other)),
        }
    }

    fn push_unit(self, out: &mut Vec<u8>, unit: u16) {
        match self {
            Self::Utf16 => out.extend_from_slice(&unit.to_le_bytes()),
            _ => out.push(unit as u8),
        }
    }

    fn decode(self, raw: &[u8]) -> Result<String> {
        match self {
            Self::Utf16 => {
                let units: Vec<u16> = raw
                    .chunks_exact(2)
                    .map(|c| u16::from_le_bytes([c[0], c[1]]))
                    .collect();
                String::from_utf16(&units).map_err(|_| Error::InvalidMessageText)
            }
            Self::Utf8 => String::from_utf8(raw.to_vec()).map_err(|_| Error::InvalidMessageText),
            other => Err(Error::UnsupportedEncoding(other)),
        }
    }

    fn encode(self, text: &str, out: &mut Vec<u8>) -> Result<()> {
        if text.contains(['\0', '\u{1A}']) {
            return Err(Error::InvalidMessageText);
        }
        match self {
            Self::Utf16 => {
                for unit in text.encode_utf16() {
                    out.extend_from_slice(&unit.to_le_bytes());
                }
                Ok(())
            }
            Self::Utf8 => {
                out.extend_from_slice(text.as_bytes());
                Ok(())
            }
            other => Err(Error::UnsupportedEncoding(other)),
        }
    }
}

/// One unit of message content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageToken {
    /// Literal text.
    Text(String),
    /// Raw control bytes, e.g. a text color or a variable placeholder.
    Escape(Vec<u8>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    /// Present for every message of a table with a MID1 section, else never.
    pub id: Option<u32>,
    /// Exactly [`Bmg::attribute_size`] bytes.
    pub attributes: Vec<u8>,
    pub tokens: Vec<MessageToken>,
}

impl Message {
    pub fn new(tokens: Vec<MessageToken>) -> Self {
        Self {
            tokens,
            ..Default::default()
        }
    }

    /// The message in the brace dialect.
    pub fn to_text(&self) -> String {
        format_message(&self.tokens)
    }
}

/// MID1 header fields carried through a round-trip.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MidInfo {
    pub format: u8,
    pub info: u8,
}

/// Section sizes found by [`Bmg::read_validate`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Sections {
    entry_count: u16,
    info_size: u32,
    data_size: u32,
    id_count: u16,
}

/// A parsed message table.
///
/// Equality compares content only; section sizes remembered from the last
/// read are ignored.
#[derive(Debug, Clone, Default)]
pub struct Bmg {
    pub encoding: Encoding,
    pub file_id: u16,
    /// Width of every message's attribute array.
    pub attribute_size: usize,
    /// Present iff messages carry IDs.
    pub mid: Option<MidInfo>,
    pub messages: Vec<Message>,
    pub reserved: [u8; 15],
    sections: Sections,
}

impl PartialEq for Bmg {
    fn eq(&self, other: &Self) -> bool {
        self.encoding == other.encoding
            && self.file_id == other.file_id
            && self.attribute_size == other.attribute_size
            && self.mid == other.mid
            && self.messages == other.messages
            && self.reserved == other.reserved
    }
}

impl Eq for Bmg {}

impl Bmg {
    /// Build a table whose attribute width and ID presence follow the first
    /// message. Every other message must match it for
    /// [`FileFormat::write_to`] to succeed.
    pub fn new(encoding: Encoding, file_id: u16, messages: Vec<Message>) -> Self {
        let (attribute_size, mid) = match messages.first() {
            Some(m) => (m.attributes.len(), m.id.map(|_| MidInfo::default())),
            None => (0, None),
        };
        Self {
            encoding,
            file_id,
            attribute_size,
            mid,
            messages,
            ..Default::default()
        }
    }

    pub fn has_message_ids(&self) -> bool {
        self.mid.is_some()
    }

    fn entry_size(&self) -> Result<u16> {
        u16::try_from(OFFSET_SIZE + self.attribute_size)
            .map_err(|_| Error::Parse("BMG attribute size too large"))
    }

    fn check_consistency(&self) -> Result<()> {
        for msg in &self.messages {
            if msg.attributes.len() != self.attribute_size {
                return Err(Error::AttributeSizeMismatch {
                    expected: self.attribute_size,
                    found: msg.attributes.len(),
                });
            }
            if msg.id.is_some() != self.has_message_ids() {
                return Err(Error::MessageIdMismatch);
            }
        }
        Ok(())
    }

    fn read_tokens<B: Backend>(&self, s: &mut Stream<B>, char_size: usize) -> Result<Vec<MessageToken>> {
        let mut b = TokenBuilder::new();
        let mut run = Vec::new();
        loop {
            let unit = self.encoding.read_unit(s)?;
            match unit {
                ESCAPE_CHARACTER => {
                    b.push_str(&self.encoding.decode(&run)?);
                    run.clear();
                    b.begin_escape()?;
                    let len = u8(s)? as usize;
                    let payload = len
                        .checked_sub(char_size + 1)
                        .ok_or(Error::Parse("BMG escape length too short"))?;
                    for byte in bytesv(s, payload)? {
                        b.push_escape_byte(byte);
                    }
                    b.end_escape()?;
                }
                0 => {
                    b.push_str(&self.encoding.decode(&run)?);
                    break;
                }
                unit => self.encoding.push_unit(&mut run, unit),
            }
        }
        Ok(b.finish()?)
    }

    fn encode_message(&self, msg: &Message, char_size: usize, out: &mut Vec<u8>) -> Result<()> {
        for token in &msg.tokens {
            match token {
                MessageToken::Text(text) => self.encoding.encode(text, out)?,
                MessageToken::Escape(bytes) => {
                    let len = char_size + 1 + bytes.len();
                    let len = u8::try_from(len).map_err(|_| Error::EscapeTooLong(bytes.len()))?;
                    self.encoding.push_unit(out, ESCAPE_CHARACTER);
                    out.push(len);
                    out.extend_from_slice(bytes);
                }
            }
        }
        self.encoding.push_unit(out, 0);
        Ok(())
    }
}

impl FileFormat for Bmg {
    fn read_validate<B: Backend>(&mut self, s: &mut Stream<B>) -> Result<()> {
        s.set_offset(0)?;
        magic(s, HEADER_MAGIC)?;
        let _file_size = le_u32(s)?;
        let section_count = le_u32(s)?;
        let encoding = Encoding::try_from(u8(s)?)?;
        let reserved = bytesa(s)?;
        if section_count < 2 {
            return Err(Error::InvalidSectionCount(section_count));
        }

        magic(s, INF_MAGIC)?;
        let info_size = le_u32(s)?;
        let entry_count = le_u16(s)?;
        let entry_size = le_u16(s)? as usize;
        let file_id = le_u16(s)?;
        let _ = le_u16(s)?;
        if entry_size < OFFSET_SIZE
            || INF_HEADER_SIZE + entry_count as u64 * entry_size as u64 > info_size as u64
        {
            return Err(Error::Parse("invalid BMG info section"));
        }
        encoding.char_size()?;

        let file_size = s.size()?;
        let data_offset = HEADER_SIZE + info_size as u64;
        if data_offset + DAT_HEADER_SIZE > file_size {
            return Err(Error::InvalidRange);
        }
        s.set_offset(data_offset)?;
        magic(s, DAT_MAGIC)?;
        let data_size = le_u32(s)?;

        let mut id_count = 0;
        self.mid = None;
        if section_count >= 3 {
            let mid_offset = data_offset + data_size as u64;
            if mid_offset + MID_HEADER_SIZE > file_size {
                return Err(Error::InvalidRange);
            }
            s.set_offset(mid_offset)?;
            magic(s, MID_MAGIC)?;
            let _block_size = le_u32(s)?;
            id_count = le_u16(s)?;
            let format = u8(s)?;
            let info = u8(s)?;
            if id_count != entry_count {
                return Err(Error::MessageIdMismatch);
            }
            self.mid = Some(MidInfo { format, info });
        }

        self.encoding = encoding;
        self.reserved = reserved;
        self.file_id = file_id;
        self.attribute_size = entry_size - OFFSET_SIZE;
        self.sections = Sections {
            entry_count,
            info_size,
            data_size,
            id_count,
        };
        debug!(
            ?encoding,
            messages = entry_count,
            attribute_size = self.attribute_size,
            has_ids = self.mid.is_some(),
            "validated BMG"
        );
        Ok(())
    }

    fn read_all<B: Backend>(&mut self, s: &mut Stream<B>) -> Result<()> {
        let char_size = self.encoding.char_size()?;
        let entries_offset = HEADER_SIZE + INF_HEADER_SIZE;
        let data_offset = HEADER_SIZE + self.sections.info_size as u64;
        let messages_offset = data_offset + DAT_HEADER_SIZE;

        let mut messages = Vec::with_capacity(self.sections.entry_count as usize);
        let mut pos = entries_offset;
        for _ in 0..self.sections.entry_count {
            s.set_offset(pos)?;
            let offset = le_u32(s)?;
            let attributes = bytesv(s, self.attribute_size)?;
            pos = s.offset()?;

            s.set_offset(messages_offset + offset as u64)?;
            let tokens = self.read_tokens(s, char_size)?;
            messages.push(Message {
                id: None,
                attributes,
                tokens,
            });
        }

        if self.mid.is_some() {
            let ids_offset = data_offset + self.sections.data_size as u64 + MID_HEADER_SIZE;
            s.set_offset(ids_offset)?;
            for msg in messages.iter_mut().take(self.sections.id_count as usize) {
                msg.id = Some(le_u32(s)?);
            }
        }

        self.messages = messages;
        debug!(messages = self.messages.len(), "read BMG");
        Ok(())
    }

    fn write_to<B: Backend>(&mut self, s: &mut Stream<B>) -> Result<()> {
        let char_size = self.encoding.char_size()?;
        self.check_consistency()?;
        let entry_size = self.entry_size()?;
        let entry_count = u16::try_from(self.messages.len())
            .map_err(|_| Error::Parse("too many BMG messages"))?;

        // Encode every message up front; offset 0 is the leading null character.
        let mut data = Vec::new();
        self.encoding.push_unit(&mut data, 0);
        let mut offsets = Vec::with_capacity(self.messages.len());
        for msg in &self.messages {
            offsets.push(offset_u32(data.len() as u64)?);
            self.encode_message(msg, char_size, &mut data)?;
        }

        // INF1
        let entries_size = entry_count as u64 * entry_size as u64;
        let info_size = offset_u32(align_up(INF_HEADER_SIZE + entries_size, DATA_ALIGNMENT))?;
        s.set_offset(HEADER_SIZE)?;
        s.write_bytes(INF_MAGIC)?;
        put_le_u32(s, info_size)?;
        put_le_u16(s, entry_count)?;
        put_le_u16(s, entry_size)?;
        put_le_u16(s, self.file_id)?;
        put_le_u16(s, 0)?;
        for (msg, offset) in self.messages.iter().zip(&offsets) {
            put_le_u32(s, *offset)?;
            s.write_bytes(&msg.attributes)?;
        }
        s.write_alignment_padding(DATA_ALIGNMENT)?;

        // DAT1
        let data_size = offset_u32(align_up(DAT_HEADER_SIZE + data.len() as u64, DATA_ALIGNMENT))?;
        s.write_bytes(DAT_MAGIC)?;
        put_le_u32(s, data_size)?;
        s.write_bytes(&data)?;
        s.write_alignment_padding(DATA_ALIGNMENT)?;

        // MID1
        let mut section_count = 2;
        if let Some(mid) = self.mid {
            section_count += 1;
            let mid_size = offset_u32(align_up(MID_HEADER_SIZE + entries_id_size(entry_count), DATA_ALIGNMENT))?;
            s.write_bytes(MID_MAGIC)?;
            put_le_u32(s, mid_size)?;
            put_le_u16(s, entry_count)?;
            put_u8(s, mid.format)?;
            put_u8(s, mid.info)?;
            put_le_u32(s, 0)?;
            for msg in &self.messages {
                put_le_u32(s, msg.id.unwrap_or_default())?;
            }
            s.write_alignment_padding(DATA_ALIGNMENT)?;
        }

        let file_size = s.offset()?;
        s.set_offset(0)?;
        s.write_bytes(HEADER_MAGIC)?;
        put_le_u32(s, offset_u32(file_size)?)?;
        put_le_u32(s, section_count)?;
        put_u8(s, self.encoding as u8)?;
        s.write_bytes(&self.reserved)?;
        s.set_offset(file_size)?;

        debug!(
            messages = entry_count,
            file_size,
            section_count,
            "wrote BMG"
        );
        Ok(())
    }
}

fn entries_id_size(count: u16) -> u64 {
    count as u64 * 4
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::Compression;

    fn esc(bytes: &[u8]) -> MessageToken {
        MessageToken::Escape(bytes.to_vec())
    }

    fn text(s: &str) -> MessageToken {
        MessageToken::Text(s.to_string())
    }

    fn write(bmg: &mut Bmg) -> Result<Vec<u8>> {
        let mut s = Stream::memory();
        s.open_write(Compression::None)?;
        bmg.write_to(&mut s)?;
        s.close()?;
        Ok(s.into_bytes())
    }

    fn read(bytes: Vec<u8>) -> Result<Bmg> {
        let mut s = Stream::from_bytes(bytes);
        s.open_read()?;
        Bmg::parse(&mut s)
    }

    fn sample(encoding: Encoding, with_ids: bool) -> Bmg {
        let messages = vec![
            Message {
                id: with_ids.then_some(100),
                attributes: vec![1, 2, 3, 4],
                tokens: vec![text("Hello, "), esc(&[0x01, 0x00, 0x02]), text("!")],
            },
            Message {
                id: with_ids.then_some(7),
                attributes: vec![0; 4],
                tokens: vec![],
            },
            Message {
                id: with_ids.then_some(0xFFFF_FFFF),
                attributes: vec![9, 9, 9, 9],
                tokens: vec![esc(&[]), text("Ünïcødé {braces}"), esc(&[0xFF])],
            },
        ];
        Bmg::new(encoding, 3, messages)
    }

    #[test]
    fn utf16_layout() {
        let mut bmg = sample(Encoding::Utf16, false);
        let bytes = write(&mut bmg).unwrap();

        assert_eq!(&bytes[..8], b"MESGbmg1");
        assert_eq!(u32::from_le_bytes(bytes[8..12].try_into().unwrap()) as usize, bytes.len());
        assert_eq!(bytes[0x0C], 2);
        assert_eq!(bytes[0x10], 2);
        assert_eq!(&bytes[0x20..0x24], b"INF1");
        // 0x10 + 3 × 8 = 0x28, padded to 0x40.
        assert_eq!(&bytes[0x24..0x28], &0x40u32.to_le_bytes());
        assert_eq!(&bytes[0x2A..0x2C], &8u16.to_le_bytes());
        // The first message starts after the leading null character.
        assert_eq!(&bytes[0x30..0x34], &2u32.to_le_bytes());
        assert_eq!(&bytes[0x60..0x64], b"DAT1");
        assert_eq!(&bytes[0x68..0x6A], &[0, 0]);
        assert_eq!(&bytes[0x6A..0x6C], &[b'H', 0]);
        assert_eq!(bytes.len() % 0x20, 0);
    }

    #[test]
    fn escape_encoding() {
        let mut bmg = Bmg::new(
            Encoding::Utf16,
            0,
            vec![Message::new(vec![esc(&[0xAA, 0xBB])])],
        );
        let bytes = write(&mut bmg).unwrap();
        // 0x1A char, length 2 + 1 + 2, payload, terminator.
        assert_eq!(&bytes[0x4A..0x52], &[0x1A, 0x00, 0x05, 0xAA, 0xBB, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn roundtrip_utf16_with_ids() {
        let mut bmg = sample(Encoding::Utf16, true);
        let back = read(write(&mut bmg).unwrap()).unwrap();
        assert_eq!(back, bmg);
        assert_eq!(back.messages[2].id, Some(0xFFFF_FFFF));
        assert_eq!(back.messages[2].to_text(), "{}Ünïcødé {{braces}}{FF}");
    }

    #[test]
    fn fresh_table_equals_parsed_copy() {
        let original = Bmg::new(Encoding::Utf16, 0, vec![Message::new(vec![text("hi")])]);
        let back = read(write(&mut original.clone()).unwrap()).unwrap();
        assert_eq!(original, back);
    }

    #[test]
    fn roundtrip_utf8() {
        let mut bmg = sample(Encoding::Utf8, false);
        let bytes = write(&mut bmg).unwrap();
        assert_eq!(bytes[0x0C], 2);
        let back = read(bytes).unwrap();
        assert_eq!(back.messages, bmg.messages);
        assert_eq!(back.encoding, Encoding::Utf8);
        assert!(!back.has_message_ids());
    }

    #[test]
    fn mismatched_attributes_fail_write() {
        let mut bmg = sample(Encoding::Utf16, false);
        bmg.messages[1].attributes.pop();
        assert!(matches!(
            write(&mut bmg),
            Err(Error::AttributeSizeMismatch { expected: 4, found: 3 })
        ));
    }

    #[test]
    fn mixed_ids_fail_write() {
        let mut bmg = sample(Encoding::Utf16, true);
        bmg.messages[2].id = None;
        assert!(matches!(write(&mut bmg), Err(Error::MessageIdMismatch)));

        let mut bmg = sample(Encoding::Utf16, false);
        bmg.messages[0].id = Some(1);
        assert!(matches!(write(&mut bmg), Err(Error::MessageIdMismatch)));
    }

    #[test]
    fn unsupported_encodings() {
        let mut bmg = sample(Encoding::ShiftJis, false);
        assert!(matches!(
            write(&mut bmg),
            Err(Error::UnsupportedEncoding(Encoding::ShiftJis))
        ));

        let mut bytes = write(&mut sample(Encoding::Utf16, false)).unwrap();
        bytes[0x10] = 1;
        assert!(matches!(
            read(bytes.clone()),
            Err(Error::UnsupportedEncoding(Encoding::Cp1252))
        ));
        bytes[0x10] = 9;
        assert!(matches!(read(bytes), Err(Error::InvalidEncoding(9))));
    }

    #[test]
    fn invalid_text_and_long_escape() {
        let mut bmg = Bmg::new(Encoding::Utf8, 0, vec![Message::new(vec![text("a\0b")])]);
        assert!(matches!(write(&mut bmg), Err(Error::InvalidMessageText)));

        let mut bmg = Bmg::new(Encoding::Utf16, 0, vec![Message::new(vec![esc(&[0; 253])])]);
        assert!(matches!(write(&mut bmg), Err(Error::EscapeTooLong(253))));
        let mut bmg = Bmg::new(Encoding::Utf16, 0, vec![Message::new(vec![esc(&[0; 252])])]);
        assert!(write(&mut bmg).is_ok());
    }

    #[test]
    fn section_count_checked() {
        let mut bytes = write(&mut sample(Encoding::Utf16, false)).unwrap();
        bytes[0x0C] = 1;
        assert!(matches!(read(bytes), Err(Error::InvalidSectionCount(1))));
    }

    #[test]
    fn empty_table() {
        let mut bmg = Bmg::new(Encoding::Utf16, 0, vec![]);
        let back = read(write(&mut bmg).unwrap()).unwrap();
        assert!(back.messages.is_empty());
        assert_eq!(back.attribute_size, 0);
    }
}

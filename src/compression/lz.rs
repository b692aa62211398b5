//! LZ10 / LZ11 - the LZSS variants used by the DS BIOS and SDK.
//!
//! ## Header
//! ```text
//! [0x00] FormatTag        (u8)   0x10 = LZ10, 0x11 = LZ11
//! [0x01] DecompressedSize (u24 LE)
//! [0x04] ExtendedSize     (u32 LE) - LZ11 only, present when the u24 is 0
//! ```
//!
//! ## Body
//! Groups of eight symbols, each group prefixed by a flag byte read MSB
//! first. A clear bit is a literal byte; a set bit is a back-reference that
//! copies `length` bytes starting `displacement + 1` bytes behind the
//! current output position. The copy may overlap the bytes it produces.
//!
//! | Format | First nibble | Bytes | Length      | Displacement |
//! |--------|--------------|-------|-------------|--------------|
//! | LZ10   | any          | 2     | nibble + 3  | 12 bits      |
//! | LZ11   | 2..=15       | 2     | nibble + 1  | 12 bits      |
//! | LZ11   | 0            | 3     | 8 bits + 0x11  | 12 bits   |
//! | LZ11   | 1            | 4     | 16 bits + 0x111 | 12 bits  |

use tracing::trace;

use crate::{Error, Result};

/// Maximum back-reference distance.
pub const WINDOW_SIZE: usize = 0x1000;
/// Longest match an LZ10 token can describe.
pub const LZ10_MAX_MATCH: usize = 18;
/// Longest match an LZ11 token can describe.
pub const LZ11_MAX_MATCH: usize = 0xFFFF + 0x111;
/// Shortest match worth encoding.
const MIN_MATCH: usize = 3;

/// The two supported LZ variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LzFormat {
    Lz10 = 0x10,
    Lz11 = 0x11,
}

impl LzFormat {
    /// Map a format tag byte to a variant.
    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0x10 => Ok(Self::Lz10),
            0x11 => Ok(Self::Lz11),
            t => Err(Error::InvalidLzFormat(t)),
        }
    }

    /// Inspect the first little-endian word of a buffer.
    ///
    /// Returns the variant if its low byte is a known format tag.
    pub fn detect(header: u32) -> Option<Self> {
        Self::from_tag((header & 0xFF) as u8).ok()
    }

    fn max_match(self) -> usize {
        match self {
            Self::Lz10 => LZ10_MAX_MATCH,
            Self::Lz11 => LZ11_MAX_MATCH,
        }
    }
}

/// Parsed LZ header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LzHeader {
    pub format: LzFormat,
    /// Size of the decompressed output.
    pub size: usize,
    /// Header length in bytes (4 or 8).
    pub len: usize,
}

impl LzHeader {
    /// Parse the header at the start of `data`.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let word = data.get(..4).ok_or(Error::CorruptLzData)?;
        let word = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
        let format = LzFormat::from_tag((word & 0xFF) as u8)?;
        let size = (word >> 8) as usize;

        if size == 0 && format == LzFormat::Lz11 {
            let ext = data.get(4..8).ok_or(Error::CorruptLzData)?;
            let ext = u32::from_le_bytes([ext[0], ext[1], ext[2], ext[3]]);
            return Ok(Self {
                format,
                size: ext as usize,
                len: 8,
            });
        }

        Ok(Self {
            format,
            size,
            len: 4,
        })
    }
}

/// Output of [`decompress`].
#[derive(Debug)]
pub struct Decompressed {
    /// Decompressed bytes.
    pub data: Vec<u8>,
    /// Variant read from the header.
    pub format: LzFormat,
    /// Number of input bytes consumed, header included.
    pub consumed: usize,
}

/// Bounds-checked cursor over the compressed input.
struct Input<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Input<'_> {
    #[inline]
    fn next(&mut self) -> Result<usize> {
        let b = *self.data.get(self.pos).ok_or(Error::CorruptLzData)?;
        self.pos += 1;
        Ok(b as usize)
    }
}

/// Decompress an LZ10 or LZ11 buffer.
///
/// `data` may continue past the end of the compressed payload; the number of
/// bytes actually used is reported in [`Decompressed::consumed`].
pub fn decompress(data: &[u8]) -> Result<Decompressed> {
    let header = LzHeader::parse(data)?;
    let size = header.size;
    // The header size is untrusted; reserve no more than the input can yield
    // without long runs.
    let mut out = Vec::with_capacity(size.min(data.len().saturating_mul(9)));
    let mut input = Input {
        data,
        pos: header.len,
    };

    while out.len() < size {
        let flags = input.next()?;

        for bit in (0..8).rev() {
            if out.len() >= size {
                break;
            }

            if (flags >> bit) & 1 == 0 {
                out.push(input.next()? as u8);
                continue;
            }

            let b1 = input.next()?;
            let b2 = input.next()?;
            let (length, disp) = match header.format {
                LzFormat::Lz10 => ((b1 >> 4) + 3, ((b1 & 0xF) << 8) | b2),
                LzFormat::Lz11 => match b1 >> 4 {
                    0 => {
                        let b3 = input.next()?;
                        ((((b1 & 0xF) << 4) | (b2 >> 4)) + 0x11, ((b2 & 0xF) << 8) | b3)
                    }
                    1 => {
                        let b3 = input.next()?;
                        let b4 = input.next()?;
                        (
                            (((b1 & 0xF) << 12) | (b2 << 4) | (b3 >> 4)) + 0x111,
                            ((b3 & 0xF) << 8) | b4,
                        )
                    }
                    n => (n + 1, ((b1 & 0xF) << 8) | b2),
                },
            };

            let start = out
                .len()
                .checked_sub(disp + 1)
                .ok_or(Error::CorruptLzData)?;
            let length = length.min(size - out.len());
            // Byte-wise so overlapping references repeat freshly written output.
            for j in 0..length {
                let b = out[start + j];
                out.push(b);
            }
        }
    }

    trace!(
        format = ?header.format,
        compressed = input.pos,
        decompressed = out.len(),
        "lz decompress"
    );

    Ok(Decompressed {
        data: out,
        format: header.format,
        consumed: input.pos,
    })
}

/// Find the longest match for `data[pos..]` inside the preceding window.
///
/// Scans backwards so that, among equally long matches, the nearest wins.
/// Returns `(displacement, length)` where displacement is `distance - 1`.
fn longest_match(data: &[u8], pos: usize, max_len: usize) -> (usize, usize) {
    let max_len = max_len.min(data.len() - pos);
    let window_start = pos.saturating_sub(WINDOW_SIZE);
    let mut best = (0, 0);

    for start in (window_start..pos).rev() {
        let len = data[start..]
            .iter()
            .zip(&data[pos..pos + max_len])
            .take_while(|(a, b)| a == b)
            .count();
        if len > best.1 {
            best = (pos - start - 1, len);
            if len == max_len {
                break;
            }
        }
    }

    best
}

fn encode_match(out: &mut Vec<u8>, format: LzFormat, disp: usize, len: usize) {
    let disp_hi = (disp >> 8) as u8;
    let disp_lo = (disp & 0xFF) as u8;

    match format {
        LzFormat::Lz10 => {
            out.push((((len - 3) as u8) << 4) | disp_hi);
            out.push(disp_lo);
        }
        LzFormat::Lz11 if len <= 0x10 => {
            out.push((((len - 1) as u8) << 4) | disp_hi);
            out.push(disp_lo);
        }
        LzFormat::Lz11 if len <= 0x110 => {
            let l = len - 0x11;
            out.push((l >> 4) as u8);
            out.push((((l & 0xF) as u8) << 4) | disp_hi);
            out.push(disp_lo);
        }
        LzFormat::Lz11 => {
            let l = len - 0x111;
            out.push(0x10 | (l >> 12) as u8);
            out.push(((l >> 4) & 0xFF) as u8);
            out.push((((l & 0xF) as u8) << 4) | disp_hi);
            out.push(disp_lo);
        }
    }
}

/// Compress `data` with a greedy LZSS search.
///
/// Fails with [`Error::LzTooLarge`] when the size does not fit the header
/// (24 bits for LZ10, 32 bits for LZ11).
pub fn compress(data: &[u8], format: LzFormat) -> Result<Vec<u8>> {
    let size = data.len();
    let mut out = Vec::with_capacity(size + size / 8 + 8);

    match format {
        LzFormat::Lz10 => {
            if size > 0xFF_FFFF {
                return Err(Error::LzTooLarge(size));
            }
            out.extend_from_slice(&((size as u32) << 8 | format as u32).to_le_bytes());
        }
        LzFormat::Lz11 => {
            let size32 = u32::try_from(size).map_err(|_| Error::LzTooLarge(size))?;
            if size == 0 || size > 0xFF_FFFF {
                out.extend_from_slice(&(format as u32).to_le_bytes());
                out.extend_from_slice(&size32.to_le_bytes());
            } else {
                out.extend_from_slice(&(size32 << 8 | format as u32).to_le_bytes());
            }
        }
    }

    let max_len = format.max_match();
    let mut pos = 0;
    while pos < size {
        let flag_pos = out.len();
        out.push(0);
        let mut flags = 0u8;

        for bit in (0..8).rev() {
            if pos >= size {
                break;
            }

            let (disp, len) = longest_match(data, pos, max_len);
            if len >= MIN_MATCH {
                flags |= 1 << bit;
                encode_match(&mut out, format, disp, len);
                pos += len;
            } else {
                out.push(data[pos]);
                pos += 1;
            }
        }

        out[flag_pos] = flags;
    }

    trace!(?format, decompressed = size, compressed = out.len(), "lz compress");
    Ok(out)
}

//! Field-level helpers for the DS container codecs.
//!
//! Every DS header, table and block field is little-endian. A short read
//! surfaces as [`Error::UnexpectedEof`] through the `io::Error` conversion.

use std::io::{Read, Write};

use crate::{Error, Result};

/// Next byte of a header or name table.
#[inline]
pub(crate) fn u8<R: Read>(r: &mut R) -> Result<u8> {
    let mut b = [0u8; 1];
    r.read_exact(&mut b)?;
    Ok(b[0])
}

/// A `u16` field (IDs, counts, CRCs).
#[inline]
pub(crate) fn le_u16<R: Read>(r: &mut R) -> Result<u16> {
    let mut b = [0u8; 2];
    r.read_exact(&mut b)?;
    Ok(u16::from_le_bytes(b))
}

/// A `u32` field (offsets, sizes, addresses).
#[inline]
pub(crate) fn le_u32<R: Read>(r: &mut R) -> Result<u32> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b)?;
    Ok(u32::from_le_bytes(b))
}

/// A `u64` field; only the cartridge header has one.
#[inline]
pub(crate) fn le_u64<R: Read>(r: &mut R) -> Result<u64> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b)?;
    Ok(u64::from_le_bytes(b))
}

/// A fixed-width field such as a title, code or reserved run.
#[inline]
pub(crate) fn bytesa<const N: usize>(r: &mut impl Read) -> Result<[u8; N]> {
    let mut b = [0u8; N];
    r.read_exact(&mut b)?;
    Ok(b)
}

/// A variable-length payload whose size came from a table.
#[inline]
pub(crate) fn bytesv<R: Read>(r: &mut R, len: usize) -> Result<Vec<u8>> {
    let mut b = vec![0u8; len];
    r.read_exact(&mut b)?;
    Ok(b)
}

/// Consume a block tag such as `NARC` or `INF1`; anything else is
/// [`Error::BadMagic`].
#[inline]
pub(crate) fn magic<R: Read, const N: usize>(r: &mut R, expected: &[u8; N]) -> Result<()> {
    let got = bytesa::<N>(r)?;
    if &got != expected {
        return Err(Error::BadMagic);
    }
    Ok(())
}

/// Write one byte.
#[inline]
pub(crate) fn put_u8<W: Write>(w: &mut W, v: u8) -> Result<()> {
    w.write_all(&[v])?;
    Ok(())
}

/// Write a little-endian `u16`.
#[inline]
pub(crate) fn put_le_u16<W: Write>(w: &mut W, v: u16) -> Result<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

/// Write a little-endian `u32`.
#[inline]
pub(crate) fn put_le_u32<W: Write>(w: &mut W, v: u32) -> Result<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

/// Write a little-endian `u64`.
#[inline]
pub(crate) fn put_le_u64<W: Write>(w: &mut W, v: u64) -> Result<()> {
    w.write_all(&v.to_le_bytes())?;
    Ok(())
}

/// Round `value` up to the next multiple of `align`. An `align` of 0 or 1 is
/// a no-op.
#[inline]
pub(crate) fn align_up(value: u64, align: u64) -> u64 {
    if align <= 1 {
        return value;
    }
    value.div_ceil(align) * align
}

/// Narrow a stream offset to the 32-bit fields used by every DS header.
#[inline]
pub(crate) fn offset_u32(v: u64) -> Result<u32> {
    u32::try_from(v).map_err(|_| Error::InvalidRange)
}

/// Decode a fixed-width, optionally null-padded ASCII field.
///
/// These fields do not need a terminator when the text fills the whole
/// width, so the slice is cut at the first null (if any).
pub(crate) fn fixed_string(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

/// Encode `s` into a fixed-width field, truncating or null-padding.
pub(crate) fn set_fixed_string(buf: &mut [u8], s: &str) {
    buf.fill(0);
    let bytes = s.as_bytes();
    let n = bytes.len().min(buf.len());
    buf[..n].copy_from_slice(&bytes[..n]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn align_up_rounds_to_multiple() {
        assert_eq!(align_up(0, 0x200), 0);
        assert_eq!(align_up(1, 0x200), 0x200);
        assert_eq!(align_up(0x200, 0x200), 0x200);
        assert_eq!(align_up(0x201, 4), 0x204);
        assert_eq!(align_up(7, 0), 7);
    }

    #[test]
    fn fixed_string_without_terminator() {
        assert_eq!(fixed_string(b"POKEMONDIAMO"), "POKEMONDIAMO");
        assert_eq!(fixed_string(b"AB\0\0"), "AB");

        let mut field = [0xFFu8; 4];
        set_fixed_string(&mut field, "ADAE01");
        assert_eq!(&field, b"ADAE");
        set_fixed_string(&mut field, "01");
        assert_eq!(&field, b"01\0\0");
    }

    #[test]
    fn magic_mismatch() {
        let mut r = Cursor::new(b"NARC".to_vec());
        assert!(magic(&mut r, b"NARC").is_ok());
        let mut r = Cursor::new(b"CRAN".to_vec());
        assert!(matches!(magic(&mut r, b"NARC"), Err(Error::BadMagic)));
    }

    #[test]
    fn short_read_is_eof() {
        let mut r = Cursor::new(vec![1u8, 2, 3]);
        assert!(matches!(le_u32(&mut r), Err(Error::UnexpectedEof)));
    }
}

//! Library-wide error and result types.

use std::io;

use thiserror::Error;

#[cfg(feature = "interchange")]
use crate::formats::bmg::interchange::InterchangeError;
use crate::formats::bmg::tokens::EscapeError;
use crate::formats::bmg::Encoding;

/// Result of every twlkit codec and stream operation.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a filesystem path lookup failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotFoundKind {
    /// No entry with that name exists at that level.
    NoSuchEntry,
    /// The path resolved to a directory where a file was expected.
    NotAFile,
    /// A path component resolved to a file where a directory was expected.
    NotADirectory,
}

/// Failure of a stream, codec or filesystem operation.
///
/// Variants are grouped by the layer that raises them.
#[derive(Debug, Error)]
pub enum Error {
    /// A block or header tag (`NARC`, `BTAF`, `MESGbmg1`, ...) did not match.
    #[error("bad magic value")]
    BadMagic,
    /// A field or payload runs past the end of the data.
    #[error("unexpected end of data")]
    UnexpectedEof,
    /// A terminated string had no terminator within the scanned window.
    #[error("unterminated string")]
    UnterminatedString,
    /// A declared region lies outside the file or cannot be represented.
    #[error("invalid offset or size")]
    InvalidRange,
    /// A structural rule of the format was broken; the message names it.
    #[error("parse error: {0}")]
    Parse(&'static str),
    /// The OS file behind a stream failed.
    #[error("I/O error: {0}")]
    Io(#[source] io::Error),

    /// The stream was opened twice without being closed.
    #[error("stream is already open")]
    AlreadyOpen,
    /// The stream was used while closed.
    #[error("stream is not open")]
    NotOpen,
    /// A read was attempted on a write-only stream.
    #[error("stream is not readable")]
    ReadNotSupported,
    /// A write was attempted on a read-only stream.
    #[error("stream is not writable")]
    WriteNotSupported,

    /// The LZ header carried an unknown format tag.
    #[error("invalid LZ format tag: {0:#04x}")]
    InvalidLzFormat(u8),
    /// The input is too large to be described by the LZ header.
    #[error("data too large for LZ compression: {0} bytes")]
    LzTooLarge(usize),
    /// LZ data was truncated or referenced bytes before the output start.
    #[error("corrupt LZ data")]
    CorruptLzData,

    /// A filesystem path lookup failed.
    #[error("{path}: {kind:?}")]
    NotFound { path: String, kind: NotFoundKind },
    /// No file with that ID exists in the filesystem.
    #[error("no file with ID {0}")]
    FileIdNotFound(u16),

    /// Cartridge header unit code is not NDS, NDS+NDSi or NDSi.
    #[error("invalid unit code: {0:#04x}")]
    InvalidUnitCode(u8),
    /// The cartridge logo CRC16 does not match the stored checksum.
    #[error("logo CRC mismatch: stored {stored:#06x}, computed {computed:#06x}")]
    LogoCrcMismatch { stored: u16, computed: u16 },
    /// An overlay table entry does not name an external filesystem file.
    #[error("overlay references unknown file ID {0}")]
    InvalidOverlayFileId(u32),

    /// The message table encoding byte is not a known encoding.
    #[error("invalid message encoding: {0}")]
    InvalidEncoding(u8),
    /// The message table encoding is known but has no codec.
    #[error("unsupported message encoding: {0:?}")]
    UnsupportedEncoding(Encoding),
    /// The message table declares fewer than two sections.
    #[error("unexpected section count: {0}")]
    InvalidSectionCount(u32),
    /// A message's attribute bytes differ in length from the table's width.
    #[error("attribute size mismatch: expected {expected}, found {found}")]
    AttributeSizeMismatch { expected: usize, found: usize },
    /// Some messages carry an ID and others do not.
    #[error("message ID presence differs from the table")]
    MessageIdMismatch,
    /// Message text could not be decoded or encoded.
    #[error("invalid message text")]
    InvalidMessageText,
    /// An escape payload does not fit the one-byte length field.
    #[error("escape too long: {0} bytes")]
    EscapeTooLong(usize),
    /// An escape sequence is malformed.
    #[error("escape error: {0}")]
    Escape(#[from] EscapeError),
    /// The JSON interchange document is invalid.
    #[cfg(feature = "interchange")]
    #[error("interchange error: {0}")]
    Interchange(#[from] InterchangeError),
}

impl From<io::Error> for Error {
    /// Unwraps crate errors that travelled through a [`crate::fs::Stream`]'s
    /// `std::io` impls; anything else becomes [`Error::Io`].
    fn from(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            return Error::UnexpectedEof;
        }
        match e.downcast::<Error>() {
            Ok(inner) => inner,
            Err(e) => Error::Io(e),
        }
    }
}

impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(inner) => inner,
            other => io::Error::other(other),
        }
    }
}

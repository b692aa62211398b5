//! **twlkit** - a Rust library for reading and writing Nintendo DS(i) formats.
//!
//! # Supported formats
//! | Module | Format |
//! |--------|--------|
//! | [`formats::rom`]     | NDS / DSi cartridge image |
//! | [`formats::narc`]    | NARC - Nitro ARChive |
//! | [`formats::utility`] | `utility.bin` NitroFS container |
//! | [`formats::bmg`]     | BMG - message table (plus brace text, XML and JSON dialects) |
//! | [`compression::lz`]  | LZ10 / LZ11 |
//!
//! # Example
//! ```
//! use twlkit::formats::narc::Narc;
//! use twlkit::formats::nitrofs::{NitroFile, NitroFs};
//! use twlkit::fs::{Compression, FileFormat, Stream};
//!
//! let mut fs = NitroFs::default();
//! fs.root.files.push(NitroFile::new("hello.txt", b"hi".to_vec()));
//! let mut narc = Narc::new(fs);
//!
//! let mut out = Stream::memory();
//! out.open_write(Compression::None)?;
//! narc.write_to(&mut out)?;
//! out.close()?;
//!
//! let mut input = Stream::from_bytes(out.into_bytes());
//! input.open_read()?;
//! let back = Narc::parse(&mut input)?;
//! assert_eq!(back.fs.find_file_by_path("hello.txt")?.data, b"hi");
//! # Ok::<(), twlkit::Error>(())
//! ```

pub mod compression;
pub mod crc;
pub mod error;
pub mod formats;
pub mod fs;
pub(crate) mod utils;

pub use error::{Error, Result};

//! Codecs for DS cartridge, archive and message formats.
//!
//! Each submodule targets one format. All codecs follow the same conventions:
//!
//! * **Stream based** - every codec implements [`crate::fs::FileFormat`] and
//!   reads from / writes to a [`crate::fs::Stream`], so a file on disk and a
//!   buffer in memory are handled identically.
//! * **Validate, then read** - `read_validate` checks magic values, checksums
//!   and section bounds before `read_all` builds the data model.
//! * **Writers recompute** - sizes, offsets, alignment padding and checksums
//!   are derived from the data model on write; stored values are never
//!   trusted.
//! * **Compression is transparent** - LZ10/LZ11-compressed inputs are
//!   detected when the stream is opened; codecs only ever see plain bytes.
//!
//! ## Format overview
//!
//! | Module       | Format        | Description |
//! |--------------|---------------|-------------|
//! | [`rom`]      | NDS / DSi ROM | Cartridge image: header, banner, ARM9/ARM7 code, overlays, NitroFS |
//! | [`narc`]     | NARC          | Generic archive: `BTAF`/`BTNF`/`GMIF` blocks around a NitroFS |
//! | [`utility`]  | utility.bin   | Bare NitroFS behind a four-field header |
//! | [`bmg`]      | BMG           | Message table with escape sequences and optional message IDs |
//! | [`nitrofs`]  | NitroFS       | The FNT/FAT virtual filesystem shared by the containers above |

pub mod bmg;
pub mod narc;
pub mod nitrofs;
pub mod rom;
pub mod utility;

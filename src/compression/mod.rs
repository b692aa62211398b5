//! Compression codecs.
//!
//! Only the two LZSS variants found in DS content are provided. Both work on
//! whole in-memory buffers; [`crate::fs::Stream`] applies them transparently
//! when a compressed file is opened.
//!
//! | Module | Algorithm | Typical use |
//! |--------|-----------|-------------|
//! | [`lz`] | LZ10 / LZ11 | Compressed overlays, NARC members, BMG files |

pub mod lz;

pub use lz::{LzFormat, compress, decompress};

//! The contract shared by every container codec.

use super::{Backend, Stream};
use crate::Result;

/// A binary format that can be parsed from and serialized to a [`Stream`].
///
/// Implementors read from the stream's current offset. `read_validate`
/// consumes the fixed header and rejects foreign data early; `read_all`
/// continues from wherever `read_validate` left the cursor.
pub trait FileFormat {
    /// Read and check the header. On success the cursor is positioned for
    /// [`FileFormat::read_all`].
    fn read_validate<B: Backend>(&mut self, s: &mut Stream<B>) -> Result<()>;

    /// Read the remaining structure.
    fn read_all<B: Backend>(&mut self, s: &mut Stream<B>) -> Result<()>;

    /// Serialize to an open write stream.
    fn write_to<B: Backend>(&mut self, s: &mut Stream<B>) -> Result<()>;

    /// Validate, then read everything.
    fn read_from<B: Backend>(&mut self, s: &mut Stream<B>) -> Result<()> {
        self.read_validate(s)?;
        self.read_all(s)
    }

    /// Parse a fresh value from an open read stream.
    fn parse<B: Backend>(s: &mut Stream<B>) -> Result<Self>
    where
        Self: Default,
    {
        let mut v = Self::default();
        v.read_from(s)?;
        Ok(v)
    }
}

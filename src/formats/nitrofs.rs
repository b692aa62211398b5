//! NitroFS - the directory tree filesystem embedded in DS containers.
//!
//! Shared by the cartridge image ([`crate::formats::rom`]), the generic
//! archive ([`crate::formats::narc`]) and the utility container
//! ([`crate::formats::utility`]). Each container stores the three regions
//! below at offsets of its own choosing.
//!
//! ## Layout
//! ```text
//! FNT  DirectoryEntry × dir_count      (8 bytes each, indexed by dir_id & 0xFFF)
//!      name entries, one run per directory, each run terminated by 0x00
//! FAT  AllocationEntry × file_count    (8 bytes each, indexed by file ID)
//! data file contents, addressed by [start, end) ranges from the FAT
//! ```
//!
//! ## Directory entry (8 bytes)
//! ```text
//! [0x00] Start          (u32) - offset of the name run, relative to the FNT
//! [0x04] FirstFileId    (u16) - ID of the first file in this directory
//! [0x06] ParentId       (u16) - parent directory ID; total directory count for the root
//! ```
//!
//! ## Name entry
//! ```text
//! len < 0x80   file:      len, name[len]
//! len >= 0x80  directory: len, name[len - 0x80], dir_id (u16)
//! len == 0     end of run
//! ```
//!
//! File IDs are contiguous. "External" files (overlays in a cartridge image)
//! have no name entry and occupy the lowest IDs; tree files follow in
//! depth-first order, files before subdirectories. Directory IDs start at
//! [`ROOT_DIRECTORY_ID`].

use std::collections::HashSet;
use std::io::{Read, Seek, SeekFrom, Write};

use tracing::debug;

use crate::error::NotFoundKind;
use crate::fs::{MemoryBuffer, Stream};
use crate::utils::{align_up, bytesv, fixed_string, le_u16, le_u32, offset_u32, put_le_u16, put_le_u32, u8};
use crate::{Error, Result};

/// ID of the root directory. Subdirectories count up from here.
pub const ROOT_DIRECTORY_ID: u16 = 0xF000;

/// Name-entry length values at or above this mark a subdirectory.
pub const MAX_ENTRY_NAME_LENGTH: u8 = 0x80;

/// Maximum number of directories (the FNT index is 12 bits wide).
const MAX_DIRECTORIES: usize = 0x1000;

/// A file with owned content.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NitroFile {
    pub name: String,
    /// Assigned on read and reassigned by [`NitroFs::write`].
    pub id: u16,
    pub data: Vec<u8>,
}

impl NitroFile {
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            id: 0,
            data,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Open a copy of the content as a read stream, decompressing it if it
    /// carries an LZ header.
    pub fn open_stream(&self) -> Result<Stream<MemoryBuffer>> {
        let mut s = Stream::from_bytes(self.data.clone());
        s.open_read()?;
        Ok(s)
    }
}

/// A directory. Child order is preserved on write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NitroDirectory {
    pub name: String,
    pub files: Vec<NitroFile>,
    pub dirs: Vec<NitroDirectory>,
}

impl NitroDirectory {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn file(&self, name: &str) -> Option<&NitroFile> {
        self.files.iter().find(|f| f.name == name)
    }

    pub fn dir(&self, name: &str) -> Option<&NitroDirectory> {
        self.dirs.iter().find(|d| d.name == name)
    }

    fn dir_mut(&mut self, name: &str) -> Option<&mut NitroDirectory> {
        self.dirs.iter_mut().find(|d| d.name == name)
    }

    fn contains(&self, name: &str) -> bool {
        self.file(name).is_some() || self.dir(name).is_some()
    }

    /// Number of files in this directory and all of its descendants.
    pub fn file_count(&self) -> usize {
        self.files.len() + self.dirs.iter().map(|d| d.file_count()).sum::<usize>()
    }

    fn find_id(&self, id: u16) -> Option<&NitroFile> {
        self.files
            .iter()
            .find(|f| f.id == id)
            .or_else(|| self.dirs.iter().find_map(|d| d.find_id(id)))
    }

    fn find_id_mut(&mut self, id: u16) -> Option<&mut NitroFile> {
        self.files
            .iter_mut()
            .find(|f| f.id == id)
            .or_else(|| self.dirs.iter_mut().find_map(|d| d.find_id_mut(id)))
    }
}

/// FNT directory record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub start: u32,
    pub first_file_id: u16,
    pub parent_id: u16,
}

impl DirectoryEntry {
    pub const SIZE: u64 = 8;

    fn read<R: Read>(r: &mut R) -> Result<Self> {
        Ok(Self {
            start: le_u32(r)?,
            first_file_id: le_u16(r)?,
            parent_id: le_u16(r)?,
        })
    }

    fn write<W: Write>(&self, w: &mut W, start_base: u32) -> Result<()> {
        let start = self.start.checked_add(start_base).ok_or(Error::InvalidRange)?;
        put_le_u32(w, start)?;
        put_le_u16(w, self.first_file_id)?;
        put_le_u16(w, self.parent_id)
    }
}

/// FAT record: a `[start, end)` byte range.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AllocationEntry {
    pub start: u32,
    pub end: u32,
}

impl AllocationEntry {
    pub const SIZE: u64 = 8;

    pub(crate) fn read<R: Read>(r: &mut R) -> Result<Self> {
        let start = le_u32(r)?;
        let end = le_u32(r)?;
        if end < start {
            return Err(Error::InvalidRange);
        }
        Ok(Self { start, end })
    }

    pub fn len(&self) -> u32 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Tables and file data produced by [`NitroFs::write`].
///
/// FNT starts are relative to the name-entry data and FAT ranges are
/// relative to `file_data`; the `write_*` helpers relocate them.
#[derive(Debug, Default)]
pub struct GeneratedTables {
    pub fnt_entries: Vec<DirectoryEntry>,
    pub fnt_data: Vec<u8>,
    pub fat: Vec<AllocationEntry>,
    pub file_data: Vec<u8>,
}

impl GeneratedTables {
    pub fn fnt_size(&self) -> u64 {
        self.fnt_entries.len() as u64 * DirectoryEntry::SIZE + self.fnt_data.len() as u64
    }

    pub fn fat_size(&self) -> u64 {
        self.fat.len() as u64 * AllocationEntry::SIZE
    }

    /// Write the directory entries followed by the name entries, shifting
    /// each entry's start past the entry array.
    pub fn write_fnt<W: Write>(&self, w: &mut W) -> Result<()> {
        let base = offset_u32(self.fnt_entries.len() as u64 * DirectoryEntry::SIZE)?;
        for entry in &self.fnt_entries {
            entry.write(w, base)?;
        }
        w.write_all(&self.fnt_data)?;
        Ok(())
    }

    /// Write the allocation table with every range shifted by `base`.
    pub fn write_fat<W: Write>(&self, w: &mut W, base: u32) -> Result<()> {
        for entry in &self.fat {
            let start = entry.start.checked_add(base).ok_or(Error::InvalidRange)?;
            let end = entry.end.checked_add(base).ok_or(Error::InvalidRange)?;
            put_le_u32(w, start)?;
            put_le_u32(w, end)?;
        }
        Ok(())
    }
}

/// A parsed filesystem: the named tree plus the external files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NitroFs {
    pub root: NitroDirectory,
    /// Files outside the tree, addressed only by ID (`0..ext_files.len()`).
    pub ext_files: Vec<NitroFile>,
}

struct TreeReader<'a, R> {
    r: &'a mut R,
    file_data_offset: u64,
    fat_offset: u64,
    fnt_offset: u64,
    stream_size: u64,
    min_tree_file_id: u16,
    visited: HashSet<u16>,
}

impl<R: Read + Seek> TreeReader<'_, R> {
    fn read_file(&mut self, name: String, id: u16) -> Result<NitroFile> {
        self.r
            .seek(SeekFrom::Start(self.fat_offset + id as u64 * AllocationEntry::SIZE))?;
        let entry = AllocationEntry::read(self.r)?;
        if self.file_data_offset + entry.end as u64 > self.stream_size {
            return Err(Error::UnexpectedEof);
        }
        self.r
            .seek(SeekFrom::Start(self.file_data_offset + entry.start as u64))?;
        let data = bytesv(self.r, entry.len() as usize)?;
        Ok(NitroFile { name, id, data })
    }

    fn read_dir(&mut self, name: String, dir_id: u16) -> Result<NitroDirectory> {
        if !self.visited.insert(dir_id) {
            return Err(Error::Parse("directory cycle in NitroFS name table"));
        }

        let idx = (dir_id & 0xFFF) as u64;
        self.r
            .seek(SeekFrom::Start(self.fnt_offset + idx * DirectoryEntry::SIZE))?;
        let entry = DirectoryEntry::read(self.r)?;

        // IDs only increase within a directory, so the first one is the minimum.
        self.min_tree_file_id = self.min_tree_file_id.min(entry.first_file_id);

        let mut dir = NitroDirectory::new(name);
        let mut file_id = entry.first_file_id;
        let mut pos = self.fnt_offset + entry.start as u64;
        loop {
            self.r.seek(SeekFrom::Start(pos))?;
            let len = u8(self.r)?;
            pos += 1;
            match len {
                0 => break,
                len if len < MAX_ENTRY_NAME_LENGTH => {
                    let name = fixed_string(&bytesv(self.r, len as usize)?);
                    pos += len as u64;
                    dir.files.push(self.read_file(name, file_id)?);
                    file_id = file_id
                        .checked_add(1)
                        .ok_or(Error::Parse("NitroFS file ID overflow"))?;
                }
                len => {
                    let name_len = (len - MAX_ENTRY_NAME_LENGTH) as usize;
                    let name = fixed_string(&bytesv(self.r, name_len)?);
                    let sub_id = le_u16(self.r)?;
                    pos += name_len as u64 + 2;
                    dir.dirs.push(self.read_dir(name, sub_id)?);
                }
            }
        }
        Ok(dir)
    }
}

struct TreeWriter {
    tables: GeneratedTables,
    file_align: u64,
    dir_count: u16,
}

impl TreeWriter {
    fn write_file(&mut self, file: &mut NitroFile) -> Result<()> {
        file.id = u16::try_from(self.tables.fat.len())
            .map_err(|_| Error::Parse("too many NitroFS files"))?;

        let data = &mut self.tables.file_data;
        let start = offset_u32(data.len() as u64)?;
        data.extend_from_slice(&file.data);
        let end = offset_u32(data.len() as u64)?;
        self.tables.fat.push(AllocationEntry { start, end });

        let padded = align_up(data.len() as u64, self.file_align) as usize;
        data.resize(padded, 0);
        Ok(())
    }

    fn push_name(&mut self, name: &str, len_base: u8) -> Result<()> {
        let len = name.len();
        if len == 0 || len >= MAX_ENTRY_NAME_LENGTH as usize {
            return Err(Error::Parse("invalid NitroFS entry name length"));
        }
        self.tables.fnt_data.push(len_base + len as u8);
        self.tables.fnt_data.extend_from_slice(name.as_bytes());
        Ok(())
    }

    fn write_dir(&mut self, dir: &mut NitroDirectory, dir_id: u16, parent_id: u16) -> Result<()> {
        self.dir_count += 1;

        let idx = (dir_id - ROOT_DIRECTORY_ID) as usize;
        self.tables.fnt_entries[idx] = DirectoryEntry {
            start: offset_u32(self.tables.fnt_data.len() as u64)?,
            first_file_id: u16::try_from(self.tables.fat.len())
                .map_err(|_| Error::Parse("too many NitroFS files"))?,
            parent_id,
        };

        for file in &mut dir.files {
            self.write_file(file)?;
            self.push_name(&file.name, 0)?;
        }

        // Names first; subdirectory IDs are backpatched once allocated.
        let mut slots = Vec::with_capacity(dir.dirs.len());
        for sub in &dir.dirs {
            self.push_name(&sub.name, MAX_ENTRY_NAME_LENGTH)?;
            slots.push(self.tables.fnt_data.len());
            self.tables.fnt_data.extend_from_slice(&[0, 0]);
        }

        let mut sub_ids = Vec::with_capacity(slots.len());
        for slot in slots {
            if self.tables.fnt_entries.len() >= MAX_DIRECTORIES {
                return Err(Error::Parse("too many NitroFS directories"));
            }
            let sub_id = ROOT_DIRECTORY_ID + self.tables.fnt_entries.len() as u16;
            self.tables.fnt_entries.push(DirectoryEntry::default());
            self.tables.fnt_data[slot..slot + 2].copy_from_slice(&sub_id.to_le_bytes());
            sub_ids.push(sub_id);
        }
        self.tables.fnt_data.push(0);

        for (sub, sub_id) in dir.dirs.iter_mut().zip(sub_ids) {
            self.write_dir(sub, sub_id, dir_id)?;
        }
        Ok(())
    }
}

fn split_path(path: &str) -> Vec<&str> {
    path.split('/').filter(|c| !c.is_empty()).collect()
}

fn not_found(path: &str, kind: NotFoundKind) -> Error {
    Error::NotFound {
        path: path.to_string(),
        kind,
    }
}

impl NitroFs {
    /// Parse the filesystem whose regions start at the given absolute offsets.
    pub fn read<R: Read + Seek>(
        r: &mut R,
        file_data_offset: u64,
        fat_offset: u64,
        fnt_offset: u64,
    ) -> Result<Self> {
        let stream_size = r.seek(SeekFrom::End(0))?;
        let mut tree = TreeReader {
            r,
            file_data_offset,
            fat_offset,
            fnt_offset,
            stream_size,
            min_tree_file_id: u16::MAX,
            visited: HashSet::new(),
        };
        let root = tree.read_dir(String::new(), ROOT_DIRECTORY_ID)?;

        let ext_count = tree.min_tree_file_id;
        let mut ext_files = Vec::with_capacity(ext_count as usize);
        for id in 0..ext_count {
            ext_files.push(tree.read_file(String::new(), id)?);
        }

        debug!(
            ext_files = ext_files.len(),
            tree_files = root.file_count(),
            directories = tree.visited.len(),
            "read NitroFS"
        );
        Ok(Self { root, ext_files })
    }

    /// Flatten the filesystem into tables, reassigning every file ID.
    ///
    /// External files take IDs `0..ext_files.len()`; tree files follow in
    /// traversal order. Each file's content is zero-padded to `file_align`.
    pub fn write(&mut self, file_align: u64) -> Result<GeneratedTables> {
        let mut w = TreeWriter {
            tables: GeneratedTables::default(),
            file_align,
            dir_count: 0,
        };

        for file in &mut self.ext_files {
            w.write_file(file)?;
        }

        w.tables.fnt_entries.push(DirectoryEntry::default());
        w.write_dir(&mut self.root, ROOT_DIRECTORY_ID, 0)?;
        // The root's parent slot holds the directory count.
        w.tables.fnt_entries[0].parent_id = w.dir_count;

        debug!(
            files = w.tables.fat.len(),
            directories = w.dir_count,
            file_data = w.tables.file_data.len(),
            "wrote NitroFS"
        );
        Ok(w.tables)
    }

    pub fn file_count(&self) -> usize {
        self.ext_files.len() + self.root.file_count()
    }

    /// Find a file by ID, searching the external files first.
    pub fn find_file_by_id(&self, id: u16) -> Result<&NitroFile> {
        self.ext_files
            .iter()
            .find(|f| f.id == id)
            .or_else(|| self.root.find_id(id))
            .ok_or(Error::FileIdNotFound(id))
    }

    pub fn find_file_by_id_mut(&mut self, id: u16) -> Result<&mut NitroFile> {
        self.ext_files
            .iter_mut()
            .find(|f| f.id == id)
            .or_else(|| self.root.find_id_mut(id))
            .ok_or(Error::FileIdNotFound(id))
    }

    /// Find a directory by `/`-separated path. The empty path is the root.
    pub fn find_directory(&self, path: &str) -> Result<&NitroDirectory> {
        let mut dir = &self.root;
        for comp in split_path(path) {
            dir = match dir.dir(comp) {
                Some(d) => d,
                None if dir.file(comp).is_some() => {
                    return Err(not_found(path, NotFoundKind::NotADirectory));
                }
                None => return Err(not_found(path, NotFoundKind::NoSuchEntry)),
            };
        }
        Ok(dir)
    }

    pub fn find_directory_mut(&mut self, path: &str) -> Result<&mut NitroDirectory> {
        let mut dir = &mut self.root;
        for comp in split_path(path) {
            if dir.dir(comp).is_none() {
                let kind = if dir.file(comp).is_some() {
                    NotFoundKind::NotADirectory
                } else {
                    NotFoundKind::NoSuchEntry
                };
                return Err(not_found(path, kind));
            }
            dir = dir
                .dir_mut(comp)
                .ok_or_else(|| not_found(path, NotFoundKind::NoSuchEntry))?;
        }
        Ok(dir)
    }

    /// Split `path` into its parent directory and leaf name.
    fn split_leaf(path: &str) -> Result<(String, &str)> {
        let mut comps = split_path(path);
        let leaf = comps
            .pop()
            .ok_or_else(|| not_found(path, NotFoundKind::NotAFile))?;
        Ok((comps.join("/"), leaf))
    }

    fn leaf_error(dir: &NitroDirectory, leaf: &str, path: &str) -> Error {
        if dir.dir(leaf).is_some() {
            not_found(path, NotFoundKind::NotAFile)
        } else {
            not_found(path, NotFoundKind::NoSuchEntry)
        }
    }

    /// Find a file by `/`-separated path. Leading and repeated slashes are
    /// ignored.
    pub fn find_file_by_path(&self, path: &str) -> Result<&NitroFile> {
        let (parent, leaf) = Self::split_leaf(path)?;
        let dir = self.find_directory(&parent).map_err(|e| with_path(e, path))?;
        dir.file(leaf).ok_or_else(|| Self::leaf_error(dir, leaf, path))
    }

    pub fn find_file_by_path_mut(&mut self, path: &str) -> Result<&mut NitroFile> {
        let (parent, leaf) = Self::split_leaf(path)?;
        let dir = self
            .find_directory_mut(&parent)
            .map_err(|e| with_path(e, path))?;
        if dir.file(leaf).is_none() {
            return Err(Self::leaf_error(dir, leaf, path));
        }
        dir.files
            .iter_mut()
            .find(|f| f.name == leaf)
            .ok_or_else(|| not_found(path, NotFoundKind::NoSuchEntry))
    }

    /// Append a file to the directory at `dir_path`. Its ID is assigned on
    /// the next [`NitroFs::write`].
    pub fn add_file(&mut self, dir_path: &str, file: NitroFile) -> Result<()> {
        let dir = self.find_directory_mut(dir_path)?;
        if dir.contains(&file.name) {
            return Err(Error::Parse("NitroFS entry already exists"));
        }
        dir.files.push(file);
        Ok(())
    }

    /// Append an empty subdirectory to the directory at `parent_path`.
    pub fn add_directory(&mut self, parent_path: &str, name: &str) -> Result<&mut NitroDirectory> {
        let parent = self.find_directory_mut(parent_path)?;
        if parent.contains(name) {
            return Err(Error::Parse("NitroFS entry already exists"));
        }
        let idx = parent.dirs.len();
        parent.dirs.push(NitroDirectory::new(name));
        Ok(&mut parent.dirs[idx])
    }
}

/// Report a parent-directory failure against the full path.
fn with_path(e: Error, path: &str) -> Error {
    match e {
        Error::NotFound { kind, .. } => not_found(path, kind),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compression::{LzFormat, compress};
    use std::io::Cursor;

    /// Lay the tables out as `[FNT][FAT][data]` and parse them back.
    fn reparse(fs: &mut NitroFs, align: u64) -> NitroFs {
        let tables = fs.write(align).unwrap();
        let mut buf = Vec::new();
        tables.write_fnt(&mut buf).unwrap();
        let fat_offset = buf.len() as u64;
        tables.write_fat(&mut buf, 0).unwrap();
        let data_offset = buf.len() as u64;
        buf.extend_from_slice(&tables.file_data);
        NitroFs::read(&mut Cursor::new(buf), data_offset, fat_offset, 0).unwrap()
    }

    #[test]
    fn fat_range_past_end_of_stream() {
        let mut fs = sample();
        let tables = fs.write(4).unwrap();
        let mut buf = Vec::new();
        tables.write_fnt(&mut buf).unwrap();
        let fat_offset = buf.len();
        tables.write_fat(&mut buf, 0).unwrap();
        let data_offset = buf.len() as u64;
        buf.extend_from_slice(&tables.file_data);

        buf[fat_offset..fat_offset + 4].copy_from_slice(&0x10_0000u32.to_le_bytes());
        buf[fat_offset + 4..fat_offset + 8].copy_from_slice(&0x10_0004u32.to_le_bytes());
        let result = NitroFs::read(&mut Cursor::new(buf), data_offset, fat_offset as u64, 0);
        assert!(matches!(result, Err(Error::UnexpectedEof)));
    }

    fn sample() -> NitroFs {
        let mut fs = NitroFs::default();
        fs.ext_files.push(NitroFile::new("", vec![0xAA; 5]));
        fs.ext_files.push(NitroFile::new("", vec![0xBB; 3]));
        fs.root.files.push(NitroFile::new("root.bin", b"root".to_vec()));
        let mut msg = NitroDirectory::new("msg");
        msg.files.push(NitroFile::new("0001.bmg", b"MESG".to_vec()));
        let mut nested = NitroDirectory::new("nested");
        nested.files.push(NitroFile::new("deep.bin", vec![1, 2, 3]));
        msg.dirs.push(nested);
        fs.root.dirs.push(msg);
        fs.root.dirs.push(NitroDirectory::new("empty"));
        fs
    }

    #[test]
    fn roundtrip_preserves_tree_and_ids() {
        let mut fs = sample();
        let back = reparse(&mut fs, 4);
        assert_eq!(back, fs);

        let ids: Vec<u16> = back.ext_files.iter().map(|f| f.id).collect();
        assert_eq!(ids, [0, 1]);
        assert_eq!(back.find_file_by_path("root.bin").unwrap().id, 2);
        assert_eq!(back.find_file_by_path("msg/0001.bmg").unwrap().id, 3);
        assert_eq!(back.find_file_by_path("/msg//nested/deep.bin").unwrap().id, 4);
    }

    #[test]
    fn sibling_order_and_root_parent_slot() {
        let mut fs = NitroFs::default();
        for (dir, file) in [("a", "x.bin"), ("b", "y.bin")] {
            let mut d = NitroDirectory::new(dir);
            d.files.push(NitroFile::new(file, vec![0]));
            fs.root.dirs.push(d);
        }
        let t = fs.write(1).unwrap();

        let mut expected = vec![0x81, b'a', 0x01, 0xF0, 0x81, b'b', 0x02, 0xF0, 0x00];
        expected.extend_from_slice(b"\x05x.bin\x00\x05y.bin\x00");
        assert_eq!(t.fnt_data, expected);
        assert_eq!(
            t.fnt_entries,
            [
                DirectoryEntry { start: 0, first_file_id: 0, parent_id: 3 },
                DirectoryEntry { start: 9, first_file_id: 0, parent_id: 0xF000 },
                DirectoryEntry { start: 16, first_file_id: 1, parent_id: 0xF000 },
            ]
        );

        let mut fnt = Vec::new();
        t.write_fnt(&mut fnt).unwrap();
        assert_eq!(&fnt[..4], &24u32.to_le_bytes());
    }

    #[test]
    fn file_data_is_padded() {
        let mut fs = sample();
        let t = fs.write(0x200).unwrap();
        let starts: Vec<u32> = t.fat.iter().map(|e| e.start).collect();
        assert_eq!(starts, [0, 0x200, 0x400, 0x600, 0x800]);
        assert_eq!(t.fat[0].end, 5);
        assert_eq!(t.file_data.len(), 0xA00);

        let mut fat = Vec::new();
        t.write_fat(&mut fat, 0x4000).unwrap();
        assert_eq!(&fat[8..16], &[0x00, 0x42, 0, 0, 0x03, 0x42, 0, 0]);
    }

    #[test]
    fn write_reassigns_ids_after_edits() {
        let mut fs = sample();
        fs.add_file("", NitroFile::new("added.bin", vec![9])).unwrap();
        fs.add_directory("msg", "more").unwrap();
        fs.add_file("msg/more", NitroFile::new("z", vec![])).unwrap();
        let back = reparse(&mut fs, 4);

        assert_eq!(back.find_file_by_path("added.bin").unwrap().id, 3);
        assert_eq!(back.find_file_by_path("msg/more/z").unwrap().id, 6);
        assert!(back.find_file_by_path("msg/more/z").unwrap().data.is_empty());
        assert_eq!(back.file_count(), 7);
    }

    #[test]
    fn lookup_errors() {
        let mut fs = sample();
        fs.write(4).unwrap();

        let kind = |r: Result<&NitroFile>| match r {
            Err(Error::NotFound { kind, .. }) => Some(kind),
            _ => None,
        };
        assert_eq!(kind(fs.find_file_by_path("msg")), Some(NotFoundKind::NotAFile));
        assert_eq!(kind(fs.find_file_by_path("root.bin/x")), Some(NotFoundKind::NotADirectory));
        assert_eq!(kind(fs.find_file_by_path("msg/none.bin")), Some(NotFoundKind::NoSuchEntry));
        assert_eq!(kind(fs.find_file_by_path("")), Some(NotFoundKind::NotAFile));
        assert!(matches!(fs.find_file_by_id(99), Err(Error::FileIdNotFound(99))));
        assert!(matches!(
            fs.add_file("msg", NitroFile::new("nested", vec![])),
            Err(Error::Parse(_))
        ));

        assert_eq!(fs.find_file_by_id(1).unwrap().data, [0xBB; 3]);
        fs.find_file_by_id_mut(4).unwrap().data.push(4);
        assert_eq!(fs.find_file_by_path("msg/nested/deep.bin").unwrap().data, [1, 2, 3, 4]);
        fs.find_file_by_path_mut("root.bin").unwrap().data.clear();
        assert!(fs.find_file_by_id(2).unwrap().data.is_empty());
        assert_eq!(fs.find_directory("/msg/").unwrap().dirs.len(), 1);
    }

    #[test]
    fn invalid_names_rejected() {
        let mut fs = NitroFs::default();
        fs.root.files.push(NitroFile::new("", vec![]));
        assert!(matches!(fs.write(4), Err(Error::Parse(_))));

        let mut fs = NitroFs::default();
        fs.root.dirs.push(NitroDirectory::new("x".repeat(0x80)));
        assert!(matches!(fs.write(4), Err(Error::Parse(_))));
    }

    #[test]
    fn directory_cycle_is_rejected() {
        // Root holds one subdirectory entry that points back at the root.
        let mut buf = Vec::new();
        buf.extend_from_slice(&8u32.to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.extend_from_slice(&[0x81, b'a', 0x00, 0xF0, 0x00]);
        assert!(matches!(
            NitroFs::read(&mut Cursor::new(buf), 0, 0, 0),
            Err(Error::Parse(_))
        ));
    }

    #[test]
    fn open_stream_decompresses_copy() {
        let plain = b"compressed file content ".repeat(8);
        let file = NitroFile::new("a.lz", compress(&plain, LzFormat::Lz10).unwrap());
        let mut s = file.open_stream().unwrap();
        assert!(s.is_compressed());
        assert_eq!(s.read_bytes(plain.len()).unwrap(), plain);
        assert_ne!(file.data, plain);
    }
}

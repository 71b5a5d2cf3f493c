//! Directory records.
//!
//! A directory block is a sequence of variable-length records:
//!
//! ```text
//! +-------+---------+----------+------+-----------------+
//! | inode | rec_len | name_len | type | name ...        |
//! |  u32  |   u16   |    u8    |  u8  | name_len bytes  |
//! +-------+---------+----------+------+-----------------+
//! ```
//!
//! `rec_len` is the byte distance to the next record; the last record of a
//! block extends to the end of the block. Records may straddle the sector
//! boundary in the middle of a block.
use crate::{
    Error,
    disk::{SectorReader, read_span},
    layout::{BLOCK_SIZE, RESERVED_ENTRIES, block_offset},
};
use arrayvec::ArrayVec;

/// Size of the fixed part of a directory record.
pub const DIR_ENTRY_HEADER: usize = 8;
/// Longest name a record can hold.
pub const MAX_NAME_LEN: usize = 255;

/// A decoded directory record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    /// Metadata record the entry points to.
    pub inode: u32,
    /// Distance to the next record.
    pub rec_len: u16,
    /// File type hint stored in the record.
    pub file_type: u8,
    /// Raw name bytes.
    pub name: ArrayVec<u8, MAX_NAME_LEN>,
}

impl DirEntry {
    /// Returns the name of the entry as a string slice.
    ///
    /// Returns `None` if the name is not valid UTF-8.
    pub fn name(&self) -> Option<&str> {
        core::str::from_utf8(&self.name).ok()
    }

    /// Encodes the record with the given `rec_len`.
    ///
    /// Returns `None` if the name does not fit in `rec_len`.
    pub fn encode(inode: u32, file_type: u8, name: &[u8], rec_len: u16) -> Option<Vec<u8>> {
        if name.len() > MAX_NAME_LEN || DIR_ENTRY_HEADER + name.len() > rec_len as usize {
            return None;
        }
        let mut out = vec![0; rec_len as usize];
        out[0..4].copy_from_slice(&inode.to_le_bytes());
        out[4..6].copy_from_slice(&rec_len.to_le_bytes());
        out[6] = name.len() as u8;
        out[7] = file_type;
        out[8..8 + name.len()].copy_from_slice(name);
        Some(out)
    }
}

/// Smallest record length holding a name of `name_len` bytes.
pub const fn record_len(name_len: usize) -> usize {
    (DIR_ENTRY_HEADER + name_len).next_multiple_of(4)
}

/// Iterator over the physical records of one directory block.
///
/// Yields each record in order, and stops after the first error.
pub struct DirectoryWalker<'a, D: SectorReader + ?Sized> {
    disk: &'a D,
    block: u32,
    offset: usize,
    fused: bool,
}

impl<'a, D: SectorReader + ?Sized> DirectoryWalker<'a, D> {
    /// Starts walking the directory block `block`.
    pub fn new(disk: &'a D, block: u32) -> Self {
        Self {
            disk,
            block,
            offset: 0,
            fused: false,
        }
    }

    fn parse(&mut self) -> Result<DirEntry, Error> {
        if self.offset + DIR_ENTRY_HEADER > BLOCK_SIZE {
            return Err(Error::FilesystemCorrupted("Directory record overruns block"));
        }
        let base = block_offset(self.block) + self.offset as u64;
        let mut header = [0u8; DIR_ENTRY_HEADER];
        read_span(self.disk, base, &mut header)?;

        let inode = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let rec_len = u16::from_le_bytes([header[4], header[5]]);
        let name_len = header[6] as usize;
        if rec_len == 0 {
            return Err(Error::FilesystemCorrupted("Zero-length directory record"));
        }
        if self.offset + rec_len as usize > BLOCK_SIZE {
            return Err(Error::FilesystemCorrupted("Directory record overruns block"));
        }
        if DIR_ENTRY_HEADER + name_len > rec_len as usize {
            return Err(Error::FilesystemCorrupted("Directory name overruns record"));
        }

        let mut name = ArrayVec::new();
        // name_len is a u8, so it always fits.
        name.extend(core::iter::repeat_n(0, name_len));
        read_span(self.disk, base + DIR_ENTRY_HEADER as u64, &mut name)?;
        self.offset += rec_len as usize;
        Ok(DirEntry {
            inode,
            rec_len,
            file_type: header[7],
            name,
        })
    }
}

impl<D: SectorReader + ?Sized> Iterator for DirectoryWalker<'_, D> {
    type Item = Result<DirEntry, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.fused || self.offset >= BLOCK_SIZE {
            return None;
        }
        let entry = self.parse();
        self.fused = entry.is_err();
        Some(entry)
    }
}

impl<D: SectorReader + ?Sized> core::iter::FusedIterator for DirectoryWalker<'_, D> {}

/// Returns the `visible`-th listed record of directory block `block`,
/// that is the physical record `visible + RESERVED_ENTRIES`.
///
/// Fails with [`Error::NoSuchEntry`] if the block runs out first.
pub fn entry_at<D: SectorReader + ?Sized>(
    disk: &D,
    block: u32,
    visible: usize,
) -> Result<DirEntry, Error> {
    let target = visible
        .checked_add(RESERVED_ENTRIES)
        .ok_or(Error::NoSuchEntry)?;
    // Not `nth`: a malformed record before the target must surface.
    let mut walker = DirectoryWalker::new(disk, block);
    for _ in 0..target {
        walker.next().ok_or(Error::NoSuchEntry)??;
    }
    walker.next().unwrap_or(Err(Error::NoSuchEntry))
}

//! Metadata records.
//!
//! A metadata record (the ext2 inode) holds the type, the size and the
//! fifteen block pointers of a file: 12 direct pointers, then one indirect,
//! one double-indirect and one triple-indirect pointer.
//!
//! Records are decoded fresh on every resolution; nothing is cached.
use crate::{
    Error,
    disk::{SectorReader, read_span},
    layout::{
        BLOCK_SIZE, BLOCKS_PER_GROUP, DIRECT_BLOCKS, INODE_SIZE, INODE_TABLE_OFFSET,
        INODES_PER_GROUP,
    },
};
use num_enum::TryFromPrimitive;

/// Represents the type of a file in the filesystem.
#[derive(Debug, Eq, PartialEq, Copy, Clone, TryFromPrimitive)]
#[repr(u16)]
pub enum FileType {
    /// A directory, which stores a list of file entries.
    Directory = 0x4000,
    /// A regular file, containing user data.
    RegularFile = 0x8000,
}

const MODE_TYPE_MASK: u16 = 0xF000;

// Byte offsets of the fields used from the on-disk record.
const MODE: usize = 0;
const SIZE: usize = 4;
const BLOCKS: usize = 40;

/// In-memory copy of a metadata record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inode {
    /// Index of the record.
    pub ino: u32,
    /// Type of the file.
    pub ftype: FileType,
    /// Size of the file in bytes.
    pub size: u64,
    /// The fifteen block pointers.
    pub blocks: [u32; 15],
}

impl Inode {
    /// Decodes the on-disk record `raw` of metadata record `ino`.
    ///
    /// An unused record (zero mode) is [`Error::NoSuchEntry`].
    pub fn from_bytes(ino: u32, raw: &[u8; INODE_SIZE]) -> Result<Self, Error> {
        let le16 = |at: usize| u16::from_le_bytes([raw[at], raw[at + 1]]);
        let le32 = |at: usize| u32::from_le_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]]);

        let mode = le16(MODE);
        if mode == 0 {
            return Err(Error::NoSuchEntry);
        }
        let ftype = FileType::try_from(mode & MODE_TYPE_MASK)
            .map_err(|_| Error::FilesystemCorrupted("Invalid inode type"))?;
        let mut blocks = [0; 15];
        for (i, ptr) in blocks.iter_mut().enumerate() {
            *ptr = le32(BLOCKS + i * 4);
        }
        Ok(Self {
            ino,
            ftype,
            size: le32(SIZE) as u64,
            blocks,
        })
    }

    /// Encodes the fields this crate understands into an on-disk record.
    pub fn to_bytes(&self) -> [u8; INODE_SIZE] {
        let mut raw = [0; INODE_SIZE];
        let mode = match self.ftype {
            FileType::Directory => FileType::Directory as u16 | 0o755,
            FileType::RegularFile => FileType::RegularFile as u16 | 0o644,
        };
        raw[MODE..MODE + 2].copy_from_slice(&mode.to_le_bytes());
        raw[SIZE..SIZE + 4].copy_from_slice(&(self.size as u32).to_le_bytes());
        // i_links_count
        raw[26..28].copy_from_slice(&1u16.to_le_bytes());
        // i_blocks, in 512-byte units.
        let used = self.blocks.iter().filter(|&&b| b != 0).count() as u32;
        raw[28..32].copy_from_slice(&(used * (BLOCK_SIZE / 512) as u32).to_le_bytes());
        for (i, ptr) in self.blocks.iter().enumerate() {
            raw[BLOCKS + i * 4..BLOCKS + i * 4 + 4].copy_from_slice(&ptr.to_le_bytes());
        }
        raw
    }

    /// Whether the record describes a directory.
    pub fn is_dir(&self) -> bool {
        self.ftype == FileType::Directory
    }

    /// The `slot`-th direct block pointer.
    pub fn direct(&self, slot: usize) -> u32 {
        self.blocks[slot]
    }

    /// The indirect block pointer.
    pub fn indirect(&self) -> u32 {
        self.blocks[DIRECT_BLOCKS]
    }

    /// The double-indirect block pointer.
    pub fn double_indirect(&self) -> u32 {
        self.blocks[DIRECT_BLOCKS + 1]
    }
}

/// Raw byte offset of metadata record `ino` in the metadata table of its
/// group.
///
/// Records are numbered from 1; `0` is [`Error::NoSuchEntry`].
pub fn inode_offset(ino: u32) -> Result<u64, Error> {
    let index = ino.checked_sub(1).ok_or(Error::NoSuchEntry)?;
    let group = (index / INODES_PER_GROUP) as u64;
    let local = (index % INODES_PER_GROUP) as u64;
    Ok(
        BLOCK_SIZE as u64 * (group * BLOCKS_PER_GROUP as u64 + INODE_TABLE_OFFSET as u64)
            + local * INODE_SIZE as u64,
    )
}

/// Reads metadata record `ino`.
///
/// `inodes_count` is the number of records on the volume. Indices outside
/// `1..=inodes_count` are [`Error::NoSuchEntry`].
pub fn resolve<D: SectorReader + ?Sized>(
    disk: &D,
    ino: u32,
    inodes_count: u32,
) -> Result<Inode, Error> {
    if ino == 0 || ino > inodes_count {
        return Err(Error::NoSuchEntry);
    }
    let mut raw = [0; INODE_SIZE];
    read_span(disk, inode_offset(ino)?, &mut raw)?;
    Inode::from_bytes(ino, &raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_location() {
        assert_eq!(inode_offset(1), Ok(5 * 1024));
        assert_eq!(inode_offset(2), Ok(5 * 1024 + 128));
        assert_eq!(inode_offset(INODES_PER_GROUP + 1), Ok(1024 * (8192 + 5)));
        assert_eq!(inode_offset(0), Err(Error::NoSuchEntry));
    }

    #[test]
    fn decode_roundtrips_known_fields() {
        let mut blocks = [0; 15];
        blocks[0] = 970;
        blocks[12] = 1001;
        let inode = Inode {
            ino: 12,
            ftype: FileType::RegularFile,
            size: 2600,
            blocks,
        };
        assert_eq!(Inode::from_bytes(12, &inode.to_bytes()), Ok(inode));
    }

    #[test]
    fn unknown_type_is_corruption() {
        let mut raw = [0; INODE_SIZE];
        raw[1] = 0xA0; // symlink
        assert_eq!(
            Inode::from_bytes(3, &raw),
            Err(Error::FilesystemCorrupted("Invalid inode type"))
        );
        assert_eq!(Inode::from_bytes(3, &[0; INODE_SIZE]), Err(Error::NoSuchEntry));
    }
}

//! On-disk layout.
//!
//! Every constant here must match the prepared image; the crate does not
//! support heterogeneous layouts. [`Volume::mount`] checks the superblock
//! against them.
//!
//! [`Volume::mount`]: crate::Volume::mount

/// Size of a logical block.
pub const BLOCK_SIZE: usize = 1024;
/// Size of a physical sector, the smallest unit the disk reads.
pub const SECTOR_SIZE: usize = 512;
/// Size of one chunk handed out by the chunked reader.
pub const CHUNK_SIZE: usize = 256;

/// Block pointers stored directly in a metadata record.
pub const DIRECT_BLOCKS: usize = 12;
/// Block pointers held by one indirect block.
pub const POINTERS_PER_BLOCK: usize = BLOCK_SIZE / 4;
/// Logical blocks reachable through the indirect pointer.
pub const INDIRECT_BLOCKS: usize = POINTERS_PER_BLOCK;
/// Logical blocks reachable through the double-indirect pointer.
pub const DOUBLE_INDIRECT_BLOCKS: usize = POINTERS_PER_BLOCK * POINTERS_PER_BLOCK;

/// Metadata records per block group.
pub const INODES_PER_GROUP: u32 = 7696;
/// Blocks per block group.
pub const BLOCKS_PER_GROUP: u32 = 8192;
/// Block of the metadata table, relative to the start of its group.
pub const INODE_TABLE_OFFSET: u32 = 5;
/// Size of one metadata record.
pub const INODE_SIZE: usize = 128;
/// Index of the root directory's metadata record.
pub const ROOT_INODE: u32 = 2;
/// Records at the start of the root directory that are never listed:
/// ".", ".." and "lost+found".
pub const RESERVED_ENTRIES: usize = 3;

/// Byte offset of the superblock.
pub const SUPERBLOCK_OFFSET: u64 = 1024;
/// Superblock magic.
pub const EXT2_MAGIC: u16 = 0xEF53;

/// Sector, an access granularity for the disk.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Sector(pub u64);

impl Sector {
    /// Get offset that represented by the sector.
    #[inline]
    pub fn into_offset(self) -> u64 {
        self.0 * SECTOR_SIZE as u64
    }
}

impl core::ops::Add<u64> for Sector {
    type Output = Self;

    fn add(self, rhs: u64) -> Self {
        Self(self.0 + rhs)
    }
}

/// Maps a raw byte offset on the medium to its sector and the offset within
/// that sector.
#[inline]
pub const fn translate(raw: u64) -> (Sector, usize) {
    (
        Sector(raw / SECTOR_SIZE as u64),
        (raw % SECTOR_SIZE as u64) as usize,
    )
}

/// Raw byte offset of block `block`.
#[inline]
pub const fn block_offset(block: u32) -> u64 {
    block as u64 * BLOCK_SIZE as u64
}

/// Where the pointer to a logical block of a file lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockClass {
    /// `slot`-th direct pointer of the metadata record.
    Direct { slot: usize },
    /// `slot`-th pointer of the indirect block.
    Indirect { slot: usize },
    /// `inner`-th pointer of the indirect block found at the `outer`-th
    /// pointer of the double-indirect block.
    DoubleIndirect { outer: usize, inner: usize },
}

impl BlockClass {
    /// Classifies logical block `index` of a file. Returns `None` past the
    /// double-indirect range.
    pub fn classify(index: u64) -> Option<Self> {
        let index = usize::try_from(index).ok()?;
        if index < DIRECT_BLOCKS {
            return Some(BlockClass::Direct { slot: index });
        }
        let index = index - DIRECT_BLOCKS;
        if index < INDIRECT_BLOCKS {
            return Some(BlockClass::Indirect { slot: index });
        }
        let index = index - INDIRECT_BLOCKS;
        if index < DOUBLE_INDIRECT_BLOCKS {
            return Some(BlockClass::DoubleIndirect {
                outer: index / POINTERS_PER_BLOCK,
                inner: index % POINTERS_PER_BLOCK,
            });
        }
        None
    }

    /// Pointer blocks read to find the data block.
    pub fn dereferences(&self) -> usize {
        match self {
            BlockClass::Direct { .. } => 0,
            BlockClass::Indirect { .. } => 1,
            BlockClass::DoubleIndirect { .. } => 2,
        }
    }
}

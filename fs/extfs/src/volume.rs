//! Mounted volumes.
use crate::{
    DirEntry, Error, Inode,
    directory::{DirectoryWalker, entry_at},
    disk::{SectorReader, read_span},
    inode::resolve,
    layout::{
        BLOCK_SIZE, BLOCKS_PER_GROUP, CHUNK_SIZE, EXT2_MAGIC, INODES_PER_GROUP, RESERVED_ENTRIES,
        ROOT_INODE, SUPERBLOCK_OFFSET,
    },
    reader,
};

/// The fields of the ext2 superblock this crate reads or writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SuperBlock {
    pub inodes_count: u32,
    pub blocks_count: u32,
    pub free_blocks_count: u32,
    pub free_inodes_count: u32,
    pub first_data_block: u32,
    pub log_block_size: u32,
    pub blocks_per_group: u32,
    pub inodes_per_group: u32,
    pub magic: u16,
}

impl SuperBlock {
    /// Size of the on-disk superblock.
    pub const SIZE: usize = 1024;

    /// Decodes an on-disk superblock.
    pub fn from_bytes(raw: &[u8; Self::SIZE]) -> Self {
        let le32 = |at: usize| u32::from_le_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]]);
        Self {
            inodes_count: le32(0),
            blocks_count: le32(4),
            free_blocks_count: le32(12),
            free_inodes_count: le32(16),
            first_data_block: le32(20),
            log_block_size: le32(24),
            blocks_per_group: le32(32),
            inodes_per_group: le32(40),
            magic: u16::from_le_bytes([raw[56], raw[57]]),
        }
    }

    /// Encodes a revision 0 superblock in a clean state.
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut raw = [0; Self::SIZE];
        let mut put32 = |at: usize, v: u32| raw[at..at + 4].copy_from_slice(&v.to_le_bytes());
        put32(0, self.inodes_count);
        put32(4, self.blocks_count);
        put32(12, self.free_blocks_count);
        put32(16, self.free_inodes_count);
        put32(20, self.first_data_block);
        put32(24, self.log_block_size);
        // s_log_frag_size, s_frags_per_group
        put32(28, self.log_block_size);
        put32(32, self.blocks_per_group);
        put32(36, self.blocks_per_group);
        put32(40, self.inodes_per_group);
        raw[56..58].copy_from_slice(&self.magic.to_le_bytes());
        // s_state = clean, s_errors = continue
        raw[58..60].copy_from_slice(&1u16.to_le_bytes());
        raw[60..62].copy_from_slice(&1u16.to_le_bytes());
        raw
    }

    /// Checks the superblock against the layout this crate is built for.
    pub fn validate(&self) -> Result<(), Error> {
        if self.magic != EXT2_MAGIC {
            return Err(Error::FilesystemCorrupted("Bad superblock magic"));
        }
        if self.inodes_count == 0 || self.blocks_count <= self.first_data_block {
            return Err(Error::FilesystemCorrupted("Empty volume"));
        }
        // 1024 << s_log_block_size
        if 1024usize.checked_shl(self.log_block_size) != Some(BLOCK_SIZE)
            || self.first_data_block != 1
        {
            return Err(Error::NotSupportedOperation);
        }
        if self.blocks_per_group != BLOCKS_PER_GROUP
            || self.inodes_per_group != INODES_PER_GROUP
            || self.inodes_count > INODES_PER_GROUP
            || self.blocks_count > BLOCKS_PER_GROUP + self.first_data_block
        {
            return Err(Error::NotSupportedOperation);
        }
        Ok(())
    }
}

/// A mounted read-only volume.
///
/// Nothing is cached: every lookup reads the metadata it needs from the
/// disk again.
#[derive(Debug)]
pub struct Volume<D: SectorReader> {
    disk: D,
    superblock: SuperBlock,
}

impl<D: SectorReader> Volume<D> {
    /// Reads and validates the superblock of `disk`.
    pub fn mount(disk: D) -> Result<Self, Error> {
        let mut raw = [0; SuperBlock::SIZE];
        read_span(&disk, SUPERBLOCK_OFFSET, &mut raw)?;
        let superblock = SuperBlock::from_bytes(&raw);
        superblock.validate()?;
        log::debug!(
            "mounted ext2 volume: {} blocks, {} inodes, {} free blocks",
            superblock.blocks_count,
            superblock.inodes_count,
            superblock.free_blocks_count
        );
        Ok(Self { disk, superblock })
    }

    /// The superblock read at mount time.
    pub fn superblock(&self) -> &SuperBlock {
        &self.superblock
    }

    /// The underlying disk.
    pub fn disk(&self) -> &D {
        &self.disk
    }

    /// Reads metadata record `ino`.
    pub fn inode(&self, ino: u32) -> Result<Inode, Error> {
        resolve(&self.disk, ino, self.superblock.inodes_count)
    }

    /// Reads the root directory's metadata record.
    pub fn root(&self) -> Result<Inode, Error> {
        let root = self.inode(ROOT_INODE)?;
        if !root.is_dir() {
            return Err(Error::NotDirectory);
        }
        Ok(root)
    }

    fn root_block(&self) -> Result<u32, Error> {
        match self.root()?.direct(0) {
            0 => Err(Error::FilesystemCorrupted("Root directory has no data block")),
            block => Ok(block),
        }
    }

    /// Returns the `visible`-th listed entry of the root directory.
    pub fn entry(&self, visible: usize) -> Result<DirEntry, Error> {
        entry_at(&self.disk, self.root_block()?, visible)
    }

    /// Returns the name of the `visible`-th listed entry, with invalid
    /// UTF-8 replaced.
    pub fn entry_name(&self, visible: usize) -> Result<String, Error> {
        let entry = self.entry(visible)?;
        Ok(String::from_utf8_lossy(&entry.name).into_owned())
    }

    /// Lists the root directory, skipping the reserved entries.
    pub fn root_entries(&self) -> Result<Vec<DirEntry>, Error> {
        let mut entries = DirectoryWalker::new(&self.disk, self.root_block()?)
            .collect::<Result<Vec<_>, _>>()?;
        entries.drain(..RESERVED_ENTRIES.min(entries.len()));
        Ok(entries)
    }

    /// Number of listed entries in the root directory.
    pub fn entry_count(&self) -> Result<usize, Error> {
        let mut count: usize = 0;
        for entry in DirectoryWalker::new(&self.disk, self.root_block()?) {
            entry?;
            count += 1;
        }
        Ok(count.saturating_sub(RESERVED_ENTRIES))
    }

    /// Size in bytes of the `visible`-th listed file.
    pub fn file_size(&self, visible: usize) -> Result<u64, Error> {
        let entry = self.entry(visible)?;
        Ok(self.inode(entry.inode)?.size)
    }

    /// Reads chunk `chunk` of the `visible`-th listed file into `buf`.
    ///
    /// Returns the bytes left after this chunk. See [`reader::read_chunk`].
    pub fn read_chunk(
        &self,
        visible: usize,
        chunk: u64,
        buf: &mut [u8; CHUNK_SIZE],
    ) -> Result<u64, Error> {
        let entry = self.entry(visible)?;
        let inode = self.inode(entry.inode)?;
        reader::read_chunk(&self.disk, &inode, chunk, buf)
    }
}

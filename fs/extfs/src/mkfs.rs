//! Building images in the layout this crate reads.
//!
//! [`ImageBuilder`] lays out a single-group ext2 revision 0 volume:
//!
//! ```text
//! block 0       boot block (unused)
//! block 1       superblock
//! block 2       group descriptor table
//! block 3       block bitmap
//! block 4       inode bitmap
//! block 5..967  inode table (7696 * 128 bytes)
//! block 967..   root directory, lost+found, file data and pointer blocks
//! ```
//!
//! The root directory holds ".", "..", "lost+found" and then the added
//! files in insertion order, all in its first data block.
use crate::{
    Error, FileType, Inode, MemDisk,
    directory::{DirEntry, MAX_NAME_LEN, record_len},
    inode::inode_offset,
    layout::{
        BLOCK_SIZE, BLOCKS_PER_GROUP, BlockClass, DIRECT_BLOCKS, EXT2_MAGIC, INODE_SIZE,
        INODE_TABLE_OFFSET, INODES_PER_GROUP, POINTERS_PER_BLOCK, ROOT_INODE, SECTOR_SIZE,
        SUPERBLOCK_OFFSET, block_offset,
    },
    volume::SuperBlock,
};
use std::collections::{BTreeMap, btree_map::Entry};

const GROUP_DESC_BLOCK: u32 = 2;
const BLOCK_BITMAP: u32 = 3;
const INODE_BITMAP: u32 = 4;
/// First block after the inode table.
pub const FIRST_FREE_BLOCK: u32 =
    INODE_TABLE_OFFSET + (INODES_PER_GROUP as usize * INODE_SIZE / BLOCK_SIZE) as u32;
const LOST_FOUND_INODE: u32 = 11;
/// Metadata record of the first added file.
pub const FIRST_FILE_INODE: u32 = 12;

// Directory record type hints.
const FT_REG_FILE: u8 = 1;
const FT_DIR: u8 = 2;

type PointerBlock = [u32; POINTERS_PER_BLOCK];

/// Builds an in-memory image.
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    blocks_count: u32,
    sparse: bool,
    files: Vec<(String, Vec<u8>)>,
}

impl ImageBuilder {
    /// Starts an image of `blocks_count` blocks.
    pub fn new(blocks_count: u32) -> Self {
        Self {
            blocks_count,
            sparse: false,
            files: Vec::new(),
        }
    }

    /// When set, all-zero data blocks are left unallocated and read back as
    /// holes.
    pub fn sparse(mut self, sparse: bool) -> Self {
        self.sparse = sparse;
        self
    }

    /// Appends a file to the root directory.
    pub fn file(mut self, name: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        self.add_file(name, contents);
        self
    }

    /// Appends a file to the root directory.
    pub fn add_file(&mut self, name: impl Into<String>, contents: impl Into<Vec<u8>>) {
        self.files.push((name.into(), contents.into()));
    }

    /// Lays out the image.
    ///
    /// # Errors
    /// - [`Error::InvalidArgument`] for a geometry other than one block group,
    ///   or a name that is empty or longer than 255 bytes.
    /// - [`Error::NoSpace`] if the files, their pointer blocks, or their
    ///   directory records do not fit.
    /// - [`Error::NotSupportedOperation`] if a file needs triple-indirect
    ///   blocks.
    pub fn build(&self) -> Result<MemDisk, Error> {
        if self.blocks_count > BLOCKS_PER_GROUP || self.blocks_count <= FIRST_FREE_BLOCK {
            return Err(Error::InvalidArgument);
        }
        if self.files.len() > (INODES_PER_GROUP - FIRST_FILE_INODE + 1) as usize {
            return Err(Error::NoSpace);
        }
        let mut image = Image {
            disk: MemDisk::new(self.blocks_count as u64 * (BLOCK_SIZE / SECTOR_SIZE) as u64),
            next_block: FIRST_FREE_BLOCK,
            blocks_count: self.blocks_count,
        };

        let root_block = image.alloc()?;
        let lost_found_block = image.alloc()?;

        let mut listing = vec![
            (ROOT_INODE, FT_DIR, &b"."[..]),
            (ROOT_INODE, FT_DIR, &b".."[..]),
            (LOST_FOUND_INODE, FT_DIR, &b"lost+found"[..]),
        ];
        for (i, (name, _)) in self.files.iter().enumerate() {
            if name.is_empty() || name.len() > MAX_NAME_LEN {
                return Err(Error::InvalidArgument);
            }
            listing.push((FIRST_FILE_INODE + i as u32, FT_REG_FILE, name.as_bytes()));
        }
        image.write_directory(root_block, &listing)?;
        image.write_directory(
            lost_found_block,
            &[
                (LOST_FOUND_INODE, FT_DIR, &b"."[..]),
                (ROOT_INODE, FT_DIR, &b".."[..]),
            ],
        )?;
        image.write_inode(&directory_inode(ROOT_INODE, root_block))?;
        image.write_inode(&directory_inode(LOST_FOUND_INODE, lost_found_block))?;

        for (i, (name, contents)) in self.files.iter().enumerate() {
            let inode = image.write_file(FIRST_FILE_INODE + i as u32, contents, self.sparse)?;
            log::debug!("mkfs: {name} -> inode {} ({} bytes)", inode.ino, inode.size);
            image.write_inode(&inode)?;
        }

        let used_inodes = FIRST_FILE_INODE - 1 + self.files.len() as u32;
        image.write_metadata(used_inodes)?;
        Ok(image.disk)
    }

    /// Lays out the image and flattens it.
    pub fn into_image(self) -> Result<Vec<u8>, Error> {
        self.build().map(|disk| disk.to_image())
    }
}

fn directory_inode(ino: u32, block: u32) -> Inode {
    let mut blocks = [0; 15];
    blocks[0] = block;
    Inode {
        ino,
        ftype: FileType::Directory,
        size: BLOCK_SIZE as u64,
        blocks,
    }
}

struct Image {
    disk: MemDisk,
    next_block: u32,
    blocks_count: u32,
}

impl Image {
    fn alloc(&mut self) -> Result<u32, Error> {
        if self.next_block >= self.blocks_count {
            return Err(Error::NoSpace);
        }
        self.next_block += 1;
        Ok(self.next_block - 1)
    }

    fn write_block(&mut self, block: u32, data: &[u8]) -> Result<(), Error> {
        self.disk.write(block_offset(block), data)
    }

    fn write_pointers(&mut self, block: u32, table: &PointerBlock) -> Result<(), Error> {
        let raw: Vec<u8> = table.iter().flat_map(|p| p.to_le_bytes()).collect();
        self.write_block(block, &raw)
    }

    fn write_inode(&mut self, inode: &Inode) -> Result<(), Error> {
        self.disk.write(inode_offset(inode.ino)?, &inode.to_bytes())
    }

    fn write_directory(&mut self, block: u32, listing: &[(u32, u8, &[u8])]) -> Result<(), Error> {
        let mut raw = Vec::with_capacity(BLOCK_SIZE);
        for (i, &(ino, ftype, name)) in listing.iter().enumerate() {
            let rec_len = if i + 1 == listing.len() {
                BLOCK_SIZE.checked_sub(raw.len()).ok_or(Error::NoSpace)?
            } else {
                record_len(name.len())
            };
            let record =
                DirEntry::encode(ino, ftype, name, rec_len as u16).ok_or(Error::NoSpace)?;
            raw.extend_from_slice(&record);
        }
        if raw.len() > BLOCK_SIZE {
            return Err(Error::NoSpace);
        }
        self.write_block(block, &raw)
    }

    /// Writes the data and pointer blocks of a file and returns its
    /// metadata record.
    fn write_file(&mut self, ino: u32, contents: &[u8], sparse: bool) -> Result<Inode, Error> {
        let mut blocks = [0; 15];
        let mut indirect: Option<(u32, PointerBlock)> = None;
        let mut double: Option<(u32, PointerBlock)> = None;
        let mut inner: BTreeMap<usize, (u32, PointerBlock)> = BTreeMap::new();

        for (index, data) in contents.chunks(BLOCK_SIZE).enumerate() {
            if sparse && data.iter().all(|&b| b == 0) {
                continue;
            }
            let class = BlockClass::classify(index as u64).ok_or(Error::NotSupportedOperation)?;
            // Pointer blocks are allocated ahead of the data they map.
            let slot = match class {
                BlockClass::Direct { slot } => &mut blocks[slot],
                BlockClass::Indirect { slot } => {
                    let (_, table) = match &mut indirect {
                        Some(table) => table,
                        None => indirect.insert((self.alloc()?, [0; POINTERS_PER_BLOCK])),
                    };
                    &mut table[slot]
                }
                BlockClass::DoubleIndirect { outer, inner: idx } => {
                    if double.is_none() {
                        double = Some((self.alloc()?, [0; POINTERS_PER_BLOCK]));
                    }
                    let (_, table) = match inner.entry(outer) {
                        Entry::Occupied(e) => e.into_mut(),
                        Entry::Vacant(e) => e.insert((self.alloc()?, [0; POINTERS_PER_BLOCK])),
                    };
                    &mut table[idx]
                }
            };
            let block = self.alloc()?;
            *slot = block;
            self.write_block(block, data)?;
        }

        if let Some((block, table)) = indirect {
            blocks[DIRECT_BLOCKS] = block;
            self.write_pointers(block, &table)?;
        }
        if let Some((block, mut table)) = double {
            blocks[DIRECT_BLOCKS + 1] = block;
            for (outer, (inner_block, inner_table)) in inner {
                table[outer] = inner_block;
                self.write_pointers(inner_block, &inner_table)?;
            }
            self.write_pointers(block, &table)?;
        }

        Ok(Inode {
            ino,
            ftype: FileType::RegularFile,
            size: contents.len() as u64,
            blocks,
        })
    }

    /// Writes the superblock, the group descriptor and both bitmaps.
    fn write_metadata(&mut self, used_inodes: u32) -> Result<(), Error> {
        let free_blocks = self.blocks_count - self.next_block;
        let free_inodes = INODES_PER_GROUP - used_inodes;
        let superblock = SuperBlock {
            inodes_count: INODES_PER_GROUP,
            blocks_count: self.blocks_count,
            free_blocks_count: free_blocks,
            free_inodes_count: free_inodes,
            first_data_block: 1,
            log_block_size: 0,
            blocks_per_group: BLOCKS_PER_GROUP,
            inodes_per_group: INODES_PER_GROUP,
            magic: EXT2_MAGIC,
        };
        self.disk.write(SUPERBLOCK_OFFSET, &superblock.to_bytes())?;

        let mut desc = [0u8; 32];
        desc[0..4].copy_from_slice(&BLOCK_BITMAP.to_le_bytes());
        desc[4..8].copy_from_slice(&INODE_BITMAP.to_le_bytes());
        desc[8..12].copy_from_slice(&INODE_TABLE_OFFSET.to_le_bytes());
        desc[12..14].copy_from_slice(&(free_blocks as u16).to_le_bytes());
        desc[14..16].copy_from_slice(&(free_inodes as u16).to_le_bytes());
        // bg_used_dirs_count: root and lost+found
        desc[16..18].copy_from_slice(&2u16.to_le_bytes());
        self.write_block(GROUP_DESC_BLOCK, &desc)?;

        // Bit i of the block bitmap stands for block i + 1. Bits past the
        // end of the volume are set.
        let used_blocks = (self.next_block - 1) as usize;
        let real_blocks = (self.blocks_count - 1) as usize;
        let bitmap = bitmap(|bit| bit < used_blocks || bit >= real_blocks);
        self.write_block(BLOCK_BITMAP, &bitmap)?;

        let bitmap = bitmap_for_inodes(used_inodes as usize);
        self.write_block(INODE_BITMAP, &bitmap)
    }
}

fn bitmap(set: impl Fn(usize) -> bool) -> [u8; BLOCK_SIZE] {
    let mut out = [0u8; BLOCK_SIZE];
    for bit in 0..BLOCK_SIZE * 8 {
        if set(bit) {
            out[bit / 8] |= 1 << (bit % 8);
        }
    }
    out
}

fn bitmap_for_inodes(used: usize) -> [u8; BLOCK_SIZE] {
    bitmap(|bit| bit < used || bit >= INODES_PER_GROUP as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Volume;

    #[test]
    fn first_free_block_follows_inode_table() {
        assert_eq!(FIRST_FREE_BLOCK, 967);
    }

    #[test]
    fn empty_image_mounts() {
        let disk = ImageBuilder::new(1024).build().unwrap();
        let volume = Volume::mount(disk).unwrap();
        assert_eq!(volume.entry_count(), Ok(0));
        assert_eq!(volume.superblock().free_blocks_count, 1024 - 969);
        let lost_found = volume.inode(LOST_FOUND_INODE).unwrap();
        assert!(lost_found.is_dir());
    }

    #[test]
    fn geometry_limits() {
        assert_eq!(
            ImageBuilder::new(BLOCKS_PER_GROUP + 1).build().err(),
            Some(Error::InvalidArgument)
        );
        assert_eq!(
            ImageBuilder::new(970)
                .file("big", vec![1u8; 4 * BLOCK_SIZE])
                .build()
                .err(),
            Some(Error::NoSpace)
        );
    }

    #[test]
    fn full_directory_block_is_no_space() {
        let mut builder = ImageBuilder::new(2048);
        for i in 0..8 {
            builder.add_file(format!("{i}{}", "x".repeat(150)), vec![1]);
        }
        assert_eq!(builder.build().err(), Some(Error::NoSpace));
    }
}

//! Chunked file reads.
//!
//! [`read_chunk`] reads one [`CHUNK_SIZE`] piece of a file given its
//! metadata record and a chunk number. Each call is a pure function of its
//! inputs: the logical block is classified and its pointer chain is walked
//! again every time, with no cursor kept between calls.
use crate::{
    Error, Inode,
    disk::{SectorReader, read_span, read_u32},
    layout::{BLOCK_SIZE, BlockClass, CHUNK_SIZE, block_offset},
    volume::Volume,
};

/// Reads entry `slot` of pointer block `table`. A zero table is a hole.
fn follow<D: SectorReader + ?Sized>(disk: &D, table: u32, slot: usize) -> Result<u32, Error> {
    if table == 0 {
        return Ok(0);
    }
    let ptr = read_u32(disk, block_offset(table) + (slot * 4) as u64)?;
    log::trace!("pointer block {table}[{slot}] -> {ptr}");
    Ok(ptr)
}

/// Resolves the data block holding the logical block classified as
/// `class`. Returns 0 for a hole.
pub fn data_block<D: SectorReader + ?Sized>(
    disk: &D,
    inode: &Inode,
    class: BlockClass,
) -> Result<u32, Error> {
    match class {
        BlockClass::Direct { slot } => Ok(inode.direct(slot)),
        BlockClass::Indirect { slot } => follow(disk, inode.indirect(), slot),
        BlockClass::DoubleIndirect { outer, inner } => {
            let table = follow(disk, inode.double_indirect(), outer)?;
            follow(disk, table, inner)
        }
    }
}

/// Reads chunk `chunk` of the file described by `inode` into `buf`.
///
/// Returns the number of bytes left in the file after this chunk, saturated
/// at zero. Bytes of `buf` past the end of the file are zeroed, as are
/// chunks that fall in a hole.
///
/// # Errors
/// - [`Error::IsDirectory`] if `inode` is a directory.
/// - [`Error::InvalidArgument`] if the chunk starts at or after the end of
///   the file. Chunk 0 of an empty file is allowed.
/// - [`Error::NotSupportedOperation`] if the chunk lies past the
///   double-indirect range.
/// - Any error of the underlying disk.
pub fn read_chunk<D: SectorReader + ?Sized>(
    disk: &D,
    inode: &Inode,
    chunk: u64,
    buf: &mut [u8; CHUNK_SIZE],
) -> Result<u64, Error> {
    if inode.is_dir() {
        return Err(Error::IsDirectory);
    }
    let consumed = chunk
        .checked_mul(CHUNK_SIZE as u64)
        .ok_or(Error::InvalidArgument)?;
    if consumed >= inode.size && chunk != 0 {
        return Err(Error::InvalidArgument);
    }

    let class =
        BlockClass::classify(consumed / BLOCK_SIZE as u64).ok_or(Error::NotSupportedOperation)?;
    match data_block(disk, inode, class)? {
        0 => buf.fill(0),
        block => read_span(
            disk,
            block_offset(block) + consumed % BLOCK_SIZE as u64,
            buf,
        )?,
    }

    let valid = inode.size.saturating_sub(consumed).min(CHUNK_SIZE as u64) as usize;
    buf[valid..].fill(0);
    Ok(inode.size.saturating_sub(consumed + CHUNK_SIZE as u64))
}

/// Streams one listed file of a [`Volume`] chunk by chunk.
///
/// The cursor only remembers the next chunk number; every step goes
/// through [`Volume::read_chunk`].
#[derive(Debug, Clone)]
pub struct ChunkCursor {
    visible: usize,
    next_chunk: u64,
    size: u64,
}

impl ChunkCursor {
    /// Opens a cursor at the start of listed file `visible`.
    pub fn open<D: SectorReader>(volume: &Volume<D>, visible: usize) -> Result<Self, Error> {
        Ok(Self {
            visible,
            next_chunk: 0,
            size: volume.file_size(visible)?,
        })
    }

    /// The listed index this cursor reads.
    pub fn visible(&self) -> usize {
        self.visible
    }

    /// Size of the file in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Byte offset of the next chunk.
    pub fn position(&self) -> u64 {
        (self.next_chunk * CHUNK_SIZE as u64).min(self.size)
    }

    /// Bytes not read yet.
    pub fn remaining(&self) -> u64 {
        self.size - self.position()
    }

    /// Restarts from the first chunk.
    pub fn rewind(&mut self) {
        self.next_chunk = 0;
    }

    /// Reads the next chunk into `buf`.
    ///
    /// Returns the number of valid bytes in `buf`, or `None` once the whole
    /// file has been read.
    pub fn next_chunk<D: SectorReader>(
        &mut self,
        volume: &Volume<D>,
        buf: &mut [u8; CHUNK_SIZE],
    ) -> Result<Option<usize>, Error> {
        if self.remaining() == 0 {
            return Ok(None);
        }
        let before = self.remaining();
        let after = volume.read_chunk(self.visible, self.next_chunk, buf)?;
        self.next_chunk += 1;
        Ok(Some((before - after) as usize))
    }
}

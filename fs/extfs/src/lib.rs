//! # extfs: streaming reads from an ext2-formatted volume.
//!
//! extfs is a minimal, read-only traversal engine for ext2 volumes with a
//! single fixed geometry (1 KiB blocks, one block group, 128-byte inodes).
//! It streams files in fixed-size chunks without ever materializing a whole
//! file or caching anything between calls.
//!
//! The pieces, leaves first:
//!
//! - [`layout`]: on-disk constants, raw offset to sector translation, and
//!   classification of logical blocks into direct, indirect and
//!   double-indirect ranges.
//! - [`disk`]: the [`SectorReader`] contract and two implementations,
//!   [`MemDisk`] and [`FileDisk`].
//! - [`inode`]: locating and decoding metadata records.
//! - [`directory`]: walking the variable-length records of a directory
//!   block.
//! - [`reader`]: reading one chunk of a file by chunk number.
//! - [`volume`]: a mounted volume tying the above together.
//! - [`mkfs`]: building images in this layout.
//!
//! [`SectorReader`]: disk::SectorReader
//! [`MemDisk`]: disk::MemDisk
//! [`FileDisk`]: disk::FileDisk

pub mod directory;
pub mod disk;
pub mod inode;
pub mod layout;
pub mod mkfs;
pub mod reader;
pub mod volume;

pub use directory::DirEntry;
pub use disk::{FileDisk, MemDisk, SectorReader};
pub use inode::{FileType, Inode};
pub use layout::{CHUNK_SIZE, Sector};
pub use reader::ChunkCursor;
pub use volume::{SuperBlock, Volume};

/// Errors of the storage layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A sector could not be read. (EIO)
    IOError,
    /// No such metadata record or directory entry. (ENOENT)
    NoSuchEntry,
    /// The volume contains a malformed structure. (EFSCORRUPTED)
    FilesystemCorrupted(&'static str),
    /// A file operation was attempted on a directory. (EISDIR)
    IsDirectory,
    /// A directory operation was attempted on a file. (ENOTDIR)
    NotDirectory,
    /// Invalid argument. (EINVAL)
    InvalidArgument,
    /// No space left while building an image. (ENOSPC)
    NoSpace,
    /// The volume uses a feature or geometry this crate does not handle.
    /// (ENOTSUPP)
    NotSupportedOperation,
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::IOError => write!(f, "I/O error"),
            Error::NoSuchEntry => write!(f, "no such entry"),
            Error::FilesystemCorrupted(why) => write!(f, "file system is corrupted: {why}"),
            Error::IsDirectory => write!(f, "is a directory"),
            Error::NotDirectory => write!(f, "not a directory"),
            Error::InvalidArgument => write!(f, "invalid argument"),
            Error::NoSpace => write!(f, "no space left on the image"),
            Error::NotSupportedOperation => write!(f, "operation is not supported"),
        }
    }
}

impl std::error::Error for Error {}

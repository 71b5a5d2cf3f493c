//! Sector readers.
//!
//! The traversal layer reads the medium only through [`SectorReader`]: one
//! call reads a byte range that lies within a single sector. Ranges that
//! cross sector boundaries are split by [`read_span`] and reassembled
//! in place.
use crate::{
    Error,
    layout::{SECTOR_SIZE, Sector, translate},
};
use std::{
    collections::BTreeMap,
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::Path,
    sync::Mutex,
};

/// A read-only disk.
pub trait SectorReader {
    /// Reads `buf.len()` bytes starting at byte `offset` of `sector`.
    ///
    /// `offset + buf.len()` must not exceed [`SECTOR_SIZE`]. Returns the
    /// number of bytes read.
    fn read_sector(&self, sector: Sector, offset: usize, buf: &mut [u8]) -> Result<usize, Error>;
}

impl<D: SectorReader + ?Sized> SectorReader for &D {
    fn read_sector(&self, sector: Sector, offset: usize, buf: &mut [u8]) -> Result<usize, Error> {
        (**self).read_sector(sector, offset, buf)
    }
}

impl<D: SectorReader + ?Sized> SectorReader for std::sync::Arc<D> {
    fn read_sector(&self, sector: Sector, offset: usize, buf: &mut [u8]) -> Result<usize, Error> {
        (**self).read_sector(sector, offset, buf)
    }
}

fn check_range(offset: usize, len: usize) -> Result<(), Error> {
    if offset.checked_add(len).is_some_and(|end| end <= SECTOR_SIZE) {
        Ok(())
    } else {
        Err(Error::InvalidArgument)
    }
}

/// Fills `buf` from raw byte offset `raw`, issuing one sector read per
/// sector the range touches.
///
/// A short read from the disk is an [`Error::IOError`].
pub fn read_span<D: SectorReader + ?Sized>(
    disk: &D,
    raw: u64,
    buf: &mut [u8],
) -> Result<(), Error> {
    let (mut sector, mut offset) = translate(raw);
    let mut filled = 0;
    while filled < buf.len() {
        let len = (SECTOR_SIZE - offset).min(buf.len() - filled);
        let read = disk.read_sector(sector, offset, &mut buf[filled..filled + len])?;
        if read != len {
            log::warn!("short read at {sector:?}+{offset}: {read} of {len} bytes");
            return Err(Error::IOError);
        }
        filled += len;
        sector = sector + 1;
        offset = 0;
    }
    Ok(())
}

/// Reads a little-endian `u32` at raw byte offset `raw`.
pub fn read_u32<D: SectorReader + ?Sized>(disk: &D, raw: u64) -> Result<u32, Error> {
    let mut b = [0u8; 4];
    read_span(disk, raw, &mut b)?;
    Ok(u32::from_le_bytes(b))
}

/// A sparse in-memory disk.
///
/// Only sectors that were written hold storage; the rest read as zeros.
/// Reads beyond [`sector_count`] fail with [`Error::IOError`].
///
/// [`sector_count`]: MemDisk::sector_count
#[derive(Debug, Clone, Default)]
pub struct MemDisk {
    sectors: BTreeMap<u64, Box<[u8; SECTOR_SIZE]>>,
    sector_count: u64,
}

impl MemDisk {
    /// Creates a zero-filled disk of `sector_count` sectors.
    pub fn new(sector_count: u64) -> Self {
        Self {
            sectors: BTreeMap::new(),
            sector_count,
        }
    }

    /// Creates a disk holding `image`. The image is padded to whole sectors.
    pub fn from_image(image: &[u8]) -> Self {
        let sector_count = image.len().div_ceil(SECTOR_SIZE) as u64;
        let mut disk = Self::new(sector_count);
        for (idx, chunk) in image.chunks(SECTOR_SIZE).enumerate() {
            if chunk.iter().any(|&b| b != 0) {
                let mut sector = Box::new([0; SECTOR_SIZE]);
                sector[..chunk.len()].copy_from_slice(chunk);
                disk.sectors.insert(idx as u64, sector);
            }
        }
        disk
    }

    /// Number of sectors on the disk.
    pub fn sector_count(&self) -> u64 {
        self.sector_count
    }

    /// Writes `data` at raw byte offset `raw`.
    pub fn write(&mut self, raw: u64, data: &[u8]) -> Result<(), Error> {
        let end = raw + data.len() as u64;
        if end > self.sector_count * SECTOR_SIZE as u64 {
            return Err(Error::NoSpace);
        }
        let (mut sector, mut offset) = translate(raw);
        let mut done = 0;
        while done < data.len() {
            let len = (SECTOR_SIZE - offset).min(data.len() - done);
            let buf = self
                .sectors
                .entry(sector.0)
                .or_insert_with(|| Box::new([0; SECTOR_SIZE]));
            buf[offset..offset + len].copy_from_slice(&data[done..done + len]);
            done += len;
            sector = sector + 1;
            offset = 0;
        }
        Ok(())
    }

    /// Flattens the disk into a contiguous image.
    pub fn to_image(&self) -> Vec<u8> {
        let mut image = vec![0; self.sector_count as usize * SECTOR_SIZE];
        for (&idx, sector) in self.sectors.iter() {
            let start = idx as usize * SECTOR_SIZE;
            image[start..start + SECTOR_SIZE].copy_from_slice(&sector[..]);
        }
        image
    }
}

impl SectorReader for MemDisk {
    fn read_sector(&self, sector: Sector, offset: usize, buf: &mut [u8]) -> Result<usize, Error> {
        check_range(offset, buf.len())?;
        if sector.0 >= self.sector_count {
            return Err(Error::IOError);
        }
        match self.sectors.get(&sector.0) {
            Some(data) => buf.copy_from_slice(&data[offset..offset + buf.len()]),
            None => buf.fill(0),
        }
        Ok(buf.len())
    }
}

/// An image file on the host.
#[derive(Debug)]
pub struct FileDisk {
    file: Mutex<File>,
    sector_count: u64,
}

impl FileDisk {
    /// Opens the image at `path` read-only.
    pub fn open(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            file: Mutex::new(file),
            sector_count: len / SECTOR_SIZE as u64,
        })
    }

    /// Number of whole sectors in the image.
    pub fn sector_count(&self) -> u64 {
        self.sector_count
    }
}

impl SectorReader for FileDisk {
    fn read_sector(&self, sector: Sector, offset: usize, buf: &mut [u8]) -> Result<usize, Error> {
        check_range(offset, buf.len())?;
        if sector.0 >= self.sector_count {
            return Err(Error::IOError);
        }
        let mut file = self.file.lock().map_err(|_| Error::IOError)?;
        file.seek(SeekFrom::Start(sector.into_offset() + offset as u64))
            .and_then(|_| file.read_exact(buf))
            .map_err(|e| {
                log::warn!("reading {sector:?} failed: {e}");
                Error::IOError
            })?;
        Ok(buf.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn span_reassembles_across_sectors() {
        let image: Vec<u8> = (0..2048u32).map(|i| (i % 251) as u8).collect();
        let disk = MemDisk::from_image(&image);
        let mut buf = [0u8; 100];
        read_span(&disk, 470, &mut buf).unwrap();
        assert_eq!(&buf[..], &image[470..570]);
    }

    #[test]
    fn sparse_sectors_read_as_zero() {
        let mut disk = MemDisk::new(8);
        disk.write(1000, b"abc").unwrap();
        let mut buf = [0xffu8; 8];
        read_span(&disk, 998, &mut buf).unwrap();
        assert_eq!(&buf, b"\0\0abc\0\0\0");
        assert_eq!(disk.to_image().len(), 8 * SECTOR_SIZE);
    }

    #[test]
    fn out_of_range_is_io_error() {
        let disk = MemDisk::new(2);
        let mut buf = [0u8; 4];
        assert_eq!(read_span(&disk, 1022, &mut buf), Err(Error::IOError));
        assert_eq!(
            disk.read_sector(Sector(0), 510, &mut buf),
            Err(Error::InvalidArgument)
        );
    }
}

use extfs::{
    CHUNK_SIZE, ChunkCursor, Error, FileDisk, FileType, Inode, MemDisk, Sector, SectorReader,
    Volume,
    disk::read_span,
    layout::{BLOCK_SIZE, block_offset},
    mkfs::{FIRST_FILE_INODE, ImageBuilder},
    reader::read_chunk,
};
use rand::{Rng, SeedableRng, rngs::StdRng};
use std::sync::atomic::{AtomicUsize, Ordering};

fn random_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut out = vec![0u8; len];
    rng.fill(&mut out[..]);
    out
}

/// Counts sector reads.
struct CountingDisk {
    inner: MemDisk,
    reads: AtomicUsize,
}

impl SectorReader for CountingDisk {
    fn read_sector(&self, sector: Sector, offset: usize, buf: &mut [u8]) -> Result<usize, Error> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read_sector(sector, offset, buf)
    }
}

/// Fails every read of one sector.
struct FaultyDisk {
    inner: MemDisk,
    bad: Sector,
}

impl SectorReader for FaultyDisk {
    fn read_sector(&self, sector: Sector, offset: usize, buf: &mut [u8]) -> Result<usize, Error> {
        if sector == self.bad {
            return Err(Error::IOError);
        }
        self.inner.read_sector(sector, offset, buf)
    }
}

/// Blocks 0..11 are read through direct pointers, 12..267 through one
/// indirect block and 268.. through two.
#[test]
fn classification_dereferences() {
    let contents = random_bytes(1, 270 * BLOCK_SIZE);
    let disk = ImageBuilder::new(2048)
        .file("long", contents.clone())
        .build()
        .unwrap();
    let volume = Volume::mount(CountingDisk {
        inner: disk,
        reads: AtomicUsize::new(0),
    })
    .unwrap();
    let inode = volume.inode(FIRST_FILE_INODE).unwrap();

    let mut buf = [0u8; CHUNK_SIZE];
    for (block, derefs) in [(0, 0), (11, 0), (12, 1), (267, 1), (268, 2), (269, 2)] {
        volume.disk().reads.store(0, Ordering::SeqCst);
        let chunk = (block * BLOCK_SIZE / CHUNK_SIZE) as u64;
        read_chunk(volume.disk(), &inode, chunk, &mut buf).unwrap();
        // One read per pointer block, plus the data itself.
        assert_eq!(
            volume.disk().reads.load(Ordering::SeqCst),
            derefs + 1,
            "logical block {block}"
        );
        let at = block * BLOCK_SIZE;
        assert_eq!(&buf[..], &contents[at..at + CHUNK_SIZE]);
    }
}

/// A 2600-byte file comes back in 11 chunks, the last one partial, and the
/// remaining count reaches exactly zero on the last chunk.
#[test]
fn chunked_roundtrip() {
    const SIZE: usize = 2600;
    let contents = random_bytes(2, SIZE);
    let volume = Volume::mount(
        ImageBuilder::new(1100)
            .file("song.raw", contents.clone())
            .build()
            .unwrap(),
    )
    .unwrap();

    let mut out = Vec::new();
    let mut remainders = Vec::new();
    let mut buf = [0xAAu8; CHUNK_SIZE];
    for chunk in 0..SIZE.div_ceil(CHUNK_SIZE) as u64 {
        let remaining = volume.read_chunk(0, chunk, &mut buf).unwrap();
        let valid = (SIZE - out.len()).min(CHUNK_SIZE);
        out.extend_from_slice(&buf[..valid]);
        assert!(buf[valid..].iter().all(|&b| b == 0));
        remainders.push(remaining);
    }
    assert_eq!(out, contents);
    assert_eq!(remainders.len(), 11);
    assert_eq!(remainders[0], (SIZE - CHUNK_SIZE) as u64);
    assert_eq!(remainders[9], 40);
    assert_eq!(remainders[10], 0);

    // Reads are pure functions of (file, chunk).
    let mut again = [0u8; CHUNK_SIZE];
    assert_eq!(volume.read_chunk(0, 3, &mut again), Ok(remainders[3]));
    assert_eq!(&again[..], &contents[768..1024]);

    // Past the end of the file.
    assert_eq!(volume.read_chunk(0, 11, &mut buf), Err(Error::InvalidArgument));
}

#[test]
fn cursor_streams_through_holes_and_double_indirect() {
    let mut contents = random_bytes(3, 300 * BLOCK_SIZE + 100);
    contents[5 * BLOCK_SIZE..6 * BLOCK_SIZE].fill(0);
    contents[280 * BLOCK_SIZE..281 * BLOCK_SIZE].fill(0);
    let volume = Volume::mount(
        ImageBuilder::new(2048)
            .sparse(true)
            .file("holes", contents.clone())
            .build()
            .unwrap(),
    )
    .unwrap();
    let inode = volume.inode(FIRST_FILE_INODE).unwrap();
    assert_eq!(inode.direct(5), 0);
    assert_ne!(inode.double_indirect(), 0);

    let mut cursor = ChunkCursor::open(&volume, 0).unwrap();
    assert_eq!(cursor.size(), contents.len() as u64);
    let mut out = Vec::new();
    let mut buf = [0u8; CHUNK_SIZE];
    while let Some(valid) = cursor.next_chunk(&volume, &mut buf).unwrap() {
        out.extend_from_slice(&buf[..valid]);
    }
    assert_eq!(out, contents);
    assert_eq!(cursor.remaining(), 0);

    cursor.rewind();
    assert_eq!(cursor.position(), 0);
    assert_eq!(cursor.next_chunk(&volume, &mut buf), Ok(Some(CHUNK_SIZE)));
    assert_eq!(&buf[..], &contents[..CHUNK_SIZE]);
}

#[test]
fn empty_file() {
    let disk = ImageBuilder::new(1024)
        .file("empty", Vec::<u8>::new())
        .build()
        .unwrap();
    let volume = Volume::mount(disk).unwrap();
    let mut buf = [0xFFu8; CHUNK_SIZE];
    assert_eq!(volume.read_chunk(0, 0, &mut buf), Ok(0));
    assert!(buf.iter().all(|&b| b == 0));
    assert_eq!(volume.read_chunk(0, 1, &mut buf), Err(Error::InvalidArgument));

    let mut cursor = ChunkCursor::open(&volume, 0).unwrap();
    assert_eq!(cursor.next_chunk(&volume, &mut buf), Ok(None));
}

/// A directory record crossing the sector boundary in the middle of a block
/// is reassembled from two reads.
#[test]
fn straddling_directory_record() {
    // ".", ".." and "lost+found" take 44 bytes and each of these records
    // takes 208, so the third one spans bytes 460..668 of the block.
    let names: Vec<String> = (0..3).map(|i| format!("{i}{}", "n".repeat(199))).collect();
    let mut builder = ImageBuilder::new(1024);
    for name in &names {
        builder.add_file(name.clone(), name.as_bytes());
    }
    let disk = builder.build().unwrap();
    let image = disk.to_image();
    let volume = Volume::mount(disk).unwrap();

    let root_block = volume.root().unwrap().direct(0);
    let record = block_offset(root_block) as usize + 460;
    assert!(record % 512 + 8 + 200 > 512);
    assert_eq!(&image[record + 8..record + 208], names[2].as_bytes());
    assert_eq!(volume.entry_name(2).unwrap(), names[2]);

    // The same holds for arbitrary spans.
    let mut span = [0u8; 300];
    read_span(volume.disk(), record as u64, &mut span).unwrap();
    assert_eq!(&span[..], &image[record..record + 300]);
}

/// With 3 reserved records followed by M listed ones, listed index i is
/// physical record i + 3.
#[test]
fn directory_skip() {
    let names = ["a.raw", "b.raw", "c.raw", "d.raw", "e.raw"];
    let mut builder = ImageBuilder::new(1024);
    for (i, name) in names.iter().enumerate() {
        builder.add_file(*name, vec![i as u8; 10 * (i + 1)]);
    }
    let volume = Volume::mount(builder.build().unwrap()).unwrap();

    assert_eq!(volume.entry_count(), Ok(names.len()));
    for (i, name) in names.iter().enumerate() {
        let entry = volume.entry(i).unwrap();
        assert_eq!(entry.name(), Some(*name));
        assert_eq!(entry.inode, FIRST_FILE_INODE + i as u32);
        assert_eq!(volume.file_size(i), Ok(10 * (i as u64 + 1)));
    }
    let listed: Vec<_> = volume
        .root_entries()
        .unwrap()
        .into_iter()
        .map(|e| e.name().unwrap().to_owned())
        .collect();
    assert_eq!(listed, names);
    assert_eq!(volume.entry(names.len()), Err(Error::NoSuchEntry));
}

#[test]
fn out_of_range_records_are_not_found() {
    let image = ImageBuilder::new(1024).file("x", [1u8]).build().unwrap();
    let volume = Volume::mount(image).unwrap();
    assert_eq!(volume.inode(0), Err(Error::NoSuchEntry));
    assert_eq!(volume.inode(7697), Err(Error::NoSuchEntry));
    // In range, but never written.
    assert_eq!(volume.inode(FIRST_FILE_INODE + 1), Err(Error::NoSuchEntry));
}

#[test]
fn malformed_records_are_corruption() {
    let mut disk = ImageBuilder::new(1024)
        .file("first", [1u8])
        .file("second", [2u8])
        .build()
        .unwrap();
    let root_block = Volume::mount(&disk).unwrap().root().unwrap().direct(0);
    // rec_len of "first", the record at byte 44.
    disk.write(block_offset(root_block) + 44 + 4, &0u16.to_le_bytes())
        .unwrap();
    let volume = Volume::mount(&disk).unwrap();
    assert_eq!(
        volume.entry(0),
        Err(Error::FilesystemCorrupted("Zero-length directory record"))
    );
    assert_eq!(
        volume.root_entries(),
        Err(Error::FilesystemCorrupted("Zero-length directory record"))
    );

    disk.write(block_offset(root_block) + 44 + 4, &2000u16.to_le_bytes())
        .unwrap();
    let volume = Volume::mount(&disk).unwrap();
    assert_eq!(
        volume.entry(1),
        Err(Error::FilesystemCorrupted("Directory record overruns block"))
    );
}

#[test]
fn sector_failure_propagates() {
    let disk = ImageBuilder::new(1024)
        .file("song", random_bytes(4, 3000))
        .build()
        .unwrap();
    let data_block = Volume::mount(&disk)
        .unwrap()
        .inode(FIRST_FILE_INODE)
        .unwrap()
        .direct(1);
    let volume = Volume::mount(FaultyDisk {
        inner: disk,
        bad: Sector(block_offset(data_block) / 512 + 1),
    })
    .unwrap();

    let mut buf = [0u8; CHUNK_SIZE];
    // Chunks 4 and 5 live in the first sector of block 1, 6 and 7 in the
    // failing one.
    assert!(volume.read_chunk(0, 5, &mut buf).is_ok());
    assert_eq!(volume.read_chunk(0, 6, &mut buf), Err(Error::IOError));
}

#[test]
fn directories_are_not_files() {
    let volume = Volume::mount(ImageBuilder::new(1024).build().unwrap()).unwrap();
    let root = volume.root().unwrap();
    assert_eq!(root.ftype, FileType::Directory);
    let mut buf = [0u8; CHUNK_SIZE];
    assert_eq!(
        read_chunk(volume.disk(), &root, 0, &mut buf),
        Err(Error::IsDirectory)
    );
}

#[test]
fn triple_indirect_is_unsupported() {
    let inode = Inode {
        ino: 12,
        ftype: FileType::RegularFile,
        size: u64::MAX,
        blocks: [0; 15],
    };
    let chunk = ((12 + 256 + 256 * 256) * BLOCK_SIZE / CHUNK_SIZE) as u64;
    let mut buf = [0u8; CHUNK_SIZE];
    assert_eq!(
        read_chunk(&MemDisk::new(0), &inode, chunk, &mut buf),
        Err(Error::NotSupportedOperation)
    );
    // The last double-indirect chunk is a hole.
    let hole = read_chunk(&MemDisk::new(0), &inode, chunk - 1, &mut buf);
    assert!(hole.is_ok());
    assert_eq!(buf, [0u8; CHUNK_SIZE]);
}

#[test]
fn image_file_on_host() {
    let contents = random_bytes(5, 5000);
    let image = ImageBuilder::new(1024)
        .file("track", contents.clone())
        .into_image()
        .unwrap();
    let path = std::env::temp_dir().join(format!("extfs-{}.img", std::process::id()));
    std::fs::write(&path, image).unwrap();

    let disk = FileDisk::open(&path).unwrap();
    assert_eq!(disk.sector_count(), 2048);
    let volume = Volume::mount(disk).unwrap();
    let mut buf = [0u8; CHUNK_SIZE];
    let remaining = volume.read_chunk(0, 19, &mut buf).unwrap();
    assert_eq!(remaining, 0);
    assert_eq!(&buf[..5000 - 19 * 256], &contents[19 * 256..]);
    std::fs::remove_file(&path).unwrap();
}

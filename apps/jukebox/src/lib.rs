//! # Jukebox: streaming audio off an ext2 volume on minos.
//!
//! Two kernel threads cooperate over a double buffer:
//!
//! - the **loader** streams the current file of the playlist chunk by chunk
//!   and fills whichever buffer is free,
//! - the **player** drains filled buffers into an [`AudioSink`] one sample
//!   at a time, yielding after every sample.
//!
//! Each buffer is guarded by its own [`Mutex`]. Two counting semaphores,
//! `empty` (initially 2) and `full` (initially 0), order the hand-off so
//! the player never plays a buffer before the loader filled it and the
//! loader never overwrites a buffer the player has not drained.
//!
//! The playlist is the flat listing of the volume's root directory. It
//! advances to the next entry when a file ends, wrapping around after the
//! last one, and can be moved with [`Jukebox::command`].
use bedrock::SpinLock;
use extfs::{CHUNK_SIZE, ChunkCursor, SectorReader, Volume};
use log::{debug, info, warn};
use minos::{
    Kernel, KernelError, ThreadBuilder, Tid,
    sync::{Mutex, Semaphore},
};
use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

/// Stack budget of the player thread.
pub const PLAYER_STACK: usize = 10;
/// Stack budget of the loader thread.
pub const LOADER_STACK: usize = 468;
/// Stack budget of the statistics thread of the host binary.
pub const STATS_STACK: usize = 80;

/// Errors of the jukebox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The volume lists no files.
    EmptyPlaylist,
    /// The storage layer failed.
    Storage(extfs::Error),
    /// The kernel refused to create a thread or stopped.
    Kernel(KernelError),
}

impl From<extfs::Error> for Error {
    fn from(e: extfs::Error) -> Self {
        Error::Storage(e)
    }
}

impl From<KernelError> for Error {
    fn from(e: KernelError) -> Self {
        Error::Kernel(e)
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::EmptyPlaylist => write!(f, "the volume lists no files"),
            Error::Storage(e) => write!(f, "storage: {e}"),
            Error::Kernel(e) => write!(f, "kernel: {e}"),
        }
    }
}

impl std::error::Error for Error {}

/// Where the samples go.
pub trait AudioSink: Send {
    /// Outputs one unsigned 8-bit sample.
    fn play(&mut self, sample: u8);

    /// Called after every drained buffer.
    fn flush(&mut self) {}
}

/// Playlist commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Skip to the next file.
    Next,
    /// Go back to the previous file.
    Previous,
}

/// Settings of a [`Jukebox`].
#[derive(Debug, Clone, Copy, Default)]
pub struct JukeboxConfig {
    /// Listed index of the first file.
    pub start: usize,
    /// Stop after this many files have been loaded to the end. `None` plays
    /// forever.
    pub plays: Option<usize>,
}

/// What is playing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Status {
    /// Listed index of the file being loaded.
    pub index: usize,
    /// Its name.
    pub name: String,
    /// Its size in bytes.
    pub size: u64,
    /// Bytes of it not loaded yet.
    pub remaining: u64,
    /// Files loaded to the end so far.
    pub played: usize,
}

impl core::fmt::Display for Status {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        writeln!(f, "Size: {}", self.size)?;
        writeln!(f, "remaining: {}", self.remaining)?;
        write!(f, "{} ({})", self.name, self.index)
    }
}

struct Buffer {
    data: [u8; CHUNK_SIZE],
    len: usize,
    last: bool,
}

impl Buffer {
    const fn new() -> Self {
        Self {
            data: [0; CHUNK_SIZE],
            len: 0,
            last: false,
        }
    }
}

/// The shared state of the loader and the player.
pub struct Jukebox<D: SectorReader> {
    kernel: Arc<Kernel>,
    volume: Volume<D>,
    plays: Option<usize>,
    count: usize,
    buffers: [Mutex<Buffer>; 2],
    empty: Semaphore,
    full: Semaphore,
    selection: AtomicUsize,
    skip: AtomicBool,
    status: SpinLock<Status>,
}

impl<D: SectorReader + Send + Sync + 'static> Jukebox<D> {
    /// Prepares to play the root directory of `volume`.
    pub fn new(
        kernel: &Arc<Kernel>,
        volume: Volume<D>,
        config: JukeboxConfig,
    ) -> Result<Arc<Self>, Error> {
        let count = volume.entry_count()?;
        if count == 0 {
            return Err(Error::EmptyPlaylist);
        }
        info!("jukebox: {count} files on the volume");
        Ok(Arc::new(Self {
            kernel: kernel.clone(),
            volume,
            plays: config.plays,
            count,
            buffers: [Mutex::new(kernel, Buffer::new()), Mutex::new(kernel, Buffer::new())],
            empty: Semaphore::new(kernel, 2),
            full: Semaphore::new(kernel, 0),
            selection: AtomicUsize::new(config.start % count),
            skip: AtomicBool::new(false),
            status: SpinLock::new(Status::default()),
        }))
    }

    /// Creates the player and then the loader thread.
    ///
    /// The player is created first, so it has the higher priority.
    pub fn spawn(self: &Arc<Self>, sink: impl AudioSink + 'static) -> Result<(Tid, Tid), Error> {
        let jukebox = self.clone();
        let player = ThreadBuilder::new("player")
            .stack(PLAYER_STACK)
            .spawn(&self.kernel, move || jukebox.play(sink))?;
        let mut loader = Loader {
            jukebox: self.clone(),
            cursor: None,
            played: 0,
        };
        let loader = ThreadBuilder::new("loader")
            .stack(LOADER_STACK)
            .spawn(&self.kernel, move || loader.run())?;
        Ok((player, loader))
    }

    /// Number of files in the playlist.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether the playlist is empty. Never true for a constructed jukebox.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// The mounted volume.
    pub fn volume(&self) -> &Volume<D> {
        &self.volume
    }

    /// Moves the playlist. The loader switches files before it fills the
    /// next buffer; buffers already filled still play.
    ///
    /// Touches only atomics, so any host thread may call it.
    pub fn command(&self, command: Command) {
        let count = self.count;
        let step = |i: usize| match command {
            Command::Next => (i + 1) % count,
            Command::Previous => (i + count - 1) % count,
        };
        let _ = self
            .selection
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |i| Some(step(i)));
        self.skip.store(true, Ordering::SeqCst);
        debug!("jukebox: {command:?}");
    }

    /// A snapshot of what is playing.
    pub fn status(&self) -> Status {
        self.status.with(|status| status.clone())
    }

    /// Moves the selection to the next file, wrapping after the last one.
    fn advance(&self) {
        let count = self.count;
        let _ = self
            .selection
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |i| Some((i + 1) % count));
    }

    /// The player thread.
    fn play(&self, mut sink: impl AudioSink) {
        let mut read = 0;
        loop {
            self.full.wait();
            let buffer = self.buffers[read].lock();
            for &sample in &buffer.data[..buffer.len] {
                sink.play(sample);
                self.kernel.yield_now();
            }
            let last = buffer.last;
            buffer.unlock();
            sink.flush();
            self.empty.signal();
            if last {
                info!("jukebox: done");
                self.kernel.power_off();
            }
            read = (read + 1) % 2;
        }
    }
}

/// The loader thread's own state.
struct Loader<D: SectorReader> {
    jukebox: Arc<Jukebox<D>>,
    cursor: Option<ChunkCursor>,
    played: usize,
}

impl<D: SectorReader + Send + Sync + 'static> Loader<D> {
    fn run(&mut self) {
        let jukebox = self.jukebox.clone();
        let mut write = 0;
        loop {
            jukebox.empty.wait();
            let mut buffer = jukebox.buffers[write].lock();
            self.fill(&mut buffer);
            let last = buffer.last;
            buffer.unlock();
            jukebox.full.signal();
            if last {
                loop {
                    jukebox.kernel.block();
                }
            }
            write = (write + 1) % 2;
        }
    }

    /// Opens the selected file and publishes it in the status.
    fn open(&self) -> Result<ChunkCursor, extfs::Error> {
        let jukebox = &self.jukebox;
        let index = jukebox.selection.load(Ordering::SeqCst);
        let cursor = ChunkCursor::open(&jukebox.volume, index)?;
        let name = jukebox.volume.entry_name(index)?;
        info!("jukebox: loading {name} ({} bytes)", cursor.size());
        let played = self.played;
        jukebox.status.with(|status| {
            *status = Status {
                index,
                name,
                size: cursor.size(),
                remaining: cursor.size(),
                played,
            }
        });
        Ok(cursor)
    }

    /// Reads the next chunk of the current file into `buffer`, opening the
    /// selected file first if none is open.
    ///
    /// Returns the bytes of the file left after the chunk, or `None` if the
    /// file was already read to the end.
    fn next_chunk(&mut self, buffer: &mut Buffer) -> Result<Option<u64>, extfs::Error> {
        let cursor = match &mut self.cursor {
            Some(cursor) => cursor,
            None => {
                let cursor = self.open()?;
                self.cursor.insert(cursor)
            }
        };
        match cursor.next_chunk(&self.jukebox.volume, &mut buffer.data)? {
            Some(valid) => {
                buffer.len = valid;
                Ok(Some(cursor.remaining()))
            }
            None => Ok(None),
        }
    }

    /// Records that the current file was loaded to the end and moves on.
    fn finish(&mut self, buffer: &mut Buffer) {
        self.played += 1;
        self.cursor = None;
        let played = self.played;
        self.jukebox.status.with(|status| status.played = played);
        if self.jukebox.plays.is_some_and(|plays| played >= plays) {
            buffer.last = true;
        } else {
            self.jukebox.advance();
        }
    }

    /// Fills `buffer` with the next chunk of the playlist.
    fn fill(&mut self, buffer: &mut Buffer) {
        buffer.len = 0;
        buffer.last = false;
        let mut failures = 0;
        loop {
            if self.jukebox.skip.swap(false, Ordering::SeqCst) {
                self.cursor = None;
            }
            match self.next_chunk(buffer) {
                Ok(Some(remaining)) => {
                    self.jukebox
                        .status
                        .with(|status| status.remaining = remaining);
                    if remaining == 0 {
                        self.finish(buffer);
                    }
                    return;
                }
                // An empty file.
                Ok(None) => {
                    self.finish(buffer);
                    if buffer.last {
                        return;
                    }
                }
                Err(e) => {
                    failures += 1;
                    let index = self.jukebox.selection.load(Ordering::SeqCst);
                    warn!("jukebox: cannot load file {index}: {e}");
                    self.cursor = None;
                    if failures >= self.jukebox.count {
                        warn!("jukebox: no file is playable");
                        buffer.last = true;
                        return;
                    }
                    self.jukebox.advance();
                }
            }
        }
    }
}

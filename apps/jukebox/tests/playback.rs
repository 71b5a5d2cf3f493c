use extfs::{CHUNK_SIZE, MemDisk, Volume, mkfs::ImageBuilder};
use jukebox::{AudioSink, Command, Error, Jukebox, JukeboxConfig};
use minos::{Kernel, KernelConfig, KernelError};
use rand::{Rng, SeedableRng, rngs::StdRng};
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

fn random_bytes(seed: u64, len: usize) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut out = vec![0u8; len];
    rng.fill(&mut out[..]);
    out
}

fn kernel(tick: Option<Duration>) -> Arc<Kernel> {
    Kernel::new(
        KernelConfig::builder()
            .set_tick_period(tick)
            .set_uptime_period(None)
            .set_idle_timeout(Duration::from_secs(10))
            .build(),
    )
}

fn volume(files: &[(&str, &[u8])]) -> Volume<MemDisk> {
    let mut builder = ImageBuilder::new(2048);
    for (name, contents) in files {
        builder.add_file(*name, *contents);
    }
    Volume::mount(builder.build().unwrap()).unwrap()
}

type Played = Arc<Mutex<Vec<u8>>>;

/// Records every sample.
struct Recorder(Played);

impl AudioSink for Recorder {
    fn play(&mut self, sample: u8) {
        self.0.lock().unwrap().push(sample);
    }
}

#[test]
fn plays_files_in_order() {
    let files = [
        random_bytes(1, 1000),
        random_bytes(2, 600),
        random_bytes(3, 2600),
    ];
    let volume = volume(&[("a", &files[0][..]), ("b", &files[1][..]), ("c", &files[2][..])]);
    let kernel = kernel(None);
    let jukebox = Jukebox::new(
        &kernel,
        volume,
        JukeboxConfig {
            start: 0,
            plays: Some(3),
        },
    )
    .unwrap();
    let played: Played = Default::default();
    jukebox.spawn(Recorder(played.clone())).unwrap();

    assert_eq!(kernel.start(), Ok(()));
    assert_eq!(*played.lock().unwrap(), files.concat());
    let status = jukebox.status();
    assert_eq!(status.played, 3);
    assert_eq!(status.name, "c");
    assert_eq!(status.remaining, 0);
}

/// The playlist wraps from the last file to the first, including the last
/// one in the rotation.
#[test]
fn playlist_wraps_over_every_file() {
    let files = [random_bytes(4, 300), random_bytes(5, 700)];
    let volume = volume(&[("first", &files[0][..]), ("last", &files[1][..])]);
    let kernel = kernel(None);
    let jukebox = Jukebox::new(
        &kernel,
        volume,
        JukeboxConfig {
            start: 1,
            plays: Some(3),
        },
    )
    .unwrap();
    let played: Played = Default::default();
    jukebox.spawn(Recorder(played.clone())).unwrap();

    assert_eq!(kernel.start(), Ok(()));
    assert_eq!(
        *played.lock().unwrap(),
        [&files[1][..], &files[0][..], &files[1][..]].concat()
    );
}

#[test]
fn empty_files_are_skipped() {
    let files = [random_bytes(6, 300), random_bytes(7, 100)];
    let volume = volume(&[
        ("a", &files[0][..]),
        ("silence", &[0u8; 0][..]),
        ("c", &files[1][..]),
    ]);
    let kernel = kernel(None);
    let jukebox = Jukebox::new(
        &kernel,
        volume,
        JukeboxConfig {
            start: 0,
            plays: Some(3),
        },
    )
    .unwrap();
    let played: Played = Default::default();
    jukebox.spawn(Recorder(played.clone())).unwrap();

    assert_eq!(kernel.start(), Ok(()));
    assert_eq!(*played.lock().unwrap(), files.concat());
}

/// Skips the current file on the first sample it plays.
struct Skipper {
    played: Played,
    jukebox: Arc<Jukebox<MemDisk>>,
}

impl AudioSink for Skipper {
    fn play(&mut self, sample: u8) {
        let mut played = self.played.lock().unwrap();
        if played.is_empty() {
            self.jukebox.command(Command::Next);
        }
        played.push(sample);
    }
}

/// `next` abandons the current file at a chunk boundary; the chunks
/// already loaded still play.
#[test]
fn next_command_skips_rest_of_file() {
    let files = [random_bytes(8, 4000), random_bytes(9, 900)];
    let volume = volume(&[("long", &files[0][..]), ("short", &files[1][..])]);
    let kernel = kernel(None);
    let jukebox = Jukebox::new(
        &kernel,
        volume,
        JukeboxConfig {
            start: 0,
            plays: Some(1),
        },
    )
    .unwrap();
    let played: Played = Default::default();
    jukebox
        .spawn(Skipper {
            played: played.clone(),
            jukebox: jukebox.clone(),
        })
        .unwrap();

    assert_eq!(kernel.start(), Ok(()));
    let played = played.lock().unwrap();
    let prefix = played.len() - files[1].len();
    assert!(prefix > 0 && prefix < files[0].len());
    assert_eq!(prefix % CHUNK_SIZE, 0);
    assert_eq!(&played[..prefix], &files[0][..prefix]);
    assert_eq!(&played[prefix..], &files[1][..]);
}

/// Preemption by the timer does not change what is played.
#[test]
fn timer_preemption_keeps_stream_intact() {
    let files = [random_bytes(10, 5000), random_bytes(11, 3000)];
    let volume = volume(&[("a", &files[0][..]), ("b", &files[1][..])]);
    let kernel = kernel(Some(Duration::from_millis(1)));
    let jukebox = Jukebox::new(
        &kernel,
        volume,
        JukeboxConfig {
            start: 0,
            plays: Some(2),
        },
    )
    .unwrap();
    let played: Played = Default::default();
    jukebox.spawn(Recorder(played.clone())).unwrap();

    assert_eq!(kernel.start(), Ok(()));
    assert_eq!(*played.lock().unwrap(), files.concat());
}

#[test]
fn empty_volume_has_no_playlist() {
    let volume = Volume::mount(ImageBuilder::new(1024).build().unwrap()).unwrap();
    let kernel = kernel(None);
    assert_eq!(
        Jukebox::new(&kernel, volume, JukeboxConfig::default()).err(),
        Some(Error::EmptyPlaylist)
    );
}

#[test]
fn thread_table_capacity_is_reported() {
    let kernel = kernel(None);
    let mut jukeboxes = Vec::new();
    for _ in 0..4 {
        let jukebox = Jukebox::new(
            &kernel,
            volume(&[("a", &[1u8, 2, 3][..])]),
            JukeboxConfig::default(),
        )
        .unwrap();
        jukebox.spawn(Recorder(Default::default())).unwrap();
        jukeboxes.push(jukebox);
    }
    let extra =
        Jukebox::new(&kernel, volume(&[("a", &[1u8][..])]), JukeboxConfig::default()).unwrap();
    assert_eq!(
        extra.spawn(Recorder(Default::default())).err(),
        Some(Error::Kernel(KernelError::CapacityExceeded))
    );
}

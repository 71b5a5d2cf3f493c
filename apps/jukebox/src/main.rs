//! Plays an ext2 image to stdout as unsigned 8-bit PCM.
//!
//! ```text
//! jukebox songs.img | aplay -f U8 -r 8000
//! ```
//!
//! Type `n` or `p` followed by enter to skip to the next or previous file.
use clap::Parser;
use extfs::{FileDisk, Volume};
use jukebox::{AudioSink, Command, Jukebox, JukeboxConfig, STATS_STACK};
use minos::{Kernel, KernelConfig, ThreadBuilder};
use std::{
    io::{BufRead, BufWriter, Stdout, Write},
    path::PathBuf,
    time::Duration,
};

#[derive(Parser)]
struct Args {
    /// Disk image to play
    image: PathBuf,

    /// Listed index of the first file
    #[arg(short, long, default_value_t = 0)]
    start: usize,

    /// Stop after this many files (plays forever by default)
    #[arg(long)]
    plays: Option<usize>,

    /// Timer tick period in milliseconds
    #[arg(long, default_value_t = 10)]
    tick_ms: u64,

    /// Print statistics every this many ticks
    #[arg(long, default_value_t = 500)]
    stats_ticks: u32,

    /// List the files and exit
    #[arg(short, long)]
    list: bool,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Writes log records to stderr.
struct StderrLogger;

static LOGGER: StderrLogger = StderrLogger;

impl log::Log for StderrLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            eprintln!("[{:<5}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

fn init_logger(verbose: u8) {
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(match verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    });
}

/// Sends samples to stdout.
struct StdoutSink(BufWriter<Stdout>);

impl AudioSink for StdoutSink {
    fn play(&mut self, sample: u8) {
        if let Err(e) = self.0.write_all(&[sample]) {
            log::warn!("stdout: {e}");
        }
    }

    fn flush(&mut self) {
        let _ = self.0.flush();
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logger(args.verbose);

    let volume = Volume::mount(FileDisk::open(&args.image)?)?;
    if args.list {
        for (i, entry) in volume.root_entries()?.iter().enumerate() {
            let size = volume.inode(entry.inode)?.size;
            println!("{i:>3} {size:>10} {}", String::from_utf8_lossy(&entry.name));
        }
        return Ok(());
    }

    let kernel = Kernel::new(
        KernelConfig::builder()
            .set_tick_period(Some(Duration::from_millis(args.tick_ms.max(1))))
            .build(),
    );
    let jukebox = Jukebox::new(
        &kernel,
        volume,
        JukeboxConfig {
            start: args.start,
            plays: args.plays,
        },
    )?;
    jukebox.spawn(StdoutSink(BufWriter::new(std::io::stdout())))?;

    let (k, jb) = (kernel.clone(), jukebox.clone());
    let stats_ticks = args.stats_ticks.max(1);
    ThreadBuilder::new("stats")
        .stack(STATS_STACK)
        .spawn(&kernel, move || {
            loop {
                k.sleep(stats_ticks);
                log::info!("{}\n{}", k.system_info(), jb.status());
            }
        })?;

    // Commands arrive on a plain host thread; they only touch atomics.
    let jb = jukebox.clone();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line.as_deref().map(str::trim) {
                Ok("n") => jb.command(Command::Next),
                Ok("p") => jb.command(Command::Previous),
                Ok(_) => {}
                Err(_) => break,
            }
        }
    });

    kernel.start()?;
    Ok(())
}

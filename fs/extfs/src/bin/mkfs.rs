use clap::Parser;
use extfs::{Volume, mkfs::ImageBuilder};
use std::fs;
use std::path::PathBuf;

#[derive(Parser)]
struct Args {
    /// Output disk image path
    #[arg(short, long)]
    output: PathBuf,

    /// Directory to import files from (non-recursive)
    #[arg(short, long)]
    dir: Option<PathBuf>,

    /// Image size in 1 KiB blocks
    #[arg(short, long, default_value_t = 8192)]
    blocks: u32,

    /// Leave all-zero blocks unallocated
    #[arg(long)]
    sparse: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let mut builder = ImageBuilder::new(args.blocks).sparse(args.sparse);

    if let Some(dir) = &args.dir {
        let mut paths = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() {
                paths.push(path);
            }
        }
        // Listing order is insertion order; keep it stable across hosts.
        paths.sort();
        for path in paths {
            let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
                println!("  skipping {path:?}: name is not UTF-8");
                continue;
            };
            let contents = fs::read(&path)?;
            println!("  {name} ({} bytes)", contents.len());
            builder.add_file(name, contents);
        }
    }

    let disk = builder.build()?;
    let volume = Volume::mount(&disk)?;
    let free = volume.superblock().free_blocks_count;
    fs::write(&args.output, disk.to_image())?;
    println!(
        "Created {:?}: {} blocks, {} files, {} blocks free",
        args.output,
        args.blocks,
        volume.entry_count()?,
        free
    );
    Ok(())
}

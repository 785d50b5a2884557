// # partsnap-restore
//
// Reconstructs a contiguous image from a multi-part snapshot folder,
// expanding zero-length sentinel parts along the way.

use clap::Parser;
use partsnap::{parse_size, FileBlockCopier, RestoreEngine, RestoreOptions, Result};
use std::path::PathBuf;

/// Restore a multi-part backup into a file or device.
#[derive(Debug, Parser)]
#[command(name = "partsnap-restore", version, about)]
struct Args {
    /// Folder containing the multi-part backup (a specific snapshot, or the
    /// backup root when snapshots are disabled)
    backup: PathBuf,

    /// Destination file or device
    dest: PathBuf,

    /// Block size for copying, in dd-style notation (e.g. 512, 64k, 1m)
    #[arg(short = 'b', long = "block-size", default_value = "1m")]
    block_size: String,
}

fn main() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .init();

    let args = Args::parse();
    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let options = RestoreOptions {
        block_size: parse_size(&args.block_size)?,
    };

    let engine = RestoreEngine::new(FileBlockCopier, options)?;
    engine.run(&args.backup, &args.dest)?;

    println!("Restore completed");
    Ok(())
}

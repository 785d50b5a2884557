// # partsnap-backup
//
// Incrementally backs up a file or block device into a folder of fixed-size
// parts, with hard-link deduplicated snapshot rotation.

use clap::Parser;
use partsnap::{
    parse_size, BackupEngine, BackupOptions, DeviceRegistry, FileBlockCopier, Result,
};
use std::path::PathBuf;

/// Iteratively back up a file or device to a multi-part snapshot folder.
#[derive(Debug, Parser)]
#[command(name = "partsnap-backup", version, about)]
struct Args {
    /// Source file or device (a filesystem UUID with --uuid)
    source: String,

    /// Destination folder for the multi-part backup
    dest: PathBuf,

    /// Block size for copying and comparing files, in dd-style notation
    /// (e.g. 512, 64k, 1m)
    #[arg(short = 'b', long = "block-size", default_value = "1m")]
    block_size: String,

    /// Size of each part of the backup, in dd-style notation
    #[arg(short = 'p', long = "part-size", default_value = "100m")]
    part_size: String,

    /// Keep parts that contain all zeros at full size
    #[arg(short = 'k', long = "keep-null-parts")]
    keep_null_parts: bool,

    /// Number of snapshots to maintain; 0 disables snapshot rotation
    #[arg(short = 's', long = "snapshots", default_value_t = 4)]
    snapshots: usize,

    /// Treat the source as a filesystem UUID and resolve it to a device
    #[arg(short = 'u', long = "uuid")]
    uuid: bool,
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
    let options = BackupOptions {
        part_size: parse_size(&args.part_size)?,
        block_size: parse_size(&args.block_size)?,
        keep_null_parts: args.keep_null_parts,
        snapshot_count: args.snapshots,
    };

    let registry = DeviceRegistry::with_platform_resolvers();
    let source = registry.resolve_source(&args.source, args.uuid)?;

    let engine = BackupEngine::new(FileBlockCopier, options)?;
    let report = engine.run(&source, &args.dest)?;

    println!("Finished! Changed files: {}", report.changed_files);
    Ok(())
}

// Restore pipeline
// Streams the parts of a snapshot back into a contiguous destination,
// expanding zero-length sentinel parts from zeros at their block offsets.

use crate::copier::BlockCopier;
use crate::error::{BackupError, Result};
use crate::layout;
use crate::size::format_size;
use crate::speed::{SpeedMeter, DEFAULT_SPEED_SAMPLES};
use crate::status::StatusLine;
use std::fs;
use std::path::Path;
use tracing::info;

/// Tuning knobs for a restore run.
#[derive(Debug, Clone)]
pub struct RestoreOptions {
    /// Block size for copying. The backup's part size must be a multiple of
    /// it.
    pub block_size: u64,
}

/// Reconstructs a backed-up image from a snapshot directory.
pub struct RestoreEngine<C> {
    copier: C,
    options: RestoreOptions,
}

impl<C: BlockCopier> RestoreEngine<C> {
    pub fn new(copier: C, options: RestoreOptions) -> Result<Self> {
        if options.block_size == 0 {
            return Err(BackupError::InvalidArgument(
                "block size must be non-zero".to_string(),
            ));
        }
        Ok(Self { copier, options })
    }

    /// Streams every part of `backup_dir` into `dest` at its block offset.
    pub fn run(&self, backup_dir: &Path, dest: &Path) -> Result<()> {
        let parts = layout::parts_in_snapshot(backup_dir)?;
        if parts.is_empty() {
            return Err(BackupError::BackupCorrupt(format!(
                "no part files found in {}",
                backup_dir.display()
            )));
        }

        let part_size = self.deduce_part_size(backup_dir, &parts)?;
        let part_blocks = part_size / self.options.block_size;

        let mut meter = SpeedMeter::new(DEFAULT_SPEED_SAMPLES);
        let mut status = StatusLine::new();

        for (index, name) in parts.iter().enumerate() {
            meter.start_of_cycle();

            match meter.average() {
                Some(speed) => status.update(&format!(
                    "Restoring part {} ... speed: {}/sec",
                    index + 1,
                    format_size(speed as u64)
                )),
                None => status.update(&format!("Restoring part {} ...", index + 1)),
            }

            let part = backup_dir.join(name);
            let size = fs::metadata(&part)?.len();
            let seek_blocks = index as u64 * part_blocks;

            if size == 0 {
                // Zero-length sentinel: a full part of zeros.
                self.copier
                    .write_zeros(dest, self.options.block_size, part_blocks, seek_blocks)?;
                meter.end_of_cycle(part_size);
            } else {
                self.copier.copy(
                    &part,
                    dest,
                    self.options.block_size,
                    part_blocks,
                    0,
                    seek_blocks,
                )?;
                meter.end_of_cycle(size);
            }
        }

        status.finish();
        info!(parts = parts.len(), dest = %dest.display(), "restore completed");
        Ok(())
    }

    /// Determines the backup's part size from the first non-empty, non-last
    /// part and validates the sizing invariants of the whole snapshot.
    fn deduce_part_size(&self, backup_dir: &Path, parts: &[String]) -> Result<u64> {
        let mut part_size = None;

        for name in &parts[..parts.len() - 1] {
            let size = fs::metadata(backup_dir.join(name))?.len();
            if size == 0 {
                continue;
            }

            match part_size {
                None => part_size = Some(size),
                Some(expected) if size != expected => {
                    return Err(BackupError::BackupCorrupt(
                        "parts have inconsistent sizes".to_string(),
                    ));
                }
                Some(_) => {}
            }
        }

        let part_size = part_size.ok_or_else(|| {
            BackupError::BackupCorrupt(
                "could not deduce the part size: every part but the last is empty".to_string(),
            )
        })?;

        if part_size % self.options.block_size != 0 {
            return Err(BackupError::InvalidArgument(format!(
                "part size {} is not a multiple of block size {}; specify a compatible block size",
                part_size, self.options.block_size
            )));
        }

        let last = backup_dir.join(parts[parts.len() - 1].as_str());
        if fs::metadata(&last)?.len() > part_size {
            return Err(BackupError::BackupCorrupt(
                "last part is larger than the part size".to_string(),
            ));
        }

        Ok(part_size)
    }
}

// Backup pipeline
// Streams the source in part-sized chunks through two workers: a copier that
// produces `part_*.new` files and a comparator that dedups them against the
// seeded parts of the previous snapshot. Finalizes by renaming the
// in-progress snapshot and pruning surplus generations.

use crate::compare::PartComparator;
use crate::copier::BlockCopier;
use crate::error::{BackupError, Result};
use crate::layout;
use crate::size::format_size;
use crate::speed::{SpeedMeter, DEFAULT_SPEED_SAMPLES};
use crate::status::StatusLine;
use crossbeam::channel::{bounded, Receiver, Sender};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use tracing::{debug, info};

// Depth of the channel between the copy and compare workers. Bounds disk
// usage at two un-compared parts above steady state.
const QUEUE_DEPTH: usize = 2;

/// Tuning knobs for a backup run.
#[derive(Debug, Clone)]
pub struct BackupOptions {
    /// Size of each backup part in bytes. Must be a multiple of
    /// `block_size`.
    pub part_size: u64,
    /// Block size for copying and comparing files.
    pub block_size: u64,
    /// Keep parts that contain all zeros at full size instead of truncating
    /// them to zero-length sentinels.
    pub keep_null_parts: bool,
    /// Number of snapshot generations to retain. Zero disables snapshot
    /// rotation and writes parts directly into the backup root.
    pub snapshot_count: usize,
}

impl BackupOptions {
    fn validate(&self) -> Result<()> {
        if self.block_size == 0 || self.part_size == 0 {
            return Err(BackupError::InvalidArgument(
                "part size and block size must be non-zero".to_string(),
            ));
        }
        if self.part_size % self.block_size != 0 {
            return Err(BackupError::InvalidArgument(
                "part size must be an integer multiple of block size".to_string(),
            ));
        }
        Ok(())
    }
}

/// Outcome of a completed backup run.
#[derive(Debug)]
pub struct BackupReport {
    /// Parts produced by the copy worker, including the tail.
    pub total_parts: u64,
    /// Parts that differed from the previous snapshot plus parts pruned
    /// past the end of the source.
    pub changed_files: u64,
    /// Directory holding the finalized snapshot.
    pub snapshot: PathBuf,
}

/// Incremental part-based backup of a file or device into a snapshot
/// directory tree.
pub struct BackupEngine<C> {
    copier: C,
    options: BackupOptions,
}

impl<C: BlockCopier> BackupEngine<C> {
    pub fn new(copier: C, options: BackupOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self { copier, options })
    }

    /// Runs a full backup cycle of `source` into the backup root `root`.
    ///
    /// On failure the in-progress snapshot is left in place; a later run
    /// picks it up and finishes it.
    pub fn run(&self, source: &Path, root: &Path) -> Result<BackupReport> {
        let dest = self.setup_destination(root)?;

        let (tx, rx) = bounded::<(u64, PathBuf)>(QUEUE_DEPTH);

        let (copy_result, compare_result) = thread::scope(|scope| {
            let copy_worker = scope.spawn(|| self.copy_worker(source, &dest, tx));
            let compare_worker = scope.spawn(|| self.compare_worker(rx));

            let copied = copy_worker
                .join()
                .unwrap_or_else(|_| Err(BackupError::Internal("copy worker panicked".into())));
            let compared = compare_worker
                .join()
                .unwrap_or_else(|_| Err(BackupError::Internal("compare worker panicked".into())));
            (copied, compared)
        });

        let total_parts = copy_result?;
        let mut changed_files = compare_result?;

        changed_files += self.remove_excess_parts(&dest, total_parts)?;

        let snapshot = self.finalize(root, dest)?;
        info!(
            total_parts,
            changed_files,
            snapshot = %snapshot.display(),
            "backup finished"
        );

        Ok(BackupReport {
            total_parts,
            changed_files,
            snapshot,
        })
    }

    /// Picks (and if needed creates) the directory this run writes into.
    ///
    /// With snapshots enabled this resumes an existing in-progress snapshot,
    /// or creates a fresh one seeded with hard links to every part of the
    /// newest finalized snapshot so unchanged parts stay shared.
    fn setup_destination(&self, root: &Path) -> Result<PathBuf> {
        fs::create_dir_all(root)?;

        if self.options.snapshot_count == 0 {
            return Ok(root.to_path_buf());
        }

        let snapshots = layout::previous_snapshots(root)?;
        if let Some(incomplete) = layout::find_incomplete(&snapshots) {
            info!(
                snapshot = %incomplete.display(),
                "previous snapshot is incomplete, resuming it"
            );
            return Ok(incomplete.clone());
        }

        let dest = root.join(layout::IN_PROGRESS_DIR);
        fs::create_dir(&dest)?;

        if let Some(last) = snapshots.last() {
            info!(seed = %last.display(), "setting up new snapshot");
            for part in layout::parts_in_snapshot(last)? {
                fs::hard_link(last.join(&part), dest.join(&part))?;
            }
        } else {
            info!("setting up first snapshot");
        }

        Ok(dest)
    }

    /// Producer: copies the source part by part into `part_*.new` files and
    /// hands each one to the compare worker. Stops at the first empty or
    /// short part, which marks the end of the source.
    fn copy_worker(&self, source: &Path, dest: &Path, tx: Sender<(u64, PathBuf)>) -> Result<u64> {
        let part_blocks = self.options.part_size / self.options.block_size;
        let mut meter = SpeedMeter::new(DEFAULT_SPEED_SAMPLES);
        let mut status = StatusLine::new();
        let mut index = 0u64;
        let mut total_parts = 0u64;

        loop {
            meter.start_of_cycle();

            match meter.average() {
                Some(speed) => status.update(&format!(
                    "Copying part {} ... speed: {}/sec",
                    index + 1,
                    format_size(speed as u64)
                )),
                None => status.update(&format!("Copying part {} ...", index + 1)),
            }

            let new_part = layout::new_part_path(dest, index);
            let written = self.copier.copy(
                source,
                &new_part,
                self.options.block_size,
                part_blocks,
                index * part_blocks,
                0,
            )?;

            // An empty part means the previous one ended exactly at the end
            // of the source.
            if written == 0 {
                fs::remove_file(&new_part)?;
                break;
            }

            total_parts += 1;
            if tx.send((index, new_part)).is_err() {
                // The compare worker is gone; its error surfaces from join.
                break;
            }

            // A short part is the tail of the source.
            if written != self.options.part_size {
                break;
            }

            index += 1;
            meter.end_of_cycle(self.options.part_size);
        }

        status.finish();
        Ok(total_parts)
    }

    /// Consumer: dedups freshly copied parts against the seeded previous
    /// parts, in production order. Returns the number of changed parts.
    fn compare_worker(&self, rx: Receiver<(u64, PathBuf)>) -> Result<u64> {
        let comparator = PartComparator::new(self.options.block_size as usize);
        let mut changed_files = 0u64;

        for (index, new_part) in rx {
            if self.dedup_part(&comparator, index, &new_part)? {
                changed_files += 1;
            }
        }

        Ok(changed_files)
    }

    /// Decides whether the new part replaces, or is discarded in favor of,
    /// the previous snapshot's part at the same index. Returns true when the
    /// part changed.
    fn dedup_part(&self, comparator: &PartComparator, index: u64, new_part: &Path) -> Result<bool> {
        let is_zeros = comparator.is_all_zeros(new_part)?;
        let prev_part = new_part.with_extension("");

        if prev_part.exists() {
            if self.parts_identical(comparator, &prev_part, new_part, is_zeros)? {
                // The seeded link already represents this content; keep the
                // shared inode untouched.
                fs::remove_file(new_part)?;
                debug!(index, "part unchanged");
                return Ok(false);
            }

            // Detach this snapshot's link before replacing, so the previous
            // snapshot keeps its own copy.
            fs::remove_file(&prev_part)?;
        }

        fs::rename(new_part, &prev_part)?;
        debug!(index, "part changed");

        // Zero compaction only applies to full-size parts; an all-zero tail
        // keeps its real length. The truncation is safe because the inode is
        // now private to this snapshot.
        if !self.options.keep_null_parts
            && is_zeros
            && fs::metadata(&prev_part)?.len() == self.options.part_size
        {
            fs::File::create(&prev_part)?;
        }

        Ok(true)
    }

    fn parts_identical(
        &self,
        comparator: &PartComparator,
        prev_part: &Path,
        new_part: &Path,
        new_is_zeros: bool,
    ) -> Result<bool> {
        let prev_size = fs::metadata(prev_part)?.len();

        // A zero-length previous part is the sentinel for a full part of
        // zeros; a fresh all-zero part matches it without a byte compare.
        if !self.options.keep_null_parts && prev_size == 0 && new_is_zeros {
            return Ok(true);
        }

        comparator.are_identical(prev_part, new_part)
    }

    /// Unlinks parts past the end of the source, left over from a longer
    /// previous snapshot. Returns the number of parts removed.
    fn remove_excess_parts(&self, dest: &Path, first_index: u64) -> Result<u64> {
        let mut index = first_index;
        let mut removed = 0u64;

        loop {
            let part = layout::part_path(dest, index);
            if !part.exists() {
                break;
            }
            fs::remove_file(&part)?;
            removed += 1;
            index += 1;
        }

        if removed > 0 {
            debug!(removed, "pruned parts past the end of the source");
        }
        Ok(removed)
    }

    /// Renames the in-progress snapshot to its timestamped name and prunes
    /// snapshots beyond the retention count. No-op when rotation is
    /// disabled.
    fn finalize(&self, root: &Path, dest: PathBuf) -> Result<PathBuf> {
        if self.options.snapshot_count == 0 {
            return Ok(dest);
        }

        let snapshot = root.join(layout::snapshot_timestamp_name());
        fs::rename(&dest, &snapshot)?;

        self.remove_old_snapshots(root)?;
        Ok(snapshot)
    }

    fn remove_old_snapshots(&self, root: &Path) -> Result<()> {
        let snapshots = layout::previous_snapshots(root)?;
        if snapshots.len() <= self.options.snapshot_count {
            return Ok(());
        }

        info!("removing old snapshots");
        for old in &snapshots[..snapshots.len() - self.options.snapshot_count] {
            for part in layout::parts_in_snapshot(old)? {
                fs::remove_file(old.join(part))?;
            }
            remove_snapshot_dir(old);
        }

        Ok(())
    }
}

/// Removes an emptied snapshot directory, tolerating a lone `.DS_Store`
/// left behind by Finder: delete it and retry once, swallowing any residual
/// failure.
fn remove_snapshot_dir(dir: &Path) {
    if fs::remove_dir(dir).is_ok() {
        return;
    }

    let ds_store = dir.join(".DS_Store");
    if ds_store.exists() {
        let _ = fs::remove_file(&ds_store);
        let _ = fs::remove_dir(dir);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::copier::FileBlockCopier;
    use tempfile::tempdir;

    fn engine(options: BackupOptions) -> BackupEngine<FileBlockCopier> {
        BackupEngine::new(FileBlockCopier, options).unwrap()
    }

    fn options() -> BackupOptions {
        BackupOptions {
            part_size: 2048,
            block_size: 512,
            keep_null_parts: false,
            snapshot_count: 4,
        }
    }

    #[test]
    fn rejects_misaligned_part_size() {
        let result = BackupEngine::new(
            FileBlockCopier,
            BackupOptions {
                part_size: 2000,
                block_size: 512,
                keep_null_parts: false,
                snapshot_count: 4,
            },
        );
        assert!(matches!(result, Err(BackupError::InvalidArgument(_))));
    }

    #[test]
    fn rejects_zero_block_size() {
        let result = BackupEngine::new(
            FileBlockCopier,
            BackupOptions {
                part_size: 2048,
                block_size: 0,
                keep_null_parts: false,
                snapshot_count: 4,
            },
        );
        assert!(matches!(result, Err(BackupError::InvalidArgument(_))));
    }

    #[test]
    fn destination_is_root_when_snapshots_disabled() {
        let root = tempdir().unwrap();
        let engine = engine(BackupOptions {
            snapshot_count: 0,
            ..options()
        });

        let dest = engine.setup_destination(root.path()).unwrap();
        assert_eq!(dest, root.path());
    }

    #[test]
    fn first_snapshot_starts_empty() {
        let root = tempdir().unwrap();
        let engine = engine(options());

        let dest = engine.setup_destination(root.path()).unwrap();
        assert_eq!(dest, root.path().join(layout::IN_PROGRESS_DIR));
        assert!(layout::parts_in_snapshot(&dest).unwrap().is_empty());
    }

    #[test]
    fn existing_in_progress_snapshot_is_resumed() {
        let root = tempdir().unwrap();
        let in_progress = root.path().join(layout::IN_PROGRESS_DIR);
        fs::create_dir(&in_progress).unwrap();
        fs::write(in_progress.join("part_00000000"), vec![1u8; 16]).unwrap();

        let engine = engine(options());
        let dest = engine.setup_destination(root.path()).unwrap();
        assert_eq!(dest, in_progress);
    }

    #[test]
    fn new_snapshot_is_seeded_with_hard_links() {
        let root = tempdir().unwrap();
        let last = root.path().join("snapshot-2024-05-01-090000");
        fs::create_dir(&last).unwrap();
        fs::write(last.join("part_00000000"), vec![1u8; 16]).unwrap();
        fs::write(last.join("part_00000001"), vec![2u8; 16]).unwrap();
        fs::write(last.join("notes.txt"), b"not a part").unwrap();

        let engine = engine(options());
        let dest = engine.setup_destination(root.path()).unwrap();

        let parts = layout::parts_in_snapshot(&dest).unwrap();
        assert_eq!(parts, vec!["part_00000000", "part_00000001"]);

        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            let seeded = fs::metadata(dest.join("part_00000000")).unwrap();
            let original = fs::metadata(last.join("part_00000000")).unwrap();
            assert_eq!(seeded.ino(), original.ino());
        }
    }

    #[test]
    fn excess_parts_are_removed_from_first_unused_index() {
        let dir = tempdir().unwrap();
        for i in 0..5u64 {
            fs::write(layout::part_path(dir.path(), i), vec![0u8; 8]).unwrap();
        }

        let engine = engine(options());
        let removed = engine.remove_excess_parts(dir.path(), 2).unwrap();

        assert_eq!(removed, 3);
        assert!(layout::part_path(dir.path(), 1).exists());
        assert!(!layout::part_path(dir.path(), 2).exists());
    }

    #[test]
    fn snapshot_dir_removal_tolerates_ds_store() {
        let root = tempdir().unwrap();
        let dir = root.path().join("snapshot-2024-05-01-090000");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join(".DS_Store"), b"junk").unwrap();

        remove_snapshot_dir(&dir);
        assert!(!dir.exists());
    }
}

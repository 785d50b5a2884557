// Snapshot layout
// Naming and enumeration of part files and snapshot directories. Part files
// are `part_NNNNNNNN` with a zero-padded 8-digit index; snapshots are either
// the transient `snapshot-inprogress` or a timestamped `snapshot-*` name.

use crate::error::Result;
use chrono::Local;
use once_cell::sync::Lazy;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the transient snapshot a backup writes into before finalizing.
pub const IN_PROGRESS_DIR: &str = "snapshot-inprogress";

static SNAPSHOT_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^snapshot-\d{4}-\d{2}-\d{2}-\d{6}$").expect("snapshot name regex"));

/// Path of the backup part at `index` inside `dir`.
pub fn part_path(dir: &Path, index: u64) -> PathBuf {
    dir.join(format!("part_{:08}", index))
}

/// Path of a freshly copied part at `index` that has not yet been compared
/// against an existing part.
pub fn new_part_path(dir: &Path, index: u64) -> PathBuf {
    dir.join(format!("part_{:08}.new", index))
}

/// True for canonical part file names: 13 chars, `part_` prefix, 8 digits.
pub fn is_part_file(name: &str) -> bool {
    name.len() == 13
        && name.starts_with("part_")
        && name.as_bytes()[5..].iter().all(|b| b.is_ascii_digit())
}

/// Index encoded in a part file name, when it is one.
pub fn part_index(name: &str) -> Option<u64> {
    if is_part_file(name) {
        name[5..].parse().ok()
    } else {
        None
    }
}

/// True for snapshot directory names, finalized or in-progress.
pub fn is_snapshot_dir(name: &str) -> bool {
    name == IN_PROGRESS_DIR || SNAPSHOT_NAME.is_match(name)
}

/// Timestamped name a finished snapshot is renamed to.
pub fn snapshot_timestamp_name() -> String {
    format!("snapshot-{}", Local::now().format("%Y-%m-%d-%H%M%S"))
}

/// Sorted part file names in a snapshot directory. Foreign entries are
/// ignored.
pub fn parts_in_snapshot(dir: &Path) -> Result<Vec<String>> {
    let mut parts: Vec<String> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| is_part_file(name))
        .collect();
    parts.sort();
    Ok(parts)
}

/// Sorted snapshot directories under the backup root. Lexicographic order
/// of the timestamped names is chronological order.
pub fn previous_snapshots(root: &Path) -> Result<Vec<PathBuf>> {
    let mut names: Vec<String> = fs::read_dir(root)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| is_snapshot_dir(name))
        .collect();
    names.sort();
    Ok(names.into_iter().map(|name| root.join(name)).collect())
}

/// The in-progress snapshot among `snapshots`, if one exists.
pub fn find_incomplete(snapshots: &[PathBuf]) -> Option<&PathBuf> {
    snapshots
        .iter()
        .find(|path| path.file_name().map_or(false, |name| name == IN_PROGRESS_DIR))
}

// Block copier
// Moves data between files and devices at block granularity with dd-style
// skip/oseek offsets and a count limit. The native implementation uses
// positioned I/O; an external-dd delegate is available for platforms where
// dd's device handling is preferred.

use crate::error::{BackupError, Result};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::process::Command;

/// Copies block-aligned regions between files or devices.
///
/// The contract mirrors dd: at most `count * block_size` bytes are read from
/// `src` starting at block offset `skip_blocks` and written into `dst`
/// starting at block offset `seek_blocks`. When the source is exhausted
/// early the written output is shorter, possibly empty; callers rely on the
/// shorter output to detect the tail of the source.
pub trait BlockCopier: Send + Sync {
    /// Copies up to `count` blocks and returns the number of bytes written.
    fn copy(
        &self,
        src: &Path,
        dst: &Path,
        block_size: u64,
        count: u64,
        skip_blocks: u64,
        seek_blocks: u64,
    ) -> Result<u64>;

    /// Writes `count` blocks of zero bytes into `dst` at block offset
    /// `seek_blocks`, as when expanding a zero run during restore.
    fn write_zeros(&self, dst: &Path, block_size: u64, count: u64, seek_blocks: u64)
        -> Result<u64>;
}

/// Native copier using positioned reads and writes.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileBlockCopier;

impl FileBlockCopier {
    fn open_output(dst: &Path, offset: u64) -> Result<File> {
        let mut file = OpenOptions::new().write(true).create(true).open(dst)?;
        file.seek(SeekFrom::Start(offset))?;
        Ok(file)
    }

    // Matches dd's default truncation of a regular output file at the end of
    // the written region. Block devices are left alone.
    fn trim_output(file: &File, end: u64) -> Result<()> {
        let metadata = file.metadata()?;
        if metadata.is_file() && metadata.len() > end {
            file.set_len(end)?;
        }
        Ok(())
    }
}

/// Reads until `buf` is full or the stream ends, returning the bytes read.
fn read_block(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

impl BlockCopier for FileBlockCopier {
    fn copy(
        &self,
        src: &Path,
        dst: &Path,
        block_size: u64,
        count: u64,
        skip_blocks: u64,
        seek_blocks: u64,
    ) -> Result<u64> {
        let mut source = File::open(src)?;
        source.seek(SeekFrom::Start(skip_blocks * block_size))?;

        let seek_offset = seek_blocks * block_size;
        let mut output = Self::open_output(dst, seek_offset)?;

        let mut buf = vec![0u8; block_size as usize];
        let mut written = 0u64;

        for _ in 0..count {
            let n = read_block(&mut source, &mut buf)?;
            if n == 0 {
                break;
            }

            output.write_all(&buf[..n])?;
            written += n as u64;

            if (n as u64) < block_size {
                break;
            }
        }

        Self::trim_output(&output, seek_offset + written)?;
        Ok(written)
    }

    fn write_zeros(
        &self,
        dst: &Path,
        block_size: u64,
        count: u64,
        seek_blocks: u64,
    ) -> Result<u64> {
        let seek_offset = seek_blocks * block_size;
        let mut output = Self::open_output(dst, seek_offset)?;

        let zeros = vec![0u8; block_size as usize];
        for _ in 0..count {
            output.write_all(&zeros)?;
        }

        let written = count * block_size;
        Self::trim_output(&output, seek_offset + written)?;
        Ok(written)
    }
}

/// Delegates copying to an external dd-compatible utility via
/// `bs=`/`count=`/`skip=`/`seek=`. A non-zero exit surfaces as a copy
/// failure carrying the child's stderr.
#[derive(Debug, Clone)]
pub struct DdBlockCopier {
    program: String,
    zero_device: String,
}

impl Default for DdBlockCopier {
    fn default() -> Self {
        Self {
            program: "dd".to_string(),
            zero_device: "/dev/zero".to_string(),
        }
    }
}

impl DdBlockCopier {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Self::default()
        }
    }

    fn run(
        &self,
        src: &Path,
        dst: &Path,
        block_size: u64,
        count: u64,
        skip_blocks: u64,
        seek_blocks: u64,
    ) -> Result<u64> {
        let output = Command::new(&self.program)
            .arg(format!("if={}", src.display()))
            .arg(format!("of={}", dst.display()))
            .arg(format!("bs={}", block_size))
            .arg(format!("count={}", count))
            .arg(format!("skip={}", skip_blocks))
            .arg(format!("seek={}", seek_blocks))
            .output()?;

        if !output.status.success() {
            return Err(BackupError::CopyFailed(format!(
                "{} exited with {}: {}",
                self.program,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        // dd truncates a regular output file at the end of the written
        // region, so the output length tells us how much landed there.
        let len = std::fs::metadata(dst)?.len();
        Ok(len.saturating_sub(seek_blocks * block_size))
    }
}

impl BlockCopier for DdBlockCopier {
    fn copy(
        &self,
        src: &Path,
        dst: &Path,
        block_size: u64,
        count: u64,
        skip_blocks: u64,
        seek_blocks: u64,
    ) -> Result<u64> {
        self.run(src, dst, block_size, count, skip_blocks, seek_blocks)
    }

    fn write_zeros(
        &self,
        dst: &Path,
        block_size: u64,
        count: u64,
        seek_blocks: u64,
    ) -> Result<u64> {
        self.run(
            Path::new(&self.zero_device),
            dst,
            block_size,
            count,
            0,
            seek_blocks,
        )
    }
}

// Size parsing and formatting
// Accepts the same human-readable size grammar as dd and renders byte counts
// for status output.

use crate::error::{BackupError, Result};

const KIB: u64 = 1024;
const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * 1024 * 1024;

/// Converts a human readable size value into an exact number of bytes,
/// using the same format as dd: a decimal, hex (`0x`) or octal (leading `0`)
/// number with an optional multiplier suffix. `b` is 512-byte sectors,
/// `k`/`m`/`g` are binary units and `w` is the host word size.
pub fn parse_size(input: &str) -> Result<u64> {
    let value = input.trim().to_ascii_lowercase();

    let (number_part, multiplier) = match value.as_bytes().last() {
        Some(b'b') => (&value[..value.len() - 1], 512),
        Some(b'k') => (&value[..value.len() - 1], KIB),
        Some(b'm') => (&value[..value.len() - 1], MIB),
        Some(b'g') => (&value[..value.len() - 1], GIB),
        Some(b'w') => (
            &value[..value.len() - 1],
            std::mem::size_of::<usize>() as u64,
        ),
        Some(_) => (value.as_str(), 1),
        None => return Err(BackupError::InvalidArgument("empty size".to_string())),
    };

    let number = if let Some(hex) = number_part.strip_prefix("0x") {
        u64::from_str_radix(hex, 16)
    } else if number_part.len() > 1 && number_part.starts_with('0') {
        u64::from_str_radix(&number_part[1..], 8)
    } else {
        number_part.parse::<u64>()
    }
    .map_err(|_| BackupError::InvalidArgument(format!("invalid size: {:?}", input)))?;

    number
        .checked_mul(multiplier)
        .ok_or_else(|| BackupError::InvalidArgument(format!("size overflows: {:?}", input)))
}

/// Returns a nicer human readable representation of the given size in bytes.
pub fn format_size(bytes: u64) -> String {
    if bytes < KIB {
        format!("{}b", bytes)
    } else if bytes < MIB {
        format!("{:.1}K", bytes as f64 / KIB as f64)
    } else if bytes < GIB {
        format!("{:.1}M", bytes as f64 / MIB as f64)
    } else {
        format!("{:.1}G", bytes as f64 / GIB as f64)
    }
}

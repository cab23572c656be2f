//! Shared parsing utilities for SLURM command output.
//!
//! Every scheduler query in slurmit asks for `|`-delimited output, so the
//! helpers here are the only place that knows about the delimiter and the
//! placeholder values SLURM prints for missing fields.

pub mod memory;
pub mod time;

pub use memory::format_memory_mb;
pub use time::{format_duration, parse_duration, parse_exit_code, parse_slurm_timestamp};

/// Field delimiter requested from every SLURM tool.
pub const DELIMITER: char = '|';

/// Placeholder values SLURM prints instead of an empty field.
const PLACEHOLDERS: [&str; 5] = ["-", "N/A", "Unknown", "None", "(null)"];

/// Filter helper for optional string fields.
/// Returns None if the string is empty or a placeholder value.
pub fn non_empty_string(s: &str) -> Option<String> {
    let trimmed = s.trim();
    if trimmed.is_empty() || PLACEHOLDERS.contains(&trimmed) {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Split a pipe-delimited line and validate field count.
pub fn split_delimited(line: &str, min_fields: usize) -> Result<Vec<&str>, String> {
    let fields: Vec<&str> = line.split(DELIMITER).map(str::trim).collect();
    if fields.len() < min_fields {
        return Err(format!(
            "Expected {} fields, got {}: {}",
            min_fields,
            fields.len(),
            line
        ));
    }
    Ok(fields)
}

/// Iterate over the non-blank lines of a command's output.
pub fn data_lines(output: &str) -> impl Iterator<Item = &str> {
    output.lines().filter(|line| !line.trim().is_empty())
}

//! Time parsing utilities for SLURM output.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use std::time::Duration;

/// Parse a SLURM timestamp (YYYY-MM-DDTHH:MM:SS or placeholder values).
///
/// squeue prints "N/A" and sacct prints "Unknown" for missing times;
/// both, along with "None" and empty strings, yield None.
pub fn parse_slurm_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() || s == "N/A" || s == "Unknown" || s == "None" {
        return None;
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .and_then(|dt| Utc.from_local_datetime(&dt).single())
}

/// Parse a duration in various formats.
///
/// Supports:
/// - D-HH:MM:SS (SLURM time limit with days)
/// - HH:MM:SS, MM:SS
/// - Seconds as integer
/// - Trailing milliseconds ("01:30:00.123") are dropped
///
/// Returns None for "UNLIMITED", "INVALID" or empty strings.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() || s == "UNLIMITED" || s == "INVALID" || s == "-" {
        return None;
    }
    let s = s.split('.').next().unwrap_or(s);

    // Check for day separator (D-HH:MM:SS)
    let (days, time_part) = match s.split_once('-') {
        Some((d, rest)) => (d.parse::<u64>().ok()?, rest),
        None => (0, s),
    };

    let time_parts: Vec<u64> = time_part
        .split(':')
        .map(|p| p.parse().ok())
        .collect::<Option<Vec<u64>>>()?;

    let seconds = match time_parts.as_slice() {
        [h, m, s] => h * 3600 + m * 60 + s,
        [m, s] => m * 60 + s,
        [s] => *s,
        _ => return None,
    };

    Some(Duration::from_secs(days * 86400 + seconds))
}

/// Parse exit code from SLURM format (exit_code:signal).
///
/// Returns None if the field is empty or not numeric.
pub fn parse_exit_code(s: &str) -> Option<i32> {
    s.trim().split(':').next().and_then(|v| v.parse().ok())
}

/// Format a duration as SLURM prints it (e.g., "1-02:30:00", "01:30:00", "05:30").
pub fn format_duration(duration: Duration) -> String {
    let seconds = duration.as_secs();
    let days = seconds / 86400;
    let hours = (seconds % 86400) / 3600;
    let mins = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if days > 0 {
        format!("{}-{:02}:{:02}:{:02}", days, hours, mins, secs)
    } else if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, mins, secs)
    } else {
        format!("{:02}:{:02}", mins, secs)
    }
}

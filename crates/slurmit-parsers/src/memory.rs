//! Memory formatting for sinfo output.

/// Format a sinfo memory column (bare megabytes) for display.
///
/// Values of at least 1024 MB become whole gigabytes, truncated rather
/// than rounded ("32000" -> "31G"); smaller values keep the "M" suffix.
/// Anything that is not an integer is returned unchanged.
pub fn format_memory_mb(s: &str) -> String {
    let trimmed = s.trim();
    match trimmed.parse::<u64>() {
        Ok(mb) if mb >= 1024 => format!("{}G", mb / 1024),
        Ok(mb) => format!("{}M", mb),
        Err(_) => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_memory_truncates() {
        assert_eq!(format_memory_mb("32000"), "31G");
        assert_eq!(format_memory_mb("1024"), "1G");
        assert_eq!(format_memory_mb("2047"), "1G");
        assert_eq!(format_memory_mb("512"), "512M");
    }

    #[test]
    fn test_format_memory_passthrough() {
        assert_eq!(format_memory_mb("N/A"), "N/A");
        assert_eq!(format_memory_mb("256G"), "256G");
    }
}

//! Shell quoting for commands sent to `sh`.

/// Quote a single shell word.
///
/// Words made only of characters that are never special to `sh` are
/// returned as-is so logged commands stay readable.
pub fn shell_quote(word: &str) -> String {
    let safe = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./=:,+@%".contains(c));
    if safe {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// Quote a path, keeping a leading `~` expandable by the remote shell.
pub fn quote_path(path: &str) -> String {
    if path == "~" {
        "\"$HOME\"".to_string()
    } else if let Some(rest) = path.strip_prefix("~/") {
        format!("\"$HOME\"/{}", shell_quote(rest))
    } else {
        shell_quote(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("logs/job_1.out"), "logs/job_1.out");
        assert_eq!(shell_quote("my dir"), "'my dir'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
        assert_eq!(shell_quote(""), "''");
    }

    #[test]
    fn test_quote_path_keeps_home_expandable() {
        assert_eq!(quote_path("~/slurmit/queue"), "\"$HOME\"/slurmit/queue");
        assert_eq!(quote_path("~"), "\"$HOME\"");
        assert_eq!(quote_path("/scratch/a b"), "'/scratch/a b'");
    }
}

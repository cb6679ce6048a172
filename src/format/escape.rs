//! Content-line escaping.
//!
//! A content line that starts with a marker prefix would be misread as
//! structure. Per FORMAT.md §5 a line is *dangerous* when stripping every
//! leading backslash leaves a marker prefix; escaping prepends exactly one
//! backslash to dangerous lines, and unescaping strips exactly one when
//! the remainder is still dangerous. The two operations are perfect
//! inverses at any nesting depth.

use super::constants::{EOF_MARKER, MAGIC, SECTION_PREFIX};

/// Returns true when a raw content line would be misread as structure at
/// any backslash-nesting depth.
pub fn is_dangerous_line(line: &str) -> bool {
    let rest = line.trim_start_matches('\\');
    rest.starts_with(SECTION_PREFIX) || rest.starts_with(MAGIC) || rest.starts_with(EOF_MARKER)
}

/// Escapes one content line for on-disk storage.
pub fn escape_line(line: &str) -> String {
    if is_dangerous_line(line) {
        format!("\\{}", line)
    } else {
        line.to_string()
    }
}

/// Reverses [`escape_line`]: strips one leading backslash when the
/// remainder is still dangerous, otherwise leaves the line alone.
pub fn unescape_line(line: &str) -> String {
    if let Some(rest) = line.strip_prefix('\\') {
        if is_dangerous_line(rest) {
            return rest.to_string();
        }
    }
    line.to_string()
}

/// Escapes every line of a content string.
pub fn escape_content(content: &str) -> String {
    content
        .split('\n')
        .map(escape_line)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Unescapes every line of a content string.
pub fn unescape_content(content: &str) -> String {
    content
        .split('\n')
        .map(unescape_line)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dangerous_lines_detected() {
        assert!(is_dangerous_line("#@section"));
        assert!(is_dangerous_line("#@"));
        assert!(is_dangerous_line("#!PFM/1.0"));
        assert!(is_dangerous_line("#!END"));
        assert!(is_dangerous_line("\\#@section"));
        assert!(is_dangerous_line("\\\\\\#!END"));
    }

    #[test]
    fn test_ordinary_lines_not_dangerous() {
        assert!(!is_dangerous_line(""));
        assert!(!is_dangerous_line("hello"));
        assert!(!is_dangerous_line("  #@indented is fine"));
        assert!(!is_dangerous_line("# comment"));
        assert!(!is_dangerous_line("#other"));
        assert!(!is_dangerous_line("#!OTHER"));
        assert!(!is_dangerous_line("\\ backslash then space"));
        assert!(!is_dangerous_line("\\#not a marker"));
    }

    #[test]
    fn test_escape_prepends_single_backslash() {
        assert_eq!(escape_line("#@fake"), "\\#@fake");
        assert_eq!(escape_line("#!END"), "\\#!END");
        assert_eq!(escape_line("#!PFM/1.0"), "\\#!PFM/1.0");
        assert_eq!(escape_line("plain"), "plain");
    }

    #[test]
    fn test_unescape_is_exact_inverse() {
        for line in ["#@fake", "#!END", "#!PFM/1.0", "\\#@nested", "plain", ""] {
            assert_eq!(unescape_line(&escape_line(line)), line, "line {:?}", line);
        }
    }

    #[test]
    fn test_roundtrip_at_every_depth() {
        // Content that is already n-deep escaped must survive another
        // escape/unescape cycle unchanged.
        let mut line = "#@section".to_string();
        for depth in 0..6 {
            assert_eq!(
                unescape_line(&escape_line(&line)),
                line,
                "depth {}",
                depth
            );
            line = format!("\\{}", line);
        }
    }

    #[test]
    fn test_unescape_leaves_unrelated_backslashes() {
        assert_eq!(unescape_line("\\foo"), "\\foo");
        assert_eq!(unescape_line("\\\\"), "\\\\");
        assert_eq!(unescape_line("C:\\path\\file"), "C:\\path\\file");
    }

    #[test]
    fn test_multiline_content() {
        let content = "safe\n#@danger\nalso safe\n\\#!END";
        let escaped = escape_content(content);
        assert_eq!(escaped, "safe\n\\#@danger\nalso safe\n\\\\#!END");
        assert_eq!(unescape_content(&escaped), content);
    }

    #[test]
    fn test_empty_and_newline_only_content() {
        assert_eq!(escape_content(""), "");
        assert_eq!(unescape_content(""), "");
        assert_eq!(escape_content("\n"), "\n");
        assert_eq!(unescape_content("\n"), "\n");
        assert_eq!(escape_content("\n\n\n"), "\n\n\n");
    }

    #[test]
    fn test_escape_is_not_idempotent_on_dangerous_lines() {
        // Double-escaping adds a second backslash; unescaping twice
        // recovers the original. This is why writers escape exactly once.
        let line = "#@fake";
        let twice = escape_line(&escape_line(line));
        assert_eq!(twice, "\\\\#@fake");
        assert_eq!(unescape_line(&unescape_line(&twice)), line);
    }
}

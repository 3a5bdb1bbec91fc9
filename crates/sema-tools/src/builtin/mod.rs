// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
pub mod ask_question;
pub mod bash;
pub mod edit_file;
pub mod exit_plan_mode;
pub mod glob;
pub mod grep;
pub mod notebook_edit;
pub mod read_file;
pub mod skill;
pub mod todo_write;
pub mod write_file;

use std::path::Path;

/// File mtime in milliseconds since the epoch.  `None` when the file is
/// missing or the platform withholds timestamps.
pub(crate) fn mtime_ms(path: &Path) -> Option<u64> {
    let meta = std::fs::metadata(path).ok()?;
    let mtime = meta.modified().ok()?;
    let since = mtime.duration_since(std::time::UNIX_EPOCH).ok()?;
    Some(since.as_millis() as u64)
}

/// Stale-write guard shared by the file mutation tools.  A file that already
/// exists must have been read by the same agent, and must not have changed on
/// disk since that read.
pub(crate) fn check_freshness(
    ctx: &crate::tool::ToolContext,
    path: &Path,
) -> Result<(), String> {
    if !path.exists() {
        return Ok(());
    }
    let Some(read_ts) = ctx.registry.read_timestamp(&ctx.agent_id, path) else {
        return Err(format!(
            "File has not been read yet: {}. Read it first before writing to it.",
            path.display()
        ));
    };
    match mtime_ms(path) {
        Some(mtime) if mtime > read_ts => Err(format!(
            "File has been modified since read, either by the user or a linter: {}. \
             Read it again before writing to it.",
            path.display()
        )),
        _ => Ok(()),
    }
}

/// Convert a shell glob to a [`regex::Regex`] anchored at both ends.
/// Supports `**` (any path segment run), `*` (within a segment), and `?`.
pub(crate) fn glob_to_regex(pattern: &str) -> Option<regex::Regex> {
    let mut re = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    // Swallow a following separator so `**/x` also matches `x`.
                    if chars.peek() == Some(&'/') {
                        chars.next();
                        re.push_str("(?:.*/)?");
                    } else {
                        re.push_str(".*");
                    }
                } else {
                    re.push_str("[^/]*");
                }
            }
            '?' => re.push_str("[^/]"),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');
    regex::Regex::new(&re).ok()
}

// ─── Test support ─────────────────────────────────────────────────────────────


// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glob_star_stays_within_segment() {
        let re = glob_to_regex("*.rs").unwrap();
        assert!(re.is_match("main.rs"));
        assert!(!re.is_match("src/main.rs"));
    }

    #[test]
    fn glob_doublestar_crosses_segments() {
        let re = glob_to_regex("**/*.rs").unwrap();
        assert!(re.is_match("main.rs"));
        assert!(re.is_match("src/deep/main.rs"));
        assert!(!re.is_match("src/deep/main.rs.bak"));
    }

    #[test]
    fn glob_question_mark_matches_single_char() {
        let re = glob_to_regex("a?.txt").unwrap();
        assert!(re.is_match("ab.txt"));
        assert!(!re.is_match("abc.txt"));
    }

    #[test]
    fn mtime_of_missing_file_is_none() {
        assert!(mtime_ms(Path::new("/nonexistent/definitely/missing")).is_none());
    }
}

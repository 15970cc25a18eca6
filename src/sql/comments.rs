use std::sync::LazyLock;

use regex::{Captures, Regex};

/// Quoted literals and bracketed identifiers first, so comment markers inside
/// them are matched as part of the literal and kept.
static COMMENT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"'(?:[^']|'')*'|"(?:[^"]|"")*"|\[[^\]]*\]|(--[^\n]*)|(/\*(?s:.*?)\*/)"#)
        .unwrap()
});

/// Remove `-- line` and `/* block */` comments.
pub fn strip_comments(sql: &str) -> String {
    let stripped = COMMENT_PATTERN.replace_all(sql, |caps: &Captures| {
        if caps.get(1).is_some() {
            String::new()
        } else if caps.get(2).is_some() {
            " ".to_string()
        } else {
            caps[0].to_string()
        }
    });
    stripped.trim().to_string()
}

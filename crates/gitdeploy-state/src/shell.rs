//! POSIX shell quoting for rendered remote commands.

/// Escape a value for use inside single quotes.
/// Replaces `'` with `'\''` (end quote, escaped quote, start quote).
pub fn escape_single_quote_content(value: &str) -> String {
    value.replace('\'', "'\\''")
}

/// Quote a value for shell execution (always quotes).
pub fn quote(value: &str) -> String {
    format!("'{}'", escape_single_quote_content(value))
}

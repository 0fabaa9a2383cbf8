/// Characters Discord treats as markdown.
const MARKDOWN_CHARS: &[char] = &['\\', '*', '_', '~', '`', '|', '>'];

/// Escapes markdown so user-provided names render literally.
pub fn escape_markdown(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if MARKDOWN_CHARS.contains(&c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Truncates to `limit` characters, marking the cut with an ellipsis.
pub fn cutoff_text(input: &str, limit: usize) -> String {
    if input.chars().count() <= limit {
        return input.to_string();
    }
    let mut out: String = input.chars().take(limit.saturating_sub(1)).collect();
    out.push('…');
    out
}

/// Cut off first, then escape, so escapes never get split.
pub fn display_name(input: &str, limit: usize) -> String {
    escape_markdown(&cutoff_text(input, limit))
}

/// Splits a prefix command's raw argument string on whitespace.
pub fn split_args(input: &str) -> Vec<String> {
    input.split_whitespace().map(str::to_string).collect()
}

/// Cut `s` to at most `max_chars` characters, marking the cut with `...`.
#[must_use]
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => {
            let truncated = &s[..idx];
            format!("{}...", truncated.trim_end())
        }
        None => s.to_string(),
    }
}

/// True when `s` holds nothing but whitespace.
pub fn is_blank(s: &str) -> bool {
    s.trim().is_empty()
}

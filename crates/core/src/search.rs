//! Free-text search sanitization for pattern filters.

/// Longest search term forwarded to the backend, in characters.
pub const MAX_SEARCH_CHARS: usize = 100;

/// Neutralize user search text before it is placed inside an `ilike` filter.
///
/// Backslash, `%` and `_` are escaped. Commas and parentheses delimit the
/// filter grammar and cannot be escaped, so they are dropped. Periods separate
/// filter operators and become spaces. An empty result means "no filter".
pub fn sanitize(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '\\' => escaped.push_str("\\\\"),
            '%' => escaped.push_str("\\%"),
            '_' => escaped.push_str("\\_"),
            ',' | '(' | ')' => {}
            '.' => escaped.push(' '),
            other => escaped.push(other),
        }
    }

    let mut term: String = escaped.trim().chars().take(MAX_SEARCH_CHARS).collect();
    // Truncation may split an escape pair.
    if trailing_backslashes(&term) % 2 == 1 {
        term.pop();
    }
    term.trim_end().to_string()
}

fn trailing_backslashes(term: &str) -> usize {
    term.chars().rev().take_while(|c| *c == '\\').count()
}

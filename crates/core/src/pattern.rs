//! Glob matching for model identifiers.

/// Match `text` against a pattern where `*` matches any run of characters.
///
/// `"*"` matches everything; patterns without `*` must match exactly.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if !pattern.contains('*') {
        return pattern == text;
    }

    let parts: Vec<&str> = pattern.split('*').collect();
    let (first, rest) = match parts.split_first() {
        Some(split) => split,
        None => return false,
    };
    let (last, middle) = match rest.split_last() {
        Some(split) => split,
        None => return pattern == text,
    };

    if !text.starts_with(first) {
        return false;
    }
    let mut remaining = &text[first.len()..];
    for part in middle {
        match remaining.find(part) {
            Some(idx) => remaining = &remaining[idx + part.len()..],
            None => return false,
        }
    }
    remaining.len() >= last.len() && remaining.ends_with(last)
}

/// Whether a pattern contains wildcards.
pub fn is_glob(pattern: &str) -> bool {
    pattern.contains('*')
}

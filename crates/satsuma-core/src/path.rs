/// Normalizes a user-supplied root folder into a safe relative path:
/// backslashes become separators, characters illegal in filenames are
/// stripped, every `..` occurrence is removed, and empty segments collapse
/// so the result carries no leading, trailing or duplicate separators.
pub fn sanitize_root(raw: &str) -> String {
    let normalized = raw.replace('\\', "/");
    let stripped: String = normalized
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | ':' | '"' | '|' | '?' | '*'))
        .collect();
    let no_traversal = stripped.replace("..", "");
    no_traversal
        .split('/')
        .filter(|segment| !segment.trim().is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Same character rules applied to a single path segment derived from
/// catalog node titles, so a hostile title cannot introduce separators or
/// traversal into an engine destination.
pub fn sanitize_segment(raw: &str) -> String {
    let stripped: String = raw
        .chars()
        .filter(|c| !matches!(c, '<' | '>' | ':' | '"' | '|' | '?' | '*' | '/' | '\\'))
        .collect();
    stripped.replace("..", "").trim().to_string()
}

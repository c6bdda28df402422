use similar::TextDiff;

/// Render a unified diff between two versions of a file, `a/<path>` vs
/// `b/<path>`, with the given number of context lines around each change.
///
/// Returns an empty string when the two sides are identical; the `---`/`+++`
/// header is only emitted when at least one hunk exists, which keeps
/// "no change" previews cheap to test for.
pub fn create_unified_diff(file_path: &str, old: &str, new: &str, context_lines: usize) -> String {
    if old == new {
        return String::new();
    }

    let diff = TextDiff::from_lines(old, new);
    diff.unified_diff()
        .context_radius(context_lines)
        .header(&format!("a/{file_path}"), &format!("b/{file_path}"))
        .to_string()
}

/// Right-strip every line of the input, preserving the line structure.
/// Used by whitespace-insensitive previews before diffing.
pub fn strip_trailing_whitespace(content: &str) -> String {
    content
        .split('\n')
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

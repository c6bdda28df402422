use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

static HUNK_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^@@ -(\d+)(?:,(\d+))? \+(\d+)(?:,(\d+))? @@").expect("hunk header regex")
});

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("patch contains no hunks")]
    Empty,
    #[error("malformed hunk header: {0}")]
    MalformedHeader(String),
    #[error("malformed hunk line: {0:?}")]
    MalformedLine(String),
    #[error("context mismatch at line {line}: expected {expected:?}, found {found:?}")]
    ContextMismatch {
        line: usize,
        expected: String,
        found: String,
    },
    #[error("hunk extends past end of file at line {0}")]
    OutOfBounds(usize),
}

/// One `@@ -a,b +c,d @@` section of a unified diff.
#[derive(Debug, Clone)]
pub struct Hunk {
    pub old_start: usize,
    pub old_len: usize,
    pub new_start: usize,
    pub new_len: usize,
    pub lines: Vec<HunkLine>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HunkLine {
    Context(String),
    Remove(String),
    Insert(String),
}

/// Parse the hunks out of a unified diff. `---`/`+++` file headers, `diff`
/// and `index` lines, and `\ No newline at end of file` markers are
/// tolerated and skipped; anything else outside a hunk is an error only if
/// it pretends to be a hunk header.
pub fn parse_unified_patch(patch: &str) -> Result<Vec<Hunk>, PatchError> {
    let mut hunks: Vec<Hunk> = Vec::new();

    for raw in patch.lines() {
        if raw.starts_with("@@") {
            let caps = HUNK_HEADER
                .captures(raw)
                .ok_or_else(|| PatchError::MalformedHeader(raw.to_string()))?;
            let num = |i: usize, default: usize| {
                caps.get(i)
                    .map(|m| m.as_str().parse::<usize>().unwrap_or(default))
                    .unwrap_or(default)
            };
            hunks.push(Hunk {
                old_start: num(1, 1),
                old_len: num(2, 1),
                new_start: num(3, 1),
                new_len: num(4, 1),
                lines: Vec::new(),
            });
            continue;
        }

        let Some(hunk) = hunks.last_mut() else {
            // Preamble: file headers and whatever a generator put above them.
            continue;
        };

        if raw.starts_with("--- ") || raw.starts_with("+++ ") {
            continue;
        }
        if raw.starts_with('\\') {
            // "\ No newline at end of file"
            continue;
        }
        match raw.chars().next() {
            Some(' ') => hunk.lines.push(HunkLine::Context(raw[1..].to_string())),
            Some('-') => hunk.lines.push(HunkLine::Remove(raw[1..].to_string())),
            Some('+') => hunk.lines.push(HunkLine::Insert(raw[1..].to_string())),
            // Some producers emit completely empty lines for empty context.
            None => hunk.lines.push(HunkLine::Context(String::new())),
            Some(_) => return Err(PatchError::MalformedLine(raw.to_string())),
        }
    }

    if hunks.is_empty() {
        return Err(PatchError::Empty);
    }
    Ok(hunks)
}

/// Apply parsed hunks to `content`. Context and removal lines must match the
/// live file exactly; any mismatch aborts the whole application.
pub fn apply_hunks(content: &str, hunks: &[Hunk]) -> Result<String, PatchError> {
    let mut lines: Vec<String> = content.split('\n').map(str::to_string).collect();
    let mut offset: isize = 0;

    for hunk in hunks {
        // Hunk starts are 1-based; a start of 0 means "top of file".
        let start = (hunk.old_start as isize - 1 + offset).max(0) as usize;
        let mut idx = start;
        let mut removed = 0isize;
        let mut inserted = 0isize;

        for line in &hunk.lines {
            match line {
                HunkLine::Context(expected) => {
                    let found = lines.get(idx).ok_or(PatchError::OutOfBounds(idx + 1))?;
                    if found != expected {
                        return Err(PatchError::ContextMismatch {
                            line: idx + 1,
                            expected: expected.clone(),
                            found: found.clone(),
                        });
                    }
                    idx += 1;
                }
                HunkLine::Remove(expected) => {
                    let found = lines.get(idx).ok_or(PatchError::OutOfBounds(idx + 1))?;
                    if found != expected {
                        return Err(PatchError::ContextMismatch {
                            line: idx + 1,
                            expected: expected.clone(),
                            found: found.clone(),
                        });
                    }
                    lines.remove(idx);
                    removed += 1;
                }
                HunkLine::Insert(text) => {
                    lines.insert(idx, text.clone());
                    idx += 1;
                    inserted += 1;
                }
            }
        }

        offset += inserted - removed;
    }

    Ok(lines.join("\n"))
}

/// Parse and apply in one go.
pub fn apply_unified_patch(content: &str, patch: &str) -> Result<String, PatchError> {
    let hunks = parse_unified_patch(patch)?;
    apply_hunks(content, &hunks)
}

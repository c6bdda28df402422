//! Path authorization: repo-root containment plus allow/deny pattern rules.
//!
//! Patterns are classified at construction time. A pattern written as
//! `r"…"` or `r'…'` is a regex matched against the whole repo-relative
//! path; anything else is a glob. Globs match segment-wise: `*`, `?` and
//! character classes stay within one path segment, `**` crosses segments,
//! and a single-segment pattern such as `*.py` matches the basename at any
//! depth. Deny patterns are configured with a leading `!` and always win.

use std::path::{Path, PathBuf};

use regex::Regex;

use super::{error::BrokerError, repo::RepoRef};
use utils::path::{normalize_lexically, resolve_under, to_repo_relative};

pub const ALLOWED_PATHS_ENV: &str = "FS_GIT_ALLOWED_PATHS";
pub const DENIED_PATHS_ENV: &str = "FS_GIT_DENIED_PATHS";

/// Join `path` onto the repo root and refuse anything that resolves outside
/// it. Returns the absolute path for the caller to write to.
pub fn enforce_path_under_root(repo: &RepoRef, path: &str) -> Result<PathBuf, BrokerError> {
    let abs = resolve_under(&repo.root, path);
    if !abs.starts_with(&repo.root) {
        return Err(BrokerError::Auth(format!(
            "path {} is outside repo root {}",
            path,
            repo.root.display()
        )));
    }
    Ok(abs)
}

#[derive(Debug, Clone, Default)]
pub struct PathAuthorizer {
    allowed_globs: Vec<String>,
    allowed_regexes: Vec<Regex>,
    denied_globs: Vec<String>,
    denied_regexes: Vec<Regex>,
    repo_root: Option<PathBuf>,
}

enum Pattern {
    Glob(String),
    Regex(Regex),
}

fn classify(raw: &str) -> Result<Pattern, BrokerError> {
    let inner = if (raw.starts_with("r\"") && raw.ends_with('"') && raw.len() > 3)
        || (raw.starts_with("r'") && raw.ends_with('\'') && raw.len() > 3)
    {
        Some(&raw[2..raw.len() - 1])
    } else {
        None
    };
    match inner {
        Some(expr) => {
            let anchored = format!("^(?:{expr})$");
            let re = Regex::new(&anchored).map_err(|e| {
                BrokerError::InvalidRequest(format!("invalid path pattern {raw:?}: {e}"))
            })?;
            Ok(Pattern::Regex(re))
        }
        None => Ok(Pattern::Glob(raw.to_string())),
    }
}

fn split_patterns(csv: &str) -> Vec<String> {
    csv.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl PathAuthorizer {
    /// Build from already-separated pattern lists. Deny patterns may carry
    /// their configuration-style leading `!`; it is stripped here.
    pub fn new(
        allowed: &[String],
        denied: &[String],
        repo_root: Option<&Path>,
    ) -> Result<Self, BrokerError> {
        let mut authorizer = PathAuthorizer {
            repo_root: repo_root.map(Path::to_path_buf),
            ..Default::default()
        };
        for raw in allowed {
            match classify(raw)? {
                Pattern::Glob(g) => authorizer.allowed_globs.push(g),
                Pattern::Regex(r) => authorizer.allowed_regexes.push(r),
            }
        }
        for raw in denied {
            let stripped = raw.strip_prefix('!').unwrap_or(raw);
            match classify(stripped)? {
                Pattern::Glob(g) => authorizer.denied_globs.push(g),
                Pattern::Regex(r) => authorizer.denied_regexes.push(r),
            }
        }
        Ok(authorizer)
    }

    /// Build from comma-separated lists, falling back per list to the
    /// `FS_GIT_ALLOWED_PATHS` / `FS_GIT_DENIED_PATHS` environment variables
    /// when no explicit value is given.
    pub fn from_config(
        repo_root: Option<&Path>,
        allow_csv: Option<&str>,
        deny_csv: Option<&str>,
    ) -> Result<Self, BrokerError> {
        let allow = match allow_csv {
            Some(csv) => split_patterns(csv),
            None => std::env::var(ALLOWED_PATHS_ENV)
                .map(|v| split_patterns(&v))
                .unwrap_or_default(),
        };
        let deny = match deny_csv {
            Some(csv) => split_patterns(csv),
            None => std::env::var(DENIED_PATHS_ENV)
                .map(|v| split_patterns(&v))
                .unwrap_or_default(),
        };
        Self::new(&allow, &deny, repo_root)
    }

    /// Deny first, allow second, default allow when no allow patterns exist.
    pub fn is_allowed(&self, path: &str) -> bool {
        let Some(rel) = self.relative(path) else {
            return false;
        };

        if self.denied_regexes.iter().any(|re| re.is_match(&rel)) {
            return false;
        }
        if self.denied_globs.iter().any(|g| glob_match(g, &rel)) {
            return false;
        }

        if self.allowed_globs.is_empty() && self.allowed_regexes.is_empty() {
            return true;
        }
        self.allowed_regexes.iter().any(|re| re.is_match(&rel))
            || self.allowed_globs.iter().any(|g| glob_match(g, &rel))
    }

    /// Check a concrete request path, producing the typed error with the
    /// active-pattern summaries on deny.
    pub fn authorize(&self, path: &str) -> Result<(), BrokerError> {
        if self.is_allowed(path) {
            return Ok(());
        }
        Err(BrokerError::Auth(format!(
            "path {} not authorized: {}; {}",
            path,
            self.allowed_summary(),
            self.denied_summary()
        )))
    }

    pub fn allowed_summary(&self) -> String {
        let mut patterns: Vec<String> = self.allowed_globs.clone();
        patterns.extend(self.allowed_regexes.iter().map(|r| r.to_string()));
        if patterns.is_empty() {
            "no allow patterns (all paths allowed)".to_string()
        } else {
            format!("allowed patterns: {}", patterns.join(", "))
        }
    }

    pub fn denied_summary(&self) -> String {
        let mut patterns: Vec<String> = self.denied_globs.clone();
        patterns.extend(self.denied_regexes.iter().map(|r| r.to_string()));
        if patterns.is_empty() {
            "no denied patterns".to_string()
        } else {
            format!("denied patterns: {}", patterns.join(", "))
        }
    }

    /// Normalize to a repo-relative `/`-separated path. Paths that escape
    /// the repo (a `..` prefix survives normalization) yield None and are
    /// denied outright.
    fn relative(&self, path: &str) -> Option<String> {
        let posix = path.replace('\\', "/");
        let rel = match &self.repo_root {
            Some(root) if Path::new(&posix).is_absolute() => to_repo_relative(root, &posix)?,
            _ => posix,
        };
        let normalized = normalize_lexically(Path::new(&rel));
        let rel = normalized.to_string_lossy().replace('\\', "/");
        if rel == ".." || rel.starts_with("../") {
            return None;
        }
        Some(rel.trim_start_matches("./").to_string())
    }
}

/// Segment-wise glob match. A single-segment pattern (no `/`, not `**`)
/// applies to the basename so `*.py` matches files at any depth.
fn glob_match(pattern: &str, rel_path: &str) -> bool {
    let pattern_segments: Vec<&str> = pattern.split('/').collect();
    if pattern_segments.len() == 1 && pattern_segments[0] != "**" {
        let basename = rel_path.rsplit('/').next().unwrap_or(rel_path);
        return segment_match(pattern_segments[0], basename);
    }
    let path_segments: Vec<&str> = rel_path.split('/').collect();
    match_segments(&pattern_segments, &path_segments)
}

fn match_segments(pattern: &[&str], path: &[&str]) -> bool {
    let Some((head, rest)) = pattern.split_first() else {
        return path.is_empty();
    };
    if *head == "**" {
        // `**` consumes zero or more whole segments.
        (0..=path.len()).any(|skip| match_segments(rest, &path[skip..]))
    } else {
        match path.split_first() {
            Some((seg, tail)) => segment_match(head, seg) && match_segments(rest, tail),
            None => false,
        }
    }
}

/// Shell-style match within one segment: `*`, `?`, `[...]` with ranges and
/// leading `!` negation. Case-sensitive.
fn segment_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    match_chars(&p, 0, &t, 0)
}

fn match_chars(p: &[char], mut pi: usize, t: &[char], mut ti: usize) -> bool {
    while pi < p.len() {
        match p[pi] {
            '*' => {
                while pi + 1 < p.len() && p[pi + 1] == '*' {
                    pi += 1;
                }
                if pi + 1 == p.len() {
                    return true;
                }
                return (ti..=t.len()).any(|k| match_chars(p, pi + 1, t, k));
            }
            '?' => {
                if ti >= t.len() {
                    return false;
                }
                pi += 1;
                ti += 1;
            }
            '[' => match parse_class(p, pi) {
                Some((matcher, next_pi)) => {
                    if ti >= t.len() || !matcher.matches(t[ti]) {
                        return false;
                    }
                    pi = next_pi;
                    ti += 1;
                }
                None => {
                    // Unterminated class: treat `[` literally.
                    if ti >= t.len() || t[ti] != '[' {
                        return false;
                    }
                    pi += 1;
                    ti += 1;
                }
            },
            c => {
                if ti >= t.len() || t[ti] != c {
                    return false;
                }
                pi += 1;
                ti += 1;
            }
        }
    }
    ti == t.len()
}

struct CharClass {
    negated: bool,
    singles: Vec<char>,
    ranges: Vec<(char, char)>,
}

impl CharClass {
    fn matches(&self, c: char) -> bool {
        let hit = self.singles.contains(&c)
            || self.ranges.iter().any(|(lo, hi)| *lo <= c && c <= *hi);
        hit != self.negated
    }
}

/// Parse a `[...]` class starting at `start` (which points at `[`).
/// Returns the matcher and the index just past the closing `]`.
fn parse_class(p: &[char], start: usize) -> Option<(CharClass, usize)> {
    let mut i = start + 1;
    let negated = p.get(i) == Some(&'!');
    if negated {
        i += 1;
    }
    let mut class = CharClass {
        negated,
        singles: Vec::new(),
        ranges: Vec::new(),
    };
    let mut first = true;
    while i < p.len() {
        let c = p[i];
        if c == ']' && !first {
            return Some((class, i + 1));
        }
        first = false;
        if p.get(i + 1) == Some(&'-') && p.get(i + 2).is_some_and(|e| *e != ']') {
            class.ranges.push((c, p[i + 2]));
            i += 3;
        } else {
            class.singles.push(c);
            i += 1;
        }
    }
    None
}

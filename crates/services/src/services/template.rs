//! Commit-message templates: a deliberately narrow `{name}` placeholder
//! DSL. No conditionals, no iteration; richer needs live with the caller.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use rust_embed::RustEmbed;
use serde::{Deserialize, Serialize};

use super::{error::BrokerError, git_cli::GitCli, repo::RepoRef};

pub const DEFAULT_SUBJECT: &str = "[{op}] {path} – {summary}";
pub const DEFAULT_UNIQUE_WINDOW: u32 = 100;
pub const MAX_SUBJECT_CHARS: usize = 72;

#[derive(RustEmbed)]
#[folder = "assets/"]
struct TemplateAssets;

static COLLISION_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r" \(#(\d+)\)$").expect("collision suffix regex"));

/// Schema of a rendered commit message: a mandatory subject format string,
/// optional body, optional ordered trailers, and the window over which the
/// rendered subject must stay unique.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct CommitTemplate {
    pub subject: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub trailers: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default = "default_unique_window")]
    pub enforce_unique_window: u32,
}

fn default_unique_window() -> u32 {
    DEFAULT_UNIQUE_WINDOW
}

impl CommitTemplate {
    pub fn from_subject(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: None,
            trailers: None,
            enforce_unique_window: DEFAULT_UNIQUE_WINDOW,
        }
    }
}

/// The template shipped with the broker, parsed out of the embedded asset:
/// first line is the subject, trailing `Key: value` lines are trailers,
/// whatever sits between is the body.
pub fn default_template() -> CommitTemplate {
    match TemplateAssets::get("commit_template.default.txt") {
        Some(asset) => parse_template_text(&String::from_utf8_lossy(&asset.data)),
        None => CommitTemplate::from_subject(DEFAULT_SUBJECT),
    }
}

fn parse_template_text(text: &str) -> CommitTemplate {
    let mut lines = text.lines();
    let subject = lines.next().unwrap_or(DEFAULT_SUBJECT).to_string();
    let mut rest: Vec<&str> = lines.collect();
    while rest.last().is_some_and(|l| l.trim().is_empty()) {
        rest.pop();
    }

    static TRAILER_LINE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^([A-Za-z][A-Za-z0-9-]*): (.*)$").expect("trailer regex"));

    let mut trailer_start = rest.len();
    while trailer_start > 0 && TRAILER_LINE.is_match(rest[trailer_start - 1]) {
        trailer_start -= 1;
    }

    let mut trailers = serde_json::Map::new();
    for line in &rest[trailer_start..] {
        if let Some(caps) = TRAILER_LINE.captures(line) {
            trailers.insert(caps[1].to_string(), serde_json::Value::String(caps[2].to_string()));
        }
    }

    let body = rest[..trailer_start].join("\n").trim().to_string();

    CommitTemplate {
        subject,
        body: (!body.is_empty()).then_some(body),
        trailers: (!trailers.is_empty()).then_some(trailers),
        enforce_unique_window: DEFAULT_UNIQUE_WINDOW,
    }
}

/// Substitute `{name}` placeholders. In strict mode an unknown placeholder
/// is an error; in lenient mode it renders as the empty string. `{` without
/// a closing `}` passes through literally.
fn substitute(
    format: &str,
    vars: &HashMap<String, String>,
    strict: bool,
) -> Result<String, BrokerError> {
    let mut out = String::with_capacity(format.len());
    let mut chars = format.char_indices();
    while let Some((i, c)) = chars.next() {
        if c != '{' {
            out.push(c);
            continue;
        }
        match format[i + 1..].find('}') {
            Some(rel_end) => {
                let name = &format[i + 1..i + 1 + rel_end];
                match vars.get(name) {
                    Some(value) => out.push_str(value),
                    None if strict => {
                        return Err(BrokerError::Template(format!(
                            "unknown placeholder {{{name}}} in subject"
                        )));
                    }
                    None => {}
                }
                // Skip the consumed placeholder (char count, not bytes).
                let consumed = format[i + 1..i + 2 + rel_end].chars().count();
                for _ in 0..consumed {
                    chars.next();
                }
            }
            None => out.push('{'),
        }
    }
    Ok(out)
}

pub fn render_subject(
    template: &CommitTemplate,
    vars: &HashMap<String, String>,
) -> Result<String, BrokerError> {
    substitute(&template.subject, vars, true)
}

/// Assemble the full commit message around an already-rendered subject.
/// Body and trailers render leniently; empty renders are dropped rather
/// than leaving dangling blank sections or `Key:` lines.
pub fn render_message_with_subject(
    template: &CommitTemplate,
    vars: &HashMap<String, String>,
    subject: &str,
) -> String {
    let mut message = subject.to_string();
    if let Some(body) = &template.body {
        let body = substitute(body, vars, false).unwrap_or_default();
        let body = body.trim();
        if !body.is_empty() {
            message.push_str("\n\n");
            message.push_str(body);
        }
    }
    if let Some(trailers) = &template.trailers {
        for (key, value) in trailers {
            let value_fmt = value.as_str().unwrap_or_default();
            let rendered = substitute(value_fmt, vars, false).unwrap_or_default();
            if !rendered.trim().is_empty() {
                message.push('\n');
                message.push_str(&format!("{key}: {rendered}"));
            }
        }
    }
    message
}

pub fn render_message(
    template: &CommitTemplate,
    vars: &HashMap<String, String>,
) -> Result<String, BrokerError> {
    let subject = render_subject(template, vars)?;
    Ok(render_message_with_subject(template, vars, &subject))
}

#[derive(Debug, Serialize, schemars::JsonSchema)]
pub struct LintResult {
    pub ok: bool,
    pub errors: Vec<String>,
}

/// The two commit-message lints: the rendered subject must fit in 72
/// characters, and the subject *source* must carry the `{op}`, `{path}` and
/// `{summary}` placeholders. The second check deliberately looks at the
/// template text, so a literal subject fails it even when the result would
/// be a fine commit.
pub fn lint_commit_message(
    template: &CommitTemplate,
    vars: &HashMap<String, String>,
) -> LintResult {
    let mut errors = Vec::new();

    let rendered = substitute(&template.subject, vars, false).unwrap_or_default();
    if rendered.chars().count() > MAX_SUBJECT_CHARS {
        errors.push(format!("Subject exceeds {MAX_SUBJECT_CHARS} characters"));
    }
    for token in ["{op}", "{path}", "{summary}"] {
        if !template.subject.contains(token) {
            errors.push(format!("Required token {token} missing in subject"));
        }
    }

    LintResult {
        ok: errors.is_empty(),
        errors,
    }
}

/// True when `subject` does not appear among the last `window` commit
/// subjects. An unreadable log (fresh repo, no commits) counts as unique.
pub async fn check_subject_uniqueness(
    git: &GitCli,
    repo: &RepoRef,
    subject: &str,
    window: u32,
) -> Result<bool, BrokerError> {
    if window == 0 {
        return Ok(true);
    }
    let out = match git
        .git(&repo.root, ["log", &format!("-{window}"), "--format=%s"])
        .await
    {
        Ok(out) => out,
        Err(_) => return Ok(true),
    };
    Ok(!out.lines().any(|line| line == subject))
}

/// Split an existing ` (#n)` suffix off a subject, yielding the base text
/// and the counter the next candidate should use.
pub fn split_collision_suffix(subject: &str) -> (&str, u64) {
    match COLLISION_SUFFIX.captures(subject) {
        Some(caps) => {
            let whole = caps.get(0).expect("group 0 always present");
            let n: u64 = caps[1].parse().unwrap_or(1);
            (&subject[..whole.start()], n + 1)
        }
        None => (subject, 2),
    }
}

/// Append (or bump) a ` (#n)` suffix until the subject is unique within the
/// window. Already-unique subjects come back untouched.
pub async fn resolve_collision(
    git: &GitCli,
    repo: &RepoRef,
    subject: &str,
    window: u32,
) -> Result<String, BrokerError> {
    if check_subject_uniqueness(git, repo, subject, window).await? {
        return Ok(subject.to_string());
    }
    let (base, mut counter) = split_collision_suffix(subject);
    loop {
        let candidate = format!("{base} (#{counter})");
        if check_subject_uniqueness(git, repo, &candidate, window).await? {
            return Ok(candidate);
        }
        counter += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn default_template_parses_asset() {
        let t = default_template();
        assert_eq!(t.subject, DEFAULT_SUBJECT);
        assert_eq!(t.body.as_deref(), Some("{reason}"));
        let trailers = t.trailers.unwrap();
        let keys: Vec<&String> = trailers.keys().collect();
        assert_eq!(keys, ["Ticket", "Refs"]);
        assert_eq!(t.enforce_unique_window, DEFAULT_UNIQUE_WINDOW);
    }

    #[test]
    fn render_substitutes_placeholders() {
        let t = default_template();
        let v = vars(&[
            ("op", "add"),
            ("path", "hello.txt"),
            ("summary", "create greeting"),
            ("reason", ""),
            ("ticket", ""),
            ("refs", ""),
        ]);
        assert_eq!(
            render_message(&t, &v).unwrap(),
            "[add] hello.txt – create greeting"
        );
    }

    #[test]
    fn body_and_trailers_render_when_present() {
        let t = default_template();
        let v = vars(&[
            ("op", "edit"),
            ("path", "a.rs"),
            ("summary", "tweak"),
            ("reason", "because tests"),
            ("ticket", "T-9"),
            ("refs", ""),
        ]);
        let message = render_message(&t, &v).unwrap();
        assert_eq!(
            message,
            "[edit] a.rs – tweak\n\nbecause tests\nTicket: T-9"
        );
    }

    #[test]
    fn unknown_placeholder_in_subject_is_fatal() {
        let t = CommitTemplate::from_subject("[{op}] {path} {summary} {mystery}");
        let v = vars(&[("op", "x"), ("path", "y"), ("summary", "z")]);
        assert!(matches!(
            render_subject(&t, &v),
            Err(BrokerError::Template(_))
        ));
    }

    #[test]
    fn unknown_placeholder_in_body_renders_empty() {
        let mut t = CommitTemplate::from_subject("{op} {path} {summary}");
        t.body = Some("context: {nonexistent}".to_string());
        let v = vars(&[("op", "a"), ("path", "b"), ("summary", "c")]);
        assert_eq!(render_message(&t, &v).unwrap(), "a b c\n\ncontext:");
    }

    #[test]
    fn lint_flags_long_subjects() {
        let t = CommitTemplate::from_subject("[{op}] {path} – {summary}");
        let long = "x".repeat(80);
        let v = vars(&[("op", "add"), ("path", "f"), ("summary", &long)]);
        let lint = lint_commit_message(&t, &v);
        assert!(!lint.ok);
        assert!(lint.errors[0].contains("72"));
    }

    #[test]
    fn lint_requires_placeholders_in_source() {
        // A literal subject fails even though it would make a fine commit.
        let t = CommitTemplate::from_subject("[edit] foo – bar");
        let v = vars(&[("op", "edit"), ("path", "foo"), ("summary", "bar")]);
        let lint = lint_commit_message(&t, &v);
        assert!(!lint.ok);
        assert_eq!(lint.errors.len(), 3);
    }

    #[test]
    fn lint_ok_for_default_template() {
        let v = vars(&[("op", "add"), ("path", "x.txt"), ("summary", "short")]);
        assert!(lint_commit_message(&default_template(), &v).ok);
    }

    #[test]
    fn collision_suffix_starts_at_two_and_increments() {
        assert_eq!(split_collision_suffix("subject"), ("subject", 2));
        assert_eq!(split_collision_suffix("subject (#2)"), ("subject", 3));
        assert_eq!(split_collision_suffix("subject (#12)"), ("subject", 13));
        // Parenthesized text that is not a counter stays part of the base.
        assert_eq!(split_collision_suffix("fix (regression)"), ("fix (regression)", 2));
    }

    #[test]
    fn braces_without_close_pass_through() {
        let t = CommitTemplate::from_subject("{op} {path} {summary} {open");
        let v = vars(&[("op", "a"), ("path", "b"), ("summary", "c")]);
        assert_eq!(render_subject(&t, &v).unwrap(), "a b c {open");
    }
}

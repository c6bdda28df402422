//! The extract helper: a line-window grep over one file, with the file's
//! recent commit history attached.

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::{
    authorize::enforce_path_under_root,
    commits::{file_history, CommitEntry},
    error::BrokerError,
    git_cli::GitCli,
    repo::RepoRef,
};

#[derive(Debug, Clone, Deserialize, schemars::JsonSchema)]
pub struct ReadIntent {
    pub path: String,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub regex: bool,
    #[serde(default = "default_context")]
    pub before: usize,
    #[serde(default = "default_context")]
    pub after: usize,
    #[serde(default = "default_max_spans")]
    pub max_spans: usize,
    #[serde(default)]
    pub include_content: bool,
    #[serde(default = "default_history_limit")]
    pub history_limit: u32,
}

fn default_context() -> usize {
    3
}

fn default_max_spans() -> usize {
    20
}

fn default_history_limit() -> u32 {
    10
}

/// A window of lines around one match. `start`/`end` are 0-based, end
/// exclusive; lines are right-trimmed.
#[derive(Debug, Serialize, schemars::JsonSchema)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub lines: Vec<String>,
}

#[derive(Debug, Serialize, schemars::JsonSchema)]
pub struct ReadResult {
    pub path: String,
    pub spans: Vec<Span>,
    pub history: Vec<CommitEntry>,
    pub content: Option<String>,
}

pub async fn extract(
    git: &GitCli,
    repo: &RepoRef,
    intent: &ReadIntent,
) -> Result<ReadResult, BrokerError> {
    let abs = enforce_path_under_root(repo, &intent.path)?;
    let text = std::fs::read_to_string(&abs)
        .map_err(|_| BrokerError::NotFound(format!("cannot read {}", intent.path)))?;
    let lines: Vec<&str> = text.split('\n').collect();

    let mut spans = Vec::new();
    if let Some(query) = intent.query.as_deref() {
        let matcher: Box<dyn Fn(&str) -> bool> = if intent.regex {
            let re = Regex::new(query)
                .map_err(|e| BrokerError::InvalidRequest(format!("invalid query regex: {e}")))?;
            Box::new(move |line| re.is_match(line))
        } else {
            let needle = query.to_string();
            Box::new(move |line| line.contains(&needle))
        };

        for (i, line) in lines.iter().enumerate() {
            if !matcher(line) {
                continue;
            }
            let start = i.saturating_sub(intent.before);
            let end = (i + intent.after + 1).min(lines.len());
            spans.push(Span {
                start,
                end,
                lines: lines[start..end]
                    .iter()
                    .map(|l| l.trim_end().to_string())
                    .collect(),
            });
            if spans.len() >= intent.max_spans {
                break;
            }
        }
    }

    let history = file_history(git, repo, &intent.path, intent.history_limit).await?;
    let content = intent.include_content.then(|| text.clone());

    Ok(ReadResult {
        path: intent.path.clone(),
        spans,
        history,
        content,
    })
}

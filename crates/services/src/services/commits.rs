//! The commit pipeline: the single write -> add -> commit transaction that
//! is the atom of every mutation the broker accepts.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::{
    authorize::{enforce_path_under_root, PathAuthorizer},
    error::BrokerError,
    git_cli::{GitCli, GitCliError},
    repo::RepoRef,
    template::{
        check_subject_uniqueness, default_template, lint_commit_message, render_message_with_subject,
        render_subject, resolve_collision, CommitTemplate, DEFAULT_UNIQUE_WINDOW,
    },
};

/// Input to the commit pipeline.
#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub repo: RepoRef,
    pub path: String,
    pub content: String,
    pub template: CommitTemplate,
    pub op: String,
    pub summary: String,
    pub reason: Option<String>,
    pub ticket: Option<String>,
    pub allow_create: bool,
    pub allow_overwrite: bool,
    pub authorizer: Option<PathAuthorizer>,
}

impl WriteRequest {
    pub fn new(repo: RepoRef, path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            repo,
            path: path.into(),
            content: content.into(),
            template: default_template(),
            op: "write".to_string(),
            summary: "file write".to_string(),
            reason: None,
            ticket: None,
            allow_create: true,
            allow_overwrite: true,
            authorizer: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, schemars::JsonSchema)]
pub struct WriteResult {
    pub path: String,
    pub commit_sha: String,
    pub branch: String,
    /// Final rendered subject, after any collision suffix.
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct CommitEntry {
    pub sha: String,
    pub subject: String,
}

#[derive(Debug, Serialize, schemars::JsonSchema)]
pub struct ReadWithHistory {
    pub path: String,
    pub content: Option<String>,
    pub history: Vec<CommitEntry>,
}

/// Variables the template renders with. Optional fields fill in as empty
/// strings so their placeholders never fail a render.
pub fn template_variables(request: &WriteRequest) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    vars.insert("op".to_string(), request.op.clone());
    vars.insert("path".to_string(), request.path.clone());
    vars.insert("summary".to_string(), request.summary.clone());
    vars.insert(
        "reason".to_string(),
        request.reason.clone().unwrap_or_default(),
    );
    vars.insert(
        "ticket".to_string(),
        request.ticket.clone().unwrap_or_default(),
    );
    vars.insert("files".to_string(), String::new());
    vars.insert("refs".to_string(), String::new());
    vars
}

async fn is_dirty(git: &GitCli, repo: &RepoRef) -> Result<bool, BrokerError> {
    let out = git.git(&repo.root, ["status", "--porcelain"]).await?;
    Ok(!out.trim().is_empty())
}

/// Validate -> write -> stage -> commit -> report. Deterministic modulo the
/// git subprocess. On failure after the file write no rollback is attempted;
/// recovery is `git checkout -- <path>` at the caller's discretion.
pub async fn write_and_commit(
    git: &GitCli,
    request: &WriteRequest,
) -> Result<WriteResult, BrokerError> {
    let abs = enforce_path_under_root(&request.repo, &request.path)?;

    if let Some(authorizer) = &request.authorizer {
        authorizer.authorize(&request.path)?;
    }

    if !request.allow_overwrite && is_dirty(git, &request.repo).await? {
        return Err(BrokerError::DirtyTree(
            "refusing to write while the tree has uncommitted changes".to_string(),
        ));
    }

    let vars = template_variables(request);

    let lint = lint_commit_message(&request.template, &vars);
    if !lint.ok {
        return Err(BrokerError::Template(lint.errors.join("; ")));
    }

    let subject = render_subject(&request.template, &vars)?;

    // The uniqueness window doubles as the strictness switch: a positive
    // window means a collision is an error, zero means auto-suffix. The
    // collision *check* always looks at a real window, otherwise a zero
    // window could never detect the duplicate it is supposed to suffix.
    let check_window = if request.template.enforce_unique_window > 0 {
        request.template.enforce_unique_window
    } else {
        DEFAULT_UNIQUE_WINDOW
    };
    let subject = if check_subject_uniqueness(git, &request.repo, &subject, check_window).await? {
        subject
    } else if request.template.enforce_unique_window > 0 {
        return Err(BrokerError::Uniqueness(subject));
    } else {
        resolve_collision(git, &request.repo, &subject, check_window).await?
    };

    let message = render_message_with_subject(&request.template, &vars, &subject);

    let exists = abs.exists();
    if !exists && !request.allow_create {
        return Err(BrokerError::NotFound(format!(
            "{} does not exist and allow_create is off",
            request.path
        )));
    }
    if exists && !request.allow_overwrite {
        return Err(BrokerError::Conflict(format!(
            "{} already exists and allow_overwrite is off",
            request.path
        )));
    }

    if let Some(parent) = abs.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&abs, &request.content)?;

    git.git(&request.repo.root, ["add", "--", &request.path])
        .await?;
    git.git(&request.repo.root, ["commit", "-m", &message])
        .await?;
    let commit_sha = git
        .git(&request.repo.root, ["rev-parse", "HEAD"])
        .await?
        .trim()
        .to_string();
    let branch = request.repo.current_branch(git).await?;

    info!(path = %request.path, sha = %commit_sha, "committed {}", subject);

    Ok(WriteResult {
        path: request.path.clone(),
        commit_sha,
        branch,
        message: subject,
    })
}

/// Last `limit` commits that touched `path`, newest first. Short SHAs.
pub async fn file_history(
    git: &GitCli,
    repo: &RepoRef,
    path: &str,
    limit: u32,
) -> Result<Vec<CommitEntry>, BrokerError> {
    let out = match git
        .git(
            &repo.root,
            ["log", "--oneline", &format!("-{limit}"), "--", path],
        )
        .await
    {
        Ok(out) => out,
        // Unborn branch: no history yet.
        Err(GitCliError::CommandFailed(_)) => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    Ok(out
        .lines()
        .filter(|line| !line.is_empty())
        .map(|line| match line.split_once(' ') {
            Some((sha, subject)) => CommitEntry {
                sha: sha.to_string(),
                subject: subject.to_string(),
            },
            None => CommitEntry {
                sha: line.to_string(),
                subject: String::new(),
            },
        })
        .collect())
}

/// Current content plus the recent commit touches of a path. A missing file
/// is not an error; `content` is simply absent.
pub async fn read_with_history(
    git: &GitCli,
    repo: &RepoRef,
    path: &str,
    history_limit: u32,
) -> Result<ReadWithHistory, BrokerError> {
    let abs = enforce_path_under_root(repo, path)?;
    let content = std::fs::read_to_string(&abs).ok();
    let history = file_history(git, repo, path, history_limit).await?;
    Ok(ReadWithHistory {
        path: path.to_string(),
        content,
        history,
    })
}

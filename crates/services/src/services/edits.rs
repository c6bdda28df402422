//! Read -> transform -> commit adapters on top of the commit pipeline:
//! literal/regex text replacement, diff preview, and unified-diff patching.

use regex::Regex;
use serde::Deserialize;

use super::{
    authorize::{enforce_path_under_root, PathAuthorizer},
    commits::{write_and_commit, WriteRequest, WriteResult},
    error::BrokerError,
    git_cli::GitCli,
    repo::RepoRef,
    template::CommitTemplate,
};
use utils::diff::{create_unified_diff, strip_trailing_whitespace};
use utils::patch::apply_unified_patch;

pub const DEFAULT_CONTEXT_LINES: usize = 3;

/// One replacement of a batch call.
#[derive(Debug, Clone, Deserialize, schemars::JsonSchema)]
pub struct ReplaceItem {
    pub path: String,
    pub search: String,
    pub replace: String,
    #[serde(default)]
    pub regex: bool,
    #[serde(default)]
    pub summary: Option<String>,
}

fn read_existing(repo: &RepoRef, path: &str) -> Result<String, BrokerError> {
    let abs = enforce_path_under_root(repo, path)?;
    std::fs::read_to_string(&abs)
        .map_err(|_| BrokerError::NotFound(format!("cannot read {path}")))
}

/// Replace every occurrence of `search` (literal, or a regex when asked)
/// and land the result as one commit with `op = "replace"`.
#[allow(clippy::too_many_arguments)]
pub async fn replace_and_commit(
    git: &GitCli,
    repo: &RepoRef,
    path: &str,
    search: &str,
    replace: &str,
    use_regex: bool,
    template: CommitTemplate,
    summary: &str,
    authorizer: Option<PathAuthorizer>,
) -> Result<WriteResult, BrokerError> {
    let content = read_existing(repo, path)?;

    let new_content = if use_regex {
        let re = Regex::new(search)
            .map_err(|e| BrokerError::InvalidRequest(format!("invalid search regex: {e}")))?;
        re.replace_all(&content, replace).into_owned()
    } else {
        content.replace(search, replace)
    };

    let mut request = WriteRequest::new(repo.clone(), path, new_content);
    request.template = template;
    request.op = "replace".to_string();
    request.summary = summary.to_string();
    request.authorizer = authorizer;
    write_and_commit(git, &request).await
}

/// One commit per item, in order. There is no transaction across items: a
/// mid-sequence failure leaves the earlier commits in place and surfaces
/// the first error.
pub async fn batch_replace_and_commit(
    git: &GitCli,
    repo: &RepoRef,
    items: &[ReplaceItem],
    template: CommitTemplate,
    summary: &str,
    authorizer: Option<PathAuthorizer>,
) -> Result<Vec<WriteResult>, BrokerError> {
    let mut results = Vec::with_capacity(items.len());
    for item in items {
        let result = replace_and_commit(
            git,
            repo,
            &item.path,
            &item.search,
            &item.replace,
            item.regex,
            template.clone(),
            item.summary.as_deref().unwrap_or(summary),
            authorizer.clone(),
        )
        .await?;
        results.push(result);
    }
    Ok(results)
}

/// Unified diff between the file on disk and `modified_content`, without
/// touching anything. Whitespace-insensitive mode right-strips both sides
/// before diffing.
pub fn preview_diff(
    repo: &RepoRef,
    path: &str,
    modified_content: &str,
    ignore_whitespace: bool,
    context_lines: usize,
) -> Result<String, BrokerError> {
    let original = read_existing(repo, path)?;
    if ignore_whitespace {
        let a = strip_trailing_whitespace(&original);
        let b = strip_trailing_whitespace(modified_content);
        Ok(create_unified_diff(path, &a, &b, context_lines))
    } else {
        Ok(create_unified_diff(path, &original, modified_content, context_lines))
    }
}

/// Apply unified-diff hunks to the live file and commit the result with
/// `op = "patch"`. A context mismatch aborts before anything is written.
pub async fn apply_patch_and_commit(
    git: &GitCli,
    repo: &RepoRef,
    path: &str,
    patch: &str,
    template: CommitTemplate,
    summary: &str,
    authorizer: Option<PathAuthorizer>,
) -> Result<WriteResult, BrokerError> {
    let content = read_existing(repo, path)?;
    let new_content = apply_unified_patch(&content, patch)?;

    let mut request = WriteRequest::new(repo.clone(), path, new_content);
    request.template = template;
    request.op = "patch".to_string();
    request.summary = summary.to_string();
    request.authorizer = authorizer;
    write_and_commit(git, &request).await
}

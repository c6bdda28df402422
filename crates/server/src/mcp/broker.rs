//! The broker's tool surface. One named entry per public operation; each
//! entry declares its JSON input schema, unmarshals into a typed request
//! record, invokes the handler under the per-repo lock, and serializes the
//! result or a typed error envelope.

use std::collections::HashMap;

use rmcp::{
    handler::server::tool::{Parameters, ToolRouter},
    model::{
        CallToolResult, Content, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo,
    },
    schemars, tool, tool_handler, tool_router, ErrorData, ServerHandler,
};
use serde::{Deserialize, Serialize};
use services::services::{
    authorize::PathAuthorizer,
    commits::{self, ReadWithHistory, WriteRequest, WriteResult},
    edits::{self, ReplaceItem, DEFAULT_CONTEXT_LINES},
    error::BrokerError,
    filesystem::{self, FileStat},
    git_cli::GitCli,
    locks::repo_lock,
    reader::{self, ReadIntent, ReadResult},
    repo::RepoRef,
    staging::{
        self, AbortResult, FinalizeOptions, FinalizeStrategy, FinalizeResult, Preview,
        SessionLoad, SessionStore, StagedSession,
    },
    template::{default_template, lint_commit_message, CommitTemplate, LintResult},
};

/// The `repo` argument of every tool: either a bare root string or an
/// object carrying `root` and an optional branch hint.
#[derive(Debug, Clone, Deserialize, schemars::JsonSchema)]
#[serde(untagged)]
pub enum RepoArg {
    Root(String),
    Detailed {
        root: String,
        #[serde(default)]
        branch: Option<String>,
    },
}

impl RepoArg {
    fn root(&self) -> &str {
        match self {
            RepoArg::Root(root) => root,
            RepoArg::Detailed { root, .. } => root,
        }
    }

    fn branch(&self) -> Option<String> {
        match self {
            RepoArg::Root(_) => None,
            RepoArg::Detailed { branch, .. } => branch.clone(),
        }
    }
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct WriteAndCommitRequest {
    #[schemars(description = "Repository root path, or an object with `root` and optional `branch`")]
    pub repo: RepoArg,
    #[schemars(description = "Repo-relative path of the file to write")]
    pub path: String,
    #[schemars(description = "Full new content of the file")]
    pub content: String,
    #[schemars(description = "Commit template override; the default templated subject is '[{op}] {path} – {summary}'")]
    pub template: Option<CommitTemplate>,
    #[schemars(description = "Short operation tag rendered into {op} (default: 'write')")]
    pub op: Option<String>,
    #[schemars(description = "Human summary rendered into {summary}")]
    pub summary: Option<String>,
    #[schemars(description = "Optional longer rationale rendered into {reason}")]
    pub reason: Option<String>,
    #[schemars(description = "Optional tracker id rendered into {ticket}")]
    pub ticket: Option<String>,
    #[schemars(description = "Allow creating a missing file (default: true)")]
    pub allow_create: Option<bool>,
    #[schemars(description = "Allow overwriting existing content (default: true)")]
    pub allow_overwrite: Option<bool>,
    #[schemars(description = "Comma-separated allow patterns; falls back to FS_GIT_ALLOWED_PATHS")]
    pub allow_paths: Option<String>,
    #[schemars(description = "Comma-separated deny patterns (written with a leading '!'); falls back to FS_GIT_DENIED_PATHS")]
    pub deny_paths: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ReadWithHistoryRequest {
    pub repo: RepoArg,
    #[schemars(description = "Repo-relative path to read")]
    pub path: String,
    #[schemars(description = "How many commits of file history to return (default: 10)")]
    pub history_limit: Option<u32>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct StartStagedRequest {
    pub repo: RepoArg,
    #[schemars(description = "Optional ticket id woven into the session id")]
    pub ticket: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct StagedWriteRequest {
    #[schemars(description = "Id returned by start_staged")]
    pub session_id: String,
    pub repo: RepoArg,
    pub path: String,
    pub content: String,
    #[schemars(description = "Human summary for the staged commit")]
    pub summary: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct SessionIdRequest {
    pub session_id: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct FinalizeStagedRequest {
    pub session_id: String,
    #[schemars(description = "merge-ff | merge-no-ff | rebase-merge | squash-merge (default: merge-ff)")]
    pub strategy: Option<FinalizeStrategy>,
    #[schemars(description = "Delete the work branch after landing (default: true)")]
    pub delete_work_branch: Option<bool>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ReplaceAndCommitRequest {
    pub repo: RepoArg,
    pub path: String,
    #[schemars(description = "Text to search for (literal unless `regex` is set)")]
    pub search: String,
    pub replace: String,
    #[schemars(description = "Treat `search` as a regular expression")]
    pub regex: Option<bool>,
    pub template: Option<CommitTemplate>,
    pub summary: Option<String>,
    pub allow_paths: Option<String>,
    pub deny_paths: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct BatchReplaceRequest {
    pub repo: RepoArg,
    #[schemars(description = "Replacements applied in order, one commit each")]
    pub items: Vec<ReplaceItem>,
    pub template: Option<CommitTemplate>,
    #[schemars(description = "Fallback summary for items without their own")]
    pub summary: Option<String>,
    pub allow_paths: Option<String>,
    pub deny_paths: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct PreviewDiffRequest {
    pub repo: RepoArg,
    pub path: String,
    #[schemars(description = "Proposed new content to diff against the file on disk")]
    pub modified_content: String,
    #[schemars(description = "Right-strip lines on both sides before diffing")]
    pub ignore_whitespace: Option<bool>,
    #[schemars(description = "Context lines around each hunk (default: 3)")]
    pub context_lines: Option<usize>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ApplyPatchRequest {
    pub repo: RepoArg,
    pub path: String,
    #[schemars(description = "Unified diff with @@ -a,b +c,d @@ hunks")]
    pub patch: String,
    pub template: Option<CommitTemplate>,
    pub summary: Option<String>,
    pub allow_paths: Option<String>,
    pub deny_paths: Option<String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct LintCommitMessageRequest {
    pub template: CommitTemplate,
    #[schemars(description = "Template variables, e.g. op/path/summary")]
    pub variables: HashMap<String, String>,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ExtractRequest {
    pub repo: RepoArg,
    #[serde(flatten)]
    pub intent: ReadIntent,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct PathRequest {
    pub repo: RepoArg,
    pub path: String,
}

#[derive(Debug, Deserialize, schemars::JsonSchema)]
pub struct ListDirRequest {
    pub repo: RepoArg,
    pub path: String,
    #[schemars(description = "Walk subdirectories and return file paths")]
    pub recursive: Option<bool>,
}

#[derive(Debug, Serialize, schemars::JsonSchema)]
pub struct CommitShaResult {
    pub commit_sha: String,
}

#[derive(Debug, Serialize, schemars::JsonSchema)]
pub struct BatchCommitResult {
    pub commit_shas: Vec<String>,
}

#[derive(Debug, Serialize, schemars::JsonSchema)]
pub struct DiffResult {
    pub diff: String,
}

#[derive(Debug, Serialize, schemars::JsonSchema)]
pub struct FileContentResult {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Serialize, schemars::JsonSchema)]
pub struct DirListResult {
    pub entries: Vec<String>,
}

#[derive(Debug, Serialize, schemars::JsonSchema)]
pub struct OkResult {
    pub ok: bool,
}

fn ok_json<T: Serialize>(value: &T) -> CallToolResult {
    CallToolResult::success(vec![Content::text(
        serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string()),
    )])
}

fn error_payload(error: &BrokerError) -> serde_json::Value {
    serde_json::json!({
        "success": false,
        "code": error.code(),
        "error": error.to_string(),
    })
}

fn err_json(error: &BrokerError) -> CallToolResult {
    CallToolResult::error(vec![Content::text(
        serde_json::to_string_pretty(&error_payload(error)).unwrap_or_else(|_| error.to_string()),
    )])
}

fn reply<T: Serialize>(outcome: Result<T, BrokerError>) -> Result<CallToolResult, ErrorData> {
    match outcome {
        Ok(value) => Ok(ok_json(&value)),
        Err(error) => {
            tracing::debug!(code = error.code(), "tool call failed: {error}");
            Ok(err_json(&error))
        }
    }
}

#[derive(Clone)]
pub struct GitFsBroker {
    git: GitCli,
    sessions: SessionStore,
    tool_router: ToolRouter<GitFsBroker>,
}

impl Default for GitFsBroker {
    fn default() -> Self {
        Self::new()
    }
}

impl GitFsBroker {
    pub fn new() -> Self {
        Self {
            git: GitCli::new(),
            sessions: SessionStore::new(),
            tool_router: Self::tool_router(),
        }
    }

    async fn open_repo(&self, arg: &RepoArg) -> Result<RepoRef, BrokerError> {
        RepoRef::open(&self.git, arg.root(), arg.branch()).await
    }

    fn authorizer(
        &self,
        repo: &RepoRef,
        allow: Option<&str>,
        deny: Option<&str>,
    ) -> Result<PathAuthorizer, BrokerError> {
        PathAuthorizer::from_config(Some(&repo.root), allow, deny)
    }

    async fn do_write_and_commit(
        &self,
        args: WriteAndCommitRequest,
    ) -> Result<WriteResult, BrokerError> {
        let repo = self.open_repo(&args.repo).await?;
        let authorizer =
            self.authorizer(&repo, args.allow_paths.as_deref(), args.deny_paths.as_deref())?;

        let mut request = WriteRequest::new(repo.clone(), args.path, args.content);
        if let Some(template) = args.template {
            request.template = template;
        }
        if let Some(op) = args.op {
            request.op = op;
        }
        if let Some(summary) = args.summary {
            request.summary = summary;
        }
        request.reason = args.reason;
        request.ticket = args.ticket;
        request.allow_create = args.allow_create.unwrap_or(true);
        request.allow_overwrite = args.allow_overwrite.unwrap_or(true);
        request.authorizer = Some(authorizer);

        let lock = repo_lock(&repo.root);
        let _guard = lock.lock().await;
        commits::write_and_commit(&self.git, &request).await
    }

    async fn do_read_with_history(
        &self,
        args: ReadWithHistoryRequest,
    ) -> Result<ReadWithHistory, BrokerError> {
        let repo = self.open_repo(&args.repo).await?;
        commits::read_with_history(&self.git, &repo, &args.path, args.history_limit.unwrap_or(10))
            .await
    }

    async fn do_start_staged(&self, args: StartStagedRequest) -> Result<StagedSession, BrokerError> {
        let repo = self.open_repo(&args.repo).await?;
        let lock = repo_lock(&repo.root);
        let _guard = lock.lock().await;
        staging::start_staged(&self.git, &self.sessions, repo, args.ticket.as_deref()).await
    }

    async fn do_staged_write(&self, args: StagedWriteRequest) -> Result<WriteResult, BrokerError> {
        let session = self.sessions.require_active(&args.session_id)?;
        let lock = repo_lock(&session.repo.root);
        let _guard = lock.lock().await;

        let mut request = WriteRequest::new(session.repo.clone(), args.path, args.content);
        request.op = "staged".to_string();
        if let Some(summary) = args.summary {
            request.summary = summary;
        } else {
            request.summary = "staged write".to_string();
        }
        staging::staged_write(&self.git, &self.sessions, &args.session_id, request).await
    }

    async fn do_staged_preview(&self, session_id: &str) -> Result<Preview, BrokerError> {
        let session = self.sessions.require_active(session_id)?;
        let lock = repo_lock(&session.repo.root);
        let _guard = lock.lock().await;
        staging::staged_preview(&self.git, &self.sessions, session_id).await
    }

    async fn do_finalize_staged(
        &self,
        args: FinalizeStagedRequest,
    ) -> Result<FinalizeResult, BrokerError> {
        let session = self.sessions.require_active(&args.session_id)?;
        let lock = repo_lock(&session.repo.root);
        let _guard = lock.lock().await;

        let options = FinalizeOptions {
            strategy: args.strategy.unwrap_or_default(),
            delete_work_branch: args.delete_work_branch.unwrap_or(true),
        };
        staging::finalize_staged(&self.git, &self.sessions, &args.session_id, &options).await
    }

    async fn do_abort_staged(&self, session_id: &str) -> Result<AbortResult, BrokerError> {
        if let SessionLoad::Active(session) = self.sessions.load(session_id) {
            let lock = repo_lock(&session.repo.root);
            let _guard = lock.lock().await;
            return staging::abort_staged(&self.git, &self.sessions, session_id).await;
        }
        staging::abort_staged(&self.git, &self.sessions, session_id).await
    }

    async fn do_replace_and_commit(
        &self,
        args: ReplaceAndCommitRequest,
    ) -> Result<CommitShaResult, BrokerError> {
        let repo = self.open_repo(&args.repo).await?;
        let authorizer =
            self.authorizer(&repo, args.allow_paths.as_deref(), args.deny_paths.as_deref())?;
        let lock = repo_lock(&repo.root);
        let _guard = lock.lock().await;

        let result = edits::replace_and_commit(
            &self.git,
            &repo,
            &args.path,
            &args.search,
            &args.replace,
            args.regex.unwrap_or(false),
            args.template.unwrap_or_else(default_template),
            args.summary.as_deref().unwrap_or("text replace"),
            Some(authorizer),
        )
        .await?;
        Ok(CommitShaResult {
            commit_sha: result.commit_sha,
        })
    }

    async fn do_batch_replace(
        &self,
        args: BatchReplaceRequest,
    ) -> Result<BatchCommitResult, BrokerError> {
        let repo = self.open_repo(&args.repo).await?;
        let authorizer =
            self.authorizer(&repo, args.allow_paths.as_deref(), args.deny_paths.as_deref())?;
        let lock = repo_lock(&repo.root);
        let _guard = lock.lock().await;

        let results = edits::batch_replace_and_commit(
            &self.git,
            &repo,
            &args.items,
            args.template.unwrap_or_else(default_template),
            args.summary.as_deref().unwrap_or("batch text replacement"),
            Some(authorizer),
        )
        .await?;
        Ok(BatchCommitResult {
            commit_shas: results.into_iter().map(|r| r.commit_sha).collect(),
        })
    }

    async fn do_preview_diff(&self, args: PreviewDiffRequest) -> Result<DiffResult, BrokerError> {
        let repo = self.open_repo(&args.repo).await?;
        let diff = edits::preview_diff(
            &repo,
            &args.path,
            &args.modified_content,
            args.ignore_whitespace.unwrap_or(false),
            args.context_lines.unwrap_or(DEFAULT_CONTEXT_LINES),
        )?;
        Ok(DiffResult { diff })
    }

    async fn do_apply_patch(&self, args: ApplyPatchRequest) -> Result<CommitShaResult, BrokerError> {
        let repo = self.open_repo(&args.repo).await?;
        let authorizer =
            self.authorizer(&repo, args.allow_paths.as_deref(), args.deny_paths.as_deref())?;
        let lock = repo_lock(&repo.root);
        let _guard = lock.lock().await;

        let result = edits::apply_patch_and_commit(
            &self.git,
            &repo,
            &args.path,
            &args.patch,
            args.template.unwrap_or_else(default_template),
            args.summary.as_deref().unwrap_or("apply patch"),
            Some(authorizer),
        )
        .await?;
        Ok(CommitShaResult {
            commit_sha: result.commit_sha,
        })
    }

    async fn do_extract(&self, args: ExtractRequest) -> Result<ReadResult, BrokerError> {
        let repo = self.open_repo(&args.repo).await?;
        reader::extract(&self.git, &repo, &args.intent).await
    }

    async fn do_read_file(&self, args: PathRequest) -> Result<FileContentResult, BrokerError> {
        let repo = self.open_repo(&args.repo).await?;
        let content = filesystem::read_file(&repo, &args.path)?;
        Ok(FileContentResult {
            path: args.path,
            content,
        })
    }

    async fn do_stat_file(&self, args: PathRequest) -> Result<FileStat, BrokerError> {
        let repo = self.open_repo(&args.repo).await?;
        filesystem::stat_file(&repo, &args.path)
    }

    async fn do_list_dir(&self, args: ListDirRequest) -> Result<DirListResult, BrokerError> {
        let repo = self.open_repo(&args.repo).await?;
        let entries = filesystem::list_dir(&repo, &args.path, args.recursive.unwrap_or(false))?;
        Ok(DirListResult { entries })
    }

    async fn do_make_dir(&self, args: PathRequest) -> Result<OkResult, BrokerError> {
        let repo = self.open_repo(&args.repo).await?;
        let lock = repo_lock(&repo.root);
        let _guard = lock.lock().await;
        filesystem::make_dir(&repo, &args.path)?;
        Ok(OkResult { ok: true })
    }
}

#[tool_router]
impl GitFsBroker {
    #[tool(
        description = "Write full file content and commit it as one templated, auditable commit on the current branch. The rendered subject must stay unique within the template's uniqueness window."
    )]
    async fn write_and_commit(
        &self,
        Parameters(args): Parameters<WriteAndCommitRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        reply(self.do_write_and_commit(args).await)
    }

    #[tool(description = "Read a file's current content plus the recent commits that touched it.")]
    async fn read_with_history(
        &self,
        Parameters(args): Parameters<ReadWithHistoryRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        reply(self.do_read_with_history(args).await)
    }

    #[tool(
        description = "Start a staged editing session: forks a work branch off the repo's current HEAD and checks it out. Returns the durable session record."
    )]
    async fn start_staged(
        &self,
        Parameters(args): Parameters<StartStagedRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        reply(self.do_start_staged(args).await)
    }

    #[tool(
        description = "Write and commit on a staged session's work branch. `session_id` is required!"
    )]
    async fn staged_write(
        &self,
        Parameters(args): Parameters<StagedWriteRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        reply(self.do_staged_write(args).await)
    }

    #[tool(
        description = "Preview a staged session: the diff against the base branch, the changed files, and the session-local commits."
    )]
    async fn staged_preview(
        &self,
        Parameters(SessionIdRequest { session_id }): Parameters<SessionIdRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        reply(self.do_staged_preview(&session_id).await)
    }

    #[tool(
        description = "Land a staged session on its base branch (merge-ff, merge-no-ff, rebase-merge or squash-merge) and clean up the work branch."
    )]
    async fn finalize_staged(
        &self,
        Parameters(args): Parameters<FinalizeStagedRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        reply(self.do_finalize_staged(args).await)
    }

    #[tool(
        description = "Abort a staged session: return to the base branch and force-delete the work branch. Aborting an unknown session id is a no-op."
    )]
    async fn abort_staged(
        &self,
        Parameters(SessionIdRequest { session_id }): Parameters<SessionIdRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        reply(self.do_abort_staged(&session_id).await)
    }

    #[tool(
        description = "Replace text in a file (literal or regex, all occurrences) and commit the result."
    )]
    async fn replace_and_commit(
        &self,
        Parameters(args): Parameters<ReplaceAndCommitRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        reply(self.do_replace_and_commit(args).await)
    }

    #[tool(
        description = "Apply a list of text replacements, one commit per item, in order. A mid-sequence failure leaves earlier commits in place."
    )]
    async fn batch_replace_and_commit(
        &self,
        Parameters(args): Parameters<BatchReplaceRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        reply(self.do_batch_replace(args).await)
    }

    #[tool(
        description = "Produce a unified diff between the file on disk and proposed new content, without committing anything."
    )]
    async fn preview_diff(
        &self,
        Parameters(args): Parameters<PreviewDiffRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        reply(self.do_preview_diff(args).await)
    }

    #[tool(
        description = "Apply a unified-diff patch to a file and commit the result. Hunk context must match the live file exactly."
    )]
    async fn apply_patch_and_commit(
        &self,
        Parameters(args): Parameters<ApplyPatchRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        reply(self.do_apply_patch(args).await)
    }

    #[tool(
        description = "Lint a commit template against variables: subject length and required {op}/{path}/{summary} placeholders."
    )]
    async fn lint_commit_message(
        &self,
        Parameters(LintCommitMessageRequest {
            template,
            variables,
        }): Parameters<LintCommitMessageRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        let result: Result<LintResult, BrokerError> = Ok(lint_commit_message(&template, &variables));
        reply(result)
    }

    #[tool(
        description = "Extract line windows around query matches in a file, with the file's commit history attached."
    )]
    async fn extract(
        &self,
        Parameters(args): Parameters<ExtractRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        reply(self.do_extract(args).await)
    }

    #[tool(description = "Read a file's content.")]
    async fn read_file(
        &self,
        Parameters(args): Parameters<PathRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        reply(self.do_read_file(args).await)
    }

    #[tool(description = "Stat a file or directory: size, mtime, kind.")]
    async fn stat_file(
        &self,
        Parameters(args): Parameters<PathRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        reply(self.do_stat_file(args).await)
    }

    #[tool(description = "List a directory, flat or recursive.")]
    async fn list_dir(
        &self,
        Parameters(args): Parameters<ListDirRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        reply(self.do_list_dir(args).await)
    }

    #[tool(description = "Create a directory (recursive, idempotent).")]
    async fn make_dir(
        &self,
        Parameters(args): Parameters<PathRequest>,
    ) -> Result<CallToolResult, ErrorData> {
        reply(self.do_make_dir(args).await)
    }
}


#[tool_handler]
impl ServerHandler for GitFsBroker {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_03_26,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "fs-git-broker".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            instructions: Some(
                "A git-enforced filesystem broker. Every accepted mutation lands as exactly one \
                 templated commit in the target repository, so all writes are attributable, \
                 reviewable and revertible. Direct tools ('write_and_commit', \
                 'replace_and_commit', 'apply_patch_and_commit') commit straight to the current \
                 branch. Staged tools ('start_staged', 'staged_write', 'staged_preview', \
                 'finalize_staged', 'abort_staged') isolate work on a session branch with \
                 preview before landing. The `repo` argument accepts a root path string or \
                 {root, branch}. Paths are always repo-relative; writes outside the repo root \
                 or against the configured allow/deny patterns are rejected."
                    .to_string(),
            ),
        }
    }
}

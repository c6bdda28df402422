//! Staged sessions: durable, branch-isolated scratch spaces. A session pins
//! a work branch forked from the repo's current HEAD; its record survives
//! process restarts in a per-user file store so any broker process can
//! preview, finalize or abort it.

use std::path::PathBuf;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{
    commits::{write_and_commit, CommitEntry, WriteRequest, WriteResult},
    error::BrokerError,
    git_cli::{GitCli, GitCliError},
    repo::RepoRef,
};
use utils::text::{file_safe_id, short_hex_id};

pub const WORK_BRANCH_PREFIX: &str = "mcp/staged/";
pub const SESSIONS_DIR_ENV: &str = "FS_GIT_SESSIONS_DIR";

#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct StagedSession {
    pub id: String,
    pub base_branch: String,
    pub work_branch: String,
    pub started_at: String,
    pub repo: RepoRef,
}

/// What loading a session record can yield. A tagged sum, so a corrupt
/// record is never confused with a missing one.
#[derive(Debug)]
pub enum SessionLoad {
    Active(StagedSession),
    NotFound,
    Corrupt(String),
}

/// One JSON file per session under a per-user directory. Writes go through
/// a temp file and a rename so concurrent broker processes never observe a
/// half-written record.
#[derive(Debug, Clone)]
pub struct SessionStore {
    dir: PathBuf,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        let dir = std::env::var(SESSIONS_DIR_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::home_dir()
                    .unwrap_or_else(std::env::temp_dir)
                    .join(".fs_git_sessions")
            });
        Self { dir }
    }

    pub fn at(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn session_file(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_safe_id(id)))
    }

    pub fn save(&self, session: &StagedSession) -> Result<(), BrokerError> {
        std::fs::create_dir_all(&self.dir)?;
        let data = serde_json::to_vec_pretty(session)
            .map_err(|e| BrokerError::Session(format!("cannot serialize session: {e}")))?;
        let tmp = tempfile::NamedTempFile::new_in(&self.dir)?;
        std::fs::write(tmp.path(), &data)?;
        tmp.persist(self.session_file(&session.id))
            .map_err(|e| BrokerError::Io(e.error))?;
        Ok(())
    }

    pub fn load(&self, id: &str) -> SessionLoad {
        let file = self.session_file(id);
        let data = match std::fs::read_to_string(&file) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return SessionLoad::NotFound,
            Err(e) => return SessionLoad::Corrupt(e.to_string()),
        };
        match serde_json::from_str(&data) {
            Ok(session) => SessionLoad::Active(session),
            Err(e) => SessionLoad::Corrupt(e.to_string()),
        }
    }

    /// Idempotent; removing a session that is already gone is fine.
    pub fn remove(&self, id: &str) {
        let _ = std::fs::remove_file(self.session_file(id));
    }

    pub fn require_active(&self, id: &str) -> Result<StagedSession, BrokerError> {
        match self.load(id) {
            SessionLoad::Active(session) => Ok(session),
            SessionLoad::NotFound => {
                Err(BrokerError::Session(format!("session not found: {id}")))
            }
            SessionLoad::Corrupt(e) => Err(BrokerError::Session(format!(
                "session record for {id} is corrupt: {e}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum FinalizeStrategy {
    MergeFf,
    MergeNoFf,
    RebaseMerge,
    SquashMerge,
}

impl FinalizeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinalizeStrategy::MergeFf => "merge-ff",
            FinalizeStrategy::MergeNoFf => "merge-no-ff",
            FinalizeStrategy::RebaseMerge => "rebase-merge",
            FinalizeStrategy::SquashMerge => "squash-merge",
        }
    }
}

impl Default for FinalizeStrategy {
    fn default() -> Self {
        FinalizeStrategy::MergeFf
    }
}

#[derive(Debug, Clone)]
pub struct FinalizeOptions {
    pub strategy: FinalizeStrategy,
    pub delete_work_branch: bool,
}

impl Default for FinalizeOptions {
    fn default() -> Self {
        Self {
            strategy: FinalizeStrategy::default(),
            delete_work_branch: true,
        }
    }
}

#[derive(Debug, Serialize, schemars::JsonSchema)]
pub struct FinalizeResult {
    pub merged_sha: String,
    pub base_branch: String,
}

#[derive(Debug, Serialize, schemars::JsonSchema)]
pub struct AbortResult {
    pub status: String,
}

#[derive(Debug, Serialize, schemars::JsonSchema)]
pub struct Preview {
    pub diff: String,
    pub files_changed: Vec<String>,
    pub commits: Vec<CommitEntry>,
}

/// Fork a work branch off the repo's current HEAD, check it out, persist
/// the session record.
pub async fn start_staged(
    git: &GitCli,
    store: &SessionStore,
    repo: RepoRef,
    ticket: Option<&str>,
) -> Result<StagedSession, BrokerError> {
    let base_branch = repo.current_branch(git).await?;
    if base_branch.is_empty() {
        return Err(BrokerError::Config(
            "repository is on a detached HEAD or has no commits".to_string(),
        ));
    }

    let id = format!("mcp/{}-{}", ticket.unwrap_or("session"), short_hex_id());
    let work_branch = format!("{WORK_BRANCH_PREFIX}{id}");

    git.git(&repo.root, ["checkout", "-b", &work_branch, &base_branch])
        .await?;

    let session = StagedSession {
        id,
        base_branch,
        work_branch,
        started_at: Utc::now().to_rfc3339(),
        repo,
    };
    store.save(&session)?;

    info!(id = %session.id, work = %session.work_branch, "started staged session");
    Ok(session)
}

/// Run the commit pipeline on the session's work branch. HEAD is switched
/// to the work branch if something else moved it; the caller's prior branch
/// is not restored.
pub async fn staged_write(
    git: &GitCli,
    store: &SessionStore,
    session_id: &str,
    mut request: WriteRequest,
) -> Result<WriteResult, BrokerError> {
    let session = store.require_active(session_id)?;

    // The branch may have been deleted out from under us; that is a session
    // failure, not a git failure.
    git.git(&session.repo.root, ["checkout", &session.work_branch])
        .await
        .map_err(|e| {
            BrokerError::Session(format!(
                "cannot check out work branch {}: {e}",
                session.work_branch
            ))
        })?;

    request.repo = session.repo.clone();
    write_and_commit(git, &request).await
}

pub async fn staged_preview(
    git: &GitCli,
    store: &SessionStore,
    session_id: &str,
) -> Result<Preview, BrokerError> {
    let session = store.require_active(session_id)?;
    let root = &session.repo.root;

    let sym_range = format!("{}...{}", session.base_branch, session.work_branch);
    let range = format!("{}..{}", session.base_branch, session.work_branch);

    let diff = git.git(root, ["diff", &sym_range]).await?;
    let files_changed = git
        .git(root, ["diff", "--name-only", &sym_range])
        .await?
        .lines()
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();
    let commits = git
        .git(root, ["log", "--format=%h %s", &range])
        .await?
        .lines()
        .filter(|l| !l.is_empty())
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
        .collect();

    Ok(Preview {
        diff,
        files_changed,
        commits,
    })
}

/// Land the work branch on the base branch with the requested strategy,
/// then clean up branch and record.
pub async fn finalize_staged(
    git: &GitCli,
    store: &SessionStore,
    session_id: &str,
    options: &FinalizeOptions,
) -> Result<FinalizeResult, BrokerError> {
    let session = store.require_active(session_id)?;
    let root = &session.repo.root;

    git.git(root, ["checkout", &session.base_branch]).await?;

    let outcome = match options.strategy {
        FinalizeStrategy::MergeFf => {
            git.git(root, ["merge", "--ff-only", &session.work_branch])
                .await
        }
        FinalizeStrategy::MergeNoFf => {
            let message = format!(
                "Merge {} into {}",
                session.work_branch, session.base_branch
            );
            git.git(
                root,
                ["merge", "--no-ff", "-m", &message, &session.work_branch],
            )
            .await
        }
        FinalizeStrategy::RebaseMerge => git.git(root, ["rebase", &session.work_branch]).await,
        FinalizeStrategy::SquashMerge => {
            match git
                .git(root, ["merge", "--squash", &session.work_branch])
                .await
            {
                Ok(_) => {
                    let subject =
                        format!("[merge] {} – staged session squash", session.work_branch);
                    git.git(root, ["commit", "-m", &subject]).await
                }
                Err(e) => Err(e),
            }
        }
    };

    outcome.map_err(|e| match e {
        GitCliError::CommandFailed(stderr) => BrokerError::Merge(format!(
            "{} of {} into {} refused: {stderr}",
            options.strategy.as_str(),
            session.work_branch,
            session.base_branch
        )),
        other => other.into(),
    })?;

    let merged_sha = git.git(root, ["rev-parse", "HEAD"]).await?.trim().to_string();

    if options.delete_work_branch {
        git.git(root, ["branch", "-D", &session.work_branch]).await?;
    }
    store.remove(session_id);

    info!(id = %session.id, sha = %merged_sha, strategy = options.strategy.as_str(), "finalized staged session");
    Ok(FinalizeResult {
        merged_sha,
        base_branch: session.base_branch,
    })
}

/// Throw the work branch away and return to the base branch. Aborting an
/// unknown id is a no-op that still reports success.
pub async fn abort_staged(
    git: &GitCli,
    store: &SessionStore,
    session_id: &str,
) -> Result<AbortResult, BrokerError> {
    match store.load(session_id) {
        SessionLoad::Active(session) => {
            git.git(&session.repo.root, ["checkout", &session.base_branch])
                .await?;
            git.git(&session.repo.root, ["branch", "-D", &session.work_branch])
                .await?;
            store.remove(session_id);
            info!(id = %session.id, "aborted staged session");
        }
        SessionLoad::NotFound => {}
        SessionLoad::Corrupt(e) => {
            // Nothing reliable to clean up in the repo; drop the bad record.
            warn!(id = session_id, "dropping corrupt session record: {e}");
            store.remove(session_id);
        }
    }
    Ok(AbortResult {
        status: "aborted".to_string(),
    })
}

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{error::BrokerError, git_cli::GitCli, git_cli::GitCliError};

/// A validated handle on one git working tree. Constructed per request,
/// immutable afterwards; `root` is always absolute.
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
pub struct RepoRef {
    pub root: PathBuf,
    #[serde(default)]
    pub branch: Option<String>,
}

impl RepoRef {
    /// Validate `root` as a git working tree and record it as a git safe
    /// directory. Fails with a config error for missing directories and
    /// non-repositories.
    pub async fn open<P: AsRef<Path>>(
        git: &GitCli,
        root: P,
        branch: Option<String>,
    ) -> Result<Self, BrokerError> {
        let root = dunce::canonicalize(root.as_ref()).map_err(|_| {
            BrokerError::Config(format!(
                "repo root {} is not an existing directory",
                root.as_ref().display()
            ))
        })?;
        if !root.is_dir() {
            return Err(BrokerError::Config(format!(
                "repo root {} is not a directory",
                root.display()
            )));
        }

        mark_safe_directory(git, &root).await?;

        git.git(&root, ["rev-parse", "--git-dir"]).await.map_err(|_| {
            BrokerError::Config(format!("{} is not a git repository", root.display()))
        })?;

        Ok(Self { root, branch })
    }

    /// Symbolic short name of HEAD. Empty output means a detached HEAD or an
    /// unborn branch; callers decide whether that is an error.
    pub async fn current_branch(&self, git: &GitCli) -> Result<String, BrokerError> {
        let out = git.git(&self.root, ["branch", "--show-current"]).await?;
        Ok(out.trim().to_string())
    }
}

/// Add `root` to the global `safe.directory` list unless it is already
/// there. `git config --add` appends blindly, so look before writing.
async fn mark_safe_directory(git: &GitCli, root: &Path) -> Result<(), BrokerError> {
    let root_str = root.display().to_string();
    let existing = match git
        .git_global(["config", "--global", "--get-all", "safe.directory"])
        .await
    {
        Ok(out) => out,
        // Exit code 1 when the key has no entries yet.
        Err(GitCliError::CommandFailed(_)) => String::new(),
        Err(e) => return Err(e.into()),
    };
    if existing.lines().any(|line| line.trim() == root_str) {
        return Ok(());
    }
    debug!("marking {} as a git safe directory", root_str);
    git.git_global(["config", "--global", "--add", "safe.directory", &root_str])
        .await?;
    Ok(())
}

//! The git subprocess boundary.
//!
//! Every git invocation in the broker goes through this one helper: it sets
//! the working directory via `-C`, captures stdout/stderr, bounds wall-clock
//! time, and maps non-zero exits to a typed error carrying trimmed stderr.
//! Mutations to a working tree must additionally hold the per-repo lock
//! (see `locks`); this module only owns the process boundary.

use std::{ffi::OsStr, path::Path, time::Duration};

use thiserror::Error;
use tokio::process::Command;
use utils::shell::resolve_executable_path;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Error)]
pub enum GitCliError {
    #[error("git executable not found or not runnable")]
    NotAvailable,
    #[error("git command failed: {0}")]
    CommandFailed(String),
    #[error("git command timed out after {0}s")]
    Timeout(u64),
}

#[derive(Clone)]
pub struct GitCli {
    timeout: Duration,
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new()
    }
}

impl GitCli {
    pub fn new() -> Self {
        let secs = std::env::var("FS_GIT_GIT_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.trim().parse::<u64>().ok())
            .filter(|s| *s > 0)
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        Self {
            timeout: Duration::from_secs(secs),
        }
    }

    /// Run `git -C <repo_path> <args...>` and return stdout on success.
    pub async fn git<I, S>(&self, repo_path: &Path, args: I) -> Result<String, GitCliError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let git = resolve_executable_path("git").ok_or(GitCliError::NotAvailable)?;
        let mut cmd = Command::new(&git);
        cmd.arg("-C").arg(repo_path);
        for a in args {
            cmd.arg(a);
        }
        self.run(cmd).await
    }

    /// Run `git <args...>` without a working directory, for global-scope
    /// configuration such as `config --global --add safe.directory`.
    pub async fn git_global<I, S>(&self, args: I) -> Result<String, GitCliError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let git = resolve_executable_path("git").ok_or(GitCliError::NotAvailable)?;
        let mut cmd = Command::new(&git);
        for a in args {
            cmd.arg(a);
        }
        self.run(cmd).await
    }

    async fn run(&self, mut cmd: Command) -> Result<String, GitCliError> {
        cmd.kill_on_drop(true);
        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| GitCliError::Timeout(self.timeout.as_secs()))?
            .map_err(|e| GitCliError::CommandFailed(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(GitCliError::CommandFailed(stderr));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

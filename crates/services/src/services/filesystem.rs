//! Thin filesystem wrappers. Everything goes through repo-root containment
//! first; none of these touch git.

use std::time::UNIX_EPOCH;

use ignore::WalkBuilder;
use serde::Serialize;

use super::{authorize::enforce_path_under_root, error::BrokerError, repo::RepoRef};

#[derive(Debug, Serialize, schemars::JsonSchema)]
pub struct FileStat {
    pub size: u64,
    pub mtime: Option<u64>,
    pub is_file: bool,
    pub is_dir: bool,
}

pub fn read_file(repo: &RepoRef, path: &str) -> Result<String, BrokerError> {
    let abs = enforce_path_under_root(repo, path)?;
    std::fs::read_to_string(&abs)
        .map_err(|_| BrokerError::NotFound(format!("cannot read {path}")))
}

pub fn stat_file(repo: &RepoRef, path: &str) -> Result<FileStat, BrokerError> {
    let abs = enforce_path_under_root(repo, path)?;
    let metadata = std::fs::metadata(&abs)
        .map_err(|_| BrokerError::NotFound(format!("cannot stat {path}")))?;
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs());
    Ok(FileStat {
        size: metadata.len(),
        mtime,
        is_file: metadata.is_file(),
        is_dir: metadata.is_dir(),
    })
}

/// Flat listings return entry names; recursive listings return paths
/// relative to the listed directory, files only.
pub fn list_dir(repo: &RepoRef, path: &str, recursive: bool) -> Result<Vec<String>, BrokerError> {
    let abs = enforce_path_under_root(repo, path)?;
    if !abs.is_dir() {
        return Err(BrokerError::NotFound(format!("{path} is not a directory")));
    }

    let mut entries = Vec::new();
    if recursive {
        let walker = WalkBuilder::new(&abs)
            .hidden(false)
            .git_ignore(false)
            .git_global(false)
            .git_exclude(false)
            .follow_links(false)
            .build();
        for entry in walker {
            let entry = entry.map_err(|e| BrokerError::Io(std::io::Error::other(e)))?;
            if entry.file_type().is_some_and(|t| t.is_file()) {
                let rel = entry
                    .path()
                    .strip_prefix(&abs)
                    .unwrap_or(entry.path())
                    .to_string_lossy()
                    .replace('\\', "/");
                entries.push(rel);
            }
        }
    } else {
        for entry in std::fs::read_dir(&abs)? {
            let entry = entry?;
            entries.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    entries.sort();
    Ok(entries)
}

/// Recursive and idempotent, like `mkdir -p`.
pub fn make_dir(repo: &RepoRef, path: &str) -> Result<(), BrokerError> {
    let abs = enforce_path_under_root(repo, path)?;
    std::fs::create_dir_all(&abs)?;
    Ok(())
}

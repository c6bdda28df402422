use thiserror::Error;
use utils::patch::PatchError;

use super::git_cli::GitCliError;

/// Error taxonomy of the broker. Every variant carries a stable machine
/// code so the dispatcher can emit typed error envelopes.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("invalid repository: {0}")]
    Config(String),
    #[error("path not authorized: {0}")]
    Auth(String),
    #[error("working tree has uncommitted changes: {0}")]
    DirtyTree(String),
    #[error("commit template rejected: {0}")]
    Template(String),
    #[error("commit subject not unique: {0}")]
    Uniqueness(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error(transparent)]
    Patch(#[from] PatchError),
    #[error("merge failed: {0}")]
    Merge(String),
    #[error("session error: {0}")]
    Session(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Git(#[from] GitCliError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl BrokerError {
    pub fn code(&self) -> &'static str {
        match self {
            BrokerError::Config(_) => "CONFIG_ERROR",
            BrokerError::Auth(_) => "AUTH_ERROR",
            BrokerError::DirtyTree(_) => "DIRTY_TREE_ERROR",
            BrokerError::Template(_) => "TEMPLATE_ERROR",
            BrokerError::Uniqueness(_) => "UNIQUENESS_ERROR",
            BrokerError::NotFound(_) => "NOT_FOUND_ERROR",
            BrokerError::Conflict(_) => "CONFLICT_ERROR",
            BrokerError::Patch(_) => "PATCH_ERROR",
            BrokerError::Merge(_) => "MERGE_ERROR",
            BrokerError::Session(_) => "SESSION_ERROR",
            BrokerError::InvalidRequest(_) => "INVALID_REQUEST",
            BrokerError::Git(_) => "GIT_ERROR",
            BrokerError::Io(_) => "IO_ERROR",
        }
    }
}

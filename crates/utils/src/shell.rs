use std::path::PathBuf;

/// Locate an executable on PATH. Returns None when the binary is missing,
/// letting callers surface their own "not available" error.
pub fn resolve_executable_path(name: &str) -> Option<PathBuf> {
    which::which(name).ok()
}

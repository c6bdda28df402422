use std::path::{Component, Path, PathBuf};

/// Resolve `.` and `..` components lexically, without touching the
/// filesystem. `..` at the root is preserved so callers can detect escapes.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                // Only pop a real segment; keep leading `..` visible.
                let popped = matches!(
                    out.components().next_back(),
                    Some(Component::Normal(_))
                ) && out.pop();
                if !popped {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Join `path` onto `root` and normalize. The result may point outside
/// `root`; containment is the caller's check.
pub fn resolve_under(root: &Path, path: &str) -> PathBuf {
    let candidate = Path::new(path);
    if candidate.is_absolute() {
        normalize_lexically(candidate)
    } else {
        normalize_lexically(&root.join(candidate))
    }
}

/// Convert a path to a repo-relative, `/`-separated string. Absolute paths
/// are stripped of the repo root; relative paths pass through. Returns None
/// for absolute paths outside the root.
pub fn to_repo_relative(root: &Path, path: &str) -> Option<String> {
    let normalized = path.replace('\\', "/");
    let p = Path::new(&normalized);
    let rel = if p.is_absolute() {
        p.strip_prefix(root).ok()?.to_path_buf()
    } else {
        p.to_path_buf()
    };
    let rel = rel.to_string_lossy().replace('\\', "/");
    Some(rel.strip_prefix("./").unwrap_or(&rel).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_resolves_dots() {
        assert_eq!(
            normalize_lexically(Path::new("/repo/a/./b/../c")),
            PathBuf::from("/repo/a/c")
        );
    }

    #[test]
    fn normalize_keeps_escaping_parents() {
        assert_eq!(
            normalize_lexically(Path::new("a/../../outside")),
            PathBuf::from("../outside")
        );
    }

    #[test]
    fn resolve_under_joins_relative_paths() {
        assert_eq!(
            resolve_under(Path::new("/repo"), "src/main.rs"),
            PathBuf::from("/repo/src/main.rs")
        );
    }

    #[test]
    fn resolve_under_normalizes_traversal() {
        assert_eq!(
            resolve_under(Path::new("/repo"), "../outside.txt"),
            PathBuf::from("/outside.txt")
        );
    }

    #[test]
    fn repo_relative_strips_root() {
        assert_eq!(
            to_repo_relative(Path::new("/repo"), "/repo/src/x.py").as_deref(),
            Some("src/x.py")
        );
        assert_eq!(
            to_repo_relative(Path::new("/repo"), "docs/readme.md").as_deref(),
            Some("docs/readme.md")
        );
        assert_eq!(to_repo_relative(Path::new("/repo"), "/elsewhere/x"), None);
    }
}

use std::{
    collections::HashMap,
    path::Path,
    sync::{Arc, Mutex},
};

// One async mutex per repository root. Mutation handlers hold the lock for
// the whole validate -> write -> commit section; requests for different
// repos proceed concurrently.
lazy_static::lazy_static! {
    static ref REPO_LOCKS: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>> =
        Arc::new(Mutex::new(HashMap::new()));
}

/// Fetch (or create) the lock guarding the repository at `root`. The key is
/// the canonicalized root so aliases of the same tree share one lock.
pub fn repo_lock(root: &Path) -> Arc<tokio::sync::Mutex<()>> {
    let key = dunce::canonicalize(root)
        .unwrap_or_else(|_| root.to_path_buf())
        .to_string_lossy()
        .to_string();
    let mut locks = REPO_LOCKS.lock().unwrap();
    locks
        .entry(key)
        .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
        .clone()
}

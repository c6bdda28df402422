use std::path::Path;

use services::services::{
    authorize::PathAuthorizer,
    edits::{
        apply_patch_and_commit, batch_replace_and_commit, preview_diff, replace_and_commit,
        ReplaceItem,
    },
    error::BrokerError,
    git_cli::GitCli,
    repo::RepoRef,
    template::default_template,
};
use tempfile::TempDir;

async fn init_repo(git: &GitCli, root: &Path) -> RepoRef {
    std::fs::create_dir_all(root).unwrap();
    git.git_global(["init", "-q", "-b", "main", &root.display().to_string()])
        .await
        .unwrap();
    git.git(root, ["config", "user.name", "Test User"])
        .await
        .unwrap();
    git.git(root, ["config", "user.email", "test@example.com"])
        .await
        .unwrap();
    std::fs::write(root.join("README.md"), "# test\n").unwrap();
    git.git(root, ["add", "README.md"]).await.unwrap();
    git.git(root, ["commit", "-q", "-m", "Initial commit"])
        .await
        .unwrap();
    RepoRef::open(git, root, None).await.unwrap()
}

async fn commit_file(git: &GitCli, repo: &RepoRef, path: &str, content: &str) {
    let full = repo.root.join(path);
    if let Some(parent) = full.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(full, content).unwrap();
    git.git(&repo.root, ["add", path]).await.unwrap();
    git.git(&repo.root, ["commit", "-q", "-m", &format!("seed {path}")])
        .await
        .unwrap();
}

async fn commit_count(git: &GitCli, repo: &RepoRef) -> usize {
    git.git(&repo.root, ["rev-list", "--count", "HEAD"])
        .await
        .unwrap()
        .trim()
        .parse()
        .unwrap()
}

#[tokio::test]
async fn literal_replace_hits_all_occurrences() {
    let git = GitCli::new();
    let td = TempDir::new().unwrap();
    let repo = init_repo(&git, &td.path().join("repo")).await;
    commit_file(&git, &repo, "conf.txt", "foo bar foo\n").await;

    let result = replace_and_commit(
        &git,
        &repo,
        "conf.txt",
        "foo",
        "baz",
        false,
        default_template(),
        "swap foo for baz",
        None,
    )
    .await
    .unwrap();

    assert_eq!(
        std::fs::read_to_string(repo.root.join("conf.txt")).unwrap(),
        "baz bar baz\n"
    );
    assert_eq!(result.message, "[replace] conf.txt – swap foo for baz");
}

#[tokio::test]
async fn regex_replace_substitutes_matches() {
    let git = GitCli::new();
    let td = TempDir::new().unwrap();
    let repo = init_repo(&git, &td.path().join("repo")).await;
    commit_file(&git, &repo, "versions.txt", "v1.2 and v3.4\n").await;

    replace_and_commit(
        &git,
        &repo,
        "versions.txt",
        r"v(\d+)\.(\d+)",
        "version $1-$2",
        true,
        default_template(),
        "spell out versions",
        None,
    )
    .await
    .unwrap();

    assert_eq!(
        std::fs::read_to_string(repo.root.join("versions.txt")).unwrap(),
        "version 1-2 and version 3-4\n"
    );
}

#[tokio::test]
async fn invalid_regex_is_an_invalid_request() {
    let git = GitCli::new();
    let td = TempDir::new().unwrap();
    let repo = init_repo(&git, &td.path().join("repo")).await;
    commit_file(&git, &repo, "f.txt", "x\n").await;

    let err = replace_and_commit(
        &git,
        &repo,
        "f.txt",
        "(unclosed",
        "y",
        true,
        default_template(),
        "bad regex",
        None,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, BrokerError::InvalidRequest(_)));
}

#[tokio::test]
async fn preview_diff_roundtrips_to_empty_on_identical_content() {
    let git = GitCli::new();
    let td = TempDir::new().unwrap();
    let repo = init_repo(&git, &td.path().join("repo")).await;
    commit_file(&git, &repo, "same.txt", "line one\nline two\n").await;

    let diff = preview_diff(&repo, "same.txt", "line one\nline two\n", false, 3).unwrap();
    assert_eq!(diff, "");
}

#[tokio::test]
async fn preview_diff_can_ignore_trailing_whitespace() {
    let git = GitCli::new();
    let td = TempDir::new().unwrap();
    let repo = init_repo(&git, &td.path().join("repo")).await;
    commit_file(&git, &repo, "pad.txt", "alpha  \nbeta\t\n").await;

    let strict = preview_diff(&repo, "pad.txt", "alpha\nbeta\n", false, 3).unwrap();
    assert!(!strict.is_empty());

    let relaxed = preview_diff(&repo, "pad.txt", "alpha\nbeta\n", true, 3).unwrap();
    assert_eq!(relaxed, "");
}

#[tokio::test]
async fn patch_roundtrip_applies_previewed_diff() {
    let git = GitCli::new();
    let td = TempDir::new().unwrap();
    let repo = init_repo(&git, &td.path().join("repo")).await;
    commit_file(&git, &repo, "f.txt", "Hello, World!\n").await;

    let before = commit_count(&git, &repo).await;
    let diff = preview_diff(&repo, "f.txt", "Hello, Patched!\n", false, 3).unwrap();
    assert!(diff.contains("-Hello, World!"));

    let result = apply_patch_and_commit(
        &git,
        &repo,
        "f.txt",
        &diff,
        default_template(),
        "patch greeting",
        None,
    )
    .await
    .unwrap();

    assert_eq!(
        std::fs::read_to_string(repo.root.join("f.txt")).unwrap(),
        "Hello, Patched!\n"
    );
    assert_eq!(commit_count(&git, &repo).await, before + 1);
    assert_eq!(result.message, "[patch] f.txt – patch greeting");
}

#[tokio::test]
async fn multi_hunk_patch_roundtrip() {
    let git = GitCli::new();
    let td = TempDir::new().unwrap();
    let repo = init_repo(&git, &td.path().join("repo")).await;

    let old: String = (1..=30).map(|i| format!("line {i}\n")).collect();
    commit_file(&git, &repo, "long.txt", &old).await;

    let new = old
        .replace("line 3\n", "line three\n")
        .replace("line 27\n", "line twenty-seven\nline twenty-seven-b\n");
    let diff = preview_diff(&repo, "long.txt", &new, false, 3).unwrap();

    apply_patch_and_commit(
        &git,
        &repo,
        "long.txt",
        &diff,
        default_template(),
        "rewrite two spots",
        None,
    )
    .await
    .unwrap();

    assert_eq!(
        std::fs::read_to_string(repo.root.join("long.txt")).unwrap(),
        new
    );
}

#[tokio::test]
async fn stale_patch_context_is_rejected_without_a_commit() {
    let git = GitCli::new();
    let td = TempDir::new().unwrap();
    let repo = init_repo(&git, &td.path().join("repo")).await;
    commit_file(&git, &repo, "f.txt", "current content\n").await;

    let patch = "--- a/f.txt\n+++ b/f.txt\n@@ -1 +1 @@\n-stale content\n+new content\n";
    let before = commit_count(&git, &repo).await;

    let err = apply_patch_and_commit(
        &git,
        &repo,
        "f.txt",
        patch,
        default_template(),
        "stale patch",
        None,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, BrokerError::Patch(_)));
    assert_eq!(commit_count(&git, &repo).await, before);
    assert_eq!(
        std::fs::read_to_string(repo.root.join("f.txt")).unwrap(),
        "current content\n"
    );
}

fn deny_secrets(repo: &RepoRef) -> PathAuthorizer {
    PathAuthorizer::new(
        &["src/**".to_string()],
        &["!src/secrets/**".to_string()],
        Some(&repo.root),
    )
    .unwrap()
}

#[tokio::test]
async fn apply_patch_respects_the_authorizer() {
    let git = GitCli::new();
    let td = TempDir::new().unwrap();
    let repo = init_repo(&git, &td.path().join("repo")).await;
    commit_file(&git, &repo, "src/secrets/token.txt", "old token\n").await;

    let diff = preview_diff(&repo, "src/secrets/token.txt", "new token\n", false, 3).unwrap();
    let before = commit_count(&git, &repo).await;

    let err = apply_patch_and_commit(
        &git,
        &repo,
        "src/secrets/token.txt",
        &diff,
        default_template(),
        "rotate token",
        Some(deny_secrets(&repo)),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, BrokerError::Auth(_)));
    assert!(err.to_string().contains("src/secrets/**"));
    assert_eq!(commit_count(&git, &repo).await, before);
    assert_eq!(
        std::fs::read_to_string(repo.root.join("src/secrets/token.txt")).unwrap(),
        "old token\n"
    );
}

#[tokio::test]
async fn batch_replace_respects_the_authorizer() {
    let git = GitCli::new();
    let td = TempDir::new().unwrap();
    let repo = init_repo(&git, &td.path().join("repo")).await;
    commit_file(&git, &repo, "src/app.rs", "old\n").await;
    commit_file(&git, &repo, "src/secrets/key.pem", "key\n").await;

    let items = vec![
        ReplaceItem {
            path: "src/app.rs".to_string(),
            search: "old".to_string(),
            replace: "new".to_string(),
            regex: false,
            summary: Some("bump app".to_string()),
        },
        ReplaceItem {
            path: "src/secrets/key.pem".to_string(),
            search: "key".to_string(),
            replace: "leaked".to_string(),
            regex: false,
            summary: Some("touch key".to_string()),
        },
    ];

    let before = commit_count(&git, &repo).await;
    let err = batch_replace_and_commit(
        &git,
        &repo,
        &items,
        default_template(),
        "batch text replacement",
        Some(deny_secrets(&repo)),
    )
    .await
    .unwrap_err();

    // The allowed item landed, the denied one stopped the batch.
    assert!(matches!(err, BrokerError::Auth(_)));
    assert_eq!(commit_count(&git, &repo).await, before + 1);
    assert_eq!(
        std::fs::read_to_string(repo.root.join("src/app.rs")).unwrap(),
        "new\n"
    );
    assert_eq!(
        std::fs::read_to_string(repo.root.join("src/secrets/key.pem")).unwrap(),
        "key\n"
    );
}

#[tokio::test]
async fn batch_replace_commits_per_item_in_order() {
    let git = GitCli::new();
    let td = TempDir::new().unwrap();
    let repo = init_repo(&git, &td.path().join("repo")).await;
    commit_file(&git, &repo, "one.txt", "aaa\n").await;
    commit_file(&git, &repo, "two.txt", "bbb\n").await;

    let items = vec![
        ReplaceItem {
            path: "one.txt".to_string(),
            search: "aaa".to_string(),
            replace: "AAA".to_string(),
            regex: false,
            summary: Some("upper one".to_string()),
        },
        ReplaceItem {
            path: "two.txt".to_string(),
            search: "bbb".to_string(),
            replace: "BBB".to_string(),
            regex: false,
            summary: Some("upper two".to_string()),
        },
    ];

    let before = commit_count(&git, &repo).await;
    let results = batch_replace_and_commit(
        &git,
        &repo,
        &items,
        default_template(),
        "batch text replacement",
        None,
    )
    .await
    .unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(commit_count(&git, &repo).await, before + 2);
    assert_eq!(results[0].message, "[replace] one.txt – upper one");
    assert_eq!(results[1].message, "[replace] two.txt – upper two");
}

#[tokio::test]
async fn batch_failure_keeps_earlier_commits() {
    let git = GitCli::new();
    let td = TempDir::new().unwrap();
    let repo = init_repo(&git, &td.path().join("repo")).await;
    commit_file(&git, &repo, "ok.txt", "fine\n").await;

    let items = vec![
        ReplaceItem {
            path: "ok.txt".to_string(),
            search: "fine".to_string(),
            replace: "great".to_string(),
            regex: false,
            summary: Some("first".to_string()),
        },
        ReplaceItem {
            path: "missing.txt".to_string(),
            search: "x".to_string(),
            replace: "y".to_string(),
            regex: false,
            summary: Some("second".to_string()),
        },
    ];

    let before = commit_count(&git, &repo).await;
    let err = batch_replace_and_commit(
        &git,
        &repo,
        &items,
        default_template(),
        "batch text replacement",
        None,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, BrokerError::NotFound(_)));
    assert_eq!(commit_count(&git, &repo).await, before + 1);
    assert_eq!(
        std::fs::read_to_string(repo.root.join("ok.txt")).unwrap(),
        "great\n"
    );
}

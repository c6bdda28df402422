use std::path::Path;

use services::services::{
    authorize::PathAuthorizer,
    commits::{read_with_history, write_and_commit, WriteRequest},
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

fn greeting_request(repo: &RepoRef) -> WriteRequest {
    let mut request = WriteRequest::new(repo.clone(), "hello.txt", "Hello\n");
    request.op = "add".to_string();
    request.summary = "create greeting".to_string();
    request
}

#[tokio::test]
async fn direct_commit_lands_with_templated_subject() {
    let git = GitCli::new();
    let td = TempDir::new().unwrap();
    let repo = init_repo(&git, &td.path().join("repo")).await;

    let result = write_and_commit(&git, &greeting_request(&repo)).await.unwrap();

    assert_eq!(
        std::fs::read_to_string(repo.root.join("hello.txt")).unwrap(),
        "Hello\n"
    );
    assert_eq!(result.message, "[add] hello.txt – create greeting");
    assert!(result.message.chars().count() <= 72);
    assert_eq!(result.branch, "main");

    let head = git.git(&repo.root, ["rev-parse", "HEAD"]).await.unwrap();
    assert_eq!(result.commit_sha, head.trim());

    let subject = git
        .git(&repo.root, ["log", "--format=%s", "-1"])
        .await
        .unwrap();
    assert_eq!(subject.trim(), "[add] hello.txt – create greeting");

    // The commit the pipeline reports is the one that touched the path.
    let path_log = git
        .git(&repo.root, ["log", "-n1", "--format=%H %s", "--", "hello.txt"])
        .await
        .unwrap();
    assert_eq!(
        path_log.trim(),
        format!("{} [add] hello.txt – create greeting", result.commit_sha)
    );
}

#[tokio::test]
async fn duplicate_subject_gets_collision_suffix_when_strictness_off() {
    let git = GitCli::new();
    let td = TempDir::new().unwrap();
    let repo = init_repo(&git, &td.path().join("repo")).await;

    write_and_commit(&git, &greeting_request(&repo)).await.unwrap();

    let mut again = greeting_request(&repo);
    again.template.enforce_unique_window = 0;
    let result = write_and_commit(&git, &again).await.unwrap();
    assert_eq!(result.message, "[add] hello.txt – create greeting (#2)");

    // A third identical call bumps, not stacks, the suffix.
    let mut third = greeting_request(&repo);
    third.template.enforce_unique_window = 0;
    let result = write_and_commit(&git, &third).await.unwrap();
    assert_eq!(result.message, "[add] hello.txt – create greeting (#3)");
}

#[tokio::test]
async fn duplicate_subject_is_rejected_when_strict() {
    let git = GitCli::new();
    let td = TempDir::new().unwrap();
    let repo = init_repo(&git, &td.path().join("repo")).await;

    write_and_commit(&git, &greeting_request(&repo)).await.unwrap();
    let err = write_and_commit(&git, &greeting_request(&repo))
        .await
        .unwrap_err();
    assert!(matches!(err, BrokerError::Uniqueness(_)));
}

#[tokio::test]
async fn path_traversal_is_blocked_and_writes_nothing() {
    let git = GitCli::new();
    let td = TempDir::new().unwrap();
    let repo = init_repo(&git, &td.path().join("repo")).await;

    let mut request = WriteRequest::new(repo.clone(), "../outside.txt", "x");
    request.op = "add".to_string();
    let err = write_and_commit(&git, &request).await.unwrap_err();
    assert!(matches!(err, BrokerError::Auth(_)));
    assert!(!td.path().join("outside.txt").exists());
}

#[tokio::test]
async fn authorizer_denies_outside_allowed_patterns() {
    let git = GitCli::new();
    let td = TempDir::new().unwrap();
    let repo = init_repo(&git, &td.path().join("repo")).await;

    let authorizer = PathAuthorizer::new(
        &["src/**".to_string()],
        &["!src/secrets/**".to_string()],
        Some(&repo.root),
    )
    .unwrap();

    let mut allowed = WriteRequest::new(repo.clone(), "src/app.go", "package main\n");
    allowed.summary = "add app".to_string();
    allowed.authorizer = Some(authorizer.clone());
    write_and_commit(&git, &allowed).await.unwrap();

    let mut denied = WriteRequest::new(repo.clone(), "src/secrets/key.pem", "secret\n");
    denied.authorizer = Some(authorizer.clone());
    let err = write_and_commit(&git, &denied).await.unwrap_err();
    assert!(matches!(err, BrokerError::Auth(_)));
    assert!(err.to_string().contains("src/**"));

    let mut outside = WriteRequest::new(repo.clone(), "docs/README.md", "# docs\n");
    outside.authorizer = Some(authorizer);
    assert!(matches!(
        write_and_commit(&git, &outside).await,
        Err(BrokerError::Auth(_))
    ));
}

#[tokio::test]
async fn file_presence_policies_are_enforced() {
    let git = GitCli::new();
    let td = TempDir::new().unwrap();
    let repo = init_repo(&git, &td.path().join("repo")).await;

    let mut no_create = WriteRequest::new(repo.clone(), "missing.txt", "x\n");
    no_create.summary = "write missing".to_string();
    no_create.allow_create = false;
    assert!(matches!(
        write_and_commit(&git, &no_create).await,
        Err(BrokerError::NotFound(_))
    ));

    let mut no_overwrite = WriteRequest::new(repo.clone(), "README.md", "replaced\n");
    no_overwrite.summary = "clobber readme".to_string();
    no_overwrite.allow_overwrite = false;
    assert!(matches!(
        write_and_commit(&git, &no_overwrite).await,
        Err(BrokerError::Conflict(_))
    ));
    assert_eq!(
        std::fs::read_to_string(repo.root.join("README.md")).unwrap(),
        "# test\n"
    );
}

#[tokio::test]
async fn dirty_tree_blocks_writes_when_overwrite_disallowed() {
    let git = GitCli::new();
    let td = TempDir::new().unwrap();
    let repo = init_repo(&git, &td.path().join("repo")).await;

    std::fs::write(repo.root.join("README.md"), "# dirty\n").unwrap();

    let mut request = WriteRequest::new(repo.clone(), "new.txt", "x\n");
    request.summary = "write while dirty".to_string();
    request.allow_overwrite = false;
    assert!(matches!(
        write_and_commit(&git, &request).await,
        Err(BrokerError::DirtyTree(_))
    ));
}

#[tokio::test]
async fn template_lint_failures_are_typed() {
    let git = GitCli::new();
    let td = TempDir::new().unwrap();
    let repo = init_repo(&git, &td.path().join("repo")).await;

    let mut request = WriteRequest::new(repo.clone(), "x.txt", "x\n");
    request.template.subject = "no placeholders here".to_string();
    let err = write_and_commit(&git, &request).await.unwrap_err();
    assert!(matches!(err, BrokerError::Template(_)));
    assert!(err.to_string().contains("{op}"));

    let mut long = WriteRequest::new(repo.clone(), "x.txt", "x\n");
    long.template = default_template();
    long.summary = "s".repeat(80);
    assert!(matches!(
        write_and_commit(&git, &long).await,
        Err(BrokerError::Template(_))
    ));
}

#[tokio::test]
async fn read_with_history_returns_content_and_touches() {
    let git = GitCli::new();
    let td = TempDir::new().unwrap();
    let repo = init_repo(&git, &td.path().join("repo")).await;

    write_and_commit(&git, &greeting_request(&repo)).await.unwrap();

    let mut edit = greeting_request(&repo);
    edit.content = "Hello again\n".to_string();
    edit.op = "edit".to_string();
    edit.summary = "update greeting".to_string();
    write_and_commit(&git, &edit).await.unwrap();

    let read = read_with_history(&git, &repo, "hello.txt", 10).await.unwrap();
    assert_eq!(read.content.as_deref(), Some("Hello again\n"));
    assert_eq!(read.history.len(), 2);
    assert_eq!(read.history[0].subject, "[edit] hello.txt – update greeting");
    assert_eq!(read.history[1].subject, "[add] hello.txt – create greeting");
}

#[tokio::test]
async fn read_with_history_tolerates_missing_files() {
    let git = GitCli::new();
    let td = TempDir::new().unwrap();
    let repo = init_repo(&git, &td.path().join("repo")).await;

    let read = read_with_history(&git, &repo, "ghost.txt", 5).await.unwrap();
    assert!(read.content.is_none());
    assert!(read.history.is_empty());
}

#[tokio::test]
async fn open_rejects_non_repositories() {
    let git = GitCli::new();
    let td = TempDir::new().unwrap();

    let missing = td.path().join("nope");
    assert!(matches!(
        RepoRef::open(&git, &missing, None).await,
        Err(BrokerError::Config(_))
    ));

    let plain = td.path().join("plain");
    std::fs::create_dir_all(&plain).unwrap();
    assert!(matches!(
        RepoRef::open(&git, &plain, None).await,
        Err(BrokerError::Config(_))
    ));
}

//! Worktree manager tests against a real git repository.
//!
//! Fixture layout: a bare origin plus a primary checkout pushed to it, so
//! `fetch origin main`, worktree creation off `origin/main`, and upstream
//! pushes all exercise the real CLI paths.

use std::path::{Path, PathBuf};
use std::process::Command;

use soda_fountain::worktree::{WorktreeManager, WorktreeProvider};
use soda_fountain::GitCli;

fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("git not available");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

struct Fixture {
    _base: tempfile::TempDir,
    origin: PathBuf,
    repo: PathBuf,
}

fn fixture() -> Fixture {
    let base = tempfile::tempdir().unwrap();
    let origin = base.path().join("origin.git");
    let work = base.path().join("work");
    let repo = work.join("repo");

    std::fs::create_dir_all(&work).unwrap();
    git(base.path(), &["init", "--bare", "origin.git"]);
    git(&work, &["init", "-b", "main", "repo"]);
    git(&repo, &["config", "user.name", "Test Agent"]);
    git(&repo, &["config", "user.email", "agent@example.com"]);
    std::fs::write(repo.join("README.md"), "# fixture\n").unwrap();
    git(&repo, &["add", "-A"]);
    git(&repo, &["commit", "-m", "initial commit"]);
    git(&repo, &["remote", "add", "origin", origin.to_str().unwrap()]);
    git(&repo, &["push", "-u", "origin", "main"]);

    Fixture {
        _base: base,
        origin,
        repo,
    }
}

#[tokio::test]
async fn create_produces_directory_on_expected_branch() {
    let f = fixture();
    let manager = WorktreeManager::new(f.repo.clone(), GitCli::default()).unwrap();

    let info = manager.create_worktree(1, 5).await.unwrap();

    assert!(info.path.is_dir());
    assert!(info.path.ends_with("agent-1-issue-5"));
    assert_eq!(info.branch, "agent-1/issue-5");
    assert_eq!(git(&info.path, &["branch", "--show-current"]), info.branch);

    manager.remove_worktree(&info.path).await.unwrap();
    assert!(!info.path.exists());
}

#[tokio::test]
async fn branch_collision_retries_with_suffix() {
    let f = fixture();
    let manager = WorktreeManager::new(f.repo.clone(), GitCli::default()).unwrap();

    let first = manager.create_worktree(1, 5).await.unwrap();
    manager.remove_worktree(&first.path).await.unwrap();
    // The branch survives worktree removal, so the next create collides.
    let second = manager.create_worktree(1, 5).await.unwrap();

    assert!(second.branch.starts_with("agent-1/issue-5-"));
    assert_eq!(git(&second.path, &["branch", "--show-current"]), second.branch);
}

#[tokio::test]
async fn commit_and_push_lands_the_branch_on_origin() {
    let f = fixture();
    let manager = WorktreeManager::new(f.repo.clone(), GitCli::default()).unwrap();

    let info = manager.create_worktree(2, 8).await.unwrap();
    std::fs::write(info.path.join("feature.rs"), "pub fn feature() {}\n").unwrap();

    manager
        .commit_and_push(&info.path, "Implement #8: feature")
        .await
        .unwrap();

    let remote_branches = git(&f.origin, &["branch", "--list"]);
    assert!(remote_branches.contains("agent-2/issue-8"));
    let subject = git(&f.origin, &["log", "-1", "--format=%s", "agent-2/issue-8"]);
    assert_eq!(subject, "Implement #8: feature");
}

#[tokio::test]
async fn commit_with_no_changes_still_pushes_the_branch() {
    let f = fixture();
    let manager = WorktreeManager::new(f.repo.clone(), GitCli::default()).unwrap();

    let info = manager.create_worktree(2, 9).await.unwrap();
    manager
        .commit_and_push(&info.path, "Implement #9: noop")
        .await
        .unwrap();

    let remote_branches = git(&f.origin, &["branch", "--list"]);
    assert!(remote_branches.contains("agent-2/issue-9"));
}

#[tokio::test]
async fn stale_directory_is_replaced_on_create() {
    let f = fixture();
    let manager = WorktreeManager::new(f.repo.clone(), GitCli::default()).unwrap();

    let stale = manager.parent_dir().join("agent-3-issue-1");
    std::fs::create_dir_all(&stale).unwrap();
    std::fs::write(stale.join("junk.txt"), "junk").unwrap();

    let info = manager.create_worktree(3, 1).await.unwrap();
    assert!(info.path.is_dir());
    assert!(!info.path.join("junk.txt").exists());
}

#[tokio::test]
async fn list_parses_names_and_reads_branches() {
    let f = fixture();
    let manager = WorktreeManager::new(f.repo.clone(), GitCli::default()).unwrap();

    let a = manager.create_worktree(1, 2).await.unwrap();
    let b = manager.create_worktree(4, 7).await.unwrap();
    // A non-worktree directory is ignored.
    std::fs::create_dir_all(manager.parent_dir().join("scratch")).unwrap();

    let mut listed = manager.list_active_worktrees().await.unwrap();
    listed.sort_by_key(|w| (w.agent_id, w.issue_number));

    assert_eq!(listed.len(), 2);
    assert_eq!((listed[0].agent_id, listed[0].issue_number), (1, 2));
    assert_eq!(listed[0].branch, a.branch);
    assert_eq!((listed[1].agent_id, listed[1].issue_number), (4, 7));
    assert_eq!(listed[1].branch, b.branch);
}

#[tokio::test]
async fn orphan_cleanup_empties_the_parent() {
    let f = fixture();
    let manager = WorktreeManager::new(f.repo.clone(), GitCli::default()).unwrap();

    manager.create_worktree(1, 1).await.unwrap();
    manager.create_worktree(2, 2).await.unwrap();
    std::fs::create_dir_all(manager.parent_dir().join("leftover")).unwrap();

    let removed = manager.cleanup_orphaned_worktrees().await.unwrap();
    assert_eq!(removed, 3);

    let remaining: Vec<_> = std::fs::read_dir(manager.parent_dir())
        .map(|entries| entries.filter_map(Result::ok).collect())
        .unwrap_or_default();
    assert!(remaining.is_empty());
}

#[tokio::test]
async fn cleanup_of_missing_parent_is_zero() {
    let f = fixture();
    let manager = WorktreeManager::new(f.repo.clone(), GitCli::default()).unwrap();
    assert_eq!(manager.cleanup_orphaned_worktrees().await.unwrap(), 0);
}

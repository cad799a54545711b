//! Isolated work directory lifecycle.
//!
//! Each claimed issue gets its own git worktree at
//! `<repo-parent>/.agent-worktrees/agent-{agent}-issue-{issue}` on branch
//! `agent-{agent}/issue-{issue}`, so concurrent edits never touch the main
//! checkout. Worktree verbs are CLI-only, so everything here goes through
//! [`GitCli`].

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::external::{GitCli, GitError};

const WORKTREE_PARENT: &str = ".agent-worktrees";

/// Handle to one live worktree. Plain value type held by the agent loop
/// during Working/Reviewing only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeInfo {
    pub path: PathBuf,
    pub branch: String,
    pub agent_id: u32,
    pub issue_number: u64,
}

#[derive(Debug, Error)]
pub enum WorktreeError {
    #[error("workspace root has no parent directory: {0}")]
    NoParentDir(PathBuf),
    #[error("git failure: {0}")]
    Git(#[from] GitError),
    #[error("push failed: {stderr}")]
    PushFailed { stderr: String },
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Seam the agent loop depends on; [`WorktreeManager`] is the production
/// implementation.
#[async_trait]
pub trait WorktreeProvider: Send + Sync {
    async fn create_worktree(
        &self,
        agent_id: u32,
        issue_number: u64,
    ) -> Result<WorktreeInfo, WorktreeError>;
    async fn commit_and_push(&self, path: &Path, message: &str) -> Result<(), WorktreeError>;
    async fn remove_worktree(&self, path: &Path) -> Result<(), WorktreeError>;
    async fn cleanup_orphaned_worktrees(&self) -> Result<usize, WorktreeError>;
    async fn list_active_worktrees(&self) -> Result<Vec<WorktreeInfo>, WorktreeError>;
}

/// Manages worktree creation, landing, and cleanup for the whole pool.
#[derive(Debug, Clone)]
pub struct WorktreeManager {
    repo_root: PathBuf,
    parent_dir: PathBuf,
    git: GitCli,
}

fn worktree_dir_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^agent-(\d+)-issue-(\d+)$").expect("valid regex"))
}

impl WorktreeManager {
    /// `repo_root` is the primary checkout; worktrees live in a sibling
    /// directory so repository tooling never scans them.
    pub fn new(repo_root: PathBuf, git: GitCli) -> Result<Self, WorktreeError> {
        let parent = repo_root
            .parent()
            .ok_or_else(|| WorktreeError::NoParentDir(repo_root.clone()))?
            .join(WORKTREE_PARENT);
        Ok(Self {
            repo_root,
            parent_dir: parent,
            git,
        })
    }

    pub fn parent_dir(&self) -> &Path {
        &self.parent_dir
    }

    fn worktree_path(&self, agent_id: u32, issue_number: u64) -> PathBuf {
        self.parent_dir
            .join(format!("agent-{agent_id}-issue-{issue_number}"))
    }

    async fn add_worktree(&self, branch: &str, path: &Path) -> Result<(), GitError> {
        self.git
            .run(
                &self.repo_root,
                &[
                    "worktree",
                    "add",
                    "-b",
                    branch,
                    path.to_str().unwrap_or_default(),
                    "origin/main",
                ],
            )
            .await
            .map(|_| ())
    }

    async fn prune(&self) {
        if let Err(e) = self.git.run(&self.repo_root, &["worktree", "prune"]).await {
            warn!(error = %e, "worktree prune failed");
        }
    }
}

#[async_trait]
impl WorktreeProvider for WorktreeManager {
    async fn create_worktree(
        &self,
        agent_id: u32,
        issue_number: u64,
    ) -> Result<WorktreeInfo, WorktreeError> {
        let path = self.worktree_path(agent_id, issue_number);
        if path.exists() {
            debug!(path = %path.display(), "removing stale worktree directory");
            tokio::fs::remove_dir_all(&path)
                .await
                .map_err(|source| WorktreeError::Io {
                    path: path.clone(),
                    source,
                })?;
            self.prune().await;
        }
        tokio::fs::create_dir_all(&self.parent_dir)
            .await
            .map_err(|source| WorktreeError::Io {
                path: self.parent_dir.clone(),
                source,
            })?;

        self.git.fetch(&self.repo_root, "origin", "main").await?;

        let branch = format!("agent-{agent_id}/issue-{issue_number}");
        let branch = match self.add_worktree(&branch, &path).await {
            Ok(()) => branch,
            Err(e) if e.is_already_exists() => {
                // Branch left over from an earlier run; take a unique name
                // instead of fighting over it.
                let suffixed = format!("{branch}-{}", Utc::now().timestamp());
                warn!(
                    branch = %branch,
                    retry = %suffixed,
                    "branch collision, retrying with timestamp suffix"
                );
                self.add_worktree(&suffixed, &path).await?;
                suffixed
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            agent_id = %agent_id,
            issue = %issue_number,
            branch = %branch,
            path = %path.display(),
            "created worktree"
        );
        Ok(WorktreeInfo {
            path,
            branch,
            agent_id,
            issue_number,
        })
    }

    async fn commit_and_push(&self, path: &Path, message: &str) -> Result<(), WorktreeError> {
        self.git.run(path, &["add", "-A"]).await?;

        // An execution session may legitimately leave nothing staged (e.g.
        // it only ran checks); the branch still gets pushed.
        let staged = self.git.run(path, &["status", "--porcelain"]).await?;
        if staged.is_empty() {
            debug!(path = %path.display(), "nothing to commit, pushing anyway");
        } else {
            self.git.run(path, &["commit", "-m", message]).await?;
        }

        let branch = self.git.current_branch(path).await?;
        self.git
            .run(path, &["push", "-u", "origin", &branch])
            .await
            .map_err(|e| match e {
                GitError::CommandFailed { stderr, .. } => WorktreeError::PushFailed { stderr },
                other => other.into(),
            })?;
        Ok(())
    }

    async fn remove_worktree(&self, path: &Path) -> Result<(), WorktreeError> {
        let removal = self
            .git
            .run(
                &self.repo_root,
                &[
                    "worktree",
                    "remove",
                    "--force",
                    path.to_str().unwrap_or_default(),
                ],
            )
            .await;

        if let Err(e) = removal {
            warn!(path = %path.display(), error = %e, "worktree remove failed, deleting directory");
            if path.exists() {
                tokio::fs::remove_dir_all(path)
                    .await
                    .map_err(|source| WorktreeError::Io {
                        path: path.to_path_buf(),
                        source,
                    })?;
            }
        }

        self.prune().await;
        Ok(())
    }

    async fn cleanup_orphaned_worktrees(&self) -> Result<usize, WorktreeError> {
        let mut removed = 0;
        let mut dir = match tokio::fs::read_dir(&self.parent_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(source) => {
                return Err(WorktreeError::Io {
                    path: self.parent_dir.clone(),
                    source,
                })
            }
        };

        while let Ok(Some(entry)) = dir.next_entry().await {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            match self.remove_worktree(&path).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "orphan cleanup failed"),
            }
        }

        if removed > 0 {
            info!(removed = removed, "cleaned up orphaned worktrees");
        }
        Ok(removed)
    }

    async fn list_active_worktrees(&self) -> Result<Vec<WorktreeInfo>, WorktreeError> {
        let mut found = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.parent_dir).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(found),
            Err(source) => {
                return Err(WorktreeError::Io {
                    path: self.parent_dir.clone(),
                    source,
                })
            }
        };

        while let Ok(Some(entry)) = dir.next_entry().await {
            let path = entry.path();
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(caps) = worktree_dir_pattern().captures(name) else {
                continue;
            };
            let (Ok(agent_id), Ok(issue_number)) = (caps[1].parse::<u32>(), caps[2].parse::<u64>())
            else {
                continue;
            };

            // Entries whose branch lookup fails are skipped rather than
            // reported half-formed.
            match self.git.current_branch(&path).await {
                Ok(branch) if !branch.is_empty() => found.push(WorktreeInfo {
                    path,
                    branch,
                    agent_id,
                    issue_number,
                }),
                Ok(_) | Err(_) => {
                    debug!(path = %path.display(), "skipping worktree without readable branch");
                }
            }
        }

        Ok(found)
    }
}

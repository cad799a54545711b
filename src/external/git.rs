//! Thin async wrapper around the git CLI.
//!
//! Worktree verbs have no library equivalent, so the worktree manager and the
//! review diff capture go through here. Every call pins a working directory
//! and returns trimmed stdout; failures carry the git stderr verbatim.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use super::command::{CommandError, CommandExecutor, ProcessCommandExecutor};

#[derive(Debug, Error)]
pub enum GitError {
    #[error("git {args} failed: {stderr}")]
    CommandFailed { args: String, stderr: String },
    #[error("git could not be executed: {source}")]
    Unavailable {
        #[from]
        source: CommandError,
    },
}

impl GitError {
    /// True when the failure indicates a ref that already exists (branch
    /// collision on worktree creation).
    pub fn is_already_exists(&self) -> bool {
        matches!(self, GitError::CommandFailed { stderr, .. } if stderr.contains("already exists"))
    }
}

/// Async git CLI client. Stateless; safe to share across agents.
#[derive(Clone)]
pub struct GitCli {
    executor: Arc<dyn CommandExecutor>,
}

impl std::fmt::Debug for GitCli {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitCli").finish()
    }
}

impl Default for GitCli {
    fn default() -> Self {
        Self::new(Arc::new(ProcessCommandExecutor))
    }
}

impl GitCli {
    pub fn new(executor: Arc<dyn CommandExecutor>) -> Self {
        Self { executor }
    }

    /// Run `git <args>` in `dir`. Returns trimmed stdout.
    pub async fn run(&self, dir: &Path, args: &[&str]) -> Result<String, GitError> {
        debug!(dir = %dir.display(), args = ?args, "git");
        let output = self.executor.execute("git", args, dir).await?;
        if output.success() {
            Ok(output.stdout.trim().to_string())
        } else {
            Err(GitError::CommandFailed {
                args: args.join(" "),
                stderr: output.stderr.trim().to_string(),
            })
        }
    }

    pub async fn fetch(&self, dir: &Path, remote: &str, refspec: &str) -> Result<(), GitError> {
        self.run(dir, &["fetch", remote, refspec]).await.map(|_| ())
    }

    pub async fn current_branch(&self, dir: &Path) -> Result<String, GitError> {
        self.run(dir, &["branch", "--show-current"]).await
    }

    /// Diff against the first parent of HEAD. Empty when no parent commit
    /// exists.
    pub async fn diff_against_parent(&self, dir: &Path) -> String {
        self.run(dir, &["diff", "HEAD~1"]).await.unwrap_or_default()
    }
}

/// Boxed trait view for callers that mock git in tests.
#[async_trait]
pub trait GitRunner: Send + Sync {
    async fn run(&self, dir: &Path, args: &[&str]) -> Result<String, GitError>;
}

#[async_trait]
impl GitRunner for GitCli {
    async fn run(&self, dir: &Path, args: &[&str]) -> Result<String, GitError> {
        GitCli::run(self, dir, args).await
    }
}

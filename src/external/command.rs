//! Base command execution abstraction.
//!
//! Provides the foundational trait for executing external commands, enabling
//! dependency injection for testing. Every invocation pins a working
//! directory; agents run concurrently and must never depend on the process
//! CWD.

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status_code == 0
    }
}

#[derive(Debug, Error, Clone)]
pub enum CommandError {
    #[error("command not found: {command}")]
    CommandNotFound { command: String },
    #[error("io error: {message}")]
    Io { message: String },
}

/// Trait for executing external commands.
///
/// The rest of the codebase executes commands through this seam rather than
/// `tokio::process::Command` directly, so tests can substitute a mock.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(
        &self,
        program: &str,
        args: &[&str],
        cwd: &Path,
    ) -> Result<CommandOutput, CommandError>;
}

/// Real implementation using tokio's process support.
#[derive(Debug, Default)]
pub struct ProcessCommandExecutor;

#[async_trait]
impl CommandExecutor for ProcessCommandExecutor {
    async fn execute(
        &self,
        program: &str,
        args: &[&str],
        cwd: &Path,
    ) -> Result<CommandOutput, CommandError> {
        let output = tokio::process::Command::new(program)
            .args(args)
            .current_dir(cwd)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    CommandError::CommandNotFound {
                        command: program.to_string(),
                    }
                } else {
                    CommandError::Io {
                        message: e.to_string(),
                    }
                }
            })?;

        Ok(CommandOutput {
            status_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn execute_captures_stdout() {
        let executor = ProcessCommandExecutor;
        let out = executor
            .execute("echo", &["hello"], Path::new("."))
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
    }

    #[tokio::test]
    async fn missing_program_is_reported() {
        let executor = ProcessCommandExecutor;
        let err = executor
            .execute("definitely-not-a-real-program", &[], Path::new("."))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::CommandNotFound { .. }));
    }
}

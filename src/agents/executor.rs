//! Execution agent: runs one implementation session inside a worktree.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::llm::{SessionDriver, SessionMessage, SessionRequest, SessionResult, ToolPreset};
use crate::queue::WorkItem;
use crate::sessions::SessionHooks;

/// Aggregated outcome of one execution session.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionResult {
    pub success: bool,
    pub cost_usd: f64,
    pub files_touched: BTreeSet<String>,
    pub turns_used: u32,
    pub error: Option<String>,
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("worktree path does not exist: {0}")]
    MissingWorktree(std::path::PathBuf),
    #[error("session error: {0}")]
    Session(#[from] crate::llm::SessionError),
}

/// Input fields a tool-use event may carry file paths in.
const PATH_FIELDS: &[&str] = &[
    "file_path", "path", "paths", "files", "file", "target", "source",
];

/// Runs write-capable LLM sessions against claimed work items.
pub struct ExecutionAgent {
    driver: Arc<dyn SessionDriver>,
    max_budget_usd: f64,
    max_turns: u32,
}

impl std::fmt::Debug for ExecutionAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionAgent")
            .field("max_budget_usd", &self.max_budget_usd)
            .field("max_turns", &self.max_turns)
            .finish()
    }
}

impl ExecutionAgent {
    pub fn new(driver: Arc<dyn SessionDriver>, max_budget_usd: f64, max_turns: u32) -> Self {
        Self {
            driver,
            max_budget_usd,
            max_turns,
        }
    }

    /// Run the implementation session for `item` inside `worktree`.
    ///
    /// Cancellation is a clean early exit: the result carries
    /// `success = false`, the fixed abort message, and whatever cost/turn
    /// accounting already arrived.
    pub async fn execute(
        &self,
        item: &WorkItem,
        worktree: &Path,
        hooks: &SessionHooks,
        cancel: CancellationToken,
    ) -> Result<ExecutionResult, ExecutionError> {
        if !worktree.exists() {
            return Err(ExecutionError::MissingWorktree(worktree.to_path_buf()));
        }

        let request = SessionRequest {
            prompt: build_prompt(item),
            cwd: worktree.to_path_buf(),
            tools: ToolPreset::WriteEnabled,
            max_budget_usd: self.max_budget_usd,
            max_turns: self.max_turns,
            cancel: cancel.clone(),
        };
        let mut stream = self.driver.run(request).await?;

        let mut files_touched = BTreeSet::new();
        let mut terminal: Option<SessionResult> = None;
        let mut aborted = false;

        loop {
            let message = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    aborted = true;
                    // Drain whatever the driver already queued; the terminal
                    // result often races the cancel and carries partial cost.
                    while let Ok(message) = stream.try_recv() {
                        if let SessionMessage::Result(result) = message {
                            terminal = Some(result);
                        }
                    }
                    None
                }
                message = stream.recv() => message,
            };

            let Some(message) = message else { break };
            match message {
                SessionMessage::ToolUse { tool_name, input } => {
                    let files = extract_file_paths(&input);
                    hooks.on_tool_use(&tool_name, &files).await;
                    files_touched.extend(files);
                }
                SessionMessage::Assistant { .. } => {}
                SessionMessage::Result(result) => {
                    terminal = Some(result);
                    break;
                }
            }
        }

        hooks.on_session_stop().await;

        let (cost_usd, turns_used) = terminal
            .as_ref()
            .map(|r| (r.total_cost_usd, r.num_turns))
            .unwrap_or((0.0, 0));

        if aborted {
            info!(issue = %item.issue_number, cost_usd = %cost_usd, "execution aborted");
            return Ok(ExecutionResult {
                success: false,
                cost_usd,
                files_touched,
                turns_used,
                error: Some("Execution aborted".to_string()),
            });
        }

        let result = match terminal {
            Some(result) => result,
            None => {
                return Ok(ExecutionResult {
                    success: false,
                    cost_usd,
                    files_touched,
                    turns_used,
                    error: Some("session ended without a result message".to_string()),
                })
            }
        };

        debug!(
            issue = %item.issue_number,
            subtype = %result.subtype,
            cost_usd = %result.total_cost_usd,
            turns = %result.num_turns,
            files = files_touched.len(),
            "execution session finished"
        );

        let success = result.is_success();
        let error = (!success).then(|| result.error_text());
        Ok(ExecutionResult {
            success,
            cost_usd: result.total_cost_usd,
            files_touched,
            turns_used: result.num_turns,
            error,
        })
    }
}

fn build_prompt(item: &WorkItem) -> String {
    let criteria = item
        .acceptance_criteria
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{}. {}", i + 1, c))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Implement the following issue in this repository checkout.\n\n\
         # Issue #{number}: {title}\n\n{body}\n\n\
         # Acceptance criteria\n{criteria}\n\n\
         Commit nothing yourself; the harness commits and pushes when you are done.",
        number = item.issue_number,
        title = item.issue_title,
        body = item.issue_body,
        criteria = criteria,
    )
}

/// Union of path-like strings found in a tool-use input, trimmed and
/// deduplicated.
pub fn extract_file_paths(input: &serde_json::Value) -> Vec<String> {
    let mut seen = BTreeSet::new();
    for field in PATH_FIELDS {
        match input.get(field) {
            Some(serde_json::Value::String(s)) => {
                let s = s.trim();
                if !s.is_empty() {
                    seen.insert(s.to_string());
                }
            }
            Some(serde_json::Value::Array(items)) => {
                for item in items {
                    if let Some(s) = item.as_str() {
                        let s = s.trim();
                        if !s.is_empty() {
                            seen.insert(s.to_string());
                        }
                    }
                }
            }
            _ => {}
        }
    }
    seen.into_iter().collect()
}

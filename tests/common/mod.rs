//! Shared fakes for integration tests.
//!
//! Everything the agent loop touches is injected, so the tests drive a real
//! loop against an in-memory board, a scripted session driver, and a
//! filesystem-only worktree provider.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;

use soda_fountain::agents::AgentLoopSettings;
use soda_fountain::external::{CommandError, CommandExecutor, CommandOutput};
use soda_fountain::github::{CreatedIssue, GitHubError};
use soda_fountain::llm::{SessionDriver, SessionError, SessionMessage, SessionRequest, SessionResult, SessionStream};
use soda_fountain::worktree::{WorktreeError, WorktreeInfo, WorktreeProvider};
use soda_fountain::{AgentState, EventSink, GitCli, WorkItem, WorkQueue};

pub fn work_item(issue: u64) -> WorkItem {
    WorkItem {
        project_number: 1,
        issue_number: issue,
        item_id: format!("I_{issue}"),
        issue_title: format!("Issue {issue}"),
        issue_body: "Do the thing.".to_string(),
        acceptance_criteria: vec!["AC-1".to_string()],
        labels: Default::default(),
    }
}

/// In-memory board: a list of items handed out once, scripted claim answers,
/// and a record of created issues.
pub struct FakeQueue {
    items: Mutex<Vec<WorkItem>>,
    claim_answers: Mutex<Vec<bool>>,
    pub claims: Mutex<Vec<(String, String, u32)>>,
    pub created: Mutex<Vec<(String, String)>>,
    pub titles: Vec<String>,
}

impl FakeQueue {
    pub fn new(items: Vec<WorkItem>) -> Self {
        Self {
            items: Mutex::new(items),
            claim_answers: Mutex::new(Vec::new()),
            claims: Mutex::new(Vec::new()),
            created: Mutex::new(Vec::new()),
            titles: Vec::new(),
        }
    }

    pub fn with_titles(mut self, titles: Vec<String>) -> Self {
        self.titles = titles;
        self
    }

    /// Answers are consumed in order; when exhausted, claims succeed.
    pub fn with_claim_answers(self, answers: Vec<bool>) -> Self {
        *self.claim_answers.lock().unwrap() = answers;
        self
    }
}

#[async_trait]
impl WorkQueue for FakeQueue {
    async fn find_next_work_item(&self, _agent_id: u32) -> Result<Option<WorkItem>, GitHubError> {
        let mut items = self.items.lock().unwrap();
        if items.is_empty() {
            Ok(None)
        } else {
            Ok(Some(items.remove(0)))
        }
    }

    async fn claim_issue(&self, project_id: &str, item_id: &str, agent_id: u32) -> bool {
        self.claims
            .lock()
            .unwrap()
            .push((project_id.to_string(), item_id.to_string(), agent_id));
        let mut answers = self.claim_answers.lock().unwrap();
        if answers.is_empty() {
            true
        } else {
            answers.remove(0)
        }
    }

    async fn create_issue(
        &self,
        _owner: &str,
        _repo: &str,
        title: &str,
        body: &str,
        _labels: Option<Vec<String>>,
    ) -> Result<CreatedIssue, GitHubError> {
        self.created
            .lock()
            .unwrap()
            .push((title.to_string(), body.to_string()));
        Ok(CreatedIssue {
            number: 100,
            id: "I_100".to_string(),
        })
    }

    async fn update_issue_status(
        &self,
        _project_id: &str,
        _item_id: &str,
        _field_id: &str,
        _option_id: &str,
    ) -> Result<(), GitHubError> {
        Ok(())
    }

    async fn get_open_issue_count(&self, _owner: &str, _repo: &str) -> Result<u64, GitHubError> {
        Ok(self.titles.len() as u64)
    }

    async fn list_open_issue_titles(
        &self,
        _owner: &str,
        _repo: &str,
    ) -> Result<Vec<String>, GitHubError> {
        Ok(self.titles.clone())
    }
}

/// Worktree provider that only touches the filesystem.
pub struct FakeWorktrees {
    root: PathBuf,
    pub created: Mutex<Vec<(u32, u64)>>,
    pub removed: Mutex<Vec<PathBuf>>,
    pub pushes: Mutex<Vec<(PathBuf, String)>>,
    pub fail_push: bool,
}

impl FakeWorktrees {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            created: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            pushes: Mutex::new(Vec::new()),
            fail_push: false,
        }
    }
}

#[async_trait]
impl WorktreeProvider for FakeWorktrees {
    async fn create_worktree(
        &self,
        agent_id: u32,
        issue_number: u64,
    ) -> Result<WorktreeInfo, WorktreeError> {
        let path = self.root.join(format!("agent-{agent_id}-issue-{issue_number}"));
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|source| WorktreeError::Io {
                path: path.clone(),
                source,
            })?;
        self.created.lock().unwrap().push((agent_id, issue_number));
        Ok(WorktreeInfo {
            path,
            branch: format!("agent-{agent_id}/issue-{issue_number}"),
            agent_id,
            issue_number,
        })
    }

    async fn commit_and_push(&self, path: &Path, message: &str) -> Result<(), WorktreeError> {
        if self.fail_push {
            return Err(WorktreeError::PushFailed {
                stderr: "remote rejected".to_string(),
            });
        }
        self.pushes
            .lock()
            .unwrap()
            .push((path.to_path_buf(), message.to_string()));
        Ok(())
    }

    async fn remove_worktree(&self, path: &Path) -> Result<(), WorktreeError> {
        self.removed.lock().unwrap().push(path.to_path_buf());
        let _ = tokio::fs::remove_dir_all(path).await;
        Ok(())
    }

    async fn cleanup_orphaned_worktrees(&self) -> Result<usize, WorktreeError> {
        Ok(0)
    }

    async fn list_active_worktrees(&self) -> Result<Vec<WorktreeInfo>, WorktreeError> {
        Ok(Vec::new())
    }
}

/// Plays back one pre-programmed message script per `run` call, in order.
pub struct ScriptedDriver {
    scripts: Mutex<Vec<Vec<SessionMessage>>>,
    pub requests: Mutex<Vec<SessionRequest>>,
}

impl ScriptedDriver {
    pub fn new(scripts: Vec<Vec<SessionMessage>>) -> Self {
        Self {
            scripts: Mutex::new(scripts),
            requests: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl SessionDriver for ScriptedDriver {
    async fn run(&self, request: SessionRequest) -> Result<SessionStream, SessionError> {
        self.requests.lock().unwrap().push(request.clone());
        let script = {
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                return Err(SessionError::StartFailed("script exhausted".into()));
            }
            scripts.remove(0)
        };

        let (tx, rx) = mpsc::channel(16);
        tokio::spawn(async move {
            for message in script {
                if tx.send(message).await.is_err() {
                    break;
                }
            }
        });
        Ok(rx)
    }
}

pub fn result_message(subtype: &str, cost: f64, turns: u32, text: Option<&str>) -> SessionMessage {
    SessionMessage::Result(SessionResult {
        subtype: subtype.to_string(),
        total_cost_usd: cost,
        num_turns: turns,
        result: text.map(str::to_string),
        errors: Vec::new(),
    })
}

pub fn execution_script(cost: f64, file: &str) -> Vec<SessionMessage> {
    vec![
        SessionMessage::ToolUse {
            tool_name: "Edit".to_string(),
            input: json!({ "file_path": file }),
        },
        result_message("success", cost, 3, Some("done")),
    ]
}

pub fn review_script(approved: bool) -> Vec<SessionMessage> {
    let verdict = json!({
        "approved": approved,
        "criteriaResults": [
            { "criterion": "AC-1", "passed": approved, "feedback": "checked" }
        ],
        "summary": if approved { "looks good" } else { "missing coverage" },
        "testsRan": true,
        "testsPassed": approved,
    });
    vec![result_message("success", 0.01, 1, Some(&verdict.to_string()))]
}

/// Event sink recording everything it sees.
#[derive(Default)]
pub struct RecordingSink {
    pub transitions: Mutex<Vec<(u32, AgentState, AgentState)>>,
    pub costs: Mutex<Vec<(u32, f64)>>,
    pub errors: Mutex<Vec<(u32, String)>>,
    pub heartbeats: Mutex<u32>,
}

impl EventSink for RecordingSink {
    fn on_status_change(&self, agent_id: u32, from: AgentState, to: AgentState) {
        self.transitions.lock().unwrap().push((agent_id, from, to));
    }

    fn on_cost_update(&self, agent_id: u32, cost_usd: f64) {
        self.costs.lock().unwrap().push((agent_id, cost_usd));
    }

    fn on_error(&self, agent_id: u32, error: &str) {
        self.errors.lock().unwrap().push((agent_id, error.to_string()));
    }

    fn on_heartbeat(&self, _agent_id: u32) {
        *self.heartbeats.lock().unwrap() += 1;
    }
}

struct FailingExecutor;

#[async_trait]
impl CommandExecutor for FailingExecutor {
    async fn execute(
        &self,
        _program: &str,
        _args: &[&str],
        _cwd: &Path,
    ) -> Result<CommandOutput, CommandError> {
        Ok(CommandOutput {
            status_code: 1,
            stdout: String::new(),
            stderr: "not a repository".to_string(),
        })
    }
}

/// Git client whose every invocation fails; review diffs fold to empty.
pub fn stub_git() -> GitCli {
    GitCli::new(Arc::new(FailingExecutor))
}

/// Loop settings tuned for fast tests.
pub fn fast_settings(workspace_root: &Path) -> AgentLoopSettings {
    AgentLoopSettings {
        owner: "acme".to_string(),
        repo: "widgets".to_string(),
        project_id: "PVT_1".to_string(),
        enabled_categories: Vec::new(),
        workspace_root: workspace_root.to_path_buf(),
        idle_poll: Duration::from_millis(25),
        cooldown: Duration::from_millis(25),
        max_budget_per_task_usd: 5.0,
        max_budget_per_review_usd: 1.0,
        max_budget_per_ideation_usd: 1.0,
        max_turns_per_task: 50,
    }
}

/// Poll until `predicate` holds or the deadline passes.
pub async fn wait_for<F: Fn() -> bool>(predicate: F, what: &str) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        if predicate() {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

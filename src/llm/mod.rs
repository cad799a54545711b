//! LLM session interface.
//!
//! The orchestrator never talks to a model SDK directly; a [`SessionDriver`]
//! is injected and streamed. A session yields tool-use messages while it
//! runs and exactly one terminal result message carrying cost and turn
//! accounting.

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Tool surface granted to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolPreset {
    /// Read/search tools only. Review and ideation sessions must not be able
    /// to touch the worktree.
    ReadOnly,
    /// Full edit/write/execute tools for implementation sessions.
    WriteEnabled,
}

/// One session request.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub prompt: String,
    pub cwd: PathBuf,
    pub tools: ToolPreset,
    pub max_budget_usd: f64,
    pub max_turns: u32,
    /// Cooperative cancel handle; the driver should end the stream promptly
    /// after it fires.
    pub cancel: CancellationToken,
}

/// Terminal accounting message of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionResult {
    /// "success" on a clean finish; anything else is a failure subtype.
    pub subtype: String,
    pub total_cost_usd: f64,
    pub num_turns: u32,
    /// Final assistant text, when the session produced one.
    pub result: Option<String>,
    pub errors: Vec<String>,
}

impl SessionResult {
    pub fn is_success(&self) -> bool {
        self.subtype == "success"
    }

    /// Joined error description, falling back to the subtype name.
    pub fn error_text(&self) -> String {
        if self.errors.is_empty() {
            self.subtype.clone()
        } else {
            self.errors.join("; ")
        }
    }
}

/// Messages observed on a session stream.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionMessage {
    /// The model invoked a tool; `input` is the raw tool input object.
    ToolUse {
        tool_name: String,
        input: serde_json::Value,
    },
    /// Plain assistant output between tool calls.
    Assistant { text: String },
    /// Terminal message; nothing follows it.
    Result(SessionResult),
}

pub type SessionStream = mpsc::Receiver<SessionMessage>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session failed to start: {0}")]
    StartFailed(String),
    #[error("session transport error: {0}")]
    Transport(String),
}

/// Transport seam to the model SDK.
#[async_trait]
pub trait SessionDriver: Send + Sync {
    /// Start a session and return its message stream. The stream ends after
    /// the terminal result message or on cancellation.
    async fn run(&self, request: SessionRequest) -> Result<SessionStream, SessionError>;
}

//! Durable per-agent session state for external observers.
//!
//! On every tool-use event the hooks write two sibling files under
//! `<workspace>/.claude-sessions/`: the full agent snapshot
//! (`agent-{id}.session`) and a one-field liveness marker
//! (`agent-{id}.signal`). Both writes are temp-file + rename and share the
//! same timestamp. Write failures are logged and swallowed; a hook must
//! never stall the LLM session it observes.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::agent_lifecycle::AgentState;
use crate::events::{ActivityEvent, EventSink};
use crate::fs::write_json_atomic;

/// Status vocabulary exposed to observers. Coarser than the FSM: claiming
/// has no branch yet, so it reads as idle until the claim lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Idle,
    Working,
    Reviewing,
    Ideating,
    Paused,
}

impl From<AgentState> for SessionStatus {
    fn from(state: AgentState) -> Self {
        match state {
            AgentState::Working => SessionStatus::Working,
            AgentState::Reviewing => SessionStatus::Reviewing,
            AgentState::Ideating | AgentState::CreatingProject => SessionStatus::Ideating,
            AgentState::Paused => SessionStatus::Paused,
            AgentState::Idle
            | AgentState::Claiming
            | AgentState::Stopped
            | AgentState::Error
            | AgentState::Cooldown => SessionStatus::Idle,
        }
    }
}

/// Snapshot mirrored to `agent-{id}.session`.
///
/// Invariant: `status == Working` implies both `current_project_number` and
/// `branch_name` are set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSessionSnapshot {
    pub agent_id: String,
    pub status: SessionStatus,
    pub current_project_number: Option<u64>,
    pub current_phase: Option<String>,
    pub branch_name: Option<String>,
    pub last_heartbeat: DateTime<Utc>,
    pub tasks_completed: u64,
    pub current_task_description: Option<String>,
    pub error_count: u64,
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalState {
    Responding,
    Stopped,
}

/// Companion liveness marker, `agent-{id}.signal`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalFile {
    pub state: SignalState,
    pub timestamp: DateTime<Utc>,
}

/// Closure handing the hooks a fresh state snapshot. The hooks never reach
/// into agent internals directly.
pub type SnapshotFn = Arc<dyn Fn() -> AgentSessionSnapshot + Send + Sync>;

/// Per-agent session observer.
///
/// Writes are serialized per agent by construction: hooks fire from the
/// single consumer of that agent's session stream.
pub struct SessionHooks {
    agent_id: u32,
    sessions_dir: PathBuf,
    snapshot: SnapshotFn,
    events: Arc<dyn EventSink>,
}

impl std::fmt::Debug for SessionHooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHooks")
            .field("agent_id", &self.agent_id)
            .field("sessions_dir", &self.sessions_dir)
            .finish()
    }
}

impl SessionHooks {
    pub fn new(
        agent_id: u32,
        sessions_dir: PathBuf,
        snapshot: SnapshotFn,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            agent_id,
            sessions_dir,
            snapshot,
            events,
        }
    }

    fn session_path(&self) -> PathBuf {
        self.sessions_dir
            .join(format!("agent-{}.session", self.agent_id))
    }

    fn signal_path(&self) -> PathBuf {
        self.sessions_dir
            .join(format!("agent-{}.signal", self.agent_id))
    }

    /// Record one tool-use event: refresh both files and notify the sink.
    pub async fn on_tool_use(&self, tool_name: &str, files_affected: &[String]) {
        let now = Utc::now();

        let mut snapshot = (self.snapshot)();
        snapshot.last_heartbeat = now;

        if let Err(e) = write_json_atomic(&self.session_path(), &snapshot).await {
            warn!(agent_id = %self.agent_id, error = %e, "session file write failed");
        }
        let signal = SignalFile {
            state: SignalState::Responding,
            timestamp: now,
        };
        if let Err(e) = write_json_atomic(&self.signal_path(), &signal).await {
            warn!(agent_id = %self.agent_id, error = %e, "signal file write failed");
        }

        self.events.on_heartbeat(self.agent_id);
        self.events.on_activity(
            self.agent_id,
            &ActivityEvent {
                tool_name: tool_name.to_string(),
                files_affected: files_affected.to_vec(),
                timestamp: now,
            },
        );
    }

    /// Record the terminal stop of a session.
    pub async fn on_session_stop(&self) {
        let signal = SignalFile {
            state: SignalState::Stopped,
            timestamp: Utc::now(),
        };
        if let Err(e) = write_json_atomic(&self.signal_path(), &signal).await {
            warn!(agent_id = %self.agent_id, error = %e, "signal file write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NullEventSink;

    fn snapshot_fn() -> SnapshotFn {
        Arc::new(|| AgentSessionSnapshot {
            agent_id: "agent-1".to_string(),
            status: SessionStatus::Working,
            current_project_number: Some(4),
            current_phase: None,
            branch_name: Some("agent-1/issue-9".to_string()),
            last_heartbeat: Utc::now(),
            tasks_completed: 2,
            current_task_description: Some("Fix the parser".to_string()),
            error_count: 0,
            last_error: None,
        })
    }

    #[tokio::test]
    async fn tool_use_writes_paired_files_with_shared_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let hooks = SessionHooks::new(
            1,
            dir.path().to_path_buf(),
            snapshot_fn(),
            Arc::new(NullEventSink),
        );

        hooks.on_tool_use("Edit", &["src/lib.rs".to_string()]).await;

        let session: serde_json::Value = serde_json::from_slice(
            &tokio::fs::read(dir.path().join("agent-1.session")).await.unwrap(),
        )
        .unwrap();
        let signal: serde_json::Value = serde_json::from_slice(
            &tokio::fs::read(dir.path().join("agent-1.signal")).await.unwrap(),
        )
        .unwrap();

        assert_eq!(session["agentId"], "agent-1");
        assert_eq!(session["status"], "working");
        assert_eq!(signal["state"], "responding");
        assert_eq!(session["lastHeartbeat"], signal["timestamp"]);
    }

    #[tokio::test]
    async fn stop_event_writes_stopped_signal() {
        let dir = tempfile::tempdir().unwrap();
        let hooks = SessionHooks::new(
            1,
            dir.path().to_path_buf(),
            snapshot_fn(),
            Arc::new(NullEventSink),
        );

        hooks.on_session_stop().await;

        let signal: serde_json::Value = serde_json::from_slice(
            &tokio::fs::read(dir.path().join("agent-1.signal")).await.unwrap(),
        )
        .unwrap();
        assert_eq!(signal["state"], "stopped");
    }

    #[test]
    fn claiming_maps_to_idle_status() {
        assert_eq!(SessionStatus::from(AgentState::Claiming), SessionStatus::Idle);
        assert_eq!(SessionStatus::from(AgentState::Working), SessionStatus::Working);
        assert_eq!(
            SessionStatus::from(AgentState::CreatingProject),
            SessionStatus::Ideating
        );
    }
}

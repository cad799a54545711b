//! Lifecycle event surface consumed by the external observer (dashboard).
//!
//! The orchestrator and agent loops report through an injected [`EventSink`];
//! callbacks must be side-effect only and never block or panic back into the
//! dispatcher. [`ActivityLogWriter`] is the optional file-backed collaborator
//! mirroring recent activity for pollers.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

use crate::agent_lifecycle::AgentState;
use crate::fs::write_json_atomic;

/// One tool invocation observed inside an LLM session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    pub tool_name: String,
    pub files_affected: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Callbacks surfaced to the external observer.
///
/// Default bodies are no-ops so sinks implement only what they watch.
pub trait EventSink: Send + Sync {
    fn on_status_change(&self, _agent_id: u32, _from: AgentState, _to: AgentState) {}
    fn on_activity(&self, _agent_id: u32, _event: &ActivityEvent) {}
    fn on_cost_update(&self, _agent_id: u32, _cost_usd: f64) {}
    fn on_error(&self, _agent_id: u32, _error: &str) {}
    fn on_heartbeat(&self, _agent_id: u32) {}
}

/// Sink that drops everything. Used when no observer is attached.
#[derive(Debug, Default)]
pub struct NullEventSink;

impl EventSink for NullEventSink {}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActivityLogEntry {
    agent_id: String,
    tool_name: String,
    files_affected: Vec<String>,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ActivityLogFile {
    version: u32,
    events: Vec<ActivityLogEntry>,
}

impl Default for ActivityLogFile {
    fn default() -> Self {
        Self {
            version: 1,
            events: Vec::new(),
        }
    }
}

const ACTIVITY_LOG_CAP: usize = 50;

/// Maintains `.claude-sessions/activity-log.json`, capped to the last 50
/// events FIFO. Writes are atomic; failures are logged and swallowed so the
/// log can never stall a session.
#[derive(Debug)]
pub struct ActivityLogWriter {
    path: PathBuf,
    // Serializes read-modify-write cycles across agents.
    lock: Mutex<()>,
}

impl ActivityLogWriter {
    pub fn new(sessions_dir: PathBuf) -> Self {
        Self {
            path: sessions_dir.join("activity-log.json"),
            lock: Mutex::new(()),
        }
    }

    pub async fn append(&self, agent_id: u32, event: &ActivityEvent) {
        let _guard = self.lock.lock().await;

        let mut log = match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice::<ActivityLogFile>(&bytes).unwrap_or_default(),
            Err(_) => ActivityLogFile::default(),
        };

        log.events.push(ActivityLogEntry {
            agent_id: format!("agent-{agent_id}"),
            tool_name: event.tool_name.clone(),
            files_affected: event.files_affected.clone(),
            timestamp: event.timestamp,
        });
        if log.events.len() > ACTIVITY_LOG_CAP {
            let excess = log.events.len() - ACTIVITY_LOG_CAP;
            log.events.drain(..excess);
        }

        if let Err(e) = write_json_atomic(&self.path, &log).await {
            warn!(path = %self.path.display(), error = %e, "failed to write activity log");
        }
    }
}

/// Sink that mirrors tool activity into the on-disk log for file-polling
/// observers. All other events are dropped; compose with a richer sink when
/// a live dashboard is attached.
#[derive(Debug)]
pub struct ActivityLogSink {
    writer: std::sync::Arc<ActivityLogWriter>,
}

impl ActivityLogSink {
    pub fn new(sessions_dir: PathBuf) -> Self {
        Self {
            writer: std::sync::Arc::new(ActivityLogWriter::new(sessions_dir)),
        }
    }
}

impl EventSink for ActivityLogSink {
    fn on_activity(&self, agent_id: u32, event: &ActivityEvent) {
        let writer = std::sync::Arc::clone(&self.writer);
        let event = event.clone();
        // Hooks fire from async context; detach so the session never waits
        // on the log.
        tokio::spawn(async move {
            writer.append(agent_id, &event).await;
        });
    }
}

// Soda Fountain - Autonomous Multi-Agent Orchestration
// A pool of worker agents claims issues from a shared project board,
// implements them in isolated git worktrees through an LLM session driver,
// reviews the result, and files new ideas when the queue runs dry.

pub mod agent_lifecycle;
pub mod agents;
pub mod budget;
pub mod config;
pub mod events;
pub mod external;
pub mod fs;
pub mod github;
pub mod llm;
pub mod orchestrator;
pub mod queue;
pub mod sessions;
pub mod telemetry;
pub mod template;
pub mod worktree;

// Re-export key types for easy access
pub use agent_lifecycle::{AgentEvent, AgentState, AgentStateMachine, TransitionError};
pub use agents::{
    AgentDeps, AgentHandle, AgentLoop, AgentLoopSettings, ExecutionAgent, ExecutionResult,
    IdeationAgent, IdeationOutcome, ParsedIdea, ReviewAgent, ReviewOutcome,
};
pub use budget::{BudgetStatus, BudgetTracker, CostEntry};
pub use config::OrchestratorConfig;
pub use events::{ActivityEvent, ActivityLogSink, ActivityLogWriter, EventSink, NullEventSink};
pub use external::{CommandExecutor, GitCli, ProcessCommandExecutor};
pub use github::{GitHubError, GraphQlClient};
pub use llm::{SessionDriver, SessionMessage, SessionRequest, SessionResult, ToolPreset};
pub use orchestrator::{Orchestrator, OrchestratorStatus};
pub use queue::{GitHubWorkQueue, WorkItem, WorkQueue};
pub use sessions::{AgentSessionSnapshot, SessionHooks, SessionStatus, SignalFile, SignalState};
pub use telemetry::{generate_correlation_id, init_telemetry};
pub use template::{TemplateContext, TemplateEngine};
pub use worktree::{WorktreeInfo, WorktreeManager, WorktreeProvider};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Worker lifecycle states.
///
/// `Stopped` is terminal: no event is accepted from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentState {
    Idle,
    Claiming,
    Working,
    Reviewing,
    Ideating,
    CreatingProject,
    Paused,
    Stopped,
    Error,
    Cooldown,
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AgentState::Idle => "idle",
            AgentState::Claiming => "claiming",
            AgentState::Working => "working",
            AgentState::Reviewing => "reviewing",
            AgentState::Ideating => "ideating",
            AgentState::CreatingProject => "creating_project",
            AgentState::Paused => "paused",
            AgentState::Stopped => "stopped",
            AgentState::Error => "error",
            AgentState::Cooldown => "cooldown",
        };
        f.write_str(name)
    }
}

/// Lifecycle events. Each maps to at most one target state per source state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentEvent {
    QueueHasWork,
    QueueEmptyIdeate,
    ClaimSuccess,
    ClaimFailed,
    ExecutionComplete,
    ExecutionError,
    ReviewApproved,
    ReviewRejected,
    ReviewError,
    IdeaGenerated,
    NoIdea,
    IdeationError,
    ProjectCreated,
    CreationError,
    Pause,
    Resume,
    Stop,
    ErrorAcknowledged,
    CooldownComplete,
}

#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("invalid transition: no edge from {state} on {event:?}")]
    InvalidTransition { state: AgentState, event: AgentEvent },
}

/// The complete transition table.
///
/// Returns the target state for `(state, event)`, or `None` when the pair has
/// no edge. Exhaustive on states so a new state cannot be added without the
/// compiler flagging this function.
pub fn transition_target(state: AgentState, event: AgentEvent) -> Option<AgentState> {
    use AgentEvent::*;
    use AgentState::*;

    match state {
        Idle => match event {
            QueueHasWork => Some(Claiming),
            QueueEmptyIdeate => Some(Ideating),
            Pause => Some(Paused),
            Stop => Some(Stopped),
            _ => None,
        },
        Claiming => match event {
            ClaimSuccess => Some(Working),
            ClaimFailed => Some(Idle),
            Stop => Some(Stopped),
            _ => None,
        },
        Working => match event {
            ExecutionComplete => Some(Reviewing),
            ExecutionError => Some(Error),
            Pause => Some(Paused),
            Stop => Some(Stopped),
            _ => None,
        },
        Reviewing => match event {
            ReviewApproved => Some(Idle),
            ReviewRejected => Some(Working),
            ReviewError => Some(Error),
            Stop => Some(Stopped),
            _ => None,
        },
        Ideating => match event {
            IdeaGenerated => Some(CreatingProject),
            NoIdea => Some(Idle),
            IdeationError => Some(Error),
            Stop => Some(Stopped),
            _ => None,
        },
        CreatingProject => match event {
            ProjectCreated => Some(Idle),
            CreationError => Some(Error),
            Stop => Some(Stopped),
            _ => None,
        },
        Error => match event {
            ErrorAcknowledged => Some(Cooldown),
            _ => None,
        },
        Cooldown => match event {
            CooldownComplete => Some(Idle),
            _ => None,
        },
        Paused => match event {
            Resume => Some(Idle),
            Stop => Some(Stopped),
            _ => None,
        },
        Stopped => None,
    }
}

type Observer = Box<dyn Fn(AgentState, AgentState) + Send + Sync>;

/// Per-agent state machine with synchronous observers.
///
/// Observers run in registration order after the state has changed. They are
/// never fired by `reset()`.
pub struct AgentStateMachine {
    agent_id: u32,
    state: AgentState,
    observers: Vec<Observer>,
}

impl std::fmt::Debug for AgentStateMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentStateMachine")
            .field("agent_id", &self.agent_id)
            .field("state", &self.state)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl AgentStateMachine {
    pub fn new(agent_id: u32) -> Self {
        Self {
            agent_id,
            state: AgentState::Idle,
            observers: Vec::new(),
        }
    }

    pub fn agent_id(&self) -> u32 {
        self.agent_id
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    /// Non-mutating probe for whether `event` is accepted from the current
    /// state.
    pub fn can_transition(&self, event: AgentEvent) -> bool {
        transition_target(self.state, event).is_some()
    }

    /// Apply `event`. On an invalid pair the machine is left untouched.
    pub fn transition(&mut self, event: AgentEvent) -> Result<AgentState, TransitionError> {
        let from = self.state;
        let to = transition_target(from, event).ok_or(TransitionError::InvalidTransition {
            state: from,
            event,
        })?;

        self.state = to;
        tracing::debug!(
            agent_id = %self.agent_id,
            from = %from,
            to = %to,
            event = ?event,
            "state transition"
        );
        for observer in &self.observers {
            observer(from, to);
        }
        Ok(to)
    }

    /// Register an observer fired after every successful transition.
    pub fn add_observer<F>(&mut self, observer: F)
    where
        F: Fn(AgentState, AgentState) + Send + Sync + 'static,
    {
        self.observers.push(Box::new(observer));
    }

    /// Return to `Idle` without firing observers.
    pub fn reset(&mut self) {
        self.state = AgentState::Idle;
    }
}

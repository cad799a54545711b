// Worker agents.
//
// Three session-running agents (execute, review, ideate) plus the loop that
// drives one worker through its lifecycle. The loop owns its state machine
// and its in-flight cancel handle; everything shared comes in through
// AgentDeps.

pub mod agent_loop;
pub mod executor;
pub mod ideation;
pub mod reviewer;

pub use agent_loop::{AgentDeps, AgentHandle, AgentLoop, AgentLoopError, AgentLoopSettings};
pub use executor::{ExecutionAgent, ExecutionError, ExecutionResult};
pub use ideation::{IdeationAgent, IdeationOutcome, ParsedIdea};
pub use reviewer::{CriterionResult, ReviewAgent, ReviewError, ReviewOutcome};

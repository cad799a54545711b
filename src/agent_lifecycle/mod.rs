// Agent Lifecycle Module - Per-agent finite state machine
//
// Every worker owns exactly one AgentStateMachine. The transition table is a
// closed function over (state, event) pairs so the compiler checks that no
// state is left unhandled; anything outside the table fails without mutating
// the machine.

pub mod state_machine;

pub use state_machine::{
    transition_target, AgentEvent, AgentState, AgentStateMachine, TransitionError,
};

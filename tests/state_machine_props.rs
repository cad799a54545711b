//! Property tests for the lifecycle transition table.

use proptest::prelude::*;

use soda_fountain::agent_lifecycle::{
    transition_target, AgentEvent, AgentState, AgentStateMachine,
};

const ALL_EVENTS: [AgentEvent; 19] = [
    AgentEvent::QueueHasWork,
    AgentEvent::QueueEmptyIdeate,
    AgentEvent::ClaimSuccess,
    AgentEvent::ClaimFailed,
    AgentEvent::ExecutionComplete,
    AgentEvent::ExecutionError,
    AgentEvent::ReviewApproved,
    AgentEvent::ReviewRejected,
    AgentEvent::ReviewError,
    AgentEvent::IdeaGenerated,
    AgentEvent::NoIdea,
    AgentEvent::IdeationError,
    AgentEvent::ProjectCreated,
    AgentEvent::CreationError,
    AgentEvent::Pause,
    AgentEvent::Resume,
    AgentEvent::Stop,
    AgentEvent::ErrorAcknowledged,
    AgentEvent::CooldownComplete,
];

fn event_strategy() -> impl Strategy<Value = AgentEvent> {
    (0..ALL_EVENTS.len()).prop_map(|i| ALL_EVENTS[i])
}

proptest! {
    /// Every applied event lands exactly where the table says; every
    /// rejected event leaves the machine untouched.
    #[test]
    fn machine_always_agrees_with_the_table(events in prop::collection::vec(event_strategy(), 0..64)) {
        let mut sm = AgentStateMachine::new(1);
        for event in events {
            let before = sm.state();
            let expected = transition_target(before, event);
            prop_assert_eq!(sm.can_transition(event), expected.is_some());

            match sm.transition(event) {
                Ok(to) => {
                    prop_assert_eq!(Some(to), expected);
                    prop_assert_eq!(sm.state(), to);
                }
                Err(_) => {
                    prop_assert_eq!(expected, None);
                    prop_assert_eq!(sm.state(), before);
                }
            }
        }
    }

    /// Stopped is terminal under any event sequence that reaches it.
    #[test]
    fn stopped_never_leaves(events in prop::collection::vec(event_strategy(), 0..64)) {
        let mut sm = AgentStateMachine::new(1);
        let mut stopped = false;
        for event in events {
            stopped |= sm.state() == AgentState::Stopped;
            let _ = sm.transition(event);
            if stopped {
                prop_assert_eq!(sm.state(), AgentState::Stopped);
            }
        }
    }
}

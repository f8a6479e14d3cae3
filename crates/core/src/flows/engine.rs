use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use crate::flows::states::{TransitionOutcome, TurnEvent, TurnState};

/// Pure transition table for the turn lifecycle.
#[derive(Clone, Debug, Default)]
pub struct TurnFlow;

impl TurnFlow {
    pub fn new() -> Self {
        Self
    }

    pub fn initial_state(&self, existing_conversation: bool) -> TurnState {
        if existing_conversation {
            TurnState::Loaded
        } else {
            TurnState::New
        }
    }

    pub fn apply(
        &self,
        current: &TurnState,
        event: &TurnEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_turn(current, event)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &TurnState,
        event: &TurnEvent,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    audit
                        .record(
                            "turn.transition_applied",
                            AuditCategory::Flow,
                            AuditOutcome::Success,
                        )
                        .with_metadata("from", format!("{:?}", outcome.from))
                        .with_metadata("to", format!("{:?}", outcome.to))
                        .with_metadata("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    audit
                        .record(
                            "turn.transition_rejected",
                            AuditCategory::Flow,
                            AuditOutcome::Rejected,
                        )
                        .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: TurnState, event: TurnEvent },
}

fn transition_turn(
    current: &TurnState,
    event: &TurnEvent,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use TurnEvent::{
        GuardrailsPassed, ItemsProcessed, StatePersisted, TripwireTriggered, UserMessageAppended,
        WarmUp,
    };
    use TurnState::{
        Aborted, AgentExecuting, EventsProcessed, GuardrailCheck, Loaded, New, Persisted,
    };

    let to = match (current, event) {
        (New, WarmUp) => Persisted,
        (New, UserMessageAppended) | (Loaded, UserMessageAppended) => GuardrailCheck,
        (GuardrailCheck, GuardrailsPassed) => AgentExecuting,
        // The agent runtime may report a tripwire of its own after the pre-check.
        (GuardrailCheck, TripwireTriggered) | (AgentExecuting, TripwireTriggered) => Aborted,
        (AgentExecuting, ItemsProcessed) => EventsProcessed,
        (EventsProcessed, StatePersisted) => Persisted,
        _ => {
            return Err(FlowTransitionError::InvalidTransition { state: *current, event: *event });
        }
    };

    Ok(TransitionOutcome { from: *current, to, event: *event })
}

#[cfg(test)]
mod tests {
    use crate::audit::{AuditContext, AuditOutcome, InMemoryAuditSink};
    use crate::domain::conversation::ConversationId;
    use crate::flows::engine::{FlowTransitionError, TurnFlow};
    use crate::flows::states::{TurnEvent, TurnState};

    fn run(flow: &TurnFlow, start: TurnState, events: &[TurnEvent]) -> TurnState {
        events.iter().fold(start, |state, event| {
            flow.apply(&state, event).map(|outcome| outcome.to).unwrap_or(state)
        })
    }

    #[test]
    fn success_path_reaches_persisted() {
        let flow = TurnFlow::new();
        let end = run(
            &flow,
            flow.initial_state(true),
            &[
                TurnEvent::UserMessageAppended,
                TurnEvent::GuardrailsPassed,
                TurnEvent::ItemsProcessed,
                TurnEvent::StatePersisted,
            ],
        );
        assert_eq!(end, TurnState::Persisted);
        assert!(end.is_terminal());
    }

    #[test]
    fn tripwire_aborts_from_precheck_and_from_agent_run() {
        let flow = TurnFlow::new();
        let from_check = run(
            &flow,
            TurnState::New,
            &[TurnEvent::UserMessageAppended, TurnEvent::TripwireTriggered],
        );
        let from_agent = run(
            &flow,
            TurnState::Loaded,
            &[
                TurnEvent::UserMessageAppended,
                TurnEvent::GuardrailsPassed,
                TurnEvent::TripwireTriggered,
            ],
        );

        assert_eq!(from_check, TurnState::Aborted);
        assert_eq!(from_agent, TurnState::Aborted);
    }

    #[test]
    fn warm_up_is_only_valid_for_new_conversations() {
        let flow = TurnFlow::new();
        assert_eq!(
            flow.apply(&TurnState::New, &TurnEvent::WarmUp).map(|outcome| outcome.to),
            Ok(TurnState::Persisted)
        );
        assert_eq!(
            flow.apply(&TurnState::Loaded, &TurnEvent::WarmUp),
            Err(FlowTransitionError::InvalidTransition {
                state: TurnState::Loaded,
                event: TurnEvent::WarmUp
            })
        );
    }

    #[test]
    fn events_cannot_be_processed_before_guardrails() {
        let flow = TurnFlow::new();
        assert!(flow.apply(&TurnState::GuardrailCheck, &TurnEvent::ItemsProcessed).is_err());
        assert!(flow.apply(&TurnState::Aborted, &TurnEvent::StatePersisted).is_err());
    }

    #[test]
    fn audited_transitions_record_outcome() {
        let flow = TurnFlow::new();
        let sink = InMemoryAuditSink::default();
        let audit = AuditContext::new(
            Some(ConversationId("c0ffee".to_string())),
            "turn-1",
            "turn-orchestrator",
        );

        let applied =
            flow.apply_with_audit(&TurnState::New, &TurnEvent::UserMessageAppended, &sink, &audit);
        let rejected =
            flow.apply_with_audit(&TurnState::New, &TurnEvent::StatePersisted, &sink, &audit);

        assert!(applied.is_ok());
        assert!(rejected.is_err());

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, "turn.transition_applied");
        assert_eq!(events[0].metadata.get("to").map(String::as_str), Some("GuardrailCheck"));
        assert_eq!(events[1].outcome, AuditOutcome::Rejected);
    }
}

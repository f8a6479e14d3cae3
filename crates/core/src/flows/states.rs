use serde::{Deserialize, Serialize};

/// Lifecycle of a single turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnState {
    New,
    Loaded,
    GuardrailCheck,
    AgentExecuting,
    EventsProcessed,
    Aborted,
    Persisted,
}

impl TurnState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Aborted | Self::Persisted)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TurnEvent {
    /// Empty first message: persist the fresh state and stop.
    WarmUp,
    UserMessageAppended,
    GuardrailsPassed,
    TripwireTriggered,
    ItemsProcessed,
    StatePersisted,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: TurnState,
    pub to: TurnState,
    pub event: TurnEvent,
}

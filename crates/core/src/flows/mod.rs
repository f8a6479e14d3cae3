pub mod engine;
pub mod states;

pub use engine::{FlowTransitionError, TurnFlow};
pub use states::{TransitionOutcome, TurnEvent, TurnState};

//! Multi-agent turn orchestration for the housing-authority assistant.
//!
//! A turn flows through:
//! 1. **Guardrails** (`guardrails`) - classify the user input for the active agent
//! 2. **Agent run** (`runtime`) - the pluggable [`runtime::AgentRunner`] capability
//! 3. **Events** (`events`) - ordered run items become typed events, handoffs move the
//!    current agent
//! 4. **Enrichment** (`enrichment`) - optional voice audio and navigation commands
//!
//! [`orchestrator::TurnOrchestrator`] ties these together and persists the
//! conversation exactly once per turn.

pub mod enrichment;
pub mod events;
pub mod guardrails;
pub mod orchestrator;
pub mod runtime;

pub use enrichment::{EnrichmentError, EnrichmentFlags, MessageEnricher, VoiceSynthesizer};
pub use events::{AppliedHandoff, EventBuilder, ProcessedRun, ProducedMessage};
pub use guardrails::{
    GuardrailClassifier, GuardrailDecision, GuardrailEvaluator, HeuristicClassifier,
};
pub use orchestrator::{TurnError, TurnOrchestrator, TurnRequest, TurnResult};
pub use runtime::{
    AgentRunner, CapabilityError, RunItem, RunOutcome, ScriptedAgentRunner, ScriptedRun,
};

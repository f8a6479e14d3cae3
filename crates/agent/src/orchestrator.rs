//! Turn processing.
//!
//! A turn loads (or creates) the conversation, appends the user's message, runs the
//! active agent's guardrails, invokes the agent, converts its items into events,
//! diffs the context, persists once and finally enriches the produced messages.
//! Turns for the same conversation are serialized through a per-id async lock;
//! the store's versioned write rejects anything that slips past it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

use haven_core::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink, NoopAuditSink};
use haven_core::domain::agent::{AgentDescriptor, AgentDirectoryEntry, GuardrailKind};
use haven_core::domain::conversation::{
    diff_fields, ConversationId, ConversationState, HistoryItem, HousingContext,
};
use haven_core::domain::events::{AgentEvent, AgentEventKind, GuardrailResult, TurnMessage};
use haven_core::errors::{ApplicationError, DomainError};
use haven_core::flows::{FlowTransitionError, TurnEvent, TurnFlow, TurnState};
use haven_core::registry::AgentRegistry;
use haven_core::store::{ConversationStore, StoreError};

use crate::enrichment::{EnrichmentFlags, MessageEnricher};
use crate::events::EventBuilder;
use crate::guardrails::{
    final_results, refusal_message, tripped_results, GuardrailDecision, GuardrailEvaluator,
};
use crate::runtime::{AgentRunner, CapabilityError, RunOutcome};

const ACTOR: &str = "turn-orchestrator";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnRequest {
    pub conversation_id: Option<ConversationId>,
    pub message: String,
    #[serde(skip)]
    pub enrichment: EnrichmentFlags,
}

impl TurnRequest {
    pub fn new(conversation_id: Option<ConversationId>, message: impl Into<String>) -> Self {
        Self { conversation_id, message: message.into(), enrichment: EnrichmentFlags::default() }
    }

    pub fn with_voice(mut self) -> Self {
        self.enrichment.voice = true;
        self
    }

    pub fn with_navigation(mut self) -> Self {
        self.enrichment.navigation = true;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TurnResult {
    pub conversation_id: ConversationId,
    pub current_agent: String,
    pub messages: Vec<TurnMessage>,
    pub events: Vec<AgentEvent>,
    pub context: HousingContext,
    pub agents: Vec<AgentDirectoryEntry>,
    pub guardrails: Vec<GuardrailResult>,
}

#[derive(Debug, Error)]
pub enum TurnError {
    #[error(transparent)]
    Capability(#[from] CapabilityError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Flow(#[from] FlowTransitionError),
}

impl TurnError {
    fn audit_category(&self) -> AuditCategory {
        match self {
            Self::Capability(_) => AuditCategory::Capability,
            Self::Store(_) => AuditCategory::Persistence,
            Self::Flow(_) => AuditCategory::Flow,
        }
    }
}

impl From<TurnError> for ApplicationError {
    fn from(error: TurnError) -> Self {
        match error {
            TurnError::Capability(error) => Self::Integration(error.to_string()),
            TurnError::Store(error) => Self::Persistence(error.to_string()),
            TurnError::Flow(error) => Self::Domain(DomainError::FlowTransition(error)),
        }
    }
}

pub struct TurnOrchestrator {
    registry: Arc<AgentRegistry>,
    store: Arc<dyn ConversationStore>,
    runner: Arc<dyn AgentRunner>,
    evaluator: GuardrailEvaluator,
    enricher: MessageEnricher,
    audit: Arc<dyn AuditSink>,
    flow: TurnFlow,
    locks: ConversationLocks,
}

impl TurnOrchestrator {
    pub fn new(
        registry: Arc<AgentRegistry>,
        store: Arc<dyn ConversationStore>,
        runner: Arc<dyn AgentRunner>,
        evaluator: GuardrailEvaluator,
    ) -> Self {
        Self {
            registry,
            store,
            runner,
            evaluator,
            enricher: MessageEnricher::default(),
            audit: Arc::new(NoopAuditSink),
            flow: TurnFlow::new(),
            locks: ConversationLocks::default(),
        }
    }

    pub fn with_enricher(mut self, enricher: MessageEnricher) -> Self {
        self.enricher = enricher;
        self
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// Processes one user turn. Guardrail trips, unknown agents, malformed tool
    /// arguments and enrichment failures all resolve into a normal result; only a
    /// failing capability or store escapes, and then nothing from this turn is
    /// persisted.
    pub async fn process_turn(&self, request: TurnRequest) -> Result<TurnResult, ApplicationError> {
        let correlation_id = Uuid::new_v4().simple().to_string();
        let requested = request.conversation_id.clone();

        self.run_turn(request, &correlation_id).await.map_err(|error| {
            self.audit.emit(
                AuditContext::new(requested.clone(), correlation_id.as_str(), ACTOR)
                    .record("turn.failed", error.audit_category(), AuditOutcome::Failed)
                    .with_metadata("error", error.to_string()),
            );
            tracing::error!(
                event_name = "turn.failed",
                correlation_id = %correlation_id,
                conversation_id = requested.as_ref().map(ConversationId::as_str).unwrap_or(""),
                error = %error,
                "turn failed before completion"
            );
            ApplicationError::from(error)
        })
    }

    async fn run_turn(
        &self,
        request: TurnRequest,
        correlation_id: &str,
    ) -> Result<TurnResult, TurnError> {
        let _guard = match &request.conversation_id {
            Some(id) => Some(self.locks.acquire(id).await),
            None => None,
        };

        let loaded = match &request.conversation_id {
            Some(id) => self.store.get(id).await?,
            None => None,
        };
        let existing = loaded.is_some();
        let mut state = loaded.unwrap_or_else(|| {
            ConversationState::new(ConversationId::generate(), self.registry.triage().name.clone())
        });
        let mut turn = self.flow.initial_state(existing);
        let audit = AuditContext::new(Some(state.id.clone()), correlation_id, ACTOR);

        let agent = self.registry.resolve_by_name(Some(&state.current_agent)).clone();
        state.current_agent = agent.name.clone();

        tracing::info!(
            event_name = "turn.started",
            conversation_id = %state.id,
            correlation_id,
            existing,
            current_agent = %agent.name,
            "processing turn"
        );

        if !existing && request.message.trim().is_empty() {
            self.persist(&state, &audit).await?;
            self.advance(&mut turn, TurnEvent::WarmUp, &audit)?;
            tracing::info!(
                event_name = "turn.warm_up",
                conversation_id = %state.id,
                "persisted empty conversation"
            );
            return Ok(self.result(state, &agent, Vec::new(), Vec::new(), &request.message, &[]));
        }

        state.history.push(HistoryItem::user(request.message.clone()));
        self.advance(&mut turn, TurnEvent::UserMessageAppended, &audit)?;
        let snapshot = state.context.to_fields();

        let decision =
            self.evaluator.evaluate(&agent.guardrails, &request.message, &state.history).await?;
        match decision {
            GuardrailDecision::Aborted { guardrail, reasoning } => {
                return self
                    .abort(state, turn, &agent, guardrail, &reasoning, &request.message, &audit)
                    .await;
            }
            GuardrailDecision::Continue { detected_language } => {
                if let Some(language) = detected_language {
                    state.context.language = language;
                }
            }
        }
        self.advance(&mut turn, TurnEvent::GuardrailsPassed, &audit)?;

        // The runner works on a copy; its context changes only count once the run completes.
        let mut context = state.context.clone();
        let outcome = self.runner.run(&agent, &state.history, &mut context).await?;
        let (items, history) = match outcome {
            RunOutcome::GuardrailTripped { guardrail, reasoning } => {
                return self
                    .abort(state, turn, &agent, guardrail, &reasoning, &request.message, &audit)
                    .await;
            }
            RunOutcome::Completed { items, history } => (items, history),
        };
        state.context = context;
        state.history = history;

        let processed = EventBuilder::new(&self.registry).process(&agent.name, items);
        self.advance(&mut turn, TurnEvent::ItemsProcessed, &audit)?;
        for handoff in &processed.handoffs {
            let mut record = audit
                .record("agent.handoff_applied", AuditCategory::Routing, AuditOutcome::Success)
                .with_metadata("source_agent", handoff.source.clone())
                .with_metadata("target_agent", handoff.target.clone());
            if handoff.requested != handoff.target {
                record = record.with_metadata("requested_agent", handoff.requested.clone());
            }
            self.audit.emit(record);
        }

        let mut events = processed.events;
        let changes = diff_fields(&snapshot, &state.context.to_fields());
        if !changes.is_empty() {
            tracing::debug!(
                event_name = "turn.context.updated",
                conversation_id = %state.id,
                changed = changes.len(),
                "context changed during run"
            );
            events.push(
                AgentEvent::new(AgentEventKind::ContextUpdate, &processed.current_agent, "")
                    .with_metadata_map(changes),
            );
        }

        state.current_agent = processed.current_agent;
        let version = self.persist(&state, &audit).await?;
        self.advance(&mut turn, TurnEvent::StatePersisted, &audit)?;

        let mut messages = Vec::with_capacity(processed.messages.len());
        for message in processed.messages {
            messages.push(self.enricher.enrich(message, request.enrichment).await);
        }

        let final_agent = self.registry.resolve_by_name(Some(&state.current_agent)).clone();
        tracing::info!(
            event_name = "turn.completed",
            conversation_id = %state.id,
            correlation_id,
            current_agent = %final_agent.name,
            events = events.len(),
            version,
            "turn persisted"
        );

        Ok(self.result(state, &final_agent, messages, events, &request.message, &[]))
    }

    #[allow(clippy::too_many_arguments)]
    async fn abort(
        &self,
        mut state: ConversationState,
        mut turn: TurnState,
        agent: &AgentDescriptor,
        guardrail: GuardrailKind,
        reasoning: &str,
        input: &str,
        audit: &AuditContext,
    ) -> Result<TurnResult, TurnError> {
        self.advance(&mut turn, TurnEvent::TripwireTriggered, audit)?;
        if !agent.guardrails.contains(&guardrail) {
            tracing::warn!(
                event_name = "guardrail.tripwire.unattached",
                conversation_id = %state.id,
                guardrail = guardrail.display_name(),
                agent = %agent.name,
                "tripped guardrail is not attached to the active agent"
            );
        }
        self.audit.emit(
            audit
                .record(
                    "guardrail.tripwire_triggered",
                    AuditCategory::Guardrail,
                    AuditOutcome::Rejected,
                )
                .with_metadata("guardrail", guardrail.display_name())
                .with_metadata("agent", agent.name.clone()),
        );

        let recorded = tripped_results(&agent.guardrails, input, guardrail, reasoning);
        let refusal = refusal_message(guardrail);
        state.history.push(HistoryItem::assistant(refusal));
        self.persist(&state, audit).await?;

        tracing::info!(
            event_name = "turn.aborted",
            conversation_id = %state.id,
            guardrail = guardrail.display_name(),
            "turn refused by guardrail"
        );

        let messages = vec![TurnMessage::plain(refusal, agent.name.clone())];
        Ok(self.result(state, agent, messages, Vec::new(), input, &recorded))
    }

    async fn persist(
        &self,
        state: &ConversationState,
        audit: &AuditContext,
    ) -> Result<u64, TurnError> {
        match self.store.save(&state.id, state.clone()).await {
            Ok(version) => {
                self.audit.emit(
                    audit
                        .record(
                            "conversation.persisted",
                            AuditCategory::Persistence,
                            AuditOutcome::Success,
                        )
                        .with_metadata("version", version.to_string()),
                );
                Ok(version)
            }
            Err(error) => {
                let conflict = matches!(error, StoreError::VersionConflict { .. });
                self.audit.emit(
                    audit
                        .record(
                            "conversation.persist_failed",
                            AuditCategory::Persistence,
                            AuditOutcome::Failed,
                        )
                        .with_metadata("version_conflict", conflict.to_string()),
                );
                Err(error.into())
            }
        }
    }

    fn advance(
        &self,
        turn: &mut TurnState,
        event: TurnEvent,
        audit: &AuditContext,
    ) -> Result<(), TurnError> {
        let outcome = self.flow.apply_with_audit(turn, &event, self.audit.as_ref(), audit)?;
        *turn = outcome.to;
        Ok(())
    }

    fn result(
        &self,
        state: ConversationState,
        agent: &AgentDescriptor,
        messages: Vec<TurnMessage>,
        events: Vec<AgentEvent>,
        input: &str,
        recorded: &[GuardrailResult],
    ) -> TurnResult {
        TurnResult {
            conversation_id: state.id,
            current_agent: agent.name.clone(),
            messages,
            events,
            context: state.context,
            agents: self.registry.directory(),
            guardrails: final_results(&agent.guardrails, input, recorded),
        }
    }
}

/// Keyed async locks, one per conversation with a turn in flight.
#[derive(Default)]
struct ConversationLocks {
    table: Mutex<HashMap<ConversationId, Arc<AsyncMutex<()>>>>,
}

impl ConversationLocks {
    async fn acquire(&self, id: &ConversationId) -> ConversationGuard<'_> {
        let lock = Arc::clone(self.lock_table().entry(id.clone()).or_default());
        let guard = lock.lock_owned().await;
        ConversationGuard { locks: self, id: id.clone(), guard: Some(guard) }
    }

    fn lock_table(&self) -> MutexGuard<'_, HashMap<ConversationId, Arc<AsyncMutex<()>>>> {
        match self.table.lock() {
            Ok(table) => table,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.lock_table().len()
    }
}

struct ConversationGuard<'a> {
    locks: &'a ConversationLocks,
    id: ConversationId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ConversationGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        let mut table = self.locks.lock_table();
        // Only the table still holds the lock: nobody is waiting on it.
        if table.get(&self.id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            table.remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use haven_core::domain::conversation::ConversationId;
    use haven_core::errors::{ApplicationError, InterfaceError};
    use haven_core::store::StoreError;

    use super::{ConversationLocks, TurnError};
    use crate::runtime::CapabilityError;

    #[tokio::test]
    async fn idle_locks_are_pruned() {
        let locks = ConversationLocks::default();
        let id = ConversationId("abc".to_string());

        {
            let _guard = locks.acquire(&id).await;
            assert_eq!(locks.len(), 1);
        }
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn same_conversation_waits_for_holder() {
        let locks = Arc::new(ConversationLocks::default());
        let id = ConversationId("abc".to_string());
        let guard = locks.acquire(&id).await;

        let waiter = {
            let locks = Arc::clone(&locks);
            let id = id.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(&id).await;
            })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.expect("waiter completes");
        assert_eq!(locks.len(), 0);
    }

    #[test]
    fn capability_failures_map_to_retry_message() {
        let error = ApplicationError::from(TurnError::from(CapabilityError::Runtime(
            "upstream 502".to_string(),
        )));
        let interface = error.into_interface("turn-9");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert!(!interface.user_message().contains("502"));
    }

    #[test]
    fn store_conflicts_map_to_persistence_errors() {
        let error = ApplicationError::from(TurnError::from(StoreError::VersionConflict {
            id: ConversationId("abc".to_string()),
            expected: 1,
            found: 2,
        }));
        assert!(matches!(error, ApplicationError::Persistence(_)));
    }
}

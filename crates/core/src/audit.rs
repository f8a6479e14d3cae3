//! Structured audit trail for turns.
//!
//! Every record carries the conversation and the per-turn correlation id so a
//! single turn can be reassembled from the sink: its state transitions, the
//! guardrail that refused it, the handoffs it applied and each write it made.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::conversation::ConversationId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditCategory {
    /// Turn state machine transitions.
    Flow,
    Guardrail,
    /// Agent handoffs applied while processing run items.
    Routing,
    Persistence,
    /// Agent runtime or classifier failures.
    Capability,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Rejected,
    Failed,
}

/// Correlation fields shared by every record of one turn.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuditContext {
    pub conversation_id: Option<ConversationId>,
    pub correlation_id: String,
    pub actor: String,
}

impl AuditContext {
    pub fn new(
        conversation_id: Option<ConversationId>,
        correlation_id: impl Into<String>,
        actor: impl Into<String>,
    ) -> Self {
        Self { conversation_id, correlation_id: correlation_id.into(), actor: actor.into() }
    }

    pub fn record(
        &self,
        event_type: impl Into<String>,
        category: AuditCategory,
        outcome: AuditOutcome,
    ) -> AuditEvent {
        AuditEvent {
            event_id: Uuid::new_v4().to_string(),
            conversation_id: self.conversation_id.clone(),
            correlation_id: self.correlation_id.clone(),
            event_type: event_type.into(),
            category,
            actor: self.actor.clone(),
            outcome,
            metadata: BTreeMap::new(),
            recorded_at: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub conversation_id: Option<ConversationId>,
    pub correlation_id: String,
    pub event_type: String,
    pub category: AuditCategory,
    pub actor: String,
    pub outcome: AuditOutcome,
    pub metadata: BTreeMap<String, String>,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

pub trait AuditSink: Send + Sync {
    fn emit(&self, event: AuditEvent);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn emit(&self, _event: AuditEvent) {}
}

/// Keeps every record in emission order. Clones share the same buffer.
#[derive(Clone, Default)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<Vec<AuditEvent>>>,
}

impl InMemoryAuditSink {
    pub fn events(&self) -> Vec<AuditEvent> {
        self.buffer().clone()
    }

    pub fn of_category(&self, category: AuditCategory) -> Vec<AuditEvent> {
        self.buffer().iter().filter(|event| event.category == category).cloned().collect()
    }

    fn buffer(&self) -> MutexGuard<'_, Vec<AuditEvent>> {
        match self.events.lock() {
            Ok(events) => events,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl AuditSink for InMemoryAuditSink {
    fn emit(&self, event: AuditEvent) {
        self.buffer().push(event);
    }
}

#[cfg(test)]
mod tests {
    use crate::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink, InMemoryAuditSink};
    use crate::domain::conversation::ConversationId;

    #[test]
    fn records_inherit_the_turn_correlation() {
        let turn = AuditContext::new(
            Some(ConversationId("9f1c2e".to_string())),
            "turn-123",
            "turn-orchestrator",
        );
        let record = turn
            .record("conversation.persisted", AuditCategory::Persistence, AuditOutcome::Success)
            .with_metadata("version", "2");

        assert_eq!(record.correlation_id, "turn-123");
        assert_eq!(record.actor, "turn-orchestrator");
        assert_eq!(record.conversation_id.as_ref().map(ConversationId::as_str), Some("9f1c2e"));
        assert_eq!(record.metadata.get("version").map(String::as_str), Some("2"));
    }

    #[test]
    fn in_memory_sink_filters_by_category() {
        let sink = InMemoryAuditSink::default();
        let turn = AuditContext::new(None, "turn-9", "turn-orchestrator");
        for (event_type, category, outcome) in [
            ("turn.transition_applied", AuditCategory::Flow, AuditOutcome::Success),
            ("agent.handoff_applied", AuditCategory::Routing, AuditOutcome::Success),
            ("turn.failed", AuditCategory::Capability, AuditOutcome::Failed),
        ] {
            sink.emit(turn.record(event_type, category, outcome));
        }

        assert_eq!(sink.events().len(), 3);
        let routing = sink.of_category(AuditCategory::Routing);
        assert_eq!(routing.len(), 1);
        assert_eq!(routing[0].event_type, "agent.handoff_applied");
        let failed = sink.clone().of_category(AuditCategory::Capability);
        assert_eq!(failed[0].outcome, AuditOutcome::Failed);
    }
}

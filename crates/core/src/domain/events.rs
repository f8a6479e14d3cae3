use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::domain::agent::GuardrailKind;
use crate::navigation::NavigationCommand;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentEventKind {
    Message,
    Handoff,
    ToolCall,
    ToolOutput,
    ContextUpdate,
}

/// One entry of the per-turn event log. Response artifact only, never persisted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: AgentEventKind,
    pub agent: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl AgentEvent {
    pub fn new(kind: AgentEventKind, agent: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            kind,
            agent: agent.into(),
            content: content.into(),
            metadata: None,
            timestamp: Some(Utc::now()),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.get_or_insert_with(Map::new).insert(key.into(), value);
        self
    }

    pub fn with_metadata_map(mut self, metadata: Map<String, Value>) -> Self {
        self.metadata = Some(metadata);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardrailResult {
    pub id: String,
    pub name: String,
    pub input: String,
    pub reasoning: String,
    pub passed: bool,
    pub timestamp: DateTime<Utc>,
}

impl GuardrailResult {
    pub fn passed(kind: GuardrailKind, input: impl Into<String>) -> Self {
        Self::new(kind, input, String::new(), true)
    }

    pub fn failed(kind: GuardrailKind, input: impl Into<String>, reasoning: impl Into<String>) -> Self {
        Self::new(kind, input, reasoning, false)
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    fn new(
        kind: GuardrailKind,
        input: impl Into<String>,
        reasoning: impl Into<String>,
        passed: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            name: kind.display_name().to_string(),
            input: input.into(),
            reasoning: reasoning.into(),
            passed,
            timestamp: Utc::now(),
        }
    }
}

/// A message returned to the caller, optionally enriched for voice and UI guidance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TurnMessage {
    pub content: String,
    pub agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_base64: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub navigation_commands: Vec<NavigationCommand>,
}

impl TurnMessage {
    pub fn plain(content: impl Into<String>, agent: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            agent: agent.into(),
            audio_base64: None,
            navigation_commands: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{AgentEvent, AgentEventKind, GuardrailResult};
    use crate::domain::agent::GuardrailKind;

    #[test]
    fn event_serializes_kind_as_type_tag() {
        let event = AgentEvent::new(AgentEventKind::ToolCall, "Inspection Agent", "schedule_inspection")
            .with_metadata("tool_args", json!({"date": "2026-11-02"}));

        let value = serde_json::to_value(&event).unwrap_or_default();
        assert_eq!(value["type"], "tool_call");
        assert_eq!(value["metadata"]["tool_args"]["date"], "2026-11-02");
    }

    #[test]
    fn guardrail_results_get_unique_ids() {
        let first = GuardrailResult::passed(GuardrailKind::Relevance, "hi");
        let second = GuardrailResult::failed(GuardrailKind::Jailbreak, "hi", "prompt probing");

        assert_ne!(first.id, second.id);
        assert!(first.passed && first.reasoning.is_empty());
        assert!(!second.passed);
        assert_eq!(second.name, "Jailbreak Guardrail");
    }
}

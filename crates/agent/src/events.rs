use serde_json::{json, Value};

use haven_core::domain::events::{AgentEvent, AgentEventKind};
use haven_core::registry::AgentRegistry;

use crate::runtime::RunItem;

/// Tool whose invocation is also surfaced as a marker message so the UI can render
/// a dedicated widget.
pub const SEAT_MAP_TOOL: &str = "display_seat_map";
pub const SEAT_MAP_MARKER: &str = "DISPLAY_SEAT_MAP";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProducedMessage {
    pub content: String,
    pub agent: String,
    /// Marker messages are passed through to the caller without enrichment.
    pub signal: bool,
}

/// A handoff as applied: `target` is the registered agent control moved to, which
/// differs from `requested` when the run named an unknown agent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppliedHandoff {
    pub source: String,
    pub target: String,
    pub requested: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ProcessedRun {
    pub events: Vec<AgentEvent>,
    pub messages: Vec<ProducedMessage>,
    pub handoffs: Vec<AppliedHandoff>,
    pub current_agent: String,
}

/// Turns the ordered items of one agent run into typed events while tracking which
/// agent is current. Items are processed strictly in order.
pub struct EventBuilder<'a> {
    registry: &'a AgentRegistry,
}

impl<'a> EventBuilder<'a> {
    pub fn new(registry: &'a AgentRegistry) -> Self {
        Self { registry }
    }

    pub fn process(&self, starting_agent: &str, items: Vec<RunItem>) -> ProcessedRun {
        let mut current = self.registry.resolve_by_name(Some(starting_agent)).name.clone();
        let mut events = Vec::with_capacity(items.len());
        let mut messages = Vec::new();
        let mut handoffs = Vec::new();

        for item in items {
            match item {
                RunItem::Message { text } => {
                    events.push(AgentEvent::new(AgentEventKind::Message, &current, &text));
                    messages.push(ProducedMessage { content: text, agent: current.clone(), signal: false });
                }
                RunItem::Handoff { target } => {
                    let applied = self.handoff(&current, &target, &mut events);
                    current = applied.target.clone();
                    handoffs.push(applied);
                }
                RunItem::ToolCall { name, arguments } => {
                    let arguments = decode_arguments(&name, arguments);
                    events.push(
                        AgentEvent::new(AgentEventKind::ToolCall, &current, &name)
                            .with_metadata("tool_args", arguments),
                    );
                    if name == SEAT_MAP_TOOL {
                        events.push(
                            AgentEvent::new(AgentEventKind::Message, &current, SEAT_MAP_MARKER)
                                .with_metadata("signal_tool", json!(SEAT_MAP_TOOL)),
                        );
                        messages.push(ProducedMessage {
                            content: SEAT_MAP_MARKER.to_string(),
                            agent: current.clone(),
                            signal: true,
                        });
                    }
                }
                RunItem::ToolOutput { output } => {
                    let content = match &output {
                        Value::String(text) => text.clone(),
                        other => other.to_string(),
                    };
                    events.push(
                        AgentEvent::new(AgentEventKind::ToolOutput, &current, content)
                            .with_metadata("tool_result", output),
                    );
                }
            }
        }

        ProcessedRun { events, messages, handoffs, current_agent: current }
    }

    /// Emits the handoff event (plus the edge's callback as a tool call). The returned
    /// target is the agent that is current afterwards.
    fn handoff(
        &self,
        source: &str,
        requested: &str,
        events: &mut Vec<AgentEvent>,
    ) -> AppliedHandoff {
        let resolved = self.registry.resolve_by_name(Some(requested));
        if resolved.name != requested {
            tracing::warn!(
                event_name = "turn.handoff.unknown_target",
                source_agent = source,
                target_agent = requested,
                fallback_agent = %resolved.name,
                "handoff to an unregistered agent, routing to entry point"
            );
        }
        let target = resolved.name.as_str();

        events.push(
            AgentEvent::new(AgentEventKind::Handoff, source, format!("{source} -> {target}"))
                .with_metadata("source_agent", json!(source))
                .with_metadata("target_agent", json!(target)),
        );

        let callback = self
            .registry
            .get(source)
            .and_then(|agent| agent.handoff_to(target))
            .and_then(|edge| edge.on_handoff.as_deref());
        if let Some(callback) = callback {
            events.push(AgentEvent::new(AgentEventKind::ToolCall, target, callback));
        }

        tracing::debug!(
            event_name = "turn.handoff.applied",
            source_agent = source,
            target_agent = target,
            "agent handoff"
        );
        AppliedHandoff {
            source: source.to_string(),
            target: target.to_string(),
            requested: requested.to_string(),
        }
    }
}

fn decode_arguments(tool: &str, arguments: Value) -> Value {
    match arguments {
        Value::String(raw) => match serde_json::from_str::<Value>(&raw) {
            Ok(decoded) => decoded,
            Err(error) => {
                tracing::debug!(
                    event_name = "turn.tool_call.raw_arguments",
                    tool,
                    error = %error,
                    "tool arguments are not JSON, passing through raw"
                );
                Value::String(raw)
            }
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use haven_core::domain::events::AgentEventKind;
    use haven_core::registry::AgentRegistry;

    use super::{EventBuilder, SEAT_MAP_MARKER};
    use crate::runtime::RunItem;

    fn kinds(run: &super::ProcessedRun) -> Vec<AgentEventKind> {
        run.events.iter().map(|event| event.kind).collect()
    }

    #[test]
    fn handoff_switches_current_agent_for_later_items() {
        let registry = AgentRegistry::housing_authority();
        let run = EventBuilder::new(&registry).process(
            "Triage Agent",
            vec![RunItem::handoff("Inspection Agent"), RunItem::message("I can help with that.")],
        );

        assert_eq!(run.current_agent, "Inspection Agent");
        assert_eq!(kinds(&run), vec![AgentEventKind::Handoff, AgentEventKind::Message]);
        assert_eq!(run.events[0].agent, "Triage Agent");
        assert_eq!(run.events[0].content, "Triage Agent -> Inspection Agent");
        assert_eq!(run.events[1].agent, "Inspection Agent");
        assert_eq!(run.messages[0].agent, "Inspection Agent");
    }

    #[test]
    fn handoff_callback_surfaces_as_tool_call_on_target() {
        let registry = AgentRegistry::housing_authority();
        let run =
            EventBuilder::new(&registry).process("Triage Agent", vec![RunItem::handoff("HPS Agent")]);

        assert_eq!(kinds(&run), vec![AgentEventKind::Handoff, AgentEventKind::ToolCall]);
        assert_eq!(run.events[1].agent, "HPS Agent");
        assert_eq!(run.events[1].content, "on_hps_handoff");
        let metadata = run.events[0].metadata.clone().unwrap_or_default();
        assert_eq!(metadata.get("target_agent"), Some(&json!("HPS Agent")));
    }

    #[test]
    fn unknown_handoff_target_falls_back_to_triage() {
        let registry = AgentRegistry::housing_authority();
        let run = EventBuilder::new(&registry)
            .process("Inspection Agent", vec![RunItem::handoff("Billing Agent")]);

        assert_eq!(run.current_agent, "Triage Agent");
        assert_eq!(run.handoffs.len(), 1);
        assert_eq!(run.handoffs[0].requested, "Billing Agent");
        assert_eq!(run.handoffs[0].target, "Triage Agent");
        assert_eq!(run.handoffs[0].source, "Inspection Agent");
    }

    #[test]
    fn tool_arguments_are_decoded_when_possible() {
        let registry = AgentRegistry::housing_authority();
        let run = EventBuilder::new(&registry).process(
            "Inspection Agent",
            vec![
                RunItem::tool_call("schedule_inspection", json!("{\"date\": \"2026-11-02\"}")),
                RunItem::tool_call("update_door_codes", json!("front #1234")),
                RunItem::tool_output(json!({"status": "scheduled"})),
                RunItem::tool_output(json!("done")),
            ],
        );

        let args = |index: usize| {
            run.events[index]
                .metadata
                .as_ref()
                .and_then(|metadata| metadata.get("tool_args").cloned())
        };
        assert_eq!(args(0), Some(json!({"date": "2026-11-02"})));
        assert_eq!(args(1), Some(json!("front #1234")));
        assert_eq!(run.events[2].content, "{\"status\":\"scheduled\"}");
        assert_eq!(run.events[3].content, "done");
        assert_eq!(
            run.events[3].metadata.as_ref().and_then(|metadata| metadata.get("tool_result")),
            Some(&json!("done"))
        );
    }

    #[test]
    fn seat_map_tool_adds_marker_message() {
        let registry = AgentRegistry::housing_authority();
        let run = EventBuilder::new(&registry).process(
            "General Information Agent",
            vec![RunItem::tool_call("display_seat_map", json!({}))],
        );

        assert_eq!(kinds(&run), vec![AgentEventKind::ToolCall, AgentEventKind::Message]);
        assert_eq!(run.events[1].content, SEAT_MAP_MARKER);
        assert_eq!(run.messages.len(), 1);
        assert!(run.messages[0].signal);
    }
}

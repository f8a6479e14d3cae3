use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use haven_core::domain::agent::{AgentDescriptor, GuardrailKind};
use haven_core::domain::conversation::{HistoryItem, HousingContext};

/// Failure of an external capability. Fatal to the turn.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("agent runtime failed: {0}")]
    Runtime(String),
    #[error("guardrail classifier failed: {0}")]
    Classifier(String),
}

/// One step of an agent run, in the order the agent produced it. Items carry no
/// agent name; the event builder attributes them to whichever agent is current.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunItem {
    Message { text: String },
    Handoff { target: String },
    ToolCall { name: String, arguments: Value },
    ToolOutput { output: Value },
}

impl RunItem {
    pub fn message(text: impl Into<String>) -> Self {
        Self::Message { text: text.into() }
    }

    pub fn handoff(target: impl Into<String>) -> Self {
        Self::Handoff { target: target.into() }
    }

    pub fn tool_call(name: impl Into<String>, arguments: Value) -> Self {
        Self::ToolCall { name: name.into(), arguments }
    }

    pub fn tool_output(output: Value) -> Self {
        Self::ToolOutput { output }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum RunOutcome {
    /// `history` is the full rewritten transcript and replaces the stored one.
    Completed { items: Vec<RunItem>, history: Vec<HistoryItem> },
    GuardrailTripped { guardrail: GuardrailKind, reasoning: String },
}

/// The agent-execution capability. It may mutate the conversation context through
/// its tools while it runs.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    async fn run(
        &self,
        agent: &AgentDescriptor,
        history: &[HistoryItem],
        context: &mut HousingContext,
    ) -> Result<RunOutcome, CapabilityError>;
}

/// A canned response for [`ScriptedAgentRunner`].
#[derive(Clone, Debug, Default)]
pub struct ScriptedRun {
    pub items: Vec<RunItem>,
    pub context_patch: Map<String, Value>,
    pub tripwire: Option<(GuardrailKind, String)>,
    pub failure: Option<String>,
}

impl ScriptedRun {
    pub fn items(items: Vec<RunItem>) -> Self {
        Self { items, ..Self::default() }
    }

    pub fn tripped(guardrail: GuardrailKind, reasoning: impl Into<String>) -> Self {
        Self { tripwire: Some((guardrail, reasoning.into())), ..Self::default() }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self { failure: Some(message.into()), ..Self::default() }
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context_patch.insert(key.into(), value);
        self
    }
}

/// Replays scripted runs in order. Message items are appended to the returned
/// history as assistant turns.
#[derive(Default)]
pub struct ScriptedAgentRunner {
    runs: Mutex<VecDeque<ScriptedRun>>,
    seen_agents: Mutex<Vec<String>>,
}

impl ScriptedAgentRunner {
    pub fn new(runs: impl IntoIterator<Item = ScriptedRun>) -> Self {
        Self { runs: Mutex::new(runs.into_iter().collect()), seen_agents: Mutex::default() }
    }

    pub fn push(&self, run: ScriptedRun) {
        match self.runs.lock() {
            Ok(mut runs) => runs.push_back(run),
            Err(poisoned) => poisoned.into_inner().push_back(run),
        }
    }

    /// Names of the agents this runner was invoked with, oldest first.
    pub fn seen_agents(&self) -> Vec<String> {
        match self.seen_agents.lock() {
            Ok(seen) => seen.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn next_run(&self) -> Option<ScriptedRun> {
        match self.runs.lock() {
            Ok(mut runs) => runs.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        }
    }

    fn record(&self, agent: &str) {
        match self.seen_agents.lock() {
            Ok(mut seen) => seen.push(agent.to_string()),
            Err(poisoned) => poisoned.into_inner().push(agent.to_string()),
        }
    }
}

#[async_trait]
impl AgentRunner for ScriptedAgentRunner {
    async fn run(
        &self,
        agent: &AgentDescriptor,
        history: &[HistoryItem],
        context: &mut HousingContext,
    ) -> Result<RunOutcome, CapabilityError> {
        self.record(&agent.name);
        let run = self
            .next_run()
            .ok_or_else(|| CapabilityError::Runtime("no scripted run left".to_string()))?;

        if let Some(message) = run.failure {
            return Err(CapabilityError::Runtime(message));
        }
        // Tools run before any tripwire fires, so the patch lands either way.
        if !run.context_patch.is_empty() {
            let mut fields = context.to_fields();
            fields.extend(run.context_patch);
            *context = serde_json::from_value(Value::Object(fields))
                .map_err(|error| CapabilityError::Runtime(format!("context patch: {error}")))?;
        }

        if let Some((guardrail, reasoning)) = run.tripwire {
            return Ok(RunOutcome::GuardrailTripped { guardrail, reasoning });
        }

        let mut history = history.to_vec();
        history.extend(run.items.iter().filter_map(|item| match item {
            RunItem::Message { text } => Some(HistoryItem::assistant(text.clone())),
            _ => None,
        }));

        Ok(RunOutcome::Completed { items: run.items, history })
    }
}

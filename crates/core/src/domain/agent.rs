use serde::{Deserialize, Serialize};

/// Input guardrails an agent can carry. Each has its own violation predicate;
/// see the evaluator in `haven-agent`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailKind {
    Relevance,
    Jailbreak,
    DataPrivacy,
    AuthorityLimitation,
    LanguageSupport,
}

impl GuardrailKind {
    pub const ALL: [GuardrailKind; 5] = [
        Self::Relevance,
        Self::Jailbreak,
        Self::DataPrivacy,
        Self::AuthorityLimitation,
        Self::LanguageSupport,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Relevance => "Relevance Guardrail",
            Self::Jailbreak => "Jailbreak Guardrail",
            Self::DataPrivacy => "Data Privacy Guardrail",
            Self::AuthorityLimitation => "Authority Limitation Guardrail",
            Self::LanguageSupport => "Language Support Guardrail",
        }
    }

    pub fn from_display_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.display_name() == name)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffEdge {
    pub target: String,
    /// Side-effect callback the agent runtime invokes when this edge is taken.
    #[serde(default)]
    pub on_handoff: Option<String>,
}

impl HandoffEdge {
    pub fn to(target: impl Into<String>) -> Self {
        Self { target: target.into(), on_handoff: None }
    }

    pub fn with_callback(target: impl Into<String>, callback: impl Into<String>) -> Self {
        Self { target: target.into(), on_handoff: Some(callback.into()) }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub handoffs: Vec<HandoffEdge>,
    #[serde(default)]
    pub guardrails: Vec<GuardrailKind>,
}

impl AgentDescriptor {
    pub fn handoff_to(&self, target: &str) -> Option<&HandoffEdge> {
        self.handoffs.iter().find(|edge| edge.target == target)
    }

    pub fn directory_entry(&self) -> AgentDirectoryEntry {
        AgentDirectoryEntry {
            name: self.name.clone(),
            description: self.description.clone(),
            handoffs: self.handoffs.iter().map(|edge| edge.target.clone()).collect(),
            tools: self.tools.clone(),
            input_guardrails: self
                .guardrails
                .iter()
                .map(|kind| kind.display_name().to_string())
                .collect(),
        }
    }
}

/// What a UI shows about an agent in its agent directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDirectoryEntry {
    pub name: String,
    pub description: String,
    pub handoffs: Vec<String>,
    pub tools: Vec<String>,
    pub input_guardrails: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::{AgentDescriptor, GuardrailKind, HandoffEdge};

    #[test]
    fn display_names_round_trip() {
        for kind in GuardrailKind::ALL {
            assert_eq!(GuardrailKind::from_display_name(kind.display_name()), Some(kind));
        }
        assert_eq!(GuardrailKind::from_display_name("Unknown Guardrail"), None);
    }

    #[test]
    fn directory_entry_lists_targets_and_guardrail_names() {
        let agent = AgentDescriptor {
            name: "Triage Agent".to_string(),
            description: "routes requests".to_string(),
            tools: vec![],
            handoffs: vec![
                HandoffEdge::to("Inspection Agent"),
                HandoffEdge::with_callback("HPS Agent", "on_hps_handoff"),
            ],
            guardrails: vec![GuardrailKind::Relevance, GuardrailKind::Jailbreak],
        };

        let entry = agent.directory_entry();
        assert_eq!(entry.handoffs, vec!["Inspection Agent", "HPS Agent"]);
        assert_eq!(entry.input_guardrails, vec!["Relevance Guardrail", "Jailbreak Guardrail"]);
        assert_eq!(
            agent.handoff_to("HPS Agent").and_then(|edge| edge.on_handoff.as_deref()),
            Some("on_hps_handoff")
        );
    }
}

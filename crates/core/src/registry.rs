use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::config::RegistryConfig;
use crate::domain::agent::{AgentDescriptor, AgentDirectoryEntry, GuardrailKind, HandoffEdge};
use crate::errors::DomainError;

pub const TRIAGE_AGENT: &str = "Triage Agent";
pub const INSPECTION_AGENT: &str = "Inspection Agent";
pub const LANDLORD_SERVICES_AGENT: &str = "Landlord Services Agent";
pub const HPS_AGENT: &str = "HPS Agent";
pub const GENERAL_INFORMATION_AGENT: &str = "General Information Agent";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("could not read agent registry `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse agent registry: {0}")]
    Parse(#[from] toml::de::Error),
    #[error(transparent)]
    Invalid(#[from] DomainError),
}

/// Immutable name -> descriptor table, fixed at process start.
///
/// Construction validates that names are unique, the entry point exists and every
/// handoff edge points at a registered agent, so lookups never dangle afterwards.
#[derive(Clone, Debug)]
pub struct AgentRegistry {
    agents: Vec<AgentDescriptor>,
    index: HashMap<String, usize>,
    triage: usize,
}

impl AgentRegistry {
    pub fn new(
        agents: Vec<AgentDescriptor>,
        triage_agent: impl Into<String>,
    ) -> Result<Self, DomainError> {
        let triage_agent = triage_agent.into();
        let mut index = HashMap::with_capacity(agents.len());
        for (position, agent) in agents.iter().enumerate() {
            if index.insert(agent.name.clone(), position).is_some() {
                return Err(DomainError::DuplicateAgent(agent.name.clone()));
            }
        }

        for agent in &agents {
            for edge in &agent.handoffs {
                if !index.contains_key(&edge.target) {
                    return Err(DomainError::UnknownHandoffTarget {
                        agent: agent.name.clone(),
                        target: edge.target.clone(),
                    });
                }
            }
        }

        let triage = *index
            .get(&triage_agent)
            .ok_or_else(|| DomainError::MissingEntryPoint(triage_agent.clone()))?;

        Ok(Self { agents, index, triage })
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, RegistryError> {
        let document: RegistryDocument = toml::from_str(raw)?;
        let triage = document.triage_agent.unwrap_or_else(|| TRIAGE_AGENT.to_string());
        Ok(Self::new(document.agents, triage)?)
    }

    pub fn from_toml_file(path: &Path) -> Result<Self, RegistryError> {
        let raw = fs::read_to_string(path)
            .map_err(|source| RegistryError::ReadFile { path: path.to_path_buf(), source })?;
        Self::from_toml_str(&raw)
    }

    /// Registry described by configuration: the TOML document when a path is set,
    /// otherwise the built-in agents. A document's own `triage_agent` wins over the
    /// configured one.
    pub fn from_config(config: &RegistryConfig) -> Result<Self, RegistryError> {
        match &config.path {
            Some(path) => {
                let raw = fs::read_to_string(path)
                    .map_err(|source| RegistryError::ReadFile { path: path.clone(), source })?;
                let document: RegistryDocument = toml::from_str(&raw)?;
                let triage = document.triage_agent.unwrap_or_else(|| config.triage_agent.clone());
                Ok(Self::new(document.agents, triage)?)
            }
            None => {
                let defaults = Self::housing_authority();
                if defaults.triage().name == config.triage_agent {
                    return Ok(defaults);
                }
                Ok(Self::new(defaults.agents, config.triage_agent.clone())?)
            }
        }
    }

    /// The housing authority service desk: triage plus four specialists.
    pub fn housing_authority() -> Self {
        let all_guardrails = GuardrailKind::ALL.to_vec();
        let back_to_triage = vec![HandoffEdge::to(TRIAGE_AGENT)];

        let agents = vec![
            AgentDescriptor {
                name: TRIAGE_AGENT.to_string(),
                description: "A triage agent that can delegate a customer's request to the appropriate agent.".to_string(),
                tools: Vec::new(),
                handoffs: vec![
                    HandoffEdge::to(INSPECTION_AGENT),
                    HandoffEdge::to(LANDLORD_SERVICES_AGENT),
                    HandoffEdge::with_callback(HPS_AGENT, "on_hps_handoff"),
                    HandoffEdge::to(GENERAL_INFORMATION_AGENT),
                ],
                guardrails: vec![
                    GuardrailKind::Relevance,
                    GuardrailKind::Jailbreak,
                    GuardrailKind::DataPrivacy,
                ],
            },
            AgentDescriptor {
                name: INSPECTION_AGENT.to_string(),
                description: "A helpful agent for HQS inspection scheduling, rescheduling, cancellation, and requirements.".to_string(),
                tools: tool_names(&[
                    "schedule_inspection",
                    "request_inspection_reschedule",
                    "parse_reschedule_info",
                    "process_reschedule_reason",
                    "reschedule_inspection",
                    "cancel_inspection",
                    "check_inspection_status",
                    "get_inspection_requirements",
                    "update_door_codes",
                    "extract_t_code",
                    "extract_contact_info",
                    "get_language_instructions",
                ]),
                handoffs: back_to_triage.clone(),
                guardrails: all_guardrails.clone(),
            },
            AgentDescriptor {
                name: LANDLORD_SERVICES_AGENT.to_string(),
                description: "An agent to assist landlords with Section 8 documentation and payment changes.".to_string(),
                tools: tool_names(&[
                    "update_payment_method",
                    "request_landlord_forms",
                    "housing_faq_lookup_tool",
                    "extract_contact_info",
                ]),
                handoffs: back_to_triage.clone(),
                guardrails: all_guardrails.clone(),
            },
            AgentDescriptor {
                name: HPS_AGENT.to_string(),
                description: "An agent to schedule HPS appointments and assist with housing program changes.".to_string(),
                tools: tool_names(&[
                    "schedule_hps_appointment",
                    "request_income_reporting_form",
                    "extract_t_code",
                    "extract_contact_info",
                ]),
                handoffs: back_to_triage.clone(),
                guardrails: all_guardrails.clone(),
            },
            AgentDescriptor {
                name: GENERAL_INFORMATION_AGENT.to_string(),
                description: "A helpful agent that provides housing authority hours, contact information, and general questions.".to_string(),
                tools: tool_names(&[
                    "housing_faq_lookup_tool",
                    "research_income_limits",
                    "get_language_instructions",
                ]),
                handoffs: back_to_triage,
                guardrails: all_guardrails,
            },
        ];

        let mut index = HashMap::with_capacity(agents.len());
        for (position, agent) in agents.iter().enumerate() {
            index.insert(agent.name.clone(), position);
        }
        Self { agents, index, triage: 0 }
    }

    pub fn triage(&self) -> &AgentDescriptor {
        &self.agents[self.triage]
    }

    pub fn get(&self, name: &str) -> Option<&AgentDescriptor> {
        self.index.get(name).map(|position| &self.agents[*position])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Looks an agent up by name, falling back to the triage entry point when the
    /// name is absent or not registered.
    pub fn resolve_by_name(&self, name: Option<&str>) -> &AgentDescriptor {
        match name.and_then(|name| self.get(name)) {
            Some(agent) => agent,
            None => {
                if let Some(name) = name {
                    tracing::debug!(
                        event_name = "registry.agent.unknown",
                        agent = name,
                        "unknown agent name, defaulting to triage"
                    );
                }
                self.triage()
            }
        }
    }

    pub fn list_all(&self) -> &[AgentDescriptor] {
        &self.agents
    }

    pub fn directory(&self) -> Vec<AgentDirectoryEntry> {
        self.agents.iter().map(AgentDescriptor::directory_entry).collect()
    }
}

fn tool_names(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| name.to_string()).collect()
}

#[derive(Debug, Deserialize)]
struct RegistryDocument {
    triage_agent: Option<String>,
    #[serde(default)]
    agents: Vec<AgentDescriptor>,
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::{AgentRegistry, RegistryError, HPS_AGENT, INSPECTION_AGENT, TRIAGE_AGENT};
    use crate::config::RegistryConfig;
    use crate::domain::agent::{AgentDescriptor, GuardrailKind, HandoffEdge};
    use crate::errors::DomainError;

    fn agent(name: &str, handoffs: &[&str]) -> AgentDescriptor {
        AgentDescriptor {
            name: name.to_string(),
            description: String::new(),
            tools: Vec::new(),
            handoffs: handoffs.iter().map(|target| HandoffEdge::to(*target)).collect(),
            guardrails: vec![GuardrailKind::Relevance],
        }
    }

    #[test]
    fn default_registry_is_internally_consistent() {
        let registry = AgentRegistry::housing_authority();
        let names: HashSet<_> = registry.list_all().iter().map(|agent| agent.name.as_str()).collect();

        assert_eq!(registry.list_all().len(), 5);
        assert_eq!(registry.triage().name, TRIAGE_AGENT);
        for agent in registry.list_all() {
            for edge in &agent.handoffs {
                assert!(names.contains(edge.target.as_str()), "{} -> {}", agent.name, edge.target);
            }
        }

        let rebuilt = AgentRegistry::new(registry.list_all().to_vec(), TRIAGE_AGENT);
        assert!(rebuilt.is_ok());
    }

    #[test]
    fn triage_to_hps_edge_carries_callback() {
        let registry = AgentRegistry::housing_authority();
        let edge = registry.triage().handoff_to(HPS_AGENT);
        assert_eq!(edge.and_then(|edge| edge.on_handoff.as_deref()), Some("on_hps_handoff"));
    }

    #[test]
    fn resolve_falls_back_to_triage() {
        let registry = AgentRegistry::housing_authority();

        assert_eq!(registry.resolve_by_name(None).name, TRIAGE_AGENT);
        assert_eq!(registry.resolve_by_name(Some("Billing Agent")).name, TRIAGE_AGENT);
        assert_eq!(registry.resolve_by_name(Some(INSPECTION_AGENT)).name, INSPECTION_AGENT);
    }

    #[test]
    fn directory_mirrors_registry_order() {
        let registry = AgentRegistry::housing_authority();
        let directory = registry.directory();

        assert_eq!(directory.len(), 5);
        assert_eq!(directory[0].name, TRIAGE_AGENT);
        assert!(directory[1].input_guardrails.contains(&"Language Support Guardrail".to_string()));
    }

    #[test]
    fn construction_rejects_duplicates_and_dangling_edges() {
        let duplicate =
            AgentRegistry::new(vec![agent("A", &[]), agent("A", &[])], "A").err();
        assert_eq!(duplicate, Some(DomainError::DuplicateAgent("A".to_string())));

        let dangling = AgentRegistry::new(vec![agent("A", &["B"])], "A").err();
        assert_eq!(
            dangling,
            Some(DomainError::UnknownHandoffTarget { agent: "A".to_string(), target: "B".to_string() })
        );

        let missing = AgentRegistry::new(vec![agent("A", &[])], "Triage").err();
        assert_eq!(missing, Some(DomainError::MissingEntryPoint("Triage".to_string())));
    }

    #[test]
    fn cyclic_handoffs_are_allowed() {
        let registry = AgentRegistry::new(vec![agent("A", &["B"]), agent("B", &["A"])], "A");
        assert!(registry.is_ok());
    }

    #[test]
    fn config_selects_entry_point_and_source() -> Result<(), RegistryError> {
        let defaults = AgentRegistry::from_config(&RegistryConfig::default())?;
        assert_eq!(defaults.triage().name, TRIAGE_AGENT);

        let config = RegistryConfig { path: None, triage_agent: INSPECTION_AGENT.to_string() };
        assert_eq!(AgentRegistry::from_config(&config)?.triage().name, INSPECTION_AGENT);

        let dir = tempfile::tempdir().map_err(|source| RegistryError::ReadFile {
            path: std::env::temp_dir(),
            source,
        })?;
        let path = dir.path().join("agents.toml");
        std::fs::write(&path, "[[agents]]\nname = \"Front Desk\"\n")
            .map_err(|source| RegistryError::ReadFile { path: path.clone(), source })?;
        let config = RegistryConfig { path: Some(path), triage_agent: "Front Desk".to_string() };
        assert_eq!(AgentRegistry::from_config(&config)?.list_all().len(), 1);

        let missing = RegistryConfig { path: None, triage_agent: "Nobody".to_string() };
        assert!(matches!(
            AgentRegistry::from_config(&missing),
            Err(RegistryError::Invalid(DomainError::MissingEntryPoint(_)))
        ));
        Ok(())
    }

    #[test]
    fn toml_source_builds_registry() -> Result<(), RegistryError> {
        let registry = AgentRegistry::from_toml_str(
            r#"
triage_agent = "Front Desk"

[[agents]]
name = "Front Desk"
description = "Routes callers"
guardrails = ["relevance", "data_privacy"]

[[agents.handoffs]]
target = "Repairs Desk"
on_handoff = "on_repairs_handoff"

[[agents]]
name = "Repairs Desk"
tools = ["log_repair"]

[[agents.handoffs]]
target = "Front Desk"
"#,
        )?;

        assert_eq!(registry.triage().name, "Front Desk");
        assert_eq!(
            registry.triage().guardrails,
            vec![GuardrailKind::Relevance, GuardrailKind::DataPrivacy]
        );
        assert_eq!(registry.resolve_by_name(Some("Repairs Desk")).tools, vec!["log_repair"]);
        Ok(())
    }

    #[test]
    fn toml_source_is_validated() {
        let result = AgentRegistry::from_toml_str(
            r#"
[[agents]]
name = "Triage Agent"

[[agents.handoffs]]
target = "Nobody"
"#,
        );
        assert!(matches!(result, Err(RegistryError::Invalid(DomainError::UnknownHandoffTarget { .. }))));
    }
}

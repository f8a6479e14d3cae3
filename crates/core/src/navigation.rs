//! UI guidance derived from an agent reply.
//!
//! Commands are chosen by keyword matching on the reply text, first within the
//! producing agent's own branch and then across a fixed dispute-resolution
//! keyword set that applies to every agent. The mapping is pure: the same text
//! and agent always yield the same commands in the same order.

use serde::{Deserialize, Serialize};

pub const DEFAULT_DURATION_MS: u32 = 5_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NavigationKind {
    Navigate,
    Highlight,
    Guidance,
    Scroll,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationCommand {
    #[serde(rename = "type")]
    pub kind: NavigationKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub duration: Option<u32>,
}

impl NavigationCommand {
    pub fn navigate(page_key: &str, message: &str) -> Self {
        Self {
            kind: NavigationKind::Navigate,
            page_key: Some(page_key.to_string()),
            selector: None,
            message: Some(message.to_string()),
            duration: Some(DEFAULT_DURATION_MS),
        }
    }

    pub fn highlight(selector: &str, message: &str, duration: u32) -> Self {
        Self::on_selector(NavigationKind::Highlight, selector, message, duration)
    }

    pub fn guidance(selector: &str, message: &str, duration: u32) -> Self {
        Self::on_selector(NavigationKind::Guidance, selector, message, duration)
    }

    fn on_selector(kind: NavigationKind, selector: &str, message: &str, duration: u32) -> Self {
        Self {
            kind,
            page_key: None,
            selector: Some(selector.to_string()),
            message: Some(message.to_string()),
            duration: Some(duration),
        }
    }
}

const INSPECTION_REQUIREMENT_WORDS: &[&str] = &["requirements", "checklist", "need", "documents"];
const INSPECTION_SCHEDULING_WORDS: &[&str] = &["schedule", "appointment", "book"];
const HPS_APPLICATION_WORDS: &[&str] = &["apply", "application", "assistance"];
const LANDLORD_PAYMENT_WORDS: &[&str] = &["payment", "direct deposit", "forms"];
const GENERAL_CONTACT_WORDS: &[&str] = &["contact", "office hours", "phone"];

const DISPUTE_WORDS: &[&str] = &[
    "tenant rights",
    "landlord dispute",
    "eviction",
    "security deposit",
    "repairs",
    "maintenance",
    "habitability",
    "discrimination",
    "project sentinel",
    "mediation",
    "tenant-landlord",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum AgentBranch {
    Inspection,
    Hps,
    Landlord,
    General,
}

impl AgentBranch {
    // Checked in this order; the first name fragment that matches wins.
    fn for_agent(agent_name: &str) -> Option<Self> {
        if agent_name.contains("Inspection") {
            Some(Self::Inspection)
        } else if agent_name.contains("HPS") {
            Some(Self::Hps)
        } else if agent_name.contains("Landlord") {
            Some(Self::Landlord)
        } else if agent_name.contains("General") {
            Some(Self::General)
        } else {
            None
        }
    }
}

pub fn generate_navigation_commands(response_text: &str, agent_name: &str) -> Vec<NavigationCommand> {
    let text = response_text.to_lowercase();
    let mut commands = Vec::new();

    match AgentBranch::for_agent(agent_name) {
        Some(AgentBranch::Inspection) => inspection_commands(&text, &mut commands),
        Some(AgentBranch::Hps) => hps_commands(&text, &mut commands),
        Some(AgentBranch::Landlord) => landlord_commands(&text, &mut commands),
        Some(AgentBranch::General) => general_commands(&text, &mut commands),
        None => {}
    }

    if contains_any(&text, DISPUTE_WORDS) {
        commands.push(NavigationCommand::navigate(
            "project_sentinel",
            "Taking you to Project Sentinel for tenant-landlord dispute resolution",
        ));
        commands.push(NavigationCommand::guidance(
            "main, .content",
            "Project Sentinel provides free mediation and counseling for tenant-landlord disputes that fall outside of HUD regulations",
            10_000,
        ));
    }

    commands
}

fn inspection_commands(text: &str, commands: &mut Vec<NavigationCommand>) {
    if contains_any(text, INSPECTION_REQUIREMENT_WORDS) {
        commands.push(NavigationCommand::navigate(
            "inspection_requirements",
            "Taking you to the inspection requirements page",
        ));
        commands.push(NavigationCommand::highlight(
            ".requirements-checklist, .inspection-requirements",
            "Here are the inspection requirements",
            8_000,
        ));
    } else if contains_any(text, INSPECTION_SCHEDULING_WORDS) {
        commands.push(NavigationCommand::navigate(
            "inspection_scheduling",
            "Opening the inspection scheduling page",
        ));
        commands.push(NavigationCommand::guidance(
            ".scheduling-form, #schedule-form",
            "Fill out this form to schedule your inspection",
            10_000,
        ));
    }
}

fn hps_commands(text: &str, commands: &mut Vec<NavigationCommand>) {
    if contains_any(text, HPS_APPLICATION_WORDS) {
        commands.push(NavigationCommand::navigate(
            "application",
            "Directing you to the housing application page",
        ));
        commands.push(NavigationCommand::highlight(
            ".online-application, #online-app",
            "You can apply online using this form",
            8_000,
        ));
    }
}

fn landlord_commands(text: &str, commands: &mut Vec<NavigationCommand>) {
    if contains_any(text, LANDLORD_PAYMENT_WORDS) {
        commands.push(NavigationCommand::navigate(
            "landlord_payments",
            "Taking you to the landlord payment information",
        ));
        if text.contains("direct deposit") {
            commands.push(NavigationCommand::highlight(
                ".direct-deposit",
                "Here's how to set up direct deposit",
                8_000,
            ));
        }
    }
}

fn general_commands(text: &str, commands: &mut Vec<NavigationCommand>) {
    if contains_any(text, GENERAL_CONTACT_WORDS) {
        commands.push(NavigationCommand::navigate("contact", "Here's our contact information"));
        if text.contains("hours") {
            commands.push(NavigationCommand::highlight(
                ".office-hours",
                "These are our current office hours",
                6_000,
            ));
        }
    }
}

fn contains_any(text: &str, words: &[&str]) -> bool {
    words.iter().any(|word| text.contains(word))
}

#[cfg(test)]
mod tests {
    use super::{generate_navigation_commands, NavigationKind, DEFAULT_DURATION_MS};

    fn page_keys(text: &str, agent: &str) -> Vec<Option<String>> {
        generate_navigation_commands(text, agent)
            .into_iter()
            .map(|command| command.page_key)
            .collect()
    }

    #[test]
    fn inspection_scheduling_reply_opens_scheduling_page() {
        let commands = generate_navigation_commands(
            "I can schedule your inspection for next Tuesday.",
            "Inspection Agent",
        );

        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].kind, NavigationKind::Navigate);
        assert_eq!(commands[0].page_key.as_deref(), Some("inspection_scheduling"));
        assert_eq!(commands[0].duration, Some(DEFAULT_DURATION_MS));
        assert_eq!(commands[1].kind, NavigationKind::Guidance);
        assert_eq!(commands[1].duration, Some(10_000));
    }

    #[test]
    fn inspection_requirements_take_precedence_over_scheduling() {
        let keys = page_keys(
            "You will need these documents before we schedule anything.",
            "Inspection Agent",
        );
        assert_eq!(keys[0].as_deref(), Some("inspection_requirements"));
        assert_eq!(keys.len(), 2);
    }

    #[test]
    fn keyword_matching_is_case_insensitive() {
        let keys = page_keys("Please APPLY through the portal.", "HPS Agent");
        assert_eq!(keys[0].as_deref(), Some("application"));
    }

    #[test]
    fn landlord_highlight_only_for_direct_deposit() {
        assert_eq!(page_keys("Your payment is on its way.", "Landlord Services Agent").len(), 1);
        assert_eq!(
            page_keys("Set up direct deposit to speed things up.", "Landlord Services Agent").len(),
            2
        );
    }

    #[test]
    fn general_hours_adds_office_hours_highlight() {
        let commands = generate_navigation_commands(
            "Our office hours are 8 to 5; contact us anytime.",
            "General Information Agent",
        );
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[1].selector.as_deref(), Some(".office-hours"));
        assert_eq!(commands[1].duration, Some(6_000));
    }

    #[test]
    fn triage_replies_only_get_cross_cutting_commands() {
        assert!(generate_navigation_commands("Let me schedule that.", "Triage Agent").is_empty());

        let keys =
            page_keys("For an eviction question, mediation can help.", "Triage Agent");
        assert_eq!(keys, vec![Some("project_sentinel".to_string()), None]);
    }

    #[test]
    fn agent_commands_come_before_dispute_commands() {
        let commands = generate_navigation_commands(
            "We can book an inspection and discuss the repairs you need handled.",
            "Inspection Agent",
        );

        let keys: Vec<_> = commands.iter().map(|command| command.page_key.as_deref()).collect();
        assert_eq!(
            keys,
            vec![Some("inspection_requirements"), None, Some("project_sentinel"), None]
        );
    }

    #[test]
    fn generation_is_deterministic() {
        let text = "Security deposit disputes go to Project Sentinel; call our phone line.";
        assert_eq!(
            generate_navigation_commands(text, "General Information Agent"),
            generate_navigation_commands(text, "General Information Agent")
        );
    }
}

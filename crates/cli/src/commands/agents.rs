use haven_core::config::{AppConfig, LoadOptions};
use haven_core::registry::AgentRegistry;

use crate::commands::CommandResult;

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "agents",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let registry = match AgentRegistry::from_config(&config.registry) {
        Ok(registry) => registry,
        Err(error) => return CommandResult::failure("agents", "agent_registry", error.to_string(), 7),
    };

    match serde_json::to_value(registry.directory()) {
        Ok(directory) => CommandResult::success_with_data(
            "agents",
            format!("{} agents, entry point `{}`", registry.list_all().len(), registry.triage().name),
            directory,
        ),
        Err(error) => CommandResult::failure("agents", "serialization", error.to_string(), 1),
    }
}

use haven_core::navigation::generate_navigation_commands;

use crate::commands::CommandResult;

pub fn run(agent: &str, text: &str) -> CommandResult {
    let commands = generate_navigation_commands(text, agent);
    match serde_json::to_value(&commands) {
        Ok(data) => CommandResult::success_with_data(
            "navigate",
            format!("{} navigation commands for {agent}", commands.len()),
            data,
        ),
        Err(error) => CommandResult::failure("navigate", "serialization", error.to_string(), 1),
    }
}

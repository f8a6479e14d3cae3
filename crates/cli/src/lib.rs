pub mod commands;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use haven_core::config::{LogFormat, LoggingConfig};
use tracing::Level;

#[derive(Debug, Parser)]
#[command(
    name = "haven",
    about = "Haven operator CLI",
    long_about = "Inspect configuration, check readiness, apply migrations and explore the agent desk.",
    after_help = "Examples:\n  haven doctor --json\n  haven agents\n  haven navigate --agent \"Inspection Agent\" \"Let's schedule your inspection\""
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(about = "Run one scripted turn end to end with per-check timing details")]
    Smoke,
    #[command(about = "Inspect effective configuration values with source attribution")]
    Config,
    #[command(about = "Validate config, agent registry and DB connectivity")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Print the agent directory as JSON")]
    Agents,
    #[command(about = "Print the navigation commands derived from an agent reply")]
    Navigate {
        #[arg(long, help = "Name of the agent that produced the reply")]
        agent: String,
        #[arg(help = "Reply text to scan")]
        text: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Smoke => commands::smoke::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Agents => commands::agents::run(),
        Command::Navigate { agent, text } => commands::navigate::run(&agent, &text),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Installs the global subscriber. Logs go to stderr so command output on stdout
/// stays machine readable.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let level = config.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(level)
        .with_writer(std::io::stderr);

    let installed = match config.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|error| anyhow::anyhow!("failed to install log subscriber: {error}"))
}

use std::process::ExitCode;

use haven_core::config::{AppConfig, LoadOptions};

fn main() -> ExitCode {
    // Commands report configuration errors themselves; logging just falls back to
    // silence when the config cannot be loaded.
    if let Ok(config) = AppConfig::load(LoadOptions::default()) {
        if let Err(error) = haven_cli::init_logging(&config.logging) {
            eprintln!("{error}");
        }
    }

    haven_cli::run()
}

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use haven_core::config::{AppConfig, LoadOptions};
use toml::Value;

/// Key path in the config file and the environment variables that override it,
/// highest precedence first.
const FIELDS: &[(&str, &[&str])] = &[
    ("database.url", &["HAVEN_DATABASE_URL"]),
    ("database.max_connections", &["HAVEN_DATABASE_MAX_CONNECTIONS"]),
    ("database.timeout_secs", &["HAVEN_DATABASE_TIMEOUT_SECS"]),
    ("registry.path", &["HAVEN_REGISTRY_PATH"]),
    ("registry.triage_agent", &["HAVEN_REGISTRY_TRIAGE_AGENT"]),
    ("guardrails.evaluation", &["HAVEN_GUARDRAILS_EVALUATION"]),
    ("logging.level", &["HAVEN_LOGGING_LEVEL", "HAVEN_LOG_LEVEL"]),
    ("logging.format", &["HAVEN_LOGGING_FORMAT", "HAVEN_LOG_FORMAT"]),
];

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key_path, env_keys) in FIELDS {
        let source =
            field_source(key_path, env_keys, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(format!("- {key_path} = {} (source: {source})", value_of(&config, key_path)));
    }

    lines.join("\n")
}

fn value_of(config: &AppConfig, key_path: &str) -> String {
    match key_path {
        "database.url" => config.database.url.clone(),
        "database.max_connections" => config.database.max_connections.to_string(),
        "database.timeout_secs" => config.database.timeout_secs.to_string(),
        "registry.path" => config
            .registry
            .path
            .as_ref()
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "<built-in>".to_string()),
        "registry.triage_agent" => config.registry.triage_agent.clone(),
        "guardrails.evaluation" => format!("{:?}", config.guardrails.evaluation),
        "logging.level" => config.logging.level.clone(),
        "logging.format" => format!("{:?}", config.logging.format),
        _ => "<unknown>".to_string(),
    }
}

fn detect_config_path() -> Option<PathBuf> {
    ["haven.toml", "config/haven.toml"].into_iter().map(PathBuf::from).find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if config_file_doc.is_some_and(|doc| contains_path(doc, key_path)) {
        let file_path = config_file_path
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "config file".to_string());
        return format!("file ({file_path})");
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::contains_path;

    #[test]
    fn nested_keys_are_found_in_file_document() {
        let doc: toml::Value =
            "[guardrails]\nevaluation = \"exhaustive\"\n".parse().unwrap_or(toml::Value::Boolean(false));

        assert!(contains_path(&doc, "guardrails.evaluation"));
        assert!(!contains_path(&doc, "guardrails.mode"));
        assert!(!contains_path(&doc, "database.url"));
    }
}

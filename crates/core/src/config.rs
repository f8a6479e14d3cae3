use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::registry::TRIAGE_AGENT;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub registry: RegistryConfig,
    pub guardrails: GuardrailConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct RegistryConfig {
    /// Optional TOML agent table; the built-in housing authority desk is used when unset.
    pub path: Option<PathBuf>,
    pub triage_agent: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self { path: None, triage_agent: TRIAGE_AGENT.to_string() }
    }
}

#[derive(Clone, Debug)]
pub struct GuardrailConfig {
    pub evaluation: GuardrailEvaluation,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// How the evaluator walks an agent's guardrails before the agent runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailEvaluation {
    /// Stop at the first tripped guardrail.
    ShortCircuit,
    /// Classify every guardrail, then report the first tripped one.
    Exhaustive,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub registry_path: Option<PathBuf>,
    pub guardrail_evaluation: Option<GuardrailEvaluation>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://haven.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            registry: RegistryConfig::default(),
            guardrails: GuardrailConfig { evaluation: GuardrailEvaluation::ShortCircuit },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for GuardrailEvaluation {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "short_circuit" => Ok(Self::ShortCircuit),
            "exhaustive" => Ok(Self::Exhaustive),
            other => Err(ConfigError::Validation(format!(
                "unsupported guardrail evaluation `{other}` (expected short_circuit|exhaustive)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("haven.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(registry) = patch.registry {
            if let Some(path) = registry.path {
                self.registry.path = Some(path);
            }
            if let Some(triage_agent) = registry.triage_agent {
                self.registry.triage_agent = triage_agent;
            }
        }

        if let Some(guardrails) = patch.guardrails {
            if let Some(evaluation) = guardrails.evaluation {
                self.guardrails.evaluation = evaluation;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("HAVEN_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("HAVEN_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("HAVEN_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("HAVEN_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("HAVEN_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("HAVEN_REGISTRY_PATH") {
            self.registry.path = Some(PathBuf::from(value));
        }
        if let Some(value) = read_env("HAVEN_REGISTRY_TRIAGE_AGENT") {
            self.registry.triage_agent = value;
        }

        if let Some(value) = read_env("HAVEN_GUARDRAILS_EVALUATION") {
            self.guardrails.evaluation = value.parse()?;
        }

        let log_level = read_env("HAVEN_LOGGING_LEVEL").or_else(|| read_env("HAVEN_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format = read_env("HAVEN_LOGGING_FORMAT").or_else(|| read_env("HAVEN_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(registry_path) = overrides.registry_path {
            self.registry.path = Some(registry_path);
        }
        if let Some(evaluation) = overrides.guardrail_evaluation {
            self.guardrails.evaluation = evaluation;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_registry(&self.registry)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("haven.toml"), PathBuf::from("config/haven.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '$' || !matches!(chars.peek(), Some('{')) {
            output.push(ch);
            continue;
        }

        chars.next();
        let mut key = String::new();
        loop {
            match chars.next() {
                Some('}') => break,
                Some(next) => key.push(next),
                None => return Err(ConfigError::UnterminatedInterpolation),
            }
        }

        let value =
            env::var(&key).map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
        output.push_str(&value);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_registry(registry: &RegistryConfig) -> Result<(), ConfigError> {
    if registry.triage_agent.trim().is_empty() {
        return Err(ConfigError::Validation(
            "registry.triage_agent must name the entry-point agent".to_string(),
        ));
    }

    if let Some(path) = &registry.path {
        if !path.exists() {
            return Err(ConfigError::Validation(format!(
                "registry.path `{}` does not exist",
                path.display()
            )));
        }
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    registry: Option<RegistryPatch>,
    guardrails: Option<GuardrailPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RegistryPatch {
    path: Option<PathBuf>,
    triage_agent: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct GuardrailPatch {
    evaluation: Option<GuardrailEvaluation>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use tempfile::TempDir;

    use super::{
        AppConfig, ConfigError, ConfigOverrides, GuardrailEvaluation, LoadOptions, LogFormat,
    };

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_are_valid() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(config.registry.triage_agent == "Triage Agent", "triage is the default entry")?;
        ensure(config.registry.path.is_none(), "built-in registry is the default")?;
        ensure(
            config.guardrails.evaluation == GuardrailEvaluation::ShortCircuit,
            "guardrails short-circuit by default",
        )?;
        ensure(matches!(config.logging.format, LogFormat::Compact), "compact logs by default")
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_HAVEN_DB_FILE", "from-env.db");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("haven.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://${TEST_HAVEN_DB_FILE}"

[guardrails]
evaluation = "exhaustive"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-env.db",
                "database url should be interpolated from environment",
            )?;
            ensure(
                config.guardrails.evaluation == GuardrailEvaluation::Exhaustive,
                "evaluation mode should come from the file",
            )
        })();

        clear_vars(&["TEST_HAVEN_DB_FILE"]);
        result
    }

    #[test]
    fn missing_interpolation_variable_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
        let path = dir.path().join("haven.toml");
        fs::write(&path, "[database]\nurl = \"${HAVEN_TEST_UNSET_VARIABLE}\"\n")
            .map_err(|err| err.to_string())?;

        let error =
            AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() });
        ensure(
            matches!(error, Err(ConfigError::MissingEnvInterpolation { ref var }) if var == "HAVEN_TEST_UNSET_VARIABLE"),
            "unset interpolation variable should be named in the error",
        )
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("HAVEN_LOG_LEVEL", "warn");
        env::set_var("HAVEN_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )
        })();

        clear_vars(&["HAVEN_LOG_LEVEL", "HAVEN_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("HAVEN_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("HAVEN_GUARDRAILS_EVALUATION", "short-circuit");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("haven.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"
max_connections = 3

[guardrails]
evaluation = "exhaustive"

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.database.max_connections == 3, "file value should beat defaults")?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(
                config.guardrails.evaluation == GuardrailEvaluation::ShortCircuit,
                "env evaluation mode should win over file",
            )
        })();

        clear_vars(&["HAVEN_DATABASE_URL", "HAVEN_GUARDRAILS_EVALUATION"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("HAVEN_DATABASE_URL", "postgres://localhost/haven");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            ensure(
                matches!(error, ConfigError::Validation(ref message) if message.contains("database.url")),
                "validation failure should mention database.url",
            )
        })();

        clear_vars(&["HAVEN_DATABASE_URL"]);
        result
    }

    #[test]
    fn missing_registry_file_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("HAVEN_REGISTRY_PATH", "/nonexistent/haven-agents.toml");

        let result = (|| -> Result<(), String> {
            let error = AppConfig::load(LoadOptions::default());
            ensure(
                matches!(error, Err(ConfigError::Validation(ref message)) if message.contains("registry.path")),
                "validation failure should mention registry.path",
            )
        })();

        clear_vars(&["HAVEN_REGISTRY_PATH"]);
        result
    }

    #[test]
    fn invalid_numeric_env_override_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("HAVEN_DATABASE_MAX_CONNECTIONS", "many");

        let result = (|| -> Result<(), String> {
            let error = AppConfig::load(LoadOptions::default());
            ensure(
                matches!(error, Err(ConfigError::InvalidEnvOverride { ref key, .. }) if key == "HAVEN_DATABASE_MAX_CONNECTIONS"),
                "invalid override should name the variable",
            )
        })();

        clear_vars(&["HAVEN_DATABASE_MAX_CONNECTIONS"]);
        result
    }
}

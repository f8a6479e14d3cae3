use std::sync::Arc;
use std::time::Instant;

use haven_agent::{
    GuardrailEvaluator, HeuristicClassifier, RunItem, ScriptedAgentRunner, ScriptedRun,
    TurnOrchestrator, TurnRequest,
};
use haven_core::config::{AppConfig, GuardrailEvaluation, LoadOptions};
use haven_core::registry::AgentRegistry;
use haven_db::{connect_with_config, migrations, DbPool, SqlConversationStore};
use serde::Serialize;

use crate::commands::{command_runtime, CommandResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
enum SmokeStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
struct SmokeCheck {
    name: &'static str,
    status: SmokeStatus,
    elapsed_ms: u64,
    message: String,
}

impl SmokeCheck {
    fn timed(name: &'static str, started: Instant, outcome: Result<String, String>) -> Self {
        let (status, message) = match outcome {
            Ok(message) => (SmokeStatus::Pass, message),
            Err(message) => (SmokeStatus::Fail, message),
        };
        Self { name, status, elapsed_ms: elapsed_ms(started), message }
    }

    fn skipped(name: &'static str) -> Self {
        Self {
            name,
            status: SmokeStatus::Skipped,
            elapsed_ms: 0,
            message: "skipped due previous failure".to_string(),
        }
    }

    fn passed(&self) -> bool {
        self.status == SmokeStatus::Pass
    }
}

#[derive(Debug, Serialize)]
struct SmokeReport {
    command: &'static str,
    status: SmokeStatus,
    summary: String,
    total_elapsed_ms: u64,
    checks: Vec<SmokeCheck>,
}

const LATER_CHECKS: [&str; 4] =
    ["agent_registry", "db_connectivity", "migration_visibility", "turn_round_trip"];

pub fn run() -> CommandResult {
    let started = Instant::now();
    let mut checks = Vec::new();

    let step = Instant::now();
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(SmokeCheck::timed(
                "config_validation",
                step,
                Ok("configuration loaded and validated".to_string()),
            ));
            config
        }
        Err(error) => {
            checks.push(SmokeCheck::timed("config_validation", step, Err(error.to_string())));
            checks.extend(LATER_CHECKS.iter().copied().map(SmokeCheck::skipped));
            return finalize_report(checks, started);
        }
    };

    let step = Instant::now();
    let registry = match AgentRegistry::from_config(&config.registry) {
        Ok(registry) => {
            let message = format!("{} agents loaded", registry.list_all().len());
            checks.push(SmokeCheck::timed("agent_registry", step, Ok(message)));
            registry
        }
        Err(error) => {
            checks.push(SmokeCheck::timed("agent_registry", step, Err(error.to_string())));
            checks.extend(LATER_CHECKS[1..].iter().copied().map(SmokeCheck::skipped));
            return finalize_report(checks, started);
        }
    };

    match command_runtime() {
        Ok(runtime) => runtime.block_on(database_checks(&config, registry, &mut checks)),
        Err(error) => {
            checks.push(SmokeCheck::timed(
                "db_connectivity",
                Instant::now(),
                Err(format!("failed to initialize async runtime: {error}")),
            ));
            checks.extend(LATER_CHECKS[2..].iter().copied().map(SmokeCheck::skipped));
        }
    }

    finalize_report(checks, started)
}

async fn database_checks(config: &AppConfig, registry: AgentRegistry, checks: &mut Vec<SmokeCheck>) {
    let step = Instant::now();
    let pool = match connect_with_config(&config.database).await {
        Ok(pool) => {
            let message = format!("connected using `{}`", config.database.url);
            checks.push(SmokeCheck::timed("db_connectivity", step, Ok(message)));
            pool
        }
        Err(error) => {
            let message = format!("failed to connect: {error}");
            checks.push(SmokeCheck::timed("db_connectivity", step, Err(message)));
            checks.extend(LATER_CHECKS[2..].iter().copied().map(SmokeCheck::skipped));
            return;
        }
    };

    let step = Instant::now();
    let migrated = migrations::run_pending(&pool)
        .await
        .map(|()| "migrations are visible and executable".to_string())
        .map_err(|error| format!("migration execution failed: {error}"));
    let migrated_ok = migrated.is_ok();
    checks.push(SmokeCheck::timed("migration_visibility", step, migrated));

    if migrated_ok {
        let step = Instant::now();
        let outcome = scripted_turn(pool.clone(), registry, config.guardrails.evaluation).await;
        checks.push(SmokeCheck::timed("turn_round_trip", step, outcome));
    } else {
        checks.push(SmokeCheck::skipped("turn_round_trip"));
    }

    pool.close().await;
}

/// Greets the entry-point agent through the full orchestrator and SQL store with a
/// scripted agent standing in for the model.
async fn scripted_turn(
    pool: DbPool,
    registry: AgentRegistry,
    evaluation: GuardrailEvaluation,
) -> Result<String, String> {
    let classifier =
        HeuristicClassifier::new().map_err(|error| format!("guardrail classifier: {error}"))?;
    let greeting = format!("Hello from the {}.", registry.triage().name);
    let runner = ScriptedAgentRunner::new([ScriptedRun::items(vec![RunItem::message(greeting)])]);
    let orchestrator = TurnOrchestrator::new(
        Arc::new(registry),
        Arc::new(SqlConversationStore::new(pool)),
        Arc::new(runner),
        GuardrailEvaluator::new(Arc::new(classifier), evaluation),
    );

    let result = orchestrator
        .process_turn(TurnRequest::new(None, "Hello"))
        .await
        .map_err(|error| format!("turn failed: {error}"))?;
    if result.messages.len() != 1 {
        return Err(format!("expected one reply, got {}", result.messages.len()));
    }

    Ok(format!("conversation {} answered by {}", result.conversation_id, result.current_agent))
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn finalize_report(checks: Vec<SmokeCheck>, started: Instant) -> CommandResult {
    let total_elapsed_ms = elapsed_ms(started);
    let passed = checks.iter().filter(|check| check.passed()).count();
    let total = checks.len();
    let failed = checks.iter().any(|check| check.status == SmokeStatus::Fail);

    let report = SmokeReport {
        command: "smoke",
        status: if failed { SmokeStatus::Fail } else { SmokeStatus::Pass },
        summary: format!("smoke: {passed}/{total} checks passed in {total_elapsed_ms}ms"),
        total_elapsed_ms,
        checks,
    };

    let human = report.summary.clone();
    let machine = serde_json::to_string(&report).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"smoke\",\"status\":\"fail\",\"summary\":\"serialization failed\",\"error\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    });

    CommandResult { exit_code: if failed { 6 } else { 0 }, output: format!("{human}\n{machine}") }
}

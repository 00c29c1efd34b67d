use std::path::Path;
use std::sync::Arc;

use parley_agent::outbound::{outbound_channel, ExecutionMode, ExecutionReport, RequestExecutor};
use parley_agent::session::AgentSession;
use parley_core::config::{AppConfig, LoadOptions};
use parley_core::{ApplicationError, DomainError, InterfaceError, UserId};
use parley_platform::client::{ClientCall, RecordingClient};
use parley_platform::replay::ReplayTransport;
use parley_platform::runner::{NotificationRunner, ReconnectPolicy, RunnerStats};
use parley_platform::wire::WireDecoder;

use crate::commands::CommandResult;

const COMMAND: &str = "replay";

struct ReplayOutcome {
    stats: RunnerStats,
    report: ExecutionReport,
    calls: Vec<ClientCall>,
}

pub fn run(path: &Path, agent_id: &str) -> CommandResult {
    let config = match AppConfig::load(LoadOptions { offline: true, ..LoadOptions::default() }) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    if agent_id.trim().is_empty() {
        let error = DomainError::InvalidIdentifier("agent id must not be empty".to_string());
        return failure(error.into(), 4);
    }
    if !path.is_file() {
        let message = format!("notification log `{}` does not exist", path.display());
        return failure(ApplicationError::InvalidInput(message), 4);
    }

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                COMMAND,
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let outcome = runtime.block_on(replay(&config, path, UserId::new(agent_id.trim())));

    let mut lines = Vec::with_capacity(outcome.calls.len());
    for call in &outcome.calls {
        match serde_json::to_string(call) {
            Ok(line) => lines.push(line),
            Err(error) => {
                let message = format!("could not serialize platform request: {error}");
                return failure(ApplicationError::Internal(message), 5);
            }
        }
    }

    let stats = &outcome.stats;
    let message = format!(
        "replayed {} frames ({} dispatched, {} rejected, {} records skipped); \
         executed {} platform requests ({} failed)",
        stats.frames_received,
        stats.notifications_dispatched,
        stats.frames_rejected,
        stats.records_skipped,
        outcome.report.executed,
        outcome.report.failed,
    );
    CommandResult::success(COMMAND, message).with_preamble(lines)
}

async fn replay(config: &AppConfig, path: &Path, agent_id: UserId) -> ReplayOutcome {
    let (queue, receiver) = outbound_channel();
    let session = AgentSession::with_echo_policy(&config.agent, queue);
    let mut runner = NotificationRunner::new(
        Arc::new(ReplayTransport::new(path)),
        WireDecoder::new(agent_id),
        session.dispatcher,
        ReconnectPolicy { max_retries: 0, ..ReconnectPolicy::default() },
    );

    // The runner degrades gracefully on transport failure; stats carry the result.
    let _ = runner.start().await;
    let stats = runner.stats().clone();
    drop(runner);

    let client = Arc::new(RecordingClient::new());
    let report = RequestExecutor::new(client.clone(), config.agent.greeting_prefix.clone())
        .with_mode(ExecutionMode::Sequential)
        .run(receiver)
        .await;

    ReplayOutcome { stats, report, calls: client.calls().await }
}

fn failure(error: ApplicationError, exit_code: u8) -> CommandResult {
    let error = error.into_interface(COMMAND);
    let detail = match &error {
        InterfaceError::BadRequest { message, .. }
        | InterfaceError::ServiceUnavailable { message, .. }
        | InterfaceError::Internal { message, .. } => message,
    };
    CommandResult::failure(
        COMMAND,
        error.error_class(),
        format!("{} ({detail})", error.user_message()),
        exit_code,
    )
}

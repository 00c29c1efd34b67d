mod bootstrap;

use anyhow::Result;
use parley_core::config::{AppConfig, LoadOptions};

use crate::bootstrap::Application;

fn init_logging(config: &AppConfig) {
    use parley_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Logging depends on the loaded config, so load it first.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let Application { config, registry, mut runner, executor, outbound, mut failures } =
        bootstrap::bootstrap_with_config(config)?;

    let executor_task = tokio::spawn(executor.run(outbound));
    let failure_task = tokio::spawn(async move {
        while let Some(failure) = failures.recv().await {
            tracing::error!(
                event_name = "system.server.request_failed",
                request = failure.request.name(),
                operation = ?failure.error.operation(),
                error = %failure.error,
                "platform request failed"
            );
        }
    });

    tracing::info!(
        event_name = "system.server.transport_mode",
        transport_mode = "noop",
        correlation_id = "bootstrap",
        csds_domain = %config.platform.csds_domain,
        "platform transport mode initialized"
    );
    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        "parley-server started"
    );
    runner.start().await?;
    tracing::info!(
        event_name = "system.server.transport_closed",
        correlation_id = "bootstrap",
        frames_received = runner.stats().frames_received,
        "platform notification stream ended; waiting for shutdown signal"
    );
    wait_for_shutdown().await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        open_conversations = registry.len(),
        "parley-server stopping"
    );

    // Dropping the runner releases the last queue handle so the executor drains and exits.
    drop(runner);
    let report = executor_task.await?;
    failure_task.await?;
    tracing::info!(
        event_name = "system.server.stopped",
        correlation_id = "shutdown",
        executed = report.executed,
        failed = report.failed,
        "outbound requests drained"
    );

    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}

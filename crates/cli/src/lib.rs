pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "parley",
    about = "Parley messaging agent operator CLI",
    long_about = "Inspect agent configuration and replay recorded platform notification logs \
                  through a full agent session without connecting to the platform.",
    after_help = "Examples:\n  parley config\n  parley replay notifications.jsonl --agent-id 1234.agent"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(
        about = "Feed a JSON-lines notification log through an agent session and print the \
                 platform requests it issues"
    )]
    Replay {
        #[arg(help = "Path to the notification log, one JSON frame per line")]
        path: PathBuf,
        #[arg(long, help = "Platform user id of the agent the log was recorded for")]
        agent_id: String,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    init_diagnostics();

    let result = match cli.command {
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Replay { path, agent_id } => commands::replay::run(&path, &agent_id),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

/// Diagnostics go to stderr so stdout stays machine-readable.
fn init_diagnostics() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}

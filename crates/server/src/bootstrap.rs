use std::sync::Arc;

use parley_agent::outbound::{
    outbound_channel, OutboundReceiver, RequestExecutor, RequestFailure,
};
use parley_agent::registry::RegistryReader;
use parley_agent::session::AgentSession;
use parley_core::config::{AppConfig, ConfigError, LoadOptions, PlatformConfig};
use parley_core::UserId;
use parley_platform::client::{MessagingClient, NoopMessagingClient};
use parley_platform::runner::{NoopTransport, NotificationRunner, ReconnectPolicy};
use parley_platform::wire::WireDecoder;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub registry: RegistryReader,
    pub runner: NotificationRunner,
    pub executor: RequestExecutor,
    pub outbound: OutboundReceiver,
    pub failures: mpsc::UnboundedReceiver<RequestFailure>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config)
}

pub fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    let agent_id = agent_identity(&config.platform);
    let (queue, outbound) = outbound_channel();
    let session = AgentSession::with_echo_policy(&config.agent, queue);
    info!(
        event_name = "system.bootstrap.session_ready",
        correlation_id = "bootstrap",
        agent_id = %agent_id,
        "agent session wired"
    );

    let runner = NotificationRunner::new(
        Arc::new(NoopTransport),
        WireDecoder::new(agent_id),
        session.dispatcher,
        ReconnectPolicy::from(&config.runner),
    );

    let client: Arc<dyn MessagingClient> = Arc::new(NoopMessagingClient);
    let (failures_tx, failures) = mpsc::unbounded_channel();
    let executor = RequestExecutor::new(client, config.agent.greeting_prefix.clone())
        .with_failure_channel(failures_tx);

    Ok(Application { config, registry: session.registry, runner, executor, outbound, failures })
}

/// Platform user id used to recognise this agent in participant lists and
/// message authorship.
fn agent_identity(platform: &PlatformConfig) -> UserId {
    UserId::new(format!("{}.{}", platform.account_id, platform.username))
}

#[cfg(test)]
mod tests {
    use parley_agent::outbound::OutboundRequest;
    use parley_core::config::{ConfigOverrides, LoadOptions};
    use parley_core::AgentAvailability;

    use crate::bootstrap::bootstrap;

    fn valid_options() -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                account_id: Some("1234567".to_string()),
                username: Some("echo-bot".to_string()),
                password: Some("hunter2-secret".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[test]
    fn bootstrap_fails_fast_without_platform_credentials() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                account_id: Some("1234567".to_string()),
                password: Some("hunter2-secret".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        });

        assert!(result.is_err());
        let message = result.err().expect("error").to_string();
        assert!(message.contains("platform.username"), "unexpected error: {message}");
    }

    #[test]
    fn bootstrapped_session_goes_online_on_connect() {
        let mut app = bootstrap(valid_options()).expect("bootstrap should succeed");

        app.runner.process_frame(r#"{"kind":"connected"}"#);

        let requests = app.outbound.try_drain();
        assert_eq!(requests.len(), 3);
        assert_eq!(
            requests[0],
            OutboundRequest::SetAgentState { availability: AgentAvailability::Online }
        );
        assert!(app.registry.is_empty());
    }

    #[test]
    fn bootstrapped_session_recognises_its_own_assignment() {
        let mut app = bootstrap(valid_options()).expect("bootstrap should succeed");

        app.runner.process_frame(
            r#"{"kind":"notification","type":"cqm.ExConversationChangeNotification","body":
               {"changes":[{"type":"UPSERT","result":{"convId":"C1","conversationDetails":
               {"participants":[{"id":"1234567.echo-bot","role":"ASSIGNED_AGENT"}]}}}]}}"#,
        );

        assert_eq!(app.registry.len(), 1);
        assert_eq!(app.config.platform.account_id, "1234567");
    }
}

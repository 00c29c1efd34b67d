use parley_core::{config::AgentConfig, AgentAvailability};
use parley_platform::client::ConversationFilter;
use parley_platform::events::{
    EventDispatcher, EventHandlerError, HandlerResult, Notification, NotificationEnvelope,
    NotificationHandler, NotificationKind,
};
use tracing::info;

use crate::lifecycle::ConversationLifecycleHandler;
use crate::outbound::{OutboundQueue, OutboundRequest};
use crate::reconciliation::MessageReconciliationEngine;
use crate::registry::{ConversationRegistry, RegistryReader};
use crate::reply::{EchoReplyPolicy, ReplyPolicy};
use crate::rings::RingAcceptanceHandler;

/// Brings the agent online once the platform session is established.
pub struct ConnectionHandler {
    outbound: OutboundQueue,
}

impl ConnectionHandler {
    pub fn new(outbound: OutboundQueue) -> Self {
        Self { outbound }
    }
}

impl NotificationHandler for ConnectionHandler {
    fn kind(&self) -> NotificationKind {
        NotificationKind::Connected
    }

    fn handle(
        &mut self,
        envelope: &NotificationEnvelope,
    ) -> Result<HandlerResult, EventHandlerError> {
        if envelope.notification != Notification::Connected {
            return Ok(HandlerResult::Ignored);
        }

        info!(
            event_name = "agent.session.connected",
            correlation_id = %envelope.correlation_id,
            "platform session connected; going online"
        );
        let requests = [
            OutboundRequest::SetAgentState { availability: AgentAvailability::Online },
            OutboundRequest::SubscribeConversations { filter: ConversationFilter::open_only() },
            OutboundRequest::SubscribeRoutingTasks,
        ];
        let scheduled = requests.len();
        for request in requests {
            self.outbound.schedule(request)?;
        }
        Ok(HandlerResult::Processed { scheduled })
    }
}

/// One agent session: a fresh registry shared by the lifecycle handler
/// (writer) and the reconciliation engine (reader), plus the dispatcher that
/// routes notifications to every handler.
///
/// The registry lives exactly as long as the dispatcher holding its owner.
pub struct AgentSession {
    pub dispatcher: EventDispatcher,
    pub registry: RegistryReader,
}

impl AgentSession {
    pub fn new<P>(policy: P, outbound: OutboundQueue) -> Self
    where
        P: ReplyPolicy + 'static,
    {
        let registry = ConversationRegistry::new();
        let reader = registry.reader();

        let mut dispatcher = EventDispatcher::new();
        dispatcher.register(ConnectionHandler::new(outbound.clone()));
        dispatcher.register(RingAcceptanceHandler::new(outbound.clone()));
        dispatcher.register(MessageReconciliationEngine::new(
            reader.clone(),
            policy,
            outbound.clone(),
        ));
        dispatcher.register(ConversationLifecycleHandler::new(registry, outbound));

        Self { dispatcher, registry: reader }
    }

    pub fn with_echo_policy(config: &AgentConfig, outbound: OutboundQueue) -> Self {
        Self::new(EchoReplyPolicy::from(config), outbound)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parley_core::{
        config::AppConfig, AgentAvailability, ConversationId, ConversationState, RingId,
        RingState, Sequence, UserId,
    };
    use parley_platform::client::{ClientCall, ConversationFilter, RecordingClient};
    use parley_platform::events::MessagingEvent;
    use parley_platform::runner::{NoopTransport, NotificationRunner, ReconnectPolicy};
    use parley_platform::wire::WireDecoder;
    use serde_json::json;

    use super::AgentSession;
    use crate::outbound::{outbound_channel, ExecutionMode, RequestExecutor};

    const AGENT: &str = "1234.agent";

    fn conversation_frame(conversation: &str, agent_role: &str) -> String {
        json!({
            "kind": "notification",
            "type": "cqm.ExConversationChangeNotification",
            "body": {"changes": [
                {"type": "UPSERT", "result": {"convId": conversation, "conversationDetails": {
                    "participants": [
                        {"id": AGENT, "role": agent_role},
                        {"id": "U1", "role": "CONSUMER"}
                    ]
                }}}
            ]}
        })
        .to_string()
    }

    fn messaging_frame(conversation: &str, changes: serde_json::Value) -> String {
        json!({
            "kind": "notification",
            "type": "ms.MessagingEventNotification",
            "body": {"dialogId": conversation, "changes": changes}
        })
        .to_string()
    }

    #[test]
    fn session_registers_one_handler_per_notification_kind() {
        let (queue, _receiver) = outbound_channel();
        let session = AgentSession::with_echo_policy(&AppConfig::default().agent, queue);

        assert_eq!(session.dispatcher.handler_count(), 4);
        assert!(session.registry.is_empty());
    }

    #[tokio::test]
    async fn notification_stream_drives_expected_platform_requests() {
        let config = AppConfig::default().agent;
        let (queue, receiver) = outbound_channel();
        let session = AgentSession::with_echo_policy(&config, queue);
        let registry = session.registry.clone();
        let mut runner = NotificationRunner::new(
            Arc::new(NoopTransport),
            WireDecoder::new(UserId::new(AGENT)),
            session.dispatcher,
            ReconnectPolicy::default(),
        );

        let frames = [
            r#"{"kind":"connected"}"#.to_owned(),
            json!({
                "kind": "notification",
                "type": "routing.RoutingTaskNotification",
                "body": {"changes": [{"type": "UPSERT", "result": {"ringsDetails": [
                    {"ringId": "R1", "ringState": "WAITING"}
                ]}}]}
            })
            .to_string(),
            conversation_frame("C1", "ASSIGNED_AGENT"),
            messaging_frame(
                "C1",
                json!([
                    {"sequence": 1, "originatorId": "U1",
                     "event": {"type": "ContentEvent", "message": "hello"}},
                    {"sequence": 2, "originatorId": "U1",
                     "event": {"type": "ContentEvent", "message": "#close now"}},
                    {"sequence": 3, "originatorId": AGENT,
                     "event": {"type": "AcceptStatusEvent", "status": "READ", "sequenceList": [1]}}
                ]),
            ),
            conversation_frame("C1", "READER"),
            messaging_frame(
                "C1",
                json!([{"sequence": 4, "originatorId": "U1",
                        "event": {"type": "ContentEvent", "message": "anyone?"}}]),
            ),
        ];
        for frame in &frames {
            runner.process_frame(frame);
        }

        assert!(registry.is_empty());
        assert_eq!(runner.stats().notifications_dispatched, frames.len());
        drop(runner);

        let client = Arc::new(RecordingClient::new());
        let report = RequestExecutor::new(client.clone(), config.greeting_prefix.clone())
            .with_mode(ExecutionMode::Sequential)
            .run(receiver)
            .await;
        assert_eq!(report.failed, 0);

        let conversation = ConversationId::new("C1");
        assert_eq!(
            client.calls().await,
            vec![
                ClientCall::SetAgentState { availability: AgentAvailability::Online },
                ClientCall::SubscribeConversations { filter: ConversationFilter::open_only() },
                ClientCall::SubscribeRoutingTasks,
                ClientCall::UpdateRingState {
                    ring_id: RingId::new("R1"),
                    state: RingState::Accepted,
                },
                ClientCall::GetUserProfile { user_id: UserId::new("U1") },
                ClientCall::PublishEvent {
                    conversation_id: conversation.clone(),
                    event: MessagingEvent::text(
                        r#"Just joined to conversation with {"userId":"U1"}"#
                    ),
                },
                ClientCall::SubscribeMessagingEvents { conversation_id: conversation.clone() },
                ClientCall::PublishEvent {
                    conversation_id: conversation.clone(),
                    event: MessagingEvent::read(vec![Sequence(2)]),
                },
                ClientCall::UpdateConversationState {
                    conversation_id: conversation,
                    state: ConversationState::Close,
                },
            ]
        );
    }
}

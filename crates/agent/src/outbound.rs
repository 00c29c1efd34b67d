use std::sync::Arc;

use parley_core::{
    AgentAvailability, ConversationId, ConversationState, RingId, RingState, UserId,
};
use parley_platform::client::{ConversationFilter, MessagingClient, RequestError};
use parley_platform::events::{EventHandlerError, MessagingEvent};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// A request the agent wants performed against the platform. Handlers only
/// describe requests; the [`RequestExecutor`] performs them.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "request", rename_all = "snake_case")]
pub enum OutboundRequest {
    SetAgentState { availability: AgentAvailability },
    SubscribeConversations { filter: ConversationFilter },
    SubscribeRoutingTasks,
    SubscribeMessagingEvents { conversation_id: ConversationId },
    AcceptRing { ring_id: RingId },
    /// Look up the consumer's profile, then publish a greeting referencing it.
    Greet { conversation_id: ConversationId, consumer_id: UserId },
    PublishEvent { conversation_id: ConversationId, event: MessagingEvent },
    SetConversationState { conversation_id: ConversationId, state: ConversationState },
}

impl OutboundRequest {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SetAgentState { .. } => "set_agent_state",
            Self::SubscribeConversations { .. } => "subscribe_conversations",
            Self::SubscribeRoutingTasks => "subscribe_routing_tasks",
            Self::SubscribeMessagingEvents { .. } => "subscribe_messaging_events",
            Self::AcceptRing { .. } => "accept_ring",
            Self::Greet { .. } => "greet",
            Self::PublishEvent { .. } => "publish_event",
            Self::SetConversationState { .. } => "set_conversation_state",
        }
    }
}

#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("outbound request queue is closed")]
pub struct OutboundClosed;

impl From<OutboundClosed> for EventHandlerError {
    fn from(_: OutboundClosed) -> Self {
        EventHandlerError::OutboundClosed
    }
}

#[derive(Clone, Debug)]
pub struct OutboundQueue {
    tx: mpsc::UnboundedSender<OutboundRequest>,
}

impl OutboundQueue {
    pub fn schedule(&self, request: OutboundRequest) -> Result<(), OutboundClosed> {
        debug!(request = request.name(), "scheduling outbound request");
        self.tx.send(request).map_err(|_| OutboundClosed)
    }
}

/// Tallies the requests one notification batch schedules. A closed queue is
/// remembered, not returned, so every record in the batch is still applied.
#[derive(Debug, Default)]
pub struct BatchSchedule {
    scheduled: usize,
    closed: Option<OutboundClosed>,
}

impl BatchSchedule {
    pub fn push(&mut self, queue: &OutboundQueue, request: OutboundRequest) {
        match queue.schedule(request) {
            Ok(()) => self.scheduled += 1,
            Err(error) => {
                self.closed.get_or_insert(error);
            }
        }
    }

    /// Number of requests scheduled, or the first failure seen.
    pub fn finish(self) -> Result<usize, OutboundClosed> {
        match self.closed {
            Some(error) => Err(error),
            None => Ok(self.scheduled),
        }
    }
}

pub struct OutboundReceiver {
    rx: mpsc::UnboundedReceiver<OutboundRequest>,
}

impl OutboundReceiver {
    pub async fn recv(&mut self) -> Option<OutboundRequest> {
        self.rx.recv().await
    }

    /// Drains every request queued so far without waiting.
    pub fn try_drain(&mut self) -> Vec<OutboundRequest> {
        let mut requests = Vec::new();
        while let Ok(request) = self.rx.try_recv() {
            requests.push(request);
        }
        requests
    }
}

pub fn outbound_channel() -> (OutboundQueue, OutboundReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (OutboundQueue { tx }, OutboundReceiver { rx })
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestFailure {
    pub request: OutboundRequest,
    pub error: RequestError,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Every request runs as its own task; a slow request never delays the next.
    #[default]
    Concurrent,
    /// Requests complete in queue order. Used for replays and deterministic output.
    Sequential,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExecutionReport {
    pub executed: usize,
    pub failed: usize,
}

pub struct RequestExecutor {
    client: Arc<dyn MessagingClient>,
    greeting_prefix: Arc<str>,
    mode: ExecutionMode,
    failures: Option<mpsc::UnboundedSender<RequestFailure>>,
}

impl RequestExecutor {
    pub fn new(client: Arc<dyn MessagingClient>, greeting_prefix: impl Into<String>) -> Self {
        Self {
            client,
            greeting_prefix: Arc::from(greeting_prefix.into()),
            mode: ExecutionMode::default(),
            failures: None,
        }
    }

    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }

    /// Failed requests are forwarded here in addition to being logged.
    pub fn with_failure_channel(mut self, failures: mpsc::UnboundedSender<RequestFailure>) -> Self {
        self.failures = Some(failures);
        self
    }

    /// Runs until every queue handle is dropped and all in-flight requests finish.
    pub async fn run(self, mut receiver: OutboundReceiver) -> ExecutionReport {
        let mut report = ExecutionReport::default();
        let mut in_flight = JoinSet::new();

        while let Some(request) = receiver.recv().await {
            match self.mode {
                ExecutionMode::Sequential => {
                    let outcome =
                        execute(self.client.as_ref(), &self.greeting_prefix, &request).await;
                    self.record(&mut report, request, outcome);
                }
                ExecutionMode::Concurrent => {
                    let client = Arc::clone(&self.client);
                    let greeting_prefix = Arc::clone(&self.greeting_prefix);
                    in_flight.spawn(async move {
                        let outcome = execute(client.as_ref(), &greeting_prefix, &request).await;
                        (request, outcome)
                    });
                    while let Some(joined) = in_flight.try_join_next() {
                        self.record_joined(&mut report, joined);
                    }
                }
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            self.record_joined(&mut report, joined);
        }

        report
    }

    fn record_joined(
        &self,
        report: &mut ExecutionReport,
        joined: Result<(OutboundRequest, Result<(), RequestError>), tokio::task::JoinError>,
    ) {
        match joined {
            Ok((request, outcome)) => self.record(report, request, outcome),
            Err(error) => {
                report.executed += 1;
                report.failed += 1;
                warn!(error = %error, "outbound request task aborted");
            }
        }
    }

    fn record(
        &self,
        report: &mut ExecutionReport,
        request: OutboundRequest,
        outcome: Result<(), RequestError>,
    ) {
        report.executed += 1;
        let Err(error) = outcome else {
            return;
        };

        report.failed += 1;
        warn!(
            event_name = "egress.platform.request_failed",
            request = request.name(),
            error = %error,
            "outbound request failed; not retrying"
        );
        if let Some(failures) = &self.failures {
            // A dropped failure receiver only means nobody is listening.
            let _ = failures.send(RequestFailure { request, error });
        }
    }
}

async fn execute(
    client: &dyn MessagingClient,
    greeting_prefix: &str,
    request: &OutboundRequest,
) -> Result<(), RequestError> {
    match request {
        OutboundRequest::SetAgentState { availability } => {
            client.set_agent_state(*availability).await
        }
        OutboundRequest::SubscribeConversations { filter } => {
            client.subscribe_conversations(filter).await
        }
        OutboundRequest::SubscribeRoutingTasks => client.subscribe_routing_tasks().await,
        OutboundRequest::SubscribeMessagingEvents { conversation_id } => {
            client.subscribe_messaging_events(conversation_id).await
        }
        OutboundRequest::AcceptRing { ring_id } => {
            client.update_ring_state(ring_id, RingState::Accepted).await
        }
        OutboundRequest::Greet { conversation_id, consumer_id } => {
            // Registry membership is not re-checked here; the greeting goes out
            // even if the conversation was transferred while the lookup ran.
            let profile = client.get_user_profile(consumer_id).await?;
            let greeting = MessagingEvent::text(format!("{greeting_prefix}{profile}"));
            client.publish_event(conversation_id, &greeting).await
        }
        OutboundRequest::PublishEvent { conversation_id, event } => {
            client.publish_event(conversation_id, event).await
        }
        OutboundRequest::SetConversationState { conversation_id, state } => {
            client.update_conversation_state(conversation_id, *state).await
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parley_core::{ConversationId, ConversationState, RingId, RingState, Sequence, UserId};
    use parley_platform::client::{ClientCall, Operation, RecordingClient};
    use parley_platform::events::MessagingEvent;
    use tokio::sync::mpsc;

    use super::{
        outbound_channel, BatchSchedule, ExecutionMode, ExecutionReport, OutboundClosed,
        OutboundRequest, RequestExecutor,
    };

    #[test]
    fn batch_schedule_keeps_counting_after_the_queue_closes() {
        let (queue, mut receiver) = outbound_channel();
        let mut batch = BatchSchedule::default();
        batch.push(&queue, OutboundRequest::SubscribeRoutingTasks);
        assert_eq!(receiver.try_drain(), vec![OutboundRequest::SubscribeRoutingTasks]);

        drop(receiver);
        batch.push(&queue, OutboundRequest::SubscribeRoutingTasks);
        batch.push(&queue, OutboundRequest::SubscribeRoutingTasks);

        assert_eq!(batch.finish(), Err(OutboundClosed));

        let (queue, _receiver) = outbound_channel();
        let mut batch = BatchSchedule::default();
        batch.push(&queue, OutboundRequest::SubscribeRoutingTasks);
        assert_eq!(batch.finish(), Ok(1));
    }

    #[tokio::test]
    async fn greet_looks_up_profile_then_publishes_greeting() {
        let client = Arc::new(RecordingClient::new());
        let (queue, receiver) = outbound_channel();
        queue
            .schedule(OutboundRequest::Greet {
                conversation_id: ConversationId::new("C1"),
                consumer_id: UserId::new("U1"),
            })
            .expect("schedule");
        drop(queue);

        let report = RequestExecutor::new(client.clone(), "Just joined to conversation with ")
            .run(receiver)
            .await;

        assert_eq!(report, ExecutionReport { executed: 1, failed: 0 });
        assert_eq!(
            client.calls().await,
            vec![
                ClientCall::GetUserProfile { user_id: UserId::new("U1") },
                ClientCall::PublishEvent {
                    conversation_id: ConversationId::new("C1"),
                    event: MessagingEvent::text(
                        r#"Just joined to conversation with {"userId":"U1"}"#
                    ),
                },
            ]
        );
    }

    #[tokio::test]
    async fn failed_lookup_skips_greeting_and_reports_failure() {
        let client = Arc::new(RecordingClient::failing([Operation::GetUserProfile]));
        let (failures_tx, mut failures_rx) = mpsc::unbounded_channel();
        let (queue, receiver) = outbound_channel();
        queue
            .schedule(OutboundRequest::Greet {
                conversation_id: ConversationId::new("C1"),
                consumer_id: UserId::new("U1"),
            })
            .expect("schedule");
        queue
            .schedule(OutboundRequest::SubscribeMessagingEvents {
                conversation_id: ConversationId::new("C1"),
            })
            .expect("schedule");
        drop(queue);

        let report = RequestExecutor::new(client.clone(), "hi ")
            .with_mode(ExecutionMode::Sequential)
            .with_failure_channel(failures_tx)
            .run(receiver)
            .await;

        assert_eq!(report, ExecutionReport { executed: 2, failed: 1 });
        let failure = failures_rx.try_recv().expect("one failure reported");
        assert_eq!(failure.request.name(), "greet");
        assert_eq!(failure.error.operation(), Operation::GetUserProfile);
        assert!(failures_rx.try_recv().is_err());

        let calls = client.calls().await;
        assert!(!calls.iter().any(|call| matches!(call, ClientCall::PublishEvent { .. })));
        assert!(calls.contains(&ClientCall::SubscribeMessagingEvents {
            conversation_id: ConversationId::new("C1"),
        }));
    }

    #[tokio::test]
    async fn sequential_mode_preserves_queue_order() {
        let client = Arc::new(RecordingClient::new());
        let (queue, receiver) = outbound_channel();
        let conversation = ConversationId::new("C1");
        for request in [
            OutboundRequest::AcceptRing { ring_id: RingId::new("R1") },
            OutboundRequest::PublishEvent {
                conversation_id: conversation.clone(),
                event: MessagingEvent::read(vec![Sequence(4)]),
            },
            OutboundRequest::SetConversationState {
                conversation_id: conversation.clone(),
                state: ConversationState::Close,
            },
        ] {
            queue.schedule(request).expect("schedule");
        }
        drop(queue);

        RequestExecutor::new(client.clone(), "")
            .with_mode(ExecutionMode::Sequential)
            .run(receiver)
            .await;

        assert_eq!(
            client.calls().await,
            vec![
                ClientCall::UpdateRingState {
                    ring_id: RingId::new("R1"),
                    state: RingState::Accepted,
                },
                ClientCall::PublishEvent {
                    conversation_id: conversation.clone(),
                    event: MessagingEvent::read(vec![Sequence(4)]),
                },
                ClientCall::UpdateConversationState {
                    conversation_id: conversation,
                    state: ConversationState::Close,
                },
            ]
        );
    }

    #[tokio::test]
    async fn concurrent_mode_executes_everything_before_returning() {
        let client = Arc::new(RecordingClient::new());
        let (queue, receiver) = outbound_channel();
        for index in 0..5 {
            queue
                .schedule(OutboundRequest::AcceptRing { ring_id: RingId::new(format!("R{index}")) })
                .expect("schedule");
        }
        drop(queue);

        let report = RequestExecutor::new(client.clone(), "").run(receiver).await;

        assert_eq!(report.executed, 5);
        assert_eq!(client.calls().await.len(), 5);
    }

    #[test]
    fn scheduling_after_receiver_drop_reports_closed_queue() {
        let (queue, receiver) = outbound_channel();
        drop(receiver);

        let result = queue.schedule(OutboundRequest::SubscribeRoutingTasks);
        assert_eq!(result, Err(super::OutboundClosed));
    }
}

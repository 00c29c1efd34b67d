use std::{sync::Arc, time::Duration};

use anyhow::Result;
use async_trait::async_trait;
use parley_core::config::RunnerConfig;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::events::{EventDispatcher, HandlerResult, Notification, NotificationEnvelope};
use crate::wire::WireDecoder;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport read failed: {0}")]
    Receive(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 5, base_delay_ms: 250, max_delay_ms: 5_000 }
    }
}

impl From<&RunnerConfig> for ReconnectPolicy {
    fn from(config: &RunnerConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay_ms: config.base_delay_ms,
            max_delay_ms: config.max_delay_ms,
        }
    }
}

impl ReconnectPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

/// Source of raw notification frames. `Ok(None)` means the stream closed cleanly.
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    async fn next_frame(&self) -> Result<Option<String>, TransportError>;
    async fn disconnect(&self) -> Result<(), TransportError>;
}

#[derive(Default)]
pub struct NoopTransport;

#[async_trait]
impl NotificationTransport for NoopTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn next_frame(&self) -> Result<Option<String>, TransportError> {
        Ok(None)
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunnerStats {
    pub connections: usize,
    pub frames_received: usize,
    pub notifications_dispatched: usize,
    pub frames_rejected: usize,
    pub records_skipped: usize,
    pub dispatch_failures: usize,
}

pub struct NotificationRunner {
    transport: Arc<dyn NotificationTransport>,
    decoder: WireDecoder,
    dispatcher: EventDispatcher,
    reconnect_policy: ReconnectPolicy,
    stats: RunnerStats,
}

impl NotificationRunner {
    pub fn new(
        transport: Arc<dyn NotificationTransport>,
        decoder: WireDecoder,
        dispatcher: EventDispatcher,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        Self { transport, decoder, dispatcher, reconnect_policy, stats: RunnerStats::default() }
    }

    pub fn stats(&self) -> &RunnerStats {
        &self.stats
    }

    /// Pumps frames until the stream closes cleanly. `max_retries` bounds
    /// consecutive failures; a session that got connected resets the count.
    pub async fn start(&mut self) -> Result<()> {
        let mut attempt = 0;
        loop {
            let connections_before = self.stats.connections;
            let Err(transport_error) = self.connect_and_pump(attempt).await else {
                return Ok(());
            };
            if self.stats.connections > connections_before {
                attempt = 0;
            }

            warn!(
                attempt,
                max_retries = self.reconnect_policy.max_retries,
                error = %transport_error,
                "platform transport failed"
            );

            if attempt >= self.reconnect_policy.max_retries {
                warn!(
                    max_retries = self.reconnect_policy.max_retries,
                    "platform transport retries exhausted; continuing process without crash"
                );
                return Ok(());
            }

            let delay = self.reconnect_policy.backoff(attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            attempt += 1;
        }
    }

    async fn connect_and_pump(&mut self, attempt: u32) -> Result<(), TransportError> {
        info!(attempt, "opening platform transport connection");
        self.transport.connect().await?;
        self.stats.connections += 1;
        info!(attempt, "platform transport connected");

        loop {
            let Some(frame) = self.transport.next_frame().await? else {
                info!(attempt, "platform transport stream closed");
                self.transport.disconnect().await?;
                return Ok(());
            };
            self.stats.frames_received += 1;
            self.process_frame(&frame);
        }
    }

    /// Decodes and dispatches one frame to completion. Never fails: bad frames
    /// and handler errors are logged and counted so the stream keeps flowing.
    pub fn process_frame(&mut self, frame: &str) {
        let correlation_id = Uuid::new_v4().to_string();
        let decoded = match self.decoder.decode(frame) {
            Ok(decoded) => decoded,
            Err(error) => {
                self.stats.frames_rejected += 1;
                warn!(
                    event_name = "ingress.platform.frame_rejected",
                    correlation_id = %correlation_id,
                    error = %error,
                    "dropping undecodable platform frame"
                );
                return;
            }
        };

        if decoded.skipped_records > 0 {
            self.stats.records_skipped += decoded.skipped_records;
            warn!(
                event_name = "ingress.platform.records_skipped",
                correlation_id = %correlation_id,
                skipped = decoded.skipped_records,
                "skipped malformed change records"
            );
        }

        let envelope = NotificationEnvelope { correlation_id, notification: decoded.notification };
        info!(
            event_name = "ingress.platform.notification_received",
            correlation_id = %envelope.correlation_id,
            kind = ?envelope.notification.kind(),
            conversation_id = conversation_field(&envelope.notification).unwrap_or("unknown"),
            "received platform notification"
        );

        match self.dispatcher.dispatch(&envelope) {
            Ok(HandlerResult::Processed { scheduled }) => {
                self.stats.notifications_dispatched += 1;
                debug!(
                    event_name = "ingress.platform.notification_handled",
                    correlation_id = %envelope.correlation_id,
                    scheduled,
                    "notification handled"
                );
            }
            Ok(HandlerResult::Ignored) => {
                debug!(
                    correlation_id = %envelope.correlation_id,
                    kind = ?envelope.notification.kind(),
                    "no handler registered for notification"
                );
            }
            Err(error) => {
                self.stats.dispatch_failures += 1;
                warn!(
                    correlation_id = %envelope.correlation_id,
                    error = %error,
                    "notification dispatch failed; continuing notification loop"
                );
            }
        }
    }
}

fn conversation_field(notification: &Notification) -> Option<&str> {
    match notification {
        Notification::MessagingEvent(batch) => Some(batch.dialog_id.as_str()),
        Notification::ConversationChange(batch) if batch.changes.len() == 1 => {
            Some(batch.changes[0].conversation_id.as_str())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex as StdMutex};

    use async_trait::async_trait;
    use parley_core::UserId;
    use tokio::sync::Mutex;

    use super::{NotificationRunner, NotificationTransport, ReconnectPolicy, TransportError};
    use crate::events::{
        EventDispatcher, EventHandlerError, HandlerResult, NotificationEnvelope,
        NotificationHandler, NotificationKind,
    };
    use crate::wire::WireDecoder;

    #[derive(Default)]
    struct ScriptedTransport {
        state: Mutex<ScriptedState>,
    }

    #[derive(Default)]
    struct ScriptedState {
        connect_results: VecDeque<Result<(), TransportError>>,
        frames: VecDeque<Result<Option<String>, TransportError>>,
        connect_attempts: usize,
        disconnect_calls: usize,
    }

    impl ScriptedTransport {
        fn with_script(
            connect_results: Vec<Result<(), TransportError>>,
            frames: Vec<Result<Option<String>, TransportError>>,
        ) -> Self {
            Self {
                state: Mutex::new(ScriptedState {
                    connect_results: connect_results.into(),
                    frames: frames.into(),
                    connect_attempts: 0,
                    disconnect_calls: 0,
                }),
            }
        }

        async fn connect_attempts(&self) -> usize {
            self.state.lock().await.connect_attempts
        }

        async fn disconnect_calls(&self) -> usize {
            self.state.lock().await.disconnect_calls
        }
    }

    #[async_trait]
    impl NotificationTransport for ScriptedTransport {
        async fn connect(&self) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.connect_attempts += 1;
            state.connect_results.pop_front().unwrap_or(Ok(()))
        }

        async fn next_frame(&self) -> Result<Option<String>, TransportError> {
            let mut state = self.state.lock().await;
            state.frames.pop_front().unwrap_or(Ok(None))
        }

        async fn disconnect(&self) -> Result<(), TransportError> {
            let mut state = self.state.lock().await;
            state.disconnect_calls += 1;
            Ok(())
        }
    }

    struct ConnectedCounter {
        seen: Arc<StdMutex<usize>>,
        fail: bool,
    }

    impl NotificationHandler for ConnectedCounter {
        fn kind(&self) -> NotificationKind {
            NotificationKind::Connected
        }

        fn handle(
            &mut self,
            _envelope: &NotificationEnvelope,
        ) -> Result<HandlerResult, EventHandlerError> {
            *self.seen.lock().expect("counter lock") += 1;
            if self.fail {
                return Err(EventHandlerError::OutboundClosed);
            }
            Ok(HandlerResult::Processed { scheduled: 0 })
        }
    }

    fn decoder() -> WireDecoder {
        WireDecoder::new(UserId::new("1234.agent"))
    }

    fn dispatcher_with_counter(fail: bool) -> (EventDispatcher, Arc<StdMutex<usize>>) {
        let seen = Arc::new(StdMutex::new(0));
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register(ConnectedCounter { seen: seen.clone(), fail });
        (dispatcher, seen)
    }

    #[tokio::test]
    async fn reconnects_after_initial_connect_failure() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Err(TransportError::Connect("network down".to_owned())), Ok(())],
            vec![Ok(Some(r#"{"kind":"connected"}"#.to_owned())), Ok(None)],
        ));
        let (dispatcher, seen) = dispatcher_with_counter(false);

        let mut runner = NotificationRunner::new(
            transport.clone(),
            decoder(),
            dispatcher,
            ReconnectPolicy { max_retries: 2, base_delay_ms: 0, max_delay_ms: 0 },
        );

        runner.start().await.expect("runner should not fail");

        assert_eq!(transport.connect_attempts().await, 2);
        assert_eq!(transport.disconnect_calls().await, 1);
        assert_eq!(*seen.lock().expect("counter lock"), 1);
        assert_eq!(runner.stats().notifications_dispatched, 1);
    }

    #[tokio::test]
    async fn exhausts_retries_without_crashing() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![
                Err(TransportError::Connect("fail-1".to_owned())),
                Err(TransportError::Connect("fail-2".to_owned())),
                Err(TransportError::Connect("fail-3".to_owned())),
            ],
            vec![],
        ));

        let mut runner = NotificationRunner::new(
            transport.clone(),
            decoder(),
            EventDispatcher::default(),
            ReconnectPolicy { max_retries: 2, base_delay_ms: 0, max_delay_ms: 0 },
        );

        runner.start().await.expect("runner should degrade gracefully");
        assert_eq!(transport.connect_attempts().await, 3);
    }

    #[tokio::test]
    async fn successful_session_resets_the_retry_budget() {
        type Frame = Result<Option<String>, TransportError>;
        let connected = || -> Frame { Ok(Some(r#"{"kind":"connected"}"#.to_owned())) };
        let dropped = || -> Frame { Err(TransportError::Receive("connection reset".to_owned())) };
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![],
            vec![connected(), dropped(), connected(), dropped(), connected(), Ok(None)],
        ));
        let (dispatcher, seen) = dispatcher_with_counter(false);

        let mut runner = NotificationRunner::new(
            transport.clone(),
            decoder(),
            dispatcher,
            ReconnectPolicy { max_retries: 1, base_delay_ms: 0, max_delay_ms: 0 },
        );

        runner.start().await.expect("runner should not fail");

        assert_eq!(transport.connect_attempts().await, 3);
        assert_eq!(runner.stats().connections, 3);
        assert_eq!(*seen.lock().expect("counter lock"), 3);
    }

    #[tokio::test]
    async fn bad_frames_and_handler_errors_do_not_stop_the_loop() {
        let transport = Arc::new(ScriptedTransport::with_script(
            vec![Ok(())],
            vec![
                Ok(Some("{not json".to_owned())),
                Ok(Some(r#"{"kind":"connected"}"#.to_owned())),
                Ok(Some(r#"{"kind":"connected"}"#.to_owned())),
                Ok(None),
            ],
        ));
        let (dispatcher, seen) = dispatcher_with_counter(true);

        let mut runner = NotificationRunner::new(
            transport.clone(),
            decoder(),
            dispatcher,
            ReconnectPolicy { max_retries: 0, base_delay_ms: 0, max_delay_ms: 0 },
        );

        runner.start().await.expect("runner should not fail");

        assert_eq!(*seen.lock().expect("counter lock"), 2);
        assert_eq!(runner.stats().frames_received, 3);
        assert_eq!(runner.stats().frames_rejected, 1);
        assert_eq!(runner.stats().dispatch_failures, 2);
    }

    #[test]
    fn backoff_is_capped_by_max_delay() {
        let policy = ReconnectPolicy { max_retries: 10, base_delay_ms: 250, max_delay_ms: 1_000 };
        assert_eq!(policy.backoff(0).as_millis(), 250);
        assert_eq!(policy.backoff(1).as_millis(), 500);
        assert_eq!(policy.backoff(5).as_millis(), 1_000);
    }
}

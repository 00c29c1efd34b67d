use std::collections::HashMap;

use parley_core::{
    AcceptStatus, ConversationId, Participant, ParticipantRole, RingDetail, Sequence, UserId,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NotificationEnvelope {
    pub correlation_id: String,
    pub notification: Notification,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notification {
    Connected,
    RoutingTask(RoutingTaskNotification),
    ConversationChange(ConversationChangeNotification),
    MessagingEvent(MessagingEventNotification),
    Unsupported { notification_type: String },
}

impl Notification {
    pub fn kind(&self) -> NotificationKind {
        match self {
            Self::Connected => NotificationKind::Connected,
            Self::RoutingTask(_) => NotificationKind::RoutingTask,
            Self::ConversationChange(_) => NotificationKind::ConversationChange,
            Self::MessagingEvent(_) => NotificationKind::MessagingEvent,
            Self::Unsupported { .. } => NotificationKind::Unsupported,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    Connected,
    RoutingTask,
    ConversationChange,
    MessagingEvent,
    Unsupported,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    Upsert,
    Delete,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RoutingTaskNotification {
    pub changes: Vec<RoutingTaskChange>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoutingTaskChange {
    pub change_type: ChangeType,
    pub rings: Vec<RingDetail>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConversationChangeNotification {
    pub changes: Vec<ConversationChange>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationChange {
    pub change_type: ChangeType,
    pub conversation_id: ConversationId,
    /// This agent's role in the conversation; `None` when it is not a participant.
    pub my_role: Option<ParticipantRole>,
    pub participants: Vec<Participant>,
}

impl ConversationChange {
    pub fn is_assigned_to_me(&self) -> bool {
        matches!(self.my_role, Some(ParticipantRole::AssignedAgent))
    }

    pub fn consumer_id(&self) -> Option<&UserId> {
        self.participants
            .iter()
            .find(|participant| participant.role == ParticipantRole::Consumer)
            .map(|participant| &participant.id)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessagingEventNotification {
    pub dialog_id: ConversationId,
    pub changes: Vec<MessagingEventChange>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessagingEventChange {
    pub dialog_id: ConversationId,
    pub sequence: Sequence,
    pub event: MessagingEvent,
    pub authored_by_me: bool,
}

/// Conversation event payloads, both observed and published.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MessagingEvent {
    #[serde(rename = "ContentEvent")]
    Content(ContentEvent),
    #[serde(rename = "AcceptStatusEvent")]
    AcceptStatus(AcceptStatusEvent),
    #[serde(other)]
    Other,
}

impl MessagingEvent {
    pub fn text(message: impl Into<String>) -> Self {
        Self::Content(ContentEvent {
            content_type: "text/plain".to_owned(),
            message: message.into(),
        })
    }

    pub fn read(sequences: Vec<Sequence>) -> Self {
        Self::AcceptStatus(AcceptStatusEvent {
            status: AcceptStatus::Read,
            sequence_list: sequences,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentEvent {
    #[serde(default = "default_content_type")]
    pub content_type: String,
    pub message: String,
}

fn default_content_type() -> String {
    "text/plain".to_owned()
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptStatusEvent {
    pub status: AcceptStatus,
    #[serde(default)]
    pub sequence_list: Vec<Sequence>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    /// The batch was handled and `scheduled` outbound requests were queued.
    Processed { scheduled: usize },
    Ignored,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventHandlerError {
    #[error("outbound request queue is closed")]
    OutboundClosed,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Handler(#[from] EventHandlerError),
}

/// Handlers run to completion over a whole batch; they schedule outbound work
/// but never wait on it.
pub trait NotificationHandler: Send {
    fn kind(&self) -> NotificationKind;
    fn handle(
        &mut self,
        envelope: &NotificationEnvelope,
    ) -> Result<HandlerResult, EventHandlerError>;
}

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<NotificationKind, Box<dyn NotificationHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<H>(&mut self, handler: H)
    where
        H: NotificationHandler + 'static,
    {
        self.handlers.insert(handler.kind(), Box::new(handler));
    }

    pub fn dispatch(
        &mut self,
        envelope: &NotificationEnvelope,
    ) -> Result<HandlerResult, DispatchError> {
        let Some(handler) = self.handlers.get_mut(&envelope.notification.kind()) else {
            return Ok(HandlerResult::Ignored);
        };

        handler.handle(envelope).map_err(DispatchError::from)
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }
}

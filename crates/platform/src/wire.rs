//! Decoding of raw platform frames into typed notifications.
//!
//! Decoding is per record: a change that does not match the expected shape is
//! skipped and counted, the rest of the batch is kept.

use parley_core::{
    ConversationId, Participant, ParticipantRole, RingDetail, Sequence, UserId,
};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::events::{
    ChangeType, ConversationChange, ConversationChangeNotification, MessagingEvent,
    MessagingEventChange, MessagingEventNotification, Notification, RoutingTaskChange,
    RoutingTaskNotification,
};

pub const ROUTING_TASK_NOTIFICATION: &str = "routing.RoutingTaskNotification";
pub const CONVERSATION_CHANGE_NOTIFICATION: &str = "cqm.ExConversationChangeNotification";
pub const MESSAGING_EVENT_NOTIFICATION: &str = "ms.MessagingEventNotification";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame is not valid JSON: {0}")]
    InvalidJson(String),
    #[error("frame is missing `{0}`")]
    MissingField(&'static str),
    #[error("`{notification_type}` body is malformed: {message}")]
    MalformedBody { notification_type: String, message: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedFrame {
    pub notification: Notification,
    /// Change records dropped because they did not match the expected shape.
    pub skipped_records: usize,
}

/// Decodes frames relative to the logged-in agent, which determines `myRole`
/// and `authoredByMe` when the platform leaves them implicit.
#[derive(Clone, Debug)]
pub struct WireDecoder {
    agent_id: UserId,
}

impl WireDecoder {
    pub fn new(agent_id: UserId) -> Self {
        Self { agent_id }
    }

    pub fn agent_id(&self) -> &UserId {
        &self.agent_id
    }

    pub fn decode(&self, raw: &str) -> Result<DecodedFrame, DecodeError> {
        let frame: Value =
            serde_json::from_str(raw).map_err(|error| DecodeError::InvalidJson(error.to_string()))?;
        let kind =
            frame.get("kind").and_then(Value::as_str).ok_or(DecodeError::MissingField("kind"))?;

        if kind == "connected" {
            return Ok(DecodedFrame { notification: Notification::Connected, skipped_records: 0 });
        }
        if kind != "notification" {
            return Ok(DecodedFrame {
                notification: Notification::Unsupported { notification_type: kind.to_owned() },
                skipped_records: 0,
            });
        }

        let notification_type =
            frame.get("type").and_then(Value::as_str).ok_or(DecodeError::MissingField("type"))?;
        let body = frame.get("body").ok_or(DecodeError::MissingField("body"))?;

        match notification_type {
            ROUTING_TASK_NOTIFICATION => Ok(self.decode_routing(body)),
            CONVERSATION_CHANGE_NOTIFICATION => Ok(self.decode_conversations(body)),
            MESSAGING_EVENT_NOTIFICATION => self.decode_messaging(body),
            other => Ok(DecodedFrame {
                notification: Notification::Unsupported { notification_type: other.to_owned() },
                skipped_records: 0,
            }),
        }
    }

    fn decode_routing(&self, body: &Value) -> DecodedFrame {
        let mut skipped_records = 0;
        let mut changes = Vec::new();

        for raw in change_records(body) {
            let Ok(change) = RawRoutingChange::deserialize(raw) else {
                debug!(record = %raw, "skipping malformed routing task change");
                skipped_records += 1;
                continue;
            };

            let mut rings = Vec::new();
            for ring in change.result.map(|result| result.rings_details).unwrap_or_default() {
                match RingDetail::deserialize(&ring) {
                    Ok(detail) => rings.push(detail),
                    Err(_) => {
                        debug!(record = %ring, "skipping malformed ring detail");
                        skipped_records += 1;
                    }
                }
            }

            changes.push(RoutingTaskChange { change_type: change.change_type, rings });
        }

        DecodedFrame {
            notification: Notification::RoutingTask(RoutingTaskNotification { changes }),
            skipped_records,
        }
    }

    fn decode_conversations(&self, body: &Value) -> DecodedFrame {
        let mut skipped_records = 0;
        let mut changes = Vec::new();

        for raw in change_records(body) {
            let Ok(change) = RawConversationChange::deserialize(raw) else {
                debug!(record = %raw, "skipping malformed conversation change");
                skipped_records += 1;
                continue;
            };

            let details = change.result.conversation_details.unwrap_or_default();
            let participants: Vec<Participant> = details
                .participants
                .iter()
                .filter_map(|participant| Participant::deserialize(participant).ok())
                .collect();
            let my_role = details.my_role.or_else(|| {
                participants
                    .iter()
                    .find(|participant| participant.id == self.agent_id)
                    .map(|participant| participant.role.clone())
            });

            changes.push(ConversationChange {
                change_type: change.change_type,
                conversation_id: change.result.conv_id,
                my_role,
                participants,
            });
        }

        DecodedFrame {
            notification: Notification::ConversationChange(ConversationChangeNotification {
                changes,
            }),
            skipped_records,
        }
    }

    fn decode_messaging(&self, body: &Value) -> Result<DecodedFrame, DecodeError> {
        let batch_dialog_id =
            body.get("dialogId").and_then(Value::as_str).map(ConversationId::new);
        let mut skipped_records = 0;
        let mut changes = Vec::new();

        for raw in change_records(body) {
            let Ok(change) = RawMessagingChange::deserialize(raw) else {
                debug!(record = %raw, "skipping malformed messaging event");
                skipped_records += 1;
                continue;
            };
            let Some(dialog_id) = change.dialog_id.or_else(|| batch_dialog_id.clone()) else {
                debug!(record = %raw, "skipping messaging event without dialog id");
                skipped_records += 1;
                continue;
            };
            let Ok(event) = MessagingEvent::deserialize(&change.event) else {
                debug!(record = %raw, "skipping messaging event with malformed payload");
                skipped_records += 1;
                continue;
            };

            let authored_by_me = change.authored_by_me.unwrap_or_else(|| {
                change.originator_id.as_ref().is_some_and(|originator| *originator == self.agent_id)
            });

            changes.push(MessagingEventChange {
                dialog_id,
                sequence: change.sequence,
                event,
                authored_by_me,
            });
        }

        let dialog_id = match batch_dialog_id {
            Some(dialog_id) => dialog_id,
            None => changes.first().map(|change| change.dialog_id.clone()).ok_or_else(|| {
                DecodeError::MalformedBody {
                    notification_type: MESSAGING_EVENT_NOTIFICATION.to_owned(),
                    message: "no dialogId on batch or any change".to_owned(),
                }
            })?,
        };

        Ok(DecodedFrame {
            notification: Notification::MessagingEvent(MessagingEventNotification {
                dialog_id,
                changes,
            }),
            skipped_records,
        })
    }
}

fn change_records(body: &Value) -> &[Value] {
    body.get("changes").and_then(Value::as_array).map(Vec::as_slice).unwrap_or_default()
}

#[derive(Deserialize)]
struct RawRoutingChange {
    #[serde(rename = "type")]
    change_type: ChangeType,
    result: Option<RawRoutingResult>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRoutingResult {
    #[serde(default)]
    rings_details: Vec<Value>,
}

#[derive(Deserialize)]
struct RawConversationChange {
    #[serde(rename = "type")]
    change_type: ChangeType,
    result: RawConversationResult,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConversationResult {
    conv_id: ConversationId,
    conversation_details: Option<RawConversationDetails>,
}

#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConversationDetails {
    my_role: Option<ParticipantRole>,
    #[serde(default)]
    participants: Vec<Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMessagingChange {
    dialog_id: Option<ConversationId>,
    sequence: Sequence,
    event: Value,
    originator_id: Option<UserId>,
    authored_by_me: Option<bool>,
}

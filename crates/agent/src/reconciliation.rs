use indexmap::IndexMap;
use parley_core::{ConversationId, ConversationState, Sequence};
use parley_platform::events::{
    EventHandlerError, HandlerResult, MessagingEvent, MessagingEventChange,
    MessagingEventNotification, Notification, NotificationEnvelope, NotificationHandler,
    NotificationKind,
};
use tracing::{debug, info};

use crate::outbound::{BatchSchedule, OutboundClosed, OutboundQueue, OutboundRequest};
use crate::registry::RegistryReader;
use crate::reply::{PendingReply, ReplyAction, ReplyPolicy};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PendingKey {
    pub conversation_id: ConversationId,
    pub sequence: Sequence,
}

/// Unread consumer messages seen within one batch, kept in insertion order.
/// Overwriting keeps the original position; a key removed and inserted again
/// moves to the end.
type PendingReplies = IndexMap<PendingKey, String>;

/// Marks unread consumer messages as read and answers them through a
/// [`ReplyPolicy`].
///
/// Each batch is scanned fully before anything is sent, so a message the
/// agent already acknowledged later in the same batch is neither re-acked
/// nor answered. Records for conversations outside the registry are dropped
/// at scan time; registry changes after that do not recall scheduled work.
pub struct MessageReconciliationEngine<P> {
    registry: RegistryReader,
    policy: P,
    outbound: OutboundQueue,
}

impl<P: ReplyPolicy> MessageReconciliationEngine<P> {
    pub fn new(registry: RegistryReader, policy: P, outbound: OutboundQueue) -> Self {
        Self { registry, policy, outbound }
    }

    /// Returns the number of outbound requests scheduled.
    pub fn on_messaging_event(
        &mut self,
        batch: &MessagingEventNotification,
    ) -> Result<usize, OutboundClosed> {
        let mut pending = PendingReplies::default();

        for change in &batch.changes {
            if !self.registry.contains(&change.dialog_id) {
                debug!(
                    conversation_id = %change.dialog_id,
                    sequence = %change.sequence,
                    "ignoring messaging event for conversation not owned by agent"
                );
                continue;
            }
            classify(&mut pending, change);
        }

        let mut schedule = BatchSchedule::default();
        for (key, message) in pending {
            let reply = PendingReply {
                conversation_id: key.conversation_id,
                sequence: key.sequence,
                message,
            };
            for request in self.requests_for_unread(reply) {
                schedule.push(&self.outbound, request);
            }
        }
        schedule.finish()
    }

    fn requests_for_unread(&self, reply: PendingReply) -> Vec<OutboundRequest> {
        info!(
            event_name = "agent.message.unread",
            conversation_id = %reply.conversation_id,
            sequence = %reply.sequence,
            "acknowledging unread consumer message"
        );
        let mut requests = vec![OutboundRequest::PublishEvent {
            conversation_id: reply.conversation_id.clone(),
            event: MessagingEvent::read(vec![reply.sequence]),
        }];
        if let Some(action) = self.policy.decide(&reply) {
            requests.push(reply_request(reply.conversation_id, action));
        }
        requests
    }
}

fn classify(pending: &mut PendingReplies, change: &MessagingEventChange) {
    match &change.event {
        MessagingEvent::Content(content) if !change.authored_by_me => {
            let key =
                PendingKey { conversation_id: change.dialog_id.clone(), sequence: change.sequence };
            pending.insert(key, content.message.clone());
        }
        MessagingEvent::AcceptStatus(status) if change.authored_by_me => {
            for sequence in &status.sequence_list {
                pending.shift_remove(&PendingKey {
                    conversation_id: change.dialog_id.clone(),
                    sequence: *sequence,
                });
            }
        }
        _ => {}
    }
}

fn reply_request(conversation_id: ConversationId, action: ReplyAction) -> OutboundRequest {
    match action {
        ReplyAction::Close => OutboundRequest::SetConversationState {
            conversation_id,
            state: ConversationState::Close,
        },
        ReplyAction::Echo(message) => OutboundRequest::PublishEvent {
            conversation_id,
            event: MessagingEvent::text(message),
        },
    }
}

impl<P: ReplyPolicy + 'static> NotificationHandler for MessageReconciliationEngine<P> {
    fn kind(&self) -> NotificationKind {
        NotificationKind::MessagingEvent
    }

    fn handle(
        &mut self,
        envelope: &NotificationEnvelope,
    ) -> Result<HandlerResult, EventHandlerError> {
        let Notification::MessagingEvent(batch) = &envelope.notification else {
            return Ok(HandlerResult::Ignored);
        };

        let scheduled = self.on_messaging_event(batch)?;
        Ok(HandlerResult::Processed { scheduled })
    }
}

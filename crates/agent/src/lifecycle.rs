use parley_platform::events::{
    ChangeType, ConversationChange, ConversationChangeNotification, EventHandlerError,
    HandlerResult, Notification, NotificationEnvelope, NotificationHandler, NotificationKind,
};
use tracing::{info, warn};

use crate::outbound::{BatchSchedule, OutboundClosed, OutboundQueue, OutboundRequest};
use crate::registry::{ConversationRegistry, RegistryReader};

/// Sole writer of the [`ConversationRegistry`]. Admits conversations newly
/// assigned to this agent and evicts them on transfer or close.
pub struct ConversationLifecycleHandler {
    registry: ConversationRegistry,
    outbound: OutboundQueue,
}

impl ConversationLifecycleHandler {
    pub fn new(registry: ConversationRegistry, outbound: OutboundQueue) -> Self {
        Self { registry, outbound }
    }

    pub fn registry(&self) -> RegistryReader {
        self.registry.reader()
    }

    /// Applies each change in batch order. Returns the number of outbound
    /// requests scheduled. A closed queue does not stop later changes from
    /// updating the registry.
    pub fn on_conversation_change(
        &mut self,
        batch: &ConversationChangeNotification,
    ) -> Result<usize, OutboundClosed> {
        let mut schedule = BatchSchedule::default();
        for change in &batch.changes {
            match change.change_type {
                ChangeType::Upsert => self.apply_upsert(change, &mut schedule),
                ChangeType::Delete => {
                    if self.registry.remove(&change.conversation_id) {
                        info!(
                            event_name = "agent.conversation.closed",
                            conversation_id = %change.conversation_id,
                            "conversation closed; released"
                        );
                    }
                }
            }
        }
        schedule.finish()
    }

    fn apply_upsert(&mut self, change: &ConversationChange, schedule: &mut BatchSchedule) {
        let conversation_id = &change.conversation_id;
        let owned = self.registry.contains(conversation_id);
        let assigned = change.is_assigned_to_me();

        if owned && !assigned {
            self.registry.remove(conversation_id);
            info!(
                event_name = "agent.conversation.transferred",
                conversation_id = %conversation_id,
                my_role = ?change.my_role,
                "conversation transferred away; released"
            );
            return;
        }

        if owned || !assigned {
            return;
        }

        self.registry.add(conversation_id.clone());
        info!(
            event_name = "agent.conversation.assigned",
            conversation_id = %conversation_id,
            "conversation assigned to agent"
        );

        match change.consumer_id() {
            Some(consumer_id) => schedule.push(
                &self.outbound,
                OutboundRequest::Greet {
                    conversation_id: conversation_id.clone(),
                    consumer_id: consumer_id.clone(),
                },
            ),
            None => warn!(
                conversation_id = %conversation_id,
                "assigned conversation has no consumer participant; skipping greeting"
            ),
        }

        schedule.push(
            &self.outbound,
            OutboundRequest::SubscribeMessagingEvents { conversation_id: conversation_id.clone() },
        );
    }
}

impl NotificationHandler for ConversationLifecycleHandler {
    fn kind(&self) -> NotificationKind {
        NotificationKind::ConversationChange
    }

    fn handle(
        &mut self,
        envelope: &NotificationEnvelope,
    ) -> Result<HandlerResult, EventHandlerError> {
        let Notification::ConversationChange(batch) = &envelope.notification else {
            return Ok(HandlerResult::Ignored);
        };

        let scheduled = self.on_conversation_change(batch)?;
        Ok(HandlerResult::Processed { scheduled })
    }
}

use parley_core::RingState;
use parley_platform::events::{
    ChangeType, EventHandlerError, HandlerResult, Notification, NotificationEnvelope,
    NotificationHandler, NotificationKind, RoutingTaskNotification,
};
use tracing::info;

use crate::outbound::{BatchSchedule, OutboundClosed, OutboundQueue, OutboundRequest};

/// Accepts every ring offered in the waiting state. There is no admission
/// control and no registry check.
pub struct RingAcceptanceHandler {
    outbound: OutboundQueue,
}

impl RingAcceptanceHandler {
    pub fn new(outbound: OutboundQueue) -> Self {
        Self { outbound }
    }

    /// Returns the number of accept requests scheduled.
    pub fn on_routing_task_change(
        &mut self,
        batch: &RoutingTaskNotification,
    ) -> Result<usize, OutboundClosed> {
        let mut schedule = BatchSchedule::default();
        let upserts =
            batch.changes.iter().filter(|change| change.change_type == ChangeType::Upsert);
        for change in upserts {
            for ring in change.rings.iter().filter(|ring| ring.ring_state == RingState::Waiting) {
                info!(
                    event_name = "agent.ring.accepting",
                    ring_id = %ring.ring_id,
                    "accepting waiting ring"
                );
                let ring_id = ring.ring_id.clone();
                schedule.push(&self.outbound, OutboundRequest::AcceptRing { ring_id });
            }
        }
        schedule.finish()
    }
}

impl NotificationHandler for RingAcceptanceHandler {
    fn kind(&self) -> NotificationKind {
        NotificationKind::RoutingTask
    }

    fn handle(
        &mut self,
        envelope: &NotificationEnvelope,
    ) -> Result<HandlerResult, EventHandlerError> {
        let Notification::RoutingTask(batch) = &envelope.notification else {
            return Ok(HandlerResult::Ignored);
        };

        let scheduled = self.on_routing_task_change(batch)?;
        Ok(HandlerResult::Processed { scheduled })
    }
}

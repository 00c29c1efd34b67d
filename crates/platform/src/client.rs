use std::collections::HashSet;

use async_trait::async_trait;
use parley_core::{AgentAvailability, ConversationId, ConversationState, RingId, RingState, UserId};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::events::MessagingEvent;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    SetAgentState,
    SubscribeConversations,
    SubscribeRoutingTasks,
    SubscribeMessagingEvents,
    UpdateRingState,
    GetUserProfile,
    PublishEvent,
    UpdateConversationState,
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("{operation:?} rejected by platform ({code}): {message}")]
    Rejected { operation: Operation, code: u16, message: String },
    #[error("{operation:?} transport failure: {message}")]
    Transport { operation: Operation, message: String },
}

impl RequestError {
    pub fn operation(&self) -> Operation {
        match self {
            Self::Rejected { operation, .. } | Self::Transport { operation, .. } => *operation,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationFilter {
    pub conv_state: Vec<ConversationState>,
}

impl ConversationFilter {
    pub fn open_only() -> Self {
        Self { conv_state: vec![ConversationState::Open] }
    }
}

/// Request surface of a connected messaging platform session.
#[async_trait]
pub trait MessagingClient: Send + Sync {
    async fn set_agent_state(&self, availability: AgentAvailability) -> Result<(), RequestError>;
    async fn subscribe_conversations(&self, filter: &ConversationFilter)
        -> Result<(), RequestError>;
    async fn subscribe_routing_tasks(&self) -> Result<(), RequestError>;
    async fn subscribe_messaging_events(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<(), RequestError>;
    async fn update_ring_state(&self, ring_id: &RingId, state: RingState)
        -> Result<(), RequestError>;
    async fn get_user_profile(&self, user_id: &UserId) -> Result<Value, RequestError>;
    async fn publish_event(
        &self,
        conversation_id: &ConversationId,
        event: &MessagingEvent,
    ) -> Result<(), RequestError>;
    async fn update_conversation_state(
        &self,
        conversation_id: &ConversationId,
        state: ConversationState,
    ) -> Result<(), RequestError>;
}

#[derive(Default)]
pub struct NoopMessagingClient;

#[async_trait]
impl MessagingClient for NoopMessagingClient {
    async fn set_agent_state(&self, availability: AgentAvailability) -> Result<(), RequestError> {
        debug!(?availability, "noop client: set agent state");
        Ok(())
    }

    async fn subscribe_conversations(
        &self,
        _filter: &ConversationFilter,
    ) -> Result<(), RequestError> {
        Ok(())
    }

    async fn subscribe_routing_tasks(&self) -> Result<(), RequestError> {
        Ok(())
    }

    async fn subscribe_messaging_events(
        &self,
        _conversation_id: &ConversationId,
    ) -> Result<(), RequestError> {
        Ok(())
    }

    async fn update_ring_state(
        &self,
        _ring_id: &RingId,
        _state: RingState,
    ) -> Result<(), RequestError> {
        Ok(())
    }

    async fn get_user_profile(&self, _user_id: &UserId) -> Result<Value, RequestError> {
        Ok(Value::Null)
    }

    async fn publish_event(
        &self,
        _conversation_id: &ConversationId,
        _event: &MessagingEvent,
    ) -> Result<(), RequestError> {
        Ok(())
    }

    async fn update_conversation_state(
        &self,
        _conversation_id: &ConversationId,
        _state: ConversationState,
    ) -> Result<(), RequestError> {
        Ok(())
    }
}

/// One request as observed by a [`RecordingClient`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "request", rename_all = "snake_case")]
pub enum ClientCall {
    SetAgentState { availability: AgentAvailability },
    SubscribeConversations { filter: ConversationFilter },
    SubscribeRoutingTasks,
    SubscribeMessagingEvents { conversation_id: ConversationId },
    UpdateRingState { ring_id: RingId, state: RingState },
    GetUserProfile { user_id: UserId },
    PublishEvent { conversation_id: ConversationId, event: MessagingEvent },
    UpdateConversationState { conversation_id: ConversationId, state: ConversationState },
}

/// In-process client that records every request and answers profile lookups
/// with a synthetic profile. Operations listed in `failing` are rejected after
/// being recorded.
#[derive(Default)]
pub struct RecordingClient {
    calls: Mutex<Vec<ClientCall>>,
    failing: HashSet<Operation>,
}

impl RecordingClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(operations: impl IntoIterator<Item = Operation>) -> Self {
        Self { calls: Mutex::new(Vec::new()), failing: operations.into_iter().collect() }
    }

    pub async fn calls(&self) -> Vec<ClientCall> {
        self.calls.lock().await.clone()
    }

    async fn record(&self, operation: Operation, call: ClientCall) -> Result<(), RequestError> {
        self.calls.lock().await.push(call);
        if self.failing.contains(&operation) {
            return Err(RequestError::Rejected {
                operation,
                code: 500,
                message: "scripted failure".to_owned(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl MessagingClient for RecordingClient {
    async fn set_agent_state(&self, availability: AgentAvailability) -> Result<(), RequestError> {
        self.record(Operation::SetAgentState, ClientCall::SetAgentState { availability }).await
    }

    async fn subscribe_conversations(
        &self,
        filter: &ConversationFilter,
    ) -> Result<(), RequestError> {
        self.record(
            Operation::SubscribeConversations,
            ClientCall::SubscribeConversations { filter: filter.clone() },
        )
        .await
    }

    async fn subscribe_routing_tasks(&self) -> Result<(), RequestError> {
        self.record(Operation::SubscribeRoutingTasks, ClientCall::SubscribeRoutingTasks).await
    }

    async fn subscribe_messaging_events(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<(), RequestError> {
        self.record(
            Operation::SubscribeMessagingEvents,
            ClientCall::SubscribeMessagingEvents { conversation_id: conversation_id.clone() },
        )
        .await
    }

    async fn update_ring_state(
        &self,
        ring_id: &RingId,
        state: RingState,
    ) -> Result<(), RequestError> {
        self.record(
            Operation::UpdateRingState,
            ClientCall::UpdateRingState { ring_id: ring_id.clone(), state },
        )
        .await
    }

    async fn get_user_profile(&self, user_id: &UserId) -> Result<Value, RequestError> {
        self.record(
            Operation::GetUserProfile,
            ClientCall::GetUserProfile { user_id: user_id.clone() },
        )
        .await?;
        Ok(json!({ "userId": user_id.as_str() }))
    }

    async fn publish_event(
        &self,
        conversation_id: &ConversationId,
        event: &MessagingEvent,
    ) -> Result<(), RequestError> {
        self.record(
            Operation::PublishEvent,
            ClientCall::PublishEvent {
                conversation_id: conversation_id.clone(),
                event: event.clone(),
            },
        )
        .await
    }

    async fn update_conversation_state(
        &self,
        conversation_id: &ConversationId,
        state: ConversationState,
    ) -> Result<(), RequestError> {
        self.record(
            Operation::UpdateConversationState,
            ClientCall::UpdateConversationState {
                conversation_id: conversation_id.clone(),
                state,
            },
        )
        .await
    }
}

use parley_core::{config::AgentConfig, ConversationId, Sequence};

/// An inbound consumer message that survived reconciliation and still needs
/// a response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingReply {
    pub conversation_id: ConversationId,
    pub sequence: Sequence,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplyAction {
    Close,
    Echo(String),
}

/// Decides how to answer an unread message. Returning `None` sends nothing.
pub trait ReplyPolicy: Send {
    fn decide(&self, pending: &PendingReply) -> Option<ReplyAction>;
}

/// Closes the conversation when the message starts with the control token,
/// echoes it back with a prefix otherwise.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EchoReplyPolicy {
    close_token: String,
    echo_prefix: String,
}

impl EchoReplyPolicy {
    pub fn new(close_token: impl Into<String>, echo_prefix: impl Into<String>) -> Self {
        Self { close_token: close_token.into(), echo_prefix: echo_prefix.into() }
    }
}

impl Default for EchoReplyPolicy {
    fn default() -> Self {
        Self::new("#close", "echo : ")
    }
}

impl From<&AgentConfig> for EchoReplyPolicy {
    fn from(config: &AgentConfig) -> Self {
        Self::new(config.close_token.clone(), config.echo_prefix.clone())
    }
}

impl ReplyPolicy for EchoReplyPolicy {
    fn decide(&self, pending: &PendingReply) -> Option<ReplyAction> {
        if pending.message.starts_with(&self.close_token) {
            return Some(ReplyAction::Close);
        }
        Some(ReplyAction::Echo(format!("{}{}", self.echo_prefix, pending.message)))
    }
}

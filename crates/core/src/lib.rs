//! Parley Core - shared identifiers, configuration and error taxonomy
//!
//! Everything the platform adapter and the agent logic agree on lives here:
//! - **Domain** (`domain`) - conversation, participant, ring and sequence types
//! - **Config** (`config`) - layered `AppConfig` (defaults, file, env, overrides)
//! - **Errors** (`errors`) - application errors and their user-safe interface mapping

pub mod config;
pub mod domain;
pub mod errors;

pub use domain::conversation::{
    AcceptStatus, AgentAvailability, ConversationId, ConversationState, Participant,
    ParticipantRole, Sequence, UserId,
};
pub use domain::routing::{RingDetail, RingId, RingState};
pub use errors::{ApplicationError, DomainError, InterfaceError};

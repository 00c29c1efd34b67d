//! Agent Session - conversation ownership and message reconciliation
//!
//! This crate holds the agent's decision logic, driven entirely by platform
//! notifications:
//! 1. **Ring Acceptance** (`rings`) - accept every waiting ring
//! 2. **Conversation Lifecycle** (`lifecycle`) - track owned conversations in the `registry`,
//!    greet and subscribe on assignment, evict on transfer or close
//! 3. **Message Reconciliation** (`reconciliation`) - find unread consumer messages,
//!    mark them read and hand them to the `reply` policy
//! 4. **Outbound Execution** (`outbound`) - run queued requests against the platform client
//!
//! # Key Types
//!
//! - `AgentSession` - wires the handlers into a dispatcher around one registry (see `session`)
//! - `ReplyPolicy` - pluggable decision for each unread message
//! - `RequestExecutor` - fire-and-forget request runner with a failure channel
//!
//! # Scheduling
//!
//! Handlers never await. They run over a whole notification batch and push
//! `OutboundRequest`s onto a queue; the executor performs them later.

pub mod lifecycle;
pub mod outbound;
pub mod reconciliation;
pub mod registry;
pub mod reply;
pub mod rings;
pub mod session;

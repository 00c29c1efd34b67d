//! Messaging Platform Integration - notification intake and request surface
//!
//! This crate is the boundary between the agent logic and the messaging platform:
//! - **Events** (`events`) - typed notifications and the kind-keyed `EventDispatcher`
//! - **Wire** (`wire`) - best-effort decoding of raw platform frames
//! - **Client** (`client`) - the `MessagingClient` request seam plus in-process clients
//! - **Runner** (`runner`) - notification loop with reconnection logic
//! - **Replay** (`replay`) - JSON-lines transport for recorded notification logs
//!
//! # Architecture
//!
//! ```text
//! Transport frames → WireDecoder → NotificationRunner → EventDispatcher → Handlers
//!                                                                            ↓
//!                                                  MessagingClient ← outbound requests
//! ```

pub mod client;
pub mod events;
pub mod replay;
pub mod runner;
pub mod wire;

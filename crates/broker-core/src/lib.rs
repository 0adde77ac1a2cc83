// SPDX-License-Identifier: MIT
//!
//! The session broker's core: a durable, single-writer state machine per
//! session (`actor`), the wire-format-independent classifier that turns
//! raw agent-server events into ordered message parts (`normalizer`), the
//! throttled WebSocket fan-out (`broadcast`), and the durable key-value
//! abstraction actors hydrate from (`store`).

pub mod actor;
pub mod broadcast;
pub mod error;
pub mod model;
pub mod normalizer;
pub mod store;

pub use actor::{ActorHandle, SessionActor};
pub use broadcast::{Broadcaster, StreamingPayload, WsFrame};
pub use error::CoreError;
pub use model::{Message, MessagePart, Role, SessionState, SessionStateView, Status, ToolCall, ToolState};
pub use store::{FileSessionStore, SessionStore};

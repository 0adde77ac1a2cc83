// SPDX-License-Identifier: MIT
use thiserror::Error;

/// Error taxonomy surfaced by session-actor commands. DB and sandbox
/// connectivity failures that must never abort in-memory progress are
/// swallowed below this layer (see `broker-db::retry` and the actor's
/// recovery branches) and never become a `CoreError`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("a prompt is already in flight")]
    Busy,
    #[error("sandbox is starting")]
    NotReady,
    #[error("no running sandbox and no snapshot to resume")]
    NoSandbox,
    #[error("sandbox unreachable: {0}")]
    SandboxLost(String),
    #[error("sandbox error: {0}")]
    SandboxError(String),
    #[error("unknown session: {0}")]
    UnknownSession(String),
    #[error("durable store error: {0}")]
    Store(String),
}

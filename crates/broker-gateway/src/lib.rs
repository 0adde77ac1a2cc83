// SPDX-License-Identifier: MIT
//!
//! The routing shell: resolves a session id to its `SessionActor` instance,
//! authenticates every request against the database of record, applies a
//! per-user rate limit, and exposes the HTTP/WebSocket surface over
//! [`broker_core`]'s actor commands.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod rate_limit;
pub mod registry;
pub mod router;
pub mod ws;

pub use error::GatewayError;
pub use rate_limit::UserRateLimiter;
pub use registry::SessionRegistry;
pub use router::{build_router, AppState};

// SPDX-License-Identifier: MIT
//!
//! Typed client for the sandbox provider's lifecycle API and the agent
//! server's HTTP+SSE API running inside each sandbox.
//!
//! This crate knows nothing about sessions or message history; it only
//! wraps two external HTTP surfaces with timeouts and an error taxonomy
//! (see [`error::SandboxError`]) that the session actor uses to decide
//! retry/fallback behavior.

pub mod client;
pub mod error;
pub mod types;

pub use client::SandboxClient;
pub use error::SandboxError;

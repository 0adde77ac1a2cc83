// SPDX-License-Identifier: MIT
use thiserror::Error;

/// Failure taxonomy for sandbox-provider and agent-server calls.
///
/// `NetworkTimeout` and `Transient5xx` are retryable by the caller;
/// `Conflict` has a defined fallback in the session actor; the rest are
/// fatal for the operation that produced them.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("network timeout: {0}")]
    NetworkTimeout(String),
    #[error("transient server error ({status}): {body}")]
    Transient5xx { status: u16, body: String },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
}

impl SandboxError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SandboxError::NetworkTimeout(_) | SandboxError::Transient5xx { .. })
    }

    /// Classify a completed HTTP response (status known, body already read)
    /// into the failure taxonomy. `Ok` responses never reach this.
    pub fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        match status.as_u16() {
            401 | 403 => SandboxError::Unauthorized(body),
            404 => SandboxError::NotFound(body),
            409 => SandboxError::Conflict(body),
            400..=499 => SandboxError::BadRequest(body),
            s => SandboxError::Transient5xx { status: s, body },
        }
    }

    /// Classify a transport-level [`reqwest::Error`] (connection never
    /// produced a response).
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SandboxError::NetworkTimeout(err.to_string())
        } else if err.is_connect() {
            SandboxError::NetworkTimeout(err.to_string())
        } else {
            SandboxError::Transient5xx { status: 0, body: err.to_string() }
        }
    }
}

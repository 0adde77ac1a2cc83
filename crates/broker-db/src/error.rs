// SPDX-License-Identifier: MIT
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("network timeout: {0}")]
    NetworkTimeout(String),
    #[error("transient server error ({status}): {body}")]
    Transient5xx { status: u16, body: String },
    #[error("unauthorized")]
    Unauthorized,
    #[error("not found")]
    NotFound,
    #[error("bad request: {0}")]
    BadRequest(String),
}

impl DbError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, DbError::NetworkTimeout(_) | DbError::Transient5xx { .. })
    }

    pub fn from_status(status: reqwest::StatusCode, body: String) -> Self {
        match status.as_u16() {
            401 | 403 => DbError::Unauthorized,
            404 => DbError::NotFound,
            400..=499 => DbError::BadRequest(body),
            s => DbError::Transient5xx { status: s, body },
        }
    }

    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            DbError::NetworkTimeout(err.to_string())
        } else {
            DbError::Transient5xx { status: 0, body: err.to_string() }
        }
    }
}

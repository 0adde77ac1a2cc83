// SPDX-License-Identifier: MIT
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use broker_core::CoreError;
use serde_json::json;
use thiserror::Error;

/// Gateway-edge error taxonomy. A single `IntoResponse` impl maps every
/// kind onto its HTTP status in one place, the same "one table, one place"
/// idea `broker_core::normalizer` applies to its field-alias lookup.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("rate limited")]
    RateLimited { reset_at: i64 },
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("{0}")]
    Core(CoreError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<CoreError> for GatewayError {
    fn from(err: CoreError) -> Self {
        GatewayError::Core(err)
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            GatewayError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            GatewayError::Forbidden => (StatusCode::FORBIDDEN, "forbidden"),
            GatewayError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
            GatewayError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            GatewayError::Core(CoreError::Busy) => (StatusCode::BAD_REQUEST, "busy"),
            GatewayError::Core(CoreError::NotReady) => (StatusCode::BAD_REQUEST, "not_ready"),
            GatewayError::Core(CoreError::NoSandbox) => (StatusCode::BAD_REQUEST, "no_sandbox"),
            GatewayError::Core(CoreError::SandboxLost(_)) => {
                (StatusCode::BAD_REQUEST, "sandbox_lost")
            }
            GatewayError::Core(CoreError::SandboxError(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "sandbox_error")
            }
            GatewayError::Core(CoreError::UnknownSession(_))
            | GatewayError::Core(CoreError::Store(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            }
            GatewayError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };
        (status, Json(json!({ "error": code, "message": self.to_string() }))).into_response()
    }
}

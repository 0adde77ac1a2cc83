// SPDX-License-Identifier: MIT
//!
//! Bearer-token authentication middleware: validates the token against the
//! database of record on every request and applies the per-user rate
//! limit. Session-path/token mismatches are left to each handler (which
//! already extracts the path's `:id`), keeping this middleware ignorant of
//! route-specific shape.

use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::GatewayError;
use crate::rate_limit::RateLimitSnapshot;
use crate::router::AppState;

/// Identity resolved from a validated bearer token, attached to the
/// request as an extension for handlers to read.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: String,
    pub session_id: String,
    pub bearer: String,
}

pub fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    value.strip_prefix("Bearer ")
}

/// Validates the bearer token against the database of record and applies
/// the per-user rate-limit bucket. Rate-limit headers are attached to every
/// authenticated response, including the 429 itself.
pub async fn bearer_auth_mw(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let Some(token) = extract_bearer(req.headers()).map(str::to_string) else {
        return GatewayError::Unauthorized.into_response();
    };
    let Some(validation) = state.db.validate_token(&state.db_base_url, &token).await else {
        return GatewayError::Unauthorized.into_response();
    };

    let snapshot = state.rate_limiter.check_and_increment(&validation.user_id);
    if snapshot.limited {
        let mut resp = GatewayError::RateLimited { reset_at: snapshot.reset_at }.into_response();
        apply_rate_limit_headers(&mut resp, &snapshot);
        return resp;
    }

    req.extensions_mut().insert(AuthContext {
        user_id: validation.user_id,
        session_id: validation.session_id,
        bearer: token,
    });

    let mut resp = next.run(req).await;
    apply_rate_limit_headers(&mut resp, &snapshot);
    resp
}

fn apply_rate_limit_headers(resp: &mut Response, snapshot: &RateLimitSnapshot) {
    let headers = resp.headers_mut();
    if let Ok(v) = HeaderValue::from_str(&snapshot.limit.to_string()) {
        headers.insert("X-RateLimit-Limit", v);
    }
    if let Ok(v) = HeaderValue::from_str(&snapshot.remaining.to_string()) {
        headers.insert("X-RateLimit-Remaining", v);
    }
    if let Ok(v) = HeaderValue::from_str(&snapshot.reset_at.to_string()) {
        headers.insert("X-RateLimit-Reset", v);
    }
}

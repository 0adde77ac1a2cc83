// SPDX-License-Identifier: MIT
//!
//! WebSocket bridge for `/sessions/:id/ws`. A browser can't set an
//! `Authorization` header on a WebSocket upgrade, so the bearer token rides
//! in `Sec-WebSocket-Protocol` as `"bearer, <token>"` instead, and the
//! server echoes back only `"bearer"` once it's validated.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use broker_core::{ActorHandle, WsFrame};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::router::AppState;

const SUBPROTOCOL_HEADER: &str = "sec-websocket-protocol";

/// Parses `"bearer, <token>"` into the bare token. Any other shape is
/// rejected rather than guessed at.
fn extract_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(SUBPROTOCOL_HEADER)?.to_str().ok()?;
    let mut parts = raw.split(',').map(str::trim);
    if parts.next()? != "bearer" {
        return None;
    }
    let token = parts.next()?;
    if token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let Some(token) = extract_token(&headers) else {
        return (StatusCode::UPGRADE_REQUIRED, "missing bearer subprotocol").into_response();
    };
    let Some(validation) = state.db.validate_token(&state.db_base_url, &token).await else {
        return (StatusCode::UNAUTHORIZED, "invalid token").into_response();
    };
    if validation.session_id != id {
        return (StatusCode::FORBIDDEN, "session id mismatch").into_response();
    }

    let actor = state.registry.get_or_create(&id).await;
    let sandbox = state.sandbox.clone();
    ws.protocols(["bearer"]).on_upgrade(move |socket| handle_socket(socket, actor, sandbox))
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame {
    Prompt { text: String },
    Pause,
    Resume,
    Stop,
}

/// Bridges one attached browser socket to the session actor: client
/// commands go in via `ActorHandle`, broadcast frames come out via
/// `subscribe()`. Disconnecting this socket never cancels an in-flight
/// prompt — it only stops this one observer from receiving frames.
pub async fn handle_socket(mut socket: WebSocket, actor: ActorHandle, sandbox: broker_sandbox::SandboxClient) {
    let mut events = actor.subscribe();

    // Attach sends the current state immediately, without routing the
    // read through the actor's mailbox.
    let initial = actor.get_state().await;
    if send_frame(&mut socket, &WsFrame::State(initial.clone())).await.is_err() {
        return;
    }

    // Best-effort, non-blocking health probe on attach; purely observational.
    if let Some(url) = initial.sandbox_url.clone() {
        tokio::spawn(async move {
            if let Err(e) = sandbox.probe_health(&url).await {
                warn!(error = %e, "attach health probe failed");
            }
        });
    }

    loop {
        tokio::select! {
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientFrame>(&text) {
                            Ok(ClientFrame::Prompt { text }) => {
                                if let Err(e) = actor.prompt(text).await {
                                    send_frame(&mut socket, &WsFrame::Error { message: e.to_string() }).await.ok();
                                }
                            }
                            Ok(ClientFrame::Pause) => {
                                if let Err(e) = actor.pause().await {
                                    send_frame(&mut socket, &WsFrame::Error { message: e.to_string() }).await.ok();
                                }
                            }
                            Ok(ClientFrame::Resume) => {
                                if let Err(e) = actor.resume().await {
                                    send_frame(&mut socket, &WsFrame::Error { message: e.to_string() }).await.ok();
                                }
                            }
                            Ok(ClientFrame::Stop) => {
                                actor.stop().await;
                            }
                            Err(e) => {
                                let err = WsFrame::Error { message: format!("unknown frame type: {e}") };
                                send_frame(&mut socket, &err).await.ok();
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
            result = events.recv() => {
                match result {
                    Ok(frame) => {
                        if send_frame(&mut socket, &frame).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(lagged = n, "WebSocket attachment lagged");
                        let err = WsFrame::Error { message: format!("event stream lagged by {n} frames") };
                        send_frame(&mut socket, &err).await.ok();
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    info!("WebSocket attachment closed");
}

async fn send_frame(socket: &mut WebSocket, frame: &WsFrame) -> Result<(), axum::Error> {
    let json = serde_json::to_string(frame).expect("WsFrame always serializes");
    socket.send(Message::Text(json)).await
}

// SPDX-License-Identifier: MIT
//!
//! HTTP handlers for the `/sessions` surface. Each handler extracts
//! the already-validated [`AuthContext`] from request extensions, checks
//! the path session id against the token's session id, and delegates to
//! the [`broker_core::ActorHandle`] the [`SessionRegistry`] hands back.

use axum::extract::{Extension, Json, Path, State};
use axum::response::IntoResponse;
use broker_core::model::SessionStateView;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::auth::AuthContext;
use crate::error::GatewayError;
use crate::router::AppState;

fn check_session_match(ctx: &AuthContext, path_id: &str) -> Result<(), GatewayError> {
    if ctx.session_id != path_id {
        return Err(GatewayError::Forbidden);
    }
    Ok(())
}

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "timestamp": chrono::Utc::now().timestamp_millis() }))
}

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub session_id: String,
    pub repo: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub db_site_url: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SuccessBody {
    success: bool,
}

pub async fn create_session(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Json(body): Json<CreateSessionRequest>,
) -> Result<Json<SessionStateView>, GatewayError> {
    if body.session_id.trim().is_empty() || body.repo.trim().is_empty() {
        return Err(GatewayError::BadRequest("sessionId and repo are required".into()));
    }
    check_session_match(&ctx, &body.session_id)?;

    let actor = state.registry.get_or_create(&body.session_id).await;
    let db_site_url = body.db_site_url.unwrap_or_else(|| state.db_base_url.clone());
    let view = actor
        .initialize(body.repo, ctx.user_id, ctx.bearer, db_site_url, body.model, body.provider)
        .await?;
    Ok(Json(view))
}

pub async fn get_session(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<Json<SessionStateView>, GatewayError> {
    check_session_match(&ctx, &id)?;
    let actor = state.registry.get_or_create(&id).await;
    Ok(Json(actor.get_state().await))
}

#[derive(Debug, Deserialize)]
pub struct PromptRequest {
    pub text: String,
}

pub async fn prompt(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<String>,
    Json(body): Json<PromptRequest>,
) -> Result<Json<SuccessBody>, GatewayError> {
    check_session_match(&ctx, &id)?;
    if body.text.trim().is_empty() {
        return Err(GatewayError::BadRequest("text is required".into()));
    }
    let actor = state.registry.get_or_create(&id).await;
    actor.prompt(body.text).await?;
    Ok(Json(SuccessBody { success: true }))
}

pub async fn pause(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<Json<SessionStateView>, GatewayError> {
    check_session_match(&ctx, &id)?;
    let actor = state.registry.get_or_create(&id).await;
    actor.pause().await?;
    Ok(Json(actor.get_state().await))
}

pub async fn resume(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<Json<SessionStateView>, GatewayError> {
    check_session_match(&ctx, &id)?;
    let actor = state.registry.get_or_create(&id).await;
    actor.resume().await?;
    Ok(Json(actor.get_state().await))
}

pub async fn delete_session(
    State(state): State<AppState>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<String>,
) -> Result<Json<SuccessBody>, GatewayError> {
    check_session_match(&ctx, &id)?;
    let actor = state.registry.get_or_create(&id).await;
    actor.stop().await;
    Ok(Json(SuccessBody { success: true }))
}

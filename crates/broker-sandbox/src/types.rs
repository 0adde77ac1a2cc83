// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSandboxRequest {
    pub repo: String,
    pub git_credential: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSandboxResponse {
    pub sandbox_id: String,
    pub tunnel_url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotResponse {
    pub snapshot_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeResponse {
    pub sandbox_id: String,
    pub tunnel_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentSessionResponse {
    pub id: String,
}

/// `{providerID, modelID}` as sent to the agent server alongside a prompt.
/// The agent server's casing (`providerID`/`modelID`, not `providerId`) is
/// irregular enough that plain `camelCase` renaming doesn't match, hence
/// the explicit per-field renames.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRef {
    #[serde(rename = "providerID")]
    pub provider_id: String,
    #[serde(rename = "modelID")]
    pub model_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendPromptPart {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendPromptRequest {
    pub agent: &'static str,
    pub parts: Vec<SendPromptPart>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelRef>,
}

impl SendPromptRequest {
    pub fn text(text: impl Into<String>, model: Option<ModelRef>) -> Self {
        Self {
            agent: "build",
            parts: vec![SendPromptPart { kind: "text", text: text.into() }],
            model,
        }
    }
}

/// A message as returned by `GET /session/:id/message` — raw, not yet
/// classified into [`broker_core`]'s `MessagePart`s.
#[derive(Debug, Clone, Deserialize)]
pub struct RawMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<serde_json::Value>,
}

/// The `GET /session/:id/message` response; provider implementations have
/// been observed to return either a bare array or `{messages: [...]}`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FetchMessagesResponse {
    Bare(Vec<RawMessage>),
    Wrapped { messages: Vec<RawMessage> },
}

impl FetchMessagesResponse {
    pub fn into_messages(self) -> Vec<RawMessage> {
        match self {
            FetchMessagesResponse::Bare(v) => v,
            FetchMessagesResponse::Wrapped { messages } => messages,
        }
    }
}

/// One raw SSE event from `/event`, not yet normalized. Re-serialized
/// verbatim into the `event` WebSocket frame, hence `Serialize` too.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, rename = "sessionId")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub properties: serde_json::Value,
}

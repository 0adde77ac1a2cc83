// SPDX-License-Identifier: MIT
use serde::{Deserialize, Serialize};

/// Millisecond Unix timestamp. `updatedAt` is required to be non-decreasing
/// across durable writes (invariant 6).
pub type TimestampMs = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Idle,
    Starting,
    Running,
    Paused,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolState {
    Pending,
    Running,
    Completed,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Map<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    pub state: ToolState,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePart {
    Text { text: String },
    Tool { call: ToolCall },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub parts: Vec<MessagePart>,
    pub timestamp: TimestampMs,
}

/// The root entity, persisted on every meaningful transition. See
/// `debug_assert_invariants` below for the invariants the session actor
/// enforces on every durable write.
/// Wire field names are camelCase (`sessionId`, `isProcessing`, ...) to
/// match the browser client and the agent-server's own conventions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub session_id: String,
    pub repo: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_session_id: Option<String>,
    pub status: Status,
    pub is_processing: bool,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub streaming_message: Option<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: TimestampMs,
    pub updated_at: TimestampMs,
}

impl SessionState {
    pub fn new(session_id: impl Into<String>, repo: impl Into<String>, user_id: impl Into<String>, now: TimestampMs) -> Self {
        Self {
            session_id: session_id.into(),
            repo: repo.into(),
            user_id: user_id.into(),
            selected_model: None,
            provider: None,
            sandbox_id: None,
            sandbox_url: None,
            snapshot_id: None,
            agent_session_id: None,
            status: Status::Idle,
            is_processing: false,
            messages: Vec::new(),
            streaming_message: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A view of this state suitable for sending to clients: the persisted
    /// `SessionState` with `streamingMessage` (if any) appended to
    /// `messages`. The raw `streamingMessage` field is never exposed.
    pub fn view(&self) -> SessionStateView {
        let mut messages = self.messages.clone();
        if let Some(streaming) = &self.streaming_message {
            messages.push(streaming.clone());
        }
        SessionStateView {
            session_id: self.session_id.clone(),
            repo: self.repo.clone(),
            user_id: self.user_id.clone(),
            selected_model: self.selected_model.clone(),
            provider: self.provider.clone(),
            sandbox_id: self.sandbox_id.clone(),
            sandbox_url: self.sandbox_url.clone(),
            snapshot_id: self.snapshot_id.clone(),
            agent_session_id: self.agent_session_id.clone(),
            status: self.status,
            is_processing: self.is_processing,
            messages,
            error: self.error.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// Enforce invariants 1-3 and 6; debug-only assertion used from the
    /// actor right before every durable write.
    #[cfg(debug_assertions)]
    pub fn debug_assert_invariants(&self, previous_updated_at: TimestampMs) {
        if self.status == Status::Running {
            debug_assert!(self.sandbox_id.is_some());
            debug_assert!(self.sandbox_url.is_some());
            debug_assert!(self.agent_session_id.is_some());
        }
        if self.status == Status::Paused {
            debug_assert!(self.snapshot_id.is_some());
            debug_assert!(self.sandbox_id.is_none());
            debug_assert!(self.sandbox_url.is_none());
        }
        if self.is_processing {
            debug_assert_eq!(self.status, Status::Running);
        }
        let mut seen = std::collections::HashSet::new();
        for m in &self.messages {
            debug_assert!(seen.insert(&m.id), "duplicate message id {}", m.id);
        }
        debug_assert!(self.updated_at >= previous_updated_at);
    }
}

/// What's sent to clients: `SessionState` with any in-progress streaming
/// message folded into `messages`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStateView {
    pub session_id: String,
    pub repo: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selected_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sandbox_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_session_id: Option<String>,
    pub status: Status,
    pub is_processing: bool,
    pub messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: TimestampMs,
    pub updated_at: TimestampMs,
}

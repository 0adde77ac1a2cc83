// SPDX-License-Identifier: MIT
//!
//! Converts raw agent-server SSE `message.part.updated` events into typed,
//! ordered [`MessagePart`]s for the current assistant message.
//!
//! The agent-server schema aliases several tool fields across provider
//! variants (`tool`/`name`/`toolName`, `id`/`callID`/`toolCallId`, ...).
//! Rather than branching on provider identity, every part is modeled as a
//! [`RawPart`] carrying every alias as an optional field, and a single pure
//! [`classify`] function picks the first alias present. Adding a new
//! variant is a one-line change to that function.

use std::collections::HashMap;

use serde::Deserialize;
use uuid::Uuid;

use crate::model::{MessagePart, ToolCall, ToolState};

/// Tolerant view over one `part` object from `message.part.updated`. Every
/// field is optional because provider implementations disagree on which
/// alias they populate.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawPart {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub id: Option<String>,
    #[serde(rename = "callID")]
    pub call_id: Option<String>,
    #[serde(rename = "toolCallId")]
    pub tool_call_id: Option<String>,
    pub text: Option<String>,
    pub tool: Option<String>,
    pub name: Option<String>,
    #[serde(rename = "toolName")]
    pub tool_name: Option<String>,
    pub input: Option<serde_json::Value>,
    pub arguments: Option<serde_json::Value>,
    pub output: Option<serde_json::Value>,
    pub result: Option<serde_json::Value>,
    pub state: Option<RawPartState>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawPartState {
    pub input: Option<serde_json::Value>,
    pub output: Option<serde_json::Value>,
    pub status: Option<String>,
}

const TOOL_TYPE_ALIASES: &[&str] =
    &["tool", "tool-call", "tool_call", "tool-invocation", "tool_use"];

fn normalize_tool_state(raw: Option<&str>) -> ToolState {
    match raw {
        Some("pending") => ToolState::Pending,
        Some("completed") | Some("success") => ToolState::Completed,
        Some("error") | Some("failed") => ToolState::Error,
        _ => ToolState::Running,
    }
}

/// One part plus the monotonic counter value it was first seen at, used to
/// produce a stable total order independent of update arrival order.
#[derive(Debug, Clone)]
struct TrackedPart {
    first_seen_at: u64,
    part: MessagePart,
}

/// Builds the ordered part list for one in-flight assistant message from a
/// stream of raw `message.part.updated` events.
pub struct Normalizer {
    user_prompt: String,
    counter: u64,
    parts: HashMap<String, TrackedPart>,
    order: Vec<String>,
    current_text_part_id: Option<String>,
}

impl Normalizer {
    pub fn new(user_prompt: impl Into<String>) -> Self {
        Self {
            user_prompt: user_prompt.into(),
            counter: 0,
            parts: HashMap::new(),
            order: Vec::new(),
            current_text_part_id: None,
        }
    }

    fn next_seq(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }

    fn upsert(&mut self, id: String, part: MessagePart) {
        if let Some(existing) = self.parts.get_mut(&id) {
            existing.part = part;
        } else {
            let seq = self.next_seq();
            self.order.push(id.clone());
            self.parts.insert(id, TrackedPart { first_seen_at: seq, part });
        }
    }

    /// Feed one raw `part` object (plus `properties.index` when present)
    /// from a `message.part.updated` event. `now_ms` is used only as the
    /// last-resort id fallback for text parts.
    pub fn handle_part_updated(&mut self, part: &RawPart, index: Option<u64>, now_ms: i64) {
        let kind = part.kind.as_deref().unwrap_or("");
        if kind == "text" {
            self.handle_text_part(part, index, now_ms);
        } else if TOOL_TYPE_ALIASES.contains(&kind) {
            self.handle_tool_part(part);
        }
        // Unknown part types are ignored.
    }

    fn handle_text_part(&mut self, part: &RawPart, index: Option<u64>, now_ms: i64) {
        let text = match &part.text {
            Some(t) if !t.is_empty() => t.clone(),
            _ => return,
        };
        if text == self.user_prompt {
            return; // echo filter
        }
        let id = part
            .id
            .clone()
            .or_else(|| index.map(|i| format!("text-{i}")))
            .or_else(|| self.current_text_part_id.clone())
            .unwrap_or_else(|| format!("text-{now_ms}"));
        self.current_text_part_id = Some(id.clone());
        self.upsert(id, MessagePart::Text { text });
    }

    fn handle_tool_part(&mut self, part: &RawPart) {
        self.current_text_part_id = None;

        let name = part
            .tool
            .clone()
            .or_else(|| part.name.clone())
            .or_else(|| part.tool_name.clone())
            .unwrap_or_else(|| "unknown".to_string());
        let id = part
            .id
            .clone()
            .or_else(|| part.call_id.clone())
            .or_else(|| part.tool_call_id.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let arguments = part
            .state
            .as_ref()
            .and_then(|s| s.input.clone())
            .or_else(|| part.input.clone())
            .or_else(|| part.arguments.clone())
            .unwrap_or_else(|| serde_json::Value::Object(Default::default()));
        let arguments = match arguments {
            serde_json::Value::Object(map) => map,
            other => {
                let mut map = serde_json::Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        let result = part
            .state
            .as_ref()
            .and_then(|s| s.output.clone())
            .or_else(|| part.output.clone())
            .or_else(|| part.result.clone());
        let status = part.state.as_ref().and_then(|s| s.status.as_deref());
        let state = normalize_tool_state(status);

        self.upsert(
            id.clone(),
            MessagePart::Tool {
                call: ToolCall { id, name, arguments, result, state },
            },
        );
    }

    /// The canonical ordered parts list: sorted by `firstSeenAt`, with
    /// empty text parts and tool parts missing a call filtered out (the
    /// latter cannot currently occur given [`Self::upsert`] always builds
    /// a full `ToolCall`, but the filter documents the invariant).
    pub fn ordered_parts(&self) -> Vec<MessagePart> {
        let mut ids = self.order.clone();
        ids.sort_by_key(|id| self.parts[id].first_seen_at);
        ids.into_iter()
            .filter_map(|id| self.parts.get(&id).map(|t| t.part.clone()))
            .filter(|p| match p {
                MessagePart::Text { text } => !text.is_empty(),
                MessagePart::Tool { .. } => true,
            })
            .collect()
    }
}

/// Classify an already-fetched message's raw `parts` array the same way a
/// live stream of `message.part.updated` events would be, for the
/// post-prompt `fetchMessages` reconciliation step. Each entry's position
/// in the array stands in for arrival order.
pub fn classify_fetched_parts(
    raw_parts: &[serde_json::Value],
    user_prompt: &str,
    now_ms: i64,
) -> Vec<MessagePart> {
    let mut normalizer = Normalizer::new(user_prompt);
    for (index, raw) in raw_parts.iter().enumerate() {
        if let Ok(part) = serde_json::from_value::<RawPart>(raw.clone()) {
            normalizer.handle_part_updated(&part, Some(index as u64), now_ms);
        }
    }
    normalizer.ordered_parts()
}

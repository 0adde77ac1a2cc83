// SPDX-License-Identifier: MIT
//!
//! Fans out state/event/streaming frames to every WebSocket attached to one
//! session, coalescing `streaming` frames to at most one per 100 ms.
//!
//! The throttle is a tiny state machine with `{last_emit, pending,
//! scheduled}` fields rather than timers-with-closures, per the design
//! note on throttled broadcast: any monotonic timer suffices, the
//! observable contract is what matters.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::broadcast;

use crate::model::SessionStateView;

const THROTTLE: Duration = Duration::from_millis(100);
const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingPayload {
    pub message_id: String,
    pub parts: Vec<crate::model::MessagePart>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum WsFrame {
    State(SessionStateView),
    Event(serde_json::Value),
    Streaming(StreamingPayload),
    Error { message: String },
}

#[derive(Debug, Default)]
struct ThrottleState {
    last_emit: Option<Instant>,
    pending: Option<StreamingPayload>,
    scheduled: bool,
}

/// Owns the broadcast channel and throttle state for one session. Cheap to
/// clone (wrap in `Arc`); every attached WebSocket holds its own
/// `subscribe()`d receiver.
pub struct Broadcaster {
    tx: broadcast::Sender<WsFrame>,
    throttle: Mutex<ThrottleState>,
}

impl Broadcaster {
    pub fn new() -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Arc::new(Self { tx, throttle: Mutex::new(ThrottleState::default()) })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WsFrame> {
        self.tx.subscribe()
    }

    pub fn send_state(&self, view: SessionStateView) {
        let _ = self.tx.send(WsFrame::State(view));
    }

    pub fn send_event(&self, raw: serde_json::Value) {
        let _ = self.tx.send(WsFrame::Event(raw));
    }

    pub fn send_error(&self, message: impl Into<String>) {
        let _ = self.tx.send(WsFrame::Error { message: message.into() });
    }

    /// Emit a `streaming` frame, throttled to one per 100 ms. If called
    /// inside the cooldown, the payload is stashed and a single deferred
    /// flush is scheduled for when the cooldown ends.
    pub fn send_streaming(self: &Arc<Self>, payload: StreamingPayload) {
        let now = Instant::now();
        let mut throttle = self.throttle.lock().unwrap();
        let ready = match throttle.last_emit {
            None => true,
            Some(t) => now.duration_since(t) >= THROTTLE,
        };
        if ready && !throttle.scheduled {
            throttle.last_emit = Some(now);
            drop(throttle);
            let _ = self.tx.send(WsFrame::Streaming(payload));
            return;
        }
        let remaining = match throttle.last_emit {
            Some(t) => THROTTLE.saturating_sub(now.duration_since(t)),
            None => Duration::ZERO,
        };
        throttle.pending = Some(payload);
        if throttle.scheduled {
            return;
        }
        throttle.scheduled = true;
        drop(throttle);
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(remaining).await;
            this.flush_scheduled();
        });
    }

    fn flush_scheduled(&self) {
        let mut throttle = self.throttle.lock().unwrap();
        throttle.scheduled = false;
        if let Some(payload) = throttle.pending.take() {
            throttle.last_emit = Some(Instant::now());
            drop(throttle);
            let _ = self.tx.send(WsFrame::Streaming(payload));
        }
    }

    /// Drain any pending streaming update, then send the final `state`
    /// frame. Used when a prompt finishes, so the last streaming frame is
    /// guaranteed to precede the closing state frame.
    pub fn flush_and_stop(&self, final_state: SessionStateView) {
        let mut throttle = self.throttle.lock().unwrap();
        if let Some(payload) = throttle.pending.take() {
            let _ = self.tx.send(WsFrame::Streaming(payload));
        }
        drop(throttle);
        let _ = self.tx.send(WsFrame::State(final_state));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Role, Status};

    fn view() -> SessionStateView {
        SessionStateView {
            session_id: "s1".into(),
            repo: "acme/hello".into(),
            user_id: "u1".into(),
            selected_model: None,
            provider: None,
            sandbox_id: None,
            sandbox_url: None,
            snapshot_id: None,
            agent_session_id: None,
            status: Status::Idle,
            is_processing: false,
            messages: Vec::new(),
            error: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    #[tokio::test]
    async fn first_streaming_frame_is_emitted_immediately() {
        let b = Broadcaster::new();
        let mut rx = b.subscribe();
        b.send_streaming(StreamingPayload { message_id: "m1".into(), parts: vec![] });
        let frame = rx.recv().await.unwrap();
        assert!(matches!(frame, WsFrame::Streaming(_)));
    }

    #[tokio::test]
    async fn throttled_updates_coalesce_to_latest_payload() {
        let b = Broadcaster::new();
        let mut rx = b.subscribe();
        b.send_streaming(StreamingPayload { message_id: "m1".into(), parts: vec![] });
        let _first = rx.recv().await.unwrap();
        // These land inside the cooldown window and should coalesce.
        b.send_streaming(StreamingPayload {
            message_id: "m1".into(),
            parts: vec![crate::model::MessagePart::Text { text: "a".into() }],
        });
        b.send_streaming(StreamingPayload {
            message_id: "m1".into(),
            parts: vec![crate::model::MessagePart::Text { text: "ab".into() }],
        });
        let second = tokio::time::timeout(Duration::from_millis(500), rx.recv())
            .await
            .expect("deferred flush should fire")
            .unwrap();
        match second {
            WsFrame::Streaming(p) => {
                assert_eq!(p.parts, vec![crate::model::MessagePart::Text { text: "ab".into() }])
            }
            other => panic!("expected streaming frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn attach_sends_state_frame_immediately() {
        let b = Broadcaster::new();
        let mut rx = b.subscribe();
        b.send_state(view());
        assert!(matches!(rx.recv().await.unwrap(), WsFrame::State(_)));
    }

    #[tokio::test]
    async fn flush_and_stop_drains_pending_before_final_state() {
        let b = Broadcaster::new();
        let mut rx = b.subscribe();
        b.send_streaming(StreamingPayload { message_id: "m1".into(), parts: vec![] });
        let _first = rx.recv().await.unwrap();
        b.send_streaming(StreamingPayload {
            message_id: "m1".into(),
            parts: vec![crate::model::MessagePart::Text { text: "pending".into() }],
        });
        b.flush_and_stop(view());
        let pending = rx.recv().await.unwrap();
        assert!(matches!(pending, WsFrame::Streaming(_)));
        let state = rx.recv().await.unwrap();
        assert!(matches!(state, WsFrame::State(_)));
    }
}

// SPDX-License-Identifier: MIT
//!
//! The session actor: a single-writer state machine owning one
//! [`SessionState`]. Mutations happen only inside [`SessionActor::run`]'s
//! command loop, so "no two command handlers observe or produce
//! overlapping state writes" holds by construction — there is exactly one
//! task processing commands from `cmd_rx`, one at a time, to completion.
//!
//! Reads (`get_state`, WebSocket attach) bypass the mailbox entirely and
//! go through a cached [`SessionStateView`] kept in sync with every
//! durable write, so an attach during a long-running prompt never blocks.

use std::sync::Arc;
use std::time::{Duration, Instant};

use broker_db::types::{UpsertMessageRequest, UpsertStatusRequest};
use broker_db::DbClient;
use broker_sandbox::types::ModelRef as SandboxModelRef;
use broker_sandbox::{SandboxClient, SandboxError};
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::broadcast::{Broadcaster, StreamingPayload, WsFrame};
use crate::error::CoreError;
use crate::model::{Message, MessagePart, Role, SessionState, SessionStateView, Status};
use crate::normalizer::{classify_fetched_parts, Normalizer, RawPart};
use crate::store::{self, SessionStore};

const PROMPT_IDLE_TIMEOUT: Duration = Duration::from_secs(300);
const CONNECT_GRACE: Duration = Duration::from_secs(3);
const TAIL_GRACE: Duration = Duration::from_millis(200);
const STREAM_CHECKPOINT_INTERVAL: Duration = Duration::from_secs(2);
const RECOVERY_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const TIMED_OUT_NOTE: &str = "⚠️ Response timed out. Partial content shown above. The AI may still be processing — try refreshing in a moment.";

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn status_str(status: Status) -> &'static str {
    match status {
        Status::Idle => "idle",
        Status::Starting => "starting",
        Status::Running => "running",
        Status::Paused => "paused",
        Status::Error => "error",
    }
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::System => "system",
    }
}

fn count_tool_parts(parts: &[MessagePart]) -> usize {
    parts.iter().filter(|p| matches!(p, MessagePart::Tool { .. })).count()
}

enum ActorCommand {
    Initialize {
        repo: String,
        user_id: String,
        bearer: String,
        db_site_url: String,
        model: Option<String>,
        provider: Option<String>,
        reply: oneshot::Sender<Result<SessionStateView, CoreError>>,
    },
    Prompt { text: String, reply: oneshot::Sender<Result<(), CoreError>> },
    Pause { reply: oneshot::Sender<Result<(), CoreError>> },
    Resume { reply: oneshot::Sender<Result<(), CoreError>> },
    Stop { reply: oneshot::Sender<()> },
    /// Loopback from the background sandbox-creation task spawned by
    /// `initialize`; routes the result back through the single-writer
    /// mailbox instead of mutating state from another task.
    SandboxReady { result: Result<(String, String, String), String> },
}

/// Cheap-to-clone front for one session's actor. Holds no session state
/// itself beyond a read-through cache.
#[derive(Clone)]
pub struct ActorHandle {
    cmd_tx: mpsc::Sender<ActorCommand>,
    broadcaster: Arc<Broadcaster>,
    cache: Arc<RwLock<SessionStateView>>,
}

impl ActorHandle {
    #[allow(clippy::too_many_arguments)]
    pub async fn initialize(
        &self,
        repo: String,
        user_id: String,
        bearer: String,
        db_site_url: String,
        model: Option<String>,
        provider: Option<String>,
    ) -> Result<SessionStateView, CoreError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(ActorCommand::Initialize { repo, user_id, bearer, db_site_url, model, provider, reply })
            .await
            .map_err(|_| CoreError::Store("actor task is gone".into()))?;
        rx.await.map_err(|_| CoreError::Store("actor task is gone".into()))?
    }

    /// Read-through; never touches the mailbox, so it never blocks behind
    /// an in-flight prompt.
    pub async fn get_state(&self) -> SessionStateView {
        self.cache.read().await.clone()
    }

    pub async fn prompt(&self, text: String) -> Result<(), CoreError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(ActorCommand::Prompt { text, reply })
            .await
            .map_err(|_| CoreError::Store("actor task is gone".into()))?;
        rx.await.map_err(|_| CoreError::Store("actor task is gone".into()))?
    }

    pub async fn pause(&self) -> Result<(), CoreError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(ActorCommand::Pause { reply })
            .await
            .map_err(|_| CoreError::Store("actor task is gone".into()))?;
        rx.await.map_err(|_| CoreError::Store("actor task is gone".into()))?
    }

    pub async fn resume(&self) -> Result<(), CoreError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(ActorCommand::Resume { reply })
            .await
            .map_err(|_| CoreError::Store("actor task is gone".into()))?;
        rx.await.map_err(|_| CoreError::Store("actor task is gone".into()))?
    }

    pub async fn stop(&self) {
        let (reply, rx) = oneshot::channel();
        if self.cmd_tx.send(ActorCommand::Stop { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// Register a new attachment. Does not itself send the initial `state`
    /// frame — callers subscribe, then fetch [`Self::get_state`] and send
    /// it, matching the "send one state frame immediately" attach rule without
    /// routing the read through the mailbox.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<WsFrame> {
        self.broadcaster.subscribe()
    }
}

pub struct SessionActor {
    session_id: String,
    state: SessionState,
    db_site_url: String,
    bearer_token: String,
    store: Arc<dyn SessionStore>,
    sandbox: SandboxClient,
    db: DbClient,
    broadcaster: Arc<Broadcaster>,
    cache: Arc<RwLock<SessionStateView>>,
    cmd_rx: mpsc::Receiver<ActorCommand>,
    self_tx: mpsc::Sender<ActorCommand>,
}

impl SessionActor {
    /// Hydrate from durable storage (blocking any use of the returned
    /// handle until this completes) and spawn the command loop.
    pub async fn spawn(
        session_id: impl Into<String>,
        store: Arc<dyn SessionStore>,
        sandbox: SandboxClient,
        db: DbClient,
    ) -> ActorHandle {
        let session_id = session_id.into();
        let state = store::get_json::<SessionState>(store.as_ref(), &session_id, "session")
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| SessionState::new(&session_id, "", "", now_ms()));
        let db_site_url = store
            .get(&session_id, "dbSiteUrl")
            .await
            .ok()
            .flatten()
            .unwrap_or_default();
        let bearer_token = store
            .get(&session_id, "bearerToken")
            .await
            .ok()
            .flatten()
            .unwrap_or_default();

        let broadcaster = Broadcaster::new();
        let cache = Arc::new(RwLock::new(state.view()));
        let (cmd_tx, cmd_rx) = mpsc::channel(64);

        let actor = SessionActor {
            session_id,
            state,
            db_site_url,
            bearer_token,
            store,
            sandbox,
            db,
            broadcaster: broadcaster.clone(),
            cache: cache.clone(),
            cmd_rx,
            self_tx: cmd_tx.clone(),
        };
        tokio::spawn(actor.run());
        ActorHandle { cmd_tx, broadcaster, cache }
    }

    async fn run(mut self) {
        while let Some(cmd) = self.cmd_rx.recv().await {
            self.handle_command(cmd).await;
        }
    }

    async fn handle_command(&mut self, cmd: ActorCommand) {
        match cmd {
            ActorCommand::Initialize { repo, user_id, bearer, db_site_url, model, provider, reply } => {
                let result = self.do_initialize(repo, user_id, bearer, db_site_url, model, provider).await;
                let _ = reply.send(result);
            }
            ActorCommand::Prompt { text, reply } => {
                let result = self.do_prompt(text).await;
                let _ = reply.send(result);
            }
            ActorCommand::Pause { reply } => {
                let result = self.do_pause().await;
                let _ = reply.send(result);
            }
            ActorCommand::Resume { reply } => {
                let result = self.do_resume().await;
                let _ = reply.send(result);
            }
            ActorCommand::Stop { reply } => {
                self.do_stop().await;
                let _ = reply.send(());
            }
            ActorCommand::SandboxReady { result } => {
                self.handle_sandbox_ready(result).await;
            }
        }
    }

    // ---- durable writes ----

    async fn persist_silent(&mut self) -> Result<(), CoreError> {
        let previous = self.state.updated_at;
        self.state.updated_at = now_ms().max(previous);
        #[cfg(debug_assertions)]
        self.state.debug_assert_invariants(previous);
        store::put_json(self.store.as_ref(), &self.session_id, "session", &self.state)
            .await?;
        *self.cache.write().await = self.state.view();
        Ok(())
    }

    /// Durable write plus an immediate `state` broadcast.
    async fn persist(&mut self) -> Result<(), CoreError> {
        self.persist_silent().await?;
        self.broadcaster.send_state(self.state.view());
        Ok(())
    }

    /// Durable write, draining any pending `streaming` frame first so the
    /// final `state` frame for a prompt is always the last frame clients
    /// see for it.
    async fn persist_final(&mut self) -> Result<(), CoreError> {
        self.persist_silent().await?;
        self.broadcaster.flush_and_stop(self.state.view());
        Ok(())
    }

    fn fire_upsert_status(&self) {
        if self.db_site_url.is_empty() {
            return;
        }
        let db = self.db.clone();
        let db_site_url = self.db_site_url.clone();
        let bearer = self.bearer_token.clone();
        let req = UpsertStatusRequest {
            session_id: self.session_id.clone(),
            status: status_str(self.state.status).to_string(),
            is_processing: self.state.is_processing,
            snapshot_id: self.state.snapshot_id.clone(),
            error_message: self.state.error.clone(),
        };
        tokio::spawn(async move {
            db.upsert_status(&db_site_url, &bearer, &req).await;
        });
    }

    fn fire_upsert_message(&self, msg: &Message) {
        if self.db_site_url.is_empty() {
            return;
        }
        let db = self.db.clone();
        let db_site_url = self.db_site_url.clone();
        let bearer = self.bearer_token.clone();
        let req = UpsertMessageRequest {
            session_id: self.session_id.clone(),
            message_id: msg.id.clone(),
            role: role_str(msg.role).to_string(),
            parts: serde_json::to_value(&msg.parts).unwrap_or(serde_json::Value::Null),
            timestamp: msg.timestamp,
        };
        tokio::spawn(async move {
            db.upsert_message(&db_site_url, &bearer, &req).await;
        });
    }

    // ---- initialize ----

    #[allow(clippy::too_many_arguments)]
    async fn do_initialize(
        &mut self,
        repo: String,
        user_id: String,
        bearer: String,
        db_site_url: String,
        model: Option<String>,
        provider: Option<String>,
    ) -> Result<SessionStateView, CoreError> {
        self.db_site_url = db_site_url.clone();
        self.bearer_token = bearer.clone();
        self.store
            .put(&self.session_id, "dbSiteUrl", &db_site_url)
            .await?;
        self.store
            .put(&self.session_id, "bearerToken", &bearer)
            .await?;

        if self.state.repo.is_empty() {
            self.state.repo = repo;
            self.state.user_id = user_id;
            self.state.selected_model = model;
            self.state.provider = provider;
        }
        self.state.status = Status::Starting;
        self.persist().await?;
        self.fire_upsert_status();
        self.spawn_sandbox_creation();
        Ok(self.state.view())
    }

    fn spawn_sandbox_creation(&self) {
        let sandbox = self.sandbox.clone();
        let db = self.db.clone();
        let db_site_url = self.db_site_url.clone();
        let bearer = self.bearer_token.clone();
        let repo = self.state.repo.clone();
        let provider = self.state.provider.clone();
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            let git_credential = db.fetch_git_credential(&db_site_url, &bearer).await.unwrap_or_default();
            let provider_api_key = match &provider {
                Some(p) => db.fetch_provider_api_key(&db_site_url, &bearer, p).await.flatten(),
                None => None,
            };
            let result = async {
                let created = sandbox
                    .create_sandbox(&repo, &git_credential, provider_api_key)
                    .await
                    .map_err(|e| e.to_string())?;
                sandbox.wait_healthy(&created.tunnel_url).await.map_err(|e| e.to_string())?;
                let agent_session_id = sandbox
                    .create_agent_session(&created.tunnel_url)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok((created.sandbox_id, created.tunnel_url, agent_session_id))
            }
            .await;
            let _ = tx.send(ActorCommand::SandboxReady { result }).await;
        });
    }

    async fn handle_sandbox_ready(&mut self, result: Result<(String, String, String), String>) {
        match result {
            Ok((sandbox_id, tunnel_url, agent_session_id)) => {
                self.state.sandbox_id = Some(sandbox_id);
                self.state.sandbox_url = Some(tunnel_url);
                self.state.agent_session_id = Some(agent_session_id);
                self.state.status = Status::Running;
                self.state.error = None;
                info!(session_id = %self.session_id, "sandbox ready");
            }
            Err(e) => {
                self.state.status = Status::Error;
                self.state.error = Some(e.clone());
                warn!(session_id = %self.session_id, error = %e, "sandbox creation failed");
            }
        }
        let _ = self.persist().await;
        self.fire_upsert_status();
    }

    // ---- pause / resume / stop ----

    async fn do_pause(&mut self) -> Result<(), CoreError> {
        if self.state.is_processing {
            return Err(CoreError::Busy);
        }
        if self.state.status != Status::Running {
            return Err(CoreError::NoSandbox);
        }
        let Some(sandbox_id) = self.state.sandbox_id.clone() else {
            return Err(CoreError::NoSandbox);
        };
        self.state.status = Status::Starting;
        let _ = self.persist().await;
        self.fire_upsert_status();

        match self.sandbox.pause_sandbox(&sandbox_id).await {
            Ok(resp) => {
                self.state.snapshot_id = Some(resp.snapshot_id);
                self.state.sandbox_id = None;
                self.state.sandbox_url = None;
                self.state.agent_session_id = None;
                self.state.status = Status::Paused;
            }
            Err(SandboxError::Conflict(_)) => {
                self.state.sandbox_id = None;
                self.state.sandbox_url = None;
                self.state.agent_session_id = None;
                self.state.status =
                    if self.state.snapshot_id.is_some() { Status::Paused } else { Status::Idle };
            }
            Err(e) => {
                self.state.status = Status::Error;
                self.state.error = Some(e.to_string());
            }
        }
        self.persist().await?;
        self.fire_upsert_status();
        Ok(())
    }

    async fn do_resume(&mut self) -> Result<(), CoreError> {
        if self.state.status != Status::Paused || self.state.snapshot_id.is_none() {
            return Err(CoreError::NoSandbox);
        }
        self.resume_pipeline().await
    }

    /// Precondition: `snapshotId` set. Always mints a fresh agent session
    /// id post-resume: resume always mints a new agent session rather than
    /// reusing a prior one.
    async fn resume_pipeline(&mut self) -> Result<(), CoreError> {
        let Some(snapshot_id) = self.state.snapshot_id.clone() else {
            return Err(CoreError::NoSandbox);
        };
        self.state.status = Status::Starting;
        let _ = self.persist().await;
        self.fire_upsert_status();

        let resumed = match self.sandbox.resume_sandbox(&snapshot_id).await {
            Ok(r) => r,
            Err(e) => {
                self.fail_to_error(format!("resume_sandbox failed: {e}")).await;
                return Err(CoreError::SandboxError(e.to_string()));
            }
        };
        self.state.sandbox_id = Some(resumed.sandbox_id);
        self.state.sandbox_url = Some(resumed.tunnel_url.clone());

        if let Err(e) = self.sandbox.wait_healthy(&resumed.tunnel_url).await {
            self.fail_to_error(format!("wait_healthy failed: {e}")).await;
            return Err(CoreError::SandboxError(e.to_string()));
        }
        let agent_session_id = match self.sandbox.create_agent_session(&resumed.tunnel_url).await {
            Ok(id) => id,
            Err(e) => {
                self.fail_to_error(format!("create_agent_session failed: {e}")).await;
                return Err(CoreError::SandboxError(e.to_string()));
            }
        };
        self.state.agent_session_id = Some(agent_session_id);
        self.state.status = Status::Running;
        self.state.error = None;
        self.persist().await?;
        self.fire_upsert_status();
        Ok(())
    }

    async fn fail_to_error(&mut self, message: String) {
        self.state.status = Status::Error;
        self.state.error = Some(message);
        self.state.sandbox_id = None;
        self.state.sandbox_url = None;
        self.state.agent_session_id = None;
        let _ = self.persist().await;
        self.fire_upsert_status();
    }

    async fn do_stop(&mut self) {
        if let Some(sandbox_id) = self.state.sandbox_id.clone() {
            self.sandbox.terminate_sandbox(&sandbox_id).await;
        }
        self.state.sandbox_id = None;
        self.state.sandbox_url = None;
        self.state.agent_session_id = None;
        self.state.status = Status::Idle;
        self.state.is_processing = false;
        let _ = self.persist().await;
        self.fire_upsert_status();
    }

    // ---- prompt pipeline ----

    async fn do_prompt(&mut self, text: String) -> Result<(), CoreError> {
        if self.state.is_processing {
            return Err(CoreError::Busy);
        }

        let user_msg = Message {
            id: Uuid::new_v4().to_string(),
            role: Role::User,
            parts: vec![MessagePart::Text { text: text.clone() }],
            timestamp: now_ms(),
        };
        self.state.messages.push(user_msg.clone());
        self.state.is_processing = true;
        self.persist().await?;
        self.fire_upsert_message(&user_msg);

        if let Err(err) = self.ensure_reachable_for_prompt().await {
            self.state.is_processing = false;
            let _ = self.persist().await;
            return Err(err);
        }

        let tunnel_url = self.state.sandbox_url.clone().ok_or(CoreError::NoSandbox)?;
        let agent_session_id = self.state.agent_session_id.clone().ok_or(CoreError::NoSandbox)?;
        let assistant_id = Uuid::new_v4().to_string();
        let mut normalizer = Normalizer::new(text.clone());
        let cancel = CancellationToken::new();

        let mut events = Box::pin(self.sandbox.subscribe_events(&tunnel_url, cancel.clone()));

        // Step 5: wait up to 3 s for server.connected; proceed regardless.
        let _ = tokio::time::timeout(CONNECT_GRACE, async {
            while let Some(ev) = events.next().await {
                if ev.kind == "server.connected" {
                    return;
                }
            }
        })
        .await;

        let model = self.current_model_ref();
        if let Err(e) = self.sandbox.send_prompt(&tunnel_url, &agent_session_id, &text, model).await {
            cancel.cancel();
            let streamed = normalizer.ordered_parts();
            return self
                .recover_after_stall(assistant_id, &text, &tunnel_url, &agent_session_id, streamed)
                .await;
        }

        let mut last_checkpoint = Instant::now();
        let idle_result = tokio::time::timeout(PROMPT_IDLE_TIMEOUT, async {
            loop {
                match events.next().await {
                    Some(ev) => {
                        self.broadcaster
                            .send_event(serde_json::to_value(&ev).unwrap_or(serde_json::Value::Null));
                        if ev.kind == "message.part.updated" {
                            if let Some(raw_part) = ev.properties.get("part") {
                                if let Ok(part) = serde_json::from_value::<RawPart>(raw_part.clone()) {
                                    let index =
                                        ev.properties.get("index").and_then(|v| v.as_u64());
                                    normalizer.handle_part_updated(&part, index, now_ms());
                                    let parts = normalizer.ordered_parts();
                                    self.broadcaster.send_streaming(StreamingPayload {
                                        message_id: assistant_id.clone(),
                                        parts: parts.clone(),
                                    });
                                    if last_checkpoint.elapsed() >= STREAM_CHECKPOINT_INTERVAL {
                                        self.state.streaming_message = Some(Message {
                                            id: assistant_id.clone(),
                                            role: Role::Assistant,
                                            parts,
                                            timestamp: now_ms(),
                                        });
                                        let _ = self.persist_silent().await;
                                        last_checkpoint = Instant::now();
                                    }
                                }
                            }
                        } else if ev.kind == "session.idle" {
                            return;
                        }
                    }
                    None => return,
                }
            }
        })
        .await;

        cancel.cancel();
        tokio::time::sleep(TAIL_GRACE).await;
        let streamed_parts = normalizer.ordered_parts();

        if idle_result.is_err() {
            return self
                .recover_after_stall(assistant_id, &text, &tunnel_url, &agent_session_id, streamed_parts)
                .await;
        }

        let final_parts = match self
            .sandbox
            .fetch_messages(&tunnel_url, &agent_session_id, RECOVERY_FETCH_TIMEOUT)
            .await
        {
            Ok(raw_messages) => {
                let last_assistant = raw_messages
                    .iter()
                    .rev()
                    .find(|m| m.role.as_deref() == Some("assistant"));
                match last_assistant {
                    Some(m) => {
                        let fetched = classify_fetched_parts(&m.parts, &text, now_ms());
                        let fetched_tools = count_tool_parts(&fetched);
                        let streamed_tools = count_tool_parts(&streamed_parts);
                        if fetched.is_empty() || (fetched_tools == 0 && streamed_tools >= 1) {
                            streamed_parts
                        } else {
                            fetched
                        }
                    }
                    None => streamed_parts,
                }
            }
            Err(_) => streamed_parts,
        };

        self.commit_assistant_message(assistant_id, final_parts).await?;
        self.maybe_auto_snapshot().await;
        Ok(())
    }

    /// Resolves whether the prompt can proceed, resuming
    /// from a snapshot or declaring the sandbox lost as needed. Leaves
    /// `sandboxUrl`/`agentSessionId` populated on success.
    async fn ensure_reachable_for_prompt(&mut self) -> Result<(), CoreError> {
        match self.state.status {
            Status::Running => {
                let tunnel_url = self.state.sandbox_url.clone().ok_or(CoreError::NoSandbox)?;
                if self.sandbox.probe_health(&tunnel_url).await.is_ok() {
                    return Ok(());
                }
                if self.state.snapshot_id.is_some() {
                    self.state.status = Status::Paused;
                    self.state.sandbox_id = None;
                    self.state.sandbox_url = None;
                    self.state.agent_session_id = None;
                    let _ = self.persist().await;
                    self.fire_upsert_status();
                    self.resume_pipeline().await
                } else {
                    self.state.status = Status::Idle;
                    self.state.error = Some("sandbox unreachable".into());
                    Err(CoreError::SandboxLost("sandbox unreachable".into()))
                }
            }
            Status::Paused | Status::Idle | Status::Error if self.state.snapshot_id.is_some() => {
                self.resume_pipeline().await
            }
            Status::Starting => Err(CoreError::NotReady),
            _ => Err(CoreError::NoSandbox),
        }
    }

    fn current_model_ref(&self) -> Option<SandboxModelRef> {
        match (&self.state.provider, &self.state.selected_model) {
            (Some(provider), Some(model)) => {
                Some(SandboxModelRef { provider_id: provider.clone(), model_id: model.clone() })
            }
            _ => None,
        }
    }

    /// Timeout recovery: try one bounded `fetchMessages`, then
    /// fall back to preserving partial streamed content, then a bare
    /// error message. Never re-surfaces `PromptTimeout` if any content was
    /// recovered.
    async fn recover_after_stall(
        &mut self,
        assistant_id: String,
        user_prompt: &str,
        tunnel_url: &str,
        agent_session_id: &str,
        streamed_parts: Vec<MessagePart>,
    ) -> Result<(), CoreError> {
        if let Ok(raw_messages) = self
            .sandbox
            .fetch_messages(tunnel_url, agent_session_id, RECOVERY_FETCH_TIMEOUT)
            .await
        {
            if let Some(last) = raw_messages.iter().rev().find(|m| m.role.as_deref() == Some("assistant")) {
                let parts = classify_fetched_parts(&last.parts, user_prompt, now_ms());
                if !parts.is_empty() {
                    self.commit_assistant_message(assistant_id, parts).await?;
                    self.maybe_auto_snapshot().await;
                    return Ok(());
                }
            }
        }

        if !streamed_parts.is_empty() {
            self.commit_assistant_message(assistant_id, streamed_parts).await?;
            self.append_system_message(TIMED_OUT_NOTE).await?;
            self.maybe_auto_snapshot().await;
        } else {
            self.state.streaming_message = None;
            self.append_system_message("Error: prompt timed out with no response").await?;
        }
        Ok(())
    }

    async fn commit_assistant_message(&mut self, id: String, parts: Vec<MessagePart>) -> Result<(), CoreError> {
        let msg = Message { id, role: Role::Assistant, parts, timestamp: now_ms() };
        self.state.messages.push(msg.clone());
        self.state.streaming_message = None;
        self.state.is_processing = false;
        self.persist_final().await?;
        self.fire_upsert_message(&msg);
        self.fire_upsert_status();
        Ok(())
    }

    async fn append_system_message(&mut self, text: &str) -> Result<(), CoreError> {
        let msg = Message {
            id: Uuid::new_v4().to_string(),
            role: Role::System,
            parts: vec![MessagePart::Text { text: text.to_string() }],
            timestamp: now_ms(),
        };
        self.state.messages.push(msg.clone());
        self.state.is_processing = false;
        self.persist_final().await?;
        self.fire_upsert_message(&msg);
        Ok(())
    }

    /// Non-fatal: request a snapshot once a prompt settles into an idle
    /// `running` state. Failures are logged, never surfaced.
    async fn maybe_auto_snapshot(&mut self) {
        if self.state.status != Status::Running || self.state.is_processing {
            return;
        }
        let Some(sandbox_id) = self.state.sandbox_id.clone() else { return };
        match self.sandbox.snapshot_sandbox(&sandbox_id, false).await {
            Ok(resp) => {
                self.state.snapshot_id = Some(resp.snapshot_id);
                let _ = self.persist().await;
                self.fire_upsert_status();
            }
            Err(e) => {
                warn!(session_id = %self.session_id, error = %e, "auto-snapshot failed, continuing");
            }
        }
    }
}

// SPDX-License-Identifier: MIT
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::SandboxError;
use crate::types::{
    AgentSessionResponse, CreateSandboxRequest, CreateSandboxResponse, FetchMessagesResponse,
    ModelRef, RawEvent, RawMessage, ResumeResponse, SendPromptRequest, SnapshotResponse,
};

const WAIT_HEALTHY_ATTEMPTS: u32 = 30;
const WAIT_HEALTHY_INTERVAL: Duration = Duration::from_secs(2);

/// Typed wrapper over the sandbox provider's lifecycle endpoints and the
/// agent server's HTTP+SSE endpoints. One client is shared by every
/// session actor; all calls are stateless aside from the HTTP connection
/// pool `reqwest::Client` keeps internally.
#[derive(Clone)]
pub struct SandboxClient {
    http: reqwest::Client,
    provider_base_url: String,
    provider_api_key: Option<String>,
}

impl SandboxClient {
    pub fn new(provider_base_url: impl Into<String>, provider_api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            provider_base_url: provider_base_url.into(),
            provider_api_key,
        }
    }

    fn provider_request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}{}", self.provider_base_url.trim_end_matches('/'), path);
        let mut req = self.http.request(method, url);
        if let Some(key) = &self.provider_api_key {
            req = req.bearer_auth(key);
        }
        req
    }

    async fn send_json<T: serde::de::DeserializeOwned>(
        req: reqwest::RequestBuilder,
        timeout: Duration,
    ) -> Result<T, SandboxError> {
        let resp = req
            .timeout(timeout)
            .send()
            .await
            .map_err(SandboxError::from_transport)?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(SandboxError::from_status(status, body));
        }
        resp.json::<T>()
            .await
            .map_err(|e| SandboxError::BadRequest(e.to_string()))
    }

    // ---- sandbox-provider operations ----

    pub async fn create_sandbox(
        &self,
        repo: &str,
        git_credential: &str,
        provider_api_key: Option<String>,
    ) -> Result<CreateSandboxResponse, SandboxError> {
        let body = CreateSandboxRequest {
            repo: repo.to_string(),
            git_credential: git_credential.to_string(),
            provider_api_key,
        };
        let req = self.provider_request(reqwest::Method::POST, "/sandboxes").json(&body);
        Self::send_json(req, Duration::from_secs(120)).await
    }

    pub async fn snapshot_sandbox(
        &self,
        sandbox_id: &str,
        explicit: bool,
    ) -> Result<SnapshotResponse, SandboxError> {
        let path = format!("/sandboxes/{sandbox_id}/snapshot");
        let req = self.provider_request(reqwest::Method::POST, &path);
        let timeout = if explicit { Duration::from_secs(30) } else { Duration::from_secs(10) };
        Self::send_json(req, timeout).await
    }

    /// Pausing a sandbox that's already dead is reported by the provider as
    /// either `404` (the sandbox is simply gone) or `409` (it still exists
    /// but is in a state that can't be paused); both mean the same thing to
    /// the caller — "nothing to pause, recover from the last snapshot if
    /// there is one" — so both are folded into `Conflict` here rather than
    /// only `409`, which `SandboxError::from_status` maps generically.
    pub async fn pause_sandbox(&self, sandbox_id: &str) -> Result<SnapshotResponse, SandboxError> {
        let path = format!("/sandboxes/{sandbox_id}/pause");
        let req = self.provider_request(reqwest::Method::POST, &path);
        match Self::send_json(req, Duration::from_secs(30)).await {
            Err(SandboxError::NotFound(body)) => Err(SandboxError::Conflict(body)),
            other => other,
        }
    }

    pub async fn resume_sandbox(&self, snapshot_id: &str) -> Result<ResumeResponse, SandboxError> {
        let path = format!("/snapshots/{snapshot_id}/resume");
        let req = self.provider_request(reqwest::Method::POST, &path);
        Self::send_json(req, Duration::from_secs(120)).await
    }

    /// Best-effort termination: errors are logged and swallowed.
    pub async fn terminate_sandbox(&self, sandbox_id: &str) {
        let path = format!("/sandboxes/{sandbox_id}");
        let req = self.provider_request(reqwest::Method::DELETE, &path);
        if let Err(err) = req.timeout(Duration::from_secs(30)).send().await {
            warn!(sandbox_id, %err, "terminate_sandbox failed, ignoring");
        }
    }

    // ---- agent-server operations (against tunnel_url) ----

    /// Poll `/global/health` up to 30 times, 2 s apart. Succeeds on the
    /// first attempt that returns a successful status.
    pub async fn wait_healthy(&self, tunnel_url: &str) -> Result<(), SandboxError> {
        let url = format!("{}/global/health", tunnel_url.trim_end_matches('/'));
        let mut last_err = SandboxError::NetworkTimeout("no attempts made".into());
        for attempt in 0..WAIT_HEALTHY_ATTEMPTS {
            match self
                .http
                .get(&url)
                .timeout(Duration::from_secs(5))
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => {
                    last_err = SandboxError::from_status(resp.status(), String::new());
                }
                Err(err) => {
                    last_err = SandboxError::from_transport(err);
                }
            }
            if attempt + 1 < WAIT_HEALTHY_ATTEMPTS {
                tokio::time::sleep(WAIT_HEALTHY_INTERVAL).await;
            }
        }
        Err(last_err)
    }

    /// GET `/global/health` once, with a short timeout, used by the prompt
    /// pipeline's sandbox-reachability probe.
    pub async fn probe_health(&self, tunnel_url: &str) -> Result<(), SandboxError> {
        let url = format!("{}/global/health", tunnel_url.trim_end_matches('/'));
        let resp = self
            .http
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(SandboxError::from_transport)?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(SandboxError::from_status(resp.status(), String::new()))
        }
    }

    pub async fn create_agent_session(&self, tunnel_url: &str) -> Result<String, SandboxError> {
        let url = format!("{}/session", tunnel_url.trim_end_matches('/'));
        let req = self.http.post(&url);
        let resp: AgentSessionResponse = Self::send_json(req, Duration::from_secs(30)).await?;
        Ok(resp.id)
    }

    pub async fn send_prompt(
        &self,
        tunnel_url: &str,
        agent_session_id: &str,
        text: &str,
        model: Option<ModelRef>,
    ) -> Result<(), SandboxError> {
        let url = format!(
            "{}/session/{agent_session_id}/message",
            tunnel_url.trim_end_matches('/')
        );
        let body = SendPromptRequest::text(text, model);
        let req = self.http.post(&url).json(&body);
        let resp = req
            .timeout(Duration::from_secs(180))
            .send()
            .await
            .map_err(SandboxError::from_transport)?;
        if resp.status().is_success() {
            Ok(())
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            Err(SandboxError::from_status(status, body))
        }
    }

    pub async fn fetch_messages(
        &self,
        tunnel_url: &str,
        agent_session_id: &str,
        timeout: Duration,
    ) -> Result<Vec<RawMessage>, SandboxError> {
        let url = format!(
            "{}/session/{agent_session_id}/message",
            tunnel_url.trim_end_matches('/')
        );
        let req = self.http.get(&url);
        let resp: FetchMessagesResponse = Self::send_json(req, timeout).await?;
        Ok(resp.into_messages())
    }

    /// Stream `/event` as SSE `data: <json>` lines until `cancel` fires or
    /// the upstream stream ends. Events that fail to parse are logged and
    /// skipped rather than ending the stream.
    pub fn subscribe_events(
        &self,
        tunnel_url: &str,
        cancel: CancellationToken,
    ) -> impl Stream<Item = RawEvent> + Send + 'static {
        let url = format!("{}/event", tunnel_url.trim_end_matches('/'));
        let http = self.http.clone();
        async_stream::stream! {
            let resp = match http.get(&url).send().await {
                Ok(r) => r,
                Err(err) => {
                    warn!(%err, "subscribe_events: connect failed");
                    return;
                }
            };
            let mut byte_stream = resp.bytes_stream();
            let mut buf = String::new();
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("subscribe_events: cancelled");
                        return;
                    }
                    chunk = byte_stream.next() => {
                        let Some(chunk) = chunk else { return };
                        match chunk {
                            Ok(bytes) => {
                                buf.push_str(&String::from_utf8_lossy(&bytes));
                                for event in drain_complete_sse_lines(&mut buf) {
                                    yield event;
                                }
                            }
                            Err(err) => {
                                warn!(%err, "subscribe_events: stream error");
                                return;
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Drain all complete `\n`-terminated `data:` lines from `buf`, leaving any
/// trailing partial line (a single SSE event may be split across TCP
/// packets) for the next chunk.
fn drain_complete_sse_lines(buf: &mut String) -> Vec<RawEvent> {
    let mut events = Vec::new();
    while let Some(nl_pos) = buf.find('\n') {
        let line = buf[..nl_pos].trim_end_matches('\r').to_string();
        *buf = buf[nl_pos + 1..].to_string();
        if let Some(data) = line.strip_prefix("data: ") {
            let data = data.trim();
            if data.is_empty() {
                continue;
            }
            match serde_json::from_str::<RawEvent>(data) {
                Ok(ev) => events.push(ev),
                Err(err) => debug!(%err, raw = data, "unparseable SSE event, skipping"),
            }
        }
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_complete_lines_and_keeps_partial_tail() {
        let mut buf = String::from(
            "data: {\"type\":\"server.connected\"}\ndata: {\"type\":\"session.i",
        );
        let events = drain_complete_sse_lines(&mut buf);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "server.connected");
        assert_eq!(buf, "data: {\"type\":\"session.i");
    }

    #[test]
    fn skips_unparseable_lines_without_dropping_later_events() {
        let mut buf = String::from("data: not json\ndata: {\"type\":\"error\"}\n");
        let events = drain_complete_sse_lines(&mut buf);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, "error");
    }

    #[tokio::test]
    async fn pause_sandbox_maps_404_to_conflict_same_as_409() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sandboxes/dead/pause"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = SandboxClient::new(server.uri(), None);
        let err = client.pause_sandbox("dead").await.unwrap_err();
        assert!(matches!(err, SandboxError::Conflict(_)));
    }

    #[tokio::test]
    async fn pause_sandbox_maps_409_to_conflict() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/sandboxes/dead/pause"))
            .respond_with(ResponseTemplate::new(409))
            .mount(&server)
            .await;

        let client = SandboxClient::new(server.uri(), None);
        let err = client.pause_sandbox("dead").await.unwrap_err();
        assert!(matches!(err, SandboxError::Conflict(_)));
    }
}

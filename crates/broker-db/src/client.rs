// SPDX-License-Identifier: MIT
use std::time::Duration;

use crate::error::DbError;
use crate::retry::with_retry;
use crate::types::{
    GithubTokenResponse, TokenValidation, UpsertMessageRequest, UpsertStatusRequest,
    UserSecretResponse,
};

const CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for the database of record. Every call is wrapped in
/// [`with_retry`] and returns `None` on exhaustion rather than an error —
/// persistence failures must never abort a session's in-memory progress.
#[derive(Clone)]
pub struct DbClient {
    http: reqwest::Client,
}

impl Default for DbClient {
    fn default() -> Self {
        Self::new()
    }
}

impl DbClient {
    pub fn new() -> Self {
        Self { http: reqwest::Client::new() }
    }

    async fn post_json<B: serde::Serialize, T: serde::de::DeserializeOwned>(
        &self,
        base_url: &str,
        path: &str,
        bearer: Option<&str>,
        body: &B,
    ) -> Result<T, DbError> {
        let url = format!("{}{path}", base_url.trim_end_matches('/'));
        let mut req = self.http.post(&url).json(body);
        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }
        let resp = req
            .timeout(CALL_TIMEOUT)
            .send()
            .await
            .map_err(DbError::from_transport)?;
        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            return Err(DbError::from_status(status, text));
        }
        resp.json::<T>().await.map_err(|e| DbError::BadRequest(e.to_string()))
    }

    /// `POST /api/validate-token`. Returns `None` both on transport
    /// exhaustion and on a clean 401 (invalid/expired token) — both mean
    /// "no authenticated identity" to the caller.
    pub async fn validate_token(&self, base_url: &str, bearer: &str) -> Option<TokenValidation> {
        #[derive(serde::Serialize)]
        struct Req<'a> {
            token: &'a str,
        }
        with_retry("validate_token", || {
            self.post_json(base_url, "/api/validate-token", None, &Req { token: bearer })
        })
        .await
    }

    /// `POST /api/session-status`. Idempotent; last-writer-wins.
    pub async fn upsert_status(
        &self,
        base_url: &str,
        bearer: &str,
        req: &UpsertStatusRequest,
    ) -> Option<()> {
        with_retry("upsert_status", || async {
            self.post_json::<_, serde_json::Value>(
                base_url,
                "/api/session-status",
                Some(bearer),
                req,
            )
            .await?;
            Ok(())
        })
        .await
    }

    /// `POST /api/sync-message`. Unique by `(sessionId, messageId)`.
    pub async fn upsert_message(
        &self,
        base_url: &str,
        bearer: &str,
        req: &UpsertMessageRequest,
    ) -> Option<()> {
        with_retry("upsert_message", || async {
            self.post_json::<_, serde_json::Value>(base_url, "/api/sync-message", Some(bearer), req)
                .await?;
            Ok(())
        })
        .await
    }

    /// `POST /api/github-token`.
    pub async fn fetch_git_credential(&self, base_url: &str, bearer: &str) -> Option<String> {
        with_retry("fetch_git_credential", || async {
            let resp: GithubTokenResponse = self
                .post_json(base_url, "/api/github-token", Some(bearer), &serde_json::json!({}))
                .await?;
            Ok(resp.access_token)
        })
        .await
    }

    /// `POST /api/user-secret`. A clean 404 means "no key configured" and
    /// is reported as `Some(None)`, distinct from retry exhaustion
    /// (`None`), so the caller can tell "provider has no key" apart from
    /// "we couldn't find out".
    pub async fn fetch_provider_api_key(
        &self,
        base_url: &str,
        bearer: &str,
        provider: &str,
    ) -> Option<Option<String>> {
        #[derive(serde::Serialize)]
        struct Req<'a> {
            provider: &'a str,
        }
        with_retry("fetch_provider_api_key", || async {
            match self
                .post_json::<_, UserSecretResponse>(
                    base_url,
                    "/api/user-secret",
                    Some(bearer),
                    &Req { provider },
                )
                .await
            {
                Ok(resp) => Ok(Some(resp.api_key)),
                Err(DbError::NotFound) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .await
    }
}

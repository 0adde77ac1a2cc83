// SPDX-License-Identifier: MIT
//!
//! Per-session durable key-value store. Three keys matter: `session` (the
//! serialized [`crate::model::SessionState`]), `dbSiteUrl`, and
//! `bearerToken` — the auxiliary auth context the actor needs to make DB
//! calls on the session's behalf after a restart.
//!
//! The design note on the durable store abstraction says to swap in
//! whatever the host platform offers; this crate ships the simplest thing
//! that satisfies the single-writer/durable-write-ordering contract — a
//! JSON file per session under a configured directory — and leaves room
//! for a different backend (e.g. an embedded KV engine) behind the same
//! trait.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::CoreError;

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, session_id: &str, key: &str) -> Result<Option<String>, CoreError>;
    async fn put(&self, session_id: &str, key: &str, value: &str) -> Result<(), CoreError>;
}

pub async fn get_json<T: DeserializeOwned>(
    store: &dyn SessionStore,
    session_id: &str,
    key: &str,
) -> Result<Option<T>, CoreError> {
    match store.get(session_id, key).await? {
        Some(raw) => {
            let value = serde_json::from_str(&raw)
                .map_err(|e| CoreError::Store(format!("decoding {key}: {e}")))?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

pub async fn put_json<T: Serialize + Sync>(
    store: &dyn SessionStore,
    session_id: &str,
    key: &str,
    value: &T,
) -> Result<(), CoreError> {
    let raw = serde_json::to_string(value)
        .map_err(|e| CoreError::Store(format!("encoding {key}: {e}")))?;
    store.put(session_id, key, &raw).await
}

/// File-backed [`SessionStore`]: one JSON file per `(session_id, key)`
/// under `root/<session_id>/<key>.json`.
pub struct FileSessionStore {
    root: PathBuf,
}

impl FileSessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, session_id: &str, key: &str) -> PathBuf {
        self.root.join(session_id).join(format!("{key}.json"))
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn get(&self, session_id: &str, key: &str) -> Result<Option<String>, CoreError> {
        let path = self.path_for(session_id, key);
        match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(CoreError::Store(format!("reading {}: {e}", path.display()))),
        }
    }

    async fn put(&self, session_id: &str, key: &str, value: &str) -> Result<(), CoreError> {
        let path = self.path_for(session_id, key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CoreError::Store(format!("creating {}: {e}", parent.display())))?;
        }
        // Write to a temp file then rename, so a crash mid-write never
        // leaves a torn `session` key behind.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, value)
            .await
            .map_err(|e| CoreError::Store(format!("writing {}: {e}", tmp.display())))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| CoreError::Store(format!("renaming {}: {e}", tmp.display())))?;
        Ok(())
    }
}

pub fn default_store_root() -> PathBuf {
    Path::new(".session-broker").join("sessions")
}

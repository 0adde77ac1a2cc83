// SPDX-License-Identifier: MIT
//!
//! Maps a session id to the single [`ActorHandle`] that owns it, creating
//! the actor lazily on first route. A `DashMap` keyed by session id backs
//! the registry for lock-free concurrent lookups across sessions.

use std::sync::Arc;

use broker_core::store::SessionStore;
use broker_core::{ActorHandle, SessionActor};
use broker_db::DbClient;
use broker_sandbox::SandboxClient;
use dashmap::DashMap;
use tokio::sync::Mutex;

pub struct SessionRegistry {
    store: Arc<dyn SessionStore>,
    sandbox: SandboxClient,
    db: DbClient,
    actors: DashMap<String, ActorHandle>,
    /// Serializes actor creation so two concurrent first-routes for the
    /// same session id never spawn two actors racing over the same
    /// durable-storage key.
    create_lock: Mutex<()>,
}

impl SessionRegistry {
    pub fn new(store: Arc<dyn SessionStore>, sandbox: SandboxClient, db: DbClient) -> Arc<Self> {
        Arc::new(Self { store, sandbox, db, actors: DashMap::new(), create_lock: Mutex::new(()) })
    }

    pub async fn get_or_create(&self, session_id: &str) -> ActorHandle {
        if let Some(handle) = self.actors.get(session_id) {
            return handle.clone();
        }
        let _guard = self.create_lock.lock().await;
        if let Some(handle) = self.actors.get(session_id) {
            return handle.clone();
        }
        let handle = SessionActor::spawn(
            session_id.to_string(),
            self.store.clone(),
            self.sandbox.clone(),
            self.db.clone(),
        )
        .await;
        self.actors.insert(session_id.to_string(), handle.clone());
        handle
    }
}

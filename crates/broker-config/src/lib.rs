// SPDX-License-Identifier: MIT
//!
//! Broker configuration, loaded from layered YAML.
//!
//! Search order (later overrides earlier, deep-merged — see [`loader::load`]):
//! 1. `/etc/session-broker/config.yaml`
//! 2. `~/.config/session-broker/config.yaml`
//! 3. `.session-broker/config.yaml` (workspace-local)
//! 4. An explicit path passed to [`load`].
//!
//! All defaults are production-safe: loopback bind, conservative rate limit,
//! no CORS origins allowed until configured explicitly.

pub mod loader;

pub use loader::load;

use serde::{Deserialize, Serialize};

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}
fn default_rate_limit_per_minute() -> u32 {
    100
}
fn default_rate_limit_window_secs() -> u64 {
    60
}
fn default_max_body_bytes() -> usize {
    1024 * 1024
}
fn default_sandbox_create_timeout_secs() -> u64 {
    120
}

/// Top-level broker configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
}

/// HTTP/WebSocket listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Origins allowed by CORS. Empty means no cross-origin requests allowed.
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,
    #[serde(default = "default_rate_limit_per_minute")]
    pub rate_limit_per_user_per_minute: u32,
    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_secs: u64,
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            cors_allowed_origins: Vec::new(),
            rate_limit_per_user_per_minute: default_rate_limit_per_minute(),
            rate_limit_window_secs: default_rate_limit_window_secs(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

/// Database-of-record client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    /// Base URL of the database-of-record HTTP API, e.g. `https://db.internal`.
    /// May be overridden per-session by `dbSiteUrl` supplied at `initialize`.
    pub base_url: Option<String>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self { base_url: None }
    }
}

/// Sandbox-provider client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    pub provider_base_url: Option<String>,
    pub provider_api_key: Option<String>,
    #[serde(default = "default_sandbox_create_timeout_secs")]
    pub create_timeout_secs: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            provider_base_url: None,
            provider_api_key: None,
            create_timeout_secs: default_sandbox_create_timeout_secs(),
        }
    }
}

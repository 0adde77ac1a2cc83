// SPDX-License-Identifier: MIT
mod cli;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use broker_core::store::{FileSessionStore, SessionStore};
use broker_db::DbClient;
use broker_gateway::router::AppState;
use broker_gateway::{build_router, SessionRegistry, UserRateLimiter};
use broker_sandbox::SandboxClient;
use cli::{Cli, Commands, ConfigCommands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match &cli.command {
        Commands::Config { command: ConfigCommands::Print } => {
            let config = broker_config::load(cli.config.as_deref())?;
            println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
            Ok(())
        }
        Commands::Serve => run_serve(cli.config.as_deref()).await,
    }
}

async fn run_serve(config_path: Option<&std::path::Path>) -> anyhow::Result<()> {
    let config = broker_config::load(config_path)?;

    let db_base_url = config
        .db
        .base_url
        .clone()
        .context("db.base_url must be set in config to run the gateway")?;
    let provider_base_url = config
        .sandbox
        .provider_base_url
        .clone()
        .context("sandbox.provider_base_url must be set in config to run the gateway")?;

    let store: Arc<dyn SessionStore> = Arc::new(FileSessionStore::new(broker_core::store::default_store_root()));
    let sandbox = SandboxClient::new(provider_base_url, config.sandbox.provider_api_key.clone());
    let db = DbClient::new();
    let registry = SessionRegistry::new(store, sandbox.clone(), db.clone());
    let rate_limiter = Arc::new(UserRateLimiter::new(
        config.http.rate_limit_per_user_per_minute,
        Duration::from_secs(config.http.rate_limit_window_secs),
    ));

    let state = AppState {
        registry,
        db,
        sandbox,
        db_base_url,
        rate_limiter,
        max_body_bytes: config.http.max_body_bytes,
        cors_allowed_origins: config.http.cors_allowed_origins.clone(),
    };

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&config.http.bind)
        .await
        .with_context(|| format!("binding {}", config.http.bind))?;
    info!(bind = %config.http.bind, "session broker listening");
    axum::serve(listener, app).await.context("gateway server exited")
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .try_init();
}

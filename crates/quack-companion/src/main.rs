mod chat;
mod compliance;
mod config;
mod credentials;
mod error;
mod guidelines;
mod mcp_api;
mod server;
mod session;
#[cfg(test)]
mod testing;

use std::sync::Arc;

use rmcp::{ServiceExt, transport::stdio};
use tracing::info;
use tracing_subscriber::EnvFilter;

use quack_common::github::GitHubClient;
use quack_common::quack_api::QuackClient;
use quack_common::redis::RedisStore;
use quack_common::store::{self, FileStore, MemoryStore, StateStore};

use config::Config;
use server::CompanionServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    info!("starting quack-companion MCP server");

    let config = Config::from_env()?;
    info!(
        workspace = ?config.workspace,
        default_endpoint = config.default_endpoint.as_deref().unwrap_or("<none>"),
        timeout_secs = config.http_timeout.map(|t| t.as_secs()),
        "configuration loaded"
    );

    let store = open_store(&config).await?;
    let installation_id = store::installation_id(store.as_ref()).await?;
    info!(installation_id = %installation_id, "installation identified");

    let api = Arc::new(QuackClient::new(config.client_config())?);
    let github = GitHubClient::new(&config.github_api_url)?;

    let server = CompanionServer::new(config, store, api, github, installation_id).await?;
    server.bootstrap().await;

    info!("MCP server ready, serving on stdio");
    let service = server.serve(stdio()).await.inspect_err(|e| {
        tracing::error!(error = %e, "MCP server error");
    })?;

    service.waiting().await?;
    info!("MCP server shut down");
    Ok(())
}

/// Redis when `REDIS_URL` answers, else the JSON state file, else memory.
async fn open_store(config: &Config) -> anyhow::Result<Arc<dyn StateStore>> {
    if let Some(url) = &config.redis_url {
        let redis = RedisStore::new(url)?;
        if redis.is_available().await {
            info!("redis connected, using redis state store");
            return Ok(Arc::new(redis));
        }
        info!("redis unavailable, falling back");
    }

    if let Some(path) = &config.state_path {
        let file = FileStore::open(path)?;
        info!(path = %file.path().display(), "using file state store");
        return Ok(Arc::new(file));
    }

    info!("no persistent state store configured, state is kept in memory");
    Ok(Arc::new(MemoryStore::new()))
}

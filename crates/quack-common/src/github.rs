//! GitHub collaborator: token discovery and repository id lookup.
//!
//! The Compliance API keys repositories by their numeric GitHub id and issues
//! its own tokens in exchange for a GitHub token.
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::debug;

use crate::quack_api::ApiError;

pub const DEFAULT_API_URL: &str = "https://api.github.com";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct GitHubRepo {
    pub id: i64,
    pub full_name: String,
}

/// Resolve a GitHub token. Order: `GH_TOKEN` → `GITHUB_TOKEN` → `gh auth token`.
/// Empty values are skipped. `None` when nothing is available.
pub async fn resolve_github_token() -> Option<String> {
    for var in ["GH_TOKEN", "GITHUB_TOKEN"] {
        if let Some(token) = std::env::var(var).ok().filter(|t| !t.trim().is_empty()) {
            debug!(source = var, "github token resolved from environment");
            return Some(token.trim().to_string());
        }
    }
    token_from_gh_cli().await
}

async fn token_from_gh_cli() -> Option<String> {
    let output = Command::new("gh").args(["auth", "token"]).output().await.ok()?;
    if !output.status.success() {
        return None;
    }
    let token = String::from_utf8(output.stdout).ok()?;
    let token = token.trim().to_string();
    if token.is_empty() {
        None
    } else {
        debug!(source = "gh", "github token resolved from gh cli");
        Some(token)
    }
}

#[derive(Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    api_url: String,
}

impl GitHubClient {
    pub fn new(api_url: &str) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("quack-companion/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
        })
    }

    /// `GET /repos/{owner}/{name}`. The token is optional; public repositories
    /// resolve without one.
    pub async fn repository(&self, full_name: &str, token: Option<&str>) -> Result<GitHubRepo, ApiError> {
        let url = format!("{}/repos/{full_name}", self.api_url);
        let mut req = self
            .http
            .get(&url)
            .header(reqwest::header::ACCEPT, "application/vnd.github+json");
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }
        let bytes = resp.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

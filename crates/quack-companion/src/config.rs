use std::path::PathBuf;
use std::time::Duration;

use quack_common::github::DEFAULT_API_URL;
use quack_common::quack_api::QuackClientConfig;

use crate::error::AppError;

/// Application configuration loaded explicitly from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Endpoint adopted when no endpoint has been persisted yet.
    pub default_endpoint: Option<String>,
    /// Redis connection URL (e.g. "redis://127.0.0.1:6379"). Takes precedence over `state_path`.
    pub redis_url: Option<String>,
    /// JSON state file used when Redis is not configured.
    pub state_path: Option<PathBuf>,
    /// Directory whose git remotes identify the active repository.
    pub workspace: Option<PathBuf>,
    pub git_path: String,
    pub github_api_url: String,
    pub http_timeout: Option<Duration>,
    pub max_error_body_bytes: Option<usize>,
}

impl Config {
    /// All optional:
    /// - `QUACK_API_ENDPOINT`: initial Compliance API endpoint
    /// - `REDIS_URL`: Redis-backed state store
    /// - `QUACK_STATE_PATH`: JSON-file state store
    /// - `QUACK_WORKSPACE`: workspace directory (default: current directory)
    /// - `QUACK_GIT_PATH`: git executable (default: `git`)
    /// - `GITHUB_API_URL`: GitHub REST base URL
    /// - `QUACK_HTTP_TIMEOUT_SECS`, `QUACK_MAX_ERROR_BODY_BYTES`
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, AppError> {
        let var = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let workspace = match var("QUACK_WORKSPACE") {
            Some(path) => Some(PathBuf::from(path)),
            None => std::env::current_dir().ok(),
        };

        let http_timeout = parse_number::<u64>("QUACK_HTTP_TIMEOUT_SECS", var("QUACK_HTTP_TIMEOUT_SECS"))?
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);
        let max_error_body_bytes =
            parse_number::<usize>("QUACK_MAX_ERROR_BODY_BYTES", var("QUACK_MAX_ERROR_BODY_BYTES"))?;

        Ok(Self {
            default_endpoint: var("QUACK_API_ENDPOINT"),
            redis_url: var("REDIS_URL"),
            state_path: var("QUACK_STATE_PATH").map(PathBuf::from),
            workspace,
            git_path: var("QUACK_GIT_PATH").unwrap_or_else(|| "git".to_string()),
            github_api_url: var("GITHUB_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            http_timeout,
            max_error_body_bytes,
        })
    }

    pub fn client_config(&self) -> QuackClientConfig {
        let mut config = QuackClientConfig {
            timeout: self.http_timeout,
            ..QuackClientConfig::default()
        };
        if let Some(max) = self.max_error_body_bytes {
            config.max_error_body_bytes = max;
        }
        config
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, raw: Option<String>) -> Result<Option<T>, AppError> {
    raw.map(|v| {
        v.parse::<T>()
            .map_err(|_| AppError::Configuration(format!("{name} must be a non-negative integer, got {v:?}")))
    })
    .transpose()
}

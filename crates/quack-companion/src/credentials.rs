//! Endpoint and token validity state machine.
//!
//! ```text
//! Unconfigured ──set_endpoint──▶ EndpointUnverified ──probe ok──▶ EndpointValid
//!                                                                   ├─ TokenMissing
//!                                                                   ├─ TokenValid
//!                                                                   └─ TokenExpired
//! ```
//!
//! Tokens are endpoint-scoped: every endpoint change drops the token. Every
//! gated call goes through [`require_authenticated`].
use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use quack_common::quack_api::{ApiAuth, ApiError, ComplianceApi, ProbeResponse};
use quack_common::store::{self, StateStore};

use crate::error::AppError;

const CREDENTIALS_KEY: &str = "credentials";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TokenState {
    #[default]
    Missing,
    Valid {
        token: String,
    },
    Expired,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialState {
    pub endpoint: Option<String>,
    pub endpoint_valid: bool,
    pub token: TokenState,
}

impl CredentialState {
    pub fn token_valid(&self) -> bool {
        matches!(self.token, TokenState::Valid { .. })
    }

    /// The bearer token, only while it is believed valid.
    pub fn token(&self) -> Option<&str> {
        match &self.token {
            TokenState::Valid { token } => Some(token),
            _ => None,
        }
    }

    /// The valid token, or why there is none.
    fn held_token(&self) -> Result<&str, GateError> {
        self.token().ok_or(match self.token {
            TokenState::Expired => GateError::TokenExpired,
            _ => GateError::TokenMissing,
        })
    }

    pub fn phase(&self) -> CredentialPhase {
        match (&self.endpoint, self.endpoint_valid) {
            (None, _) => CredentialPhase::Unconfigured,
            (Some(_), false) => CredentialPhase::EndpointUnverified,
            (Some(_), true) => CredentialPhase::EndpointValid(match self.token {
                TokenState::Missing => TokenPhase::Missing,
                TokenState::Valid { .. } => TokenPhase::Valid,
                TokenState::Expired => TokenPhase::Expired,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenPhase {
    Missing,
    Valid,
    Expired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialPhase {
    Unconfigured,
    EndpointUnverified,
    EndpointValid(TokenPhase),
}

impl CredentialPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialPhase::Unconfigured => "unconfigured",
            CredentialPhase::EndpointUnverified => "endpoint_unverified",
            CredentialPhase::EndpointValid(TokenPhase::Missing) => "token_missing",
            CredentialPhase::EndpointValid(TokenPhase::Valid) => "token_valid",
            CredentialPhase::EndpointValid(TokenPhase::Expired) => "token_expired",
        }
    }
}

/// Result of the authenticated validation probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum AccessStatus {
    Ok,
    UnknownRoute,
    ExpiredToken,
    UnreachableEndpoint,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    #[error("no API endpoint configured")]
    NoEndpoint,

    #[error("endpoint {0} did not answer as a Quack API instance")]
    EndpointUnverified(String),

    #[error("not authenticated")]
    TokenMissing,

    #[error("access token expired")]
    TokenExpired,
}

/// The single guard in front of every API call.
pub fn require_authenticated(state: &CredentialState) -> Result<ApiAuth, GateError> {
    let endpoint = state.endpoint.as_deref().ok_or(GateError::NoEndpoint)?;
    if !state.endpoint_valid {
        return Err(GateError::EndpointUnverified(endpoint.to_string()));
    }
    let token = state.held_token()?;
    Ok(ApiAuth {
        endpoint: endpoint.to_string(),
        token: token.to_string(),
    })
}

/// Unauthenticated probe: 2xx or 401 means the route exists and enforces auth.
pub fn classify_endpoint_probe(result: &Result<ProbeResponse, ApiError>) -> bool {
    match result {
        Ok(probe) => (200..300).contains(&probe.status) || probe.status == 401,
        Err(_) => false,
    }
}

pub fn classify_access(result: &Result<ProbeResponse, ApiError>) -> AccessStatus {
    match result {
        Ok(probe) if (200..300).contains(&probe.status) => AccessStatus::Ok,
        Ok(probe) if probe.status == 404 => AccessStatus::UnknownRoute,
        Ok(probe) if probe.status == 401 => AccessStatus::ExpiredToken,
        Ok(_) => AccessStatus::Other,
        Err(ApiError::Unreachable(_)) | Err(ApiError::InvalidUrl(_)) => {
            AccessStatus::UnreachableEndpoint
        }
        Err(_) => AccessStatus::Other,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    /// A token was already held and reused.
    Cached,
    /// A new token was exchanged.
    Fresh,
}

pub struct CredentialManager {
    store: Arc<dyn StateStore>,
    api: Arc<dyn ComplianceApi>,
    state: CredentialState,
}

impl CredentialManager {
    pub async fn load(
        store: Arc<dyn StateStore>,
        api: Arc<dyn ComplianceApi>,
    ) -> Result<Self, AppError> {
        let state = store::get_json(store.as_ref(), &store::key(CREDENTIALS_KEY))
            .await?
            .unwrap_or_default();
        Ok(Self { store, api, state })
    }

    pub fn state(&self) -> &CredentialState {
        &self.state
    }

    pub fn phase(&self) -> CredentialPhase {
        self.state.phase()
    }

    pub fn require_authenticated(&self) -> Result<ApiAuth, AppError> {
        Ok(require_authenticated(&self.state)?)
    }

    pub async fn verify_endpoint(&self, url: &str) -> bool {
        let result = self.api.validate(url, None).await;
        if let Err(e) = &result {
            warn!(endpoint = url, error = %e, "endpoint probe failed");
        }
        classify_endpoint_probe(&result)
    }

    /// Switch to a new endpoint. The token is always dropped; the probe result
    /// decides between `EndpointUnverified` and `EndpointValid`.
    pub async fn set_endpoint(&mut self, url: &str) -> Result<bool, AppError> {
        let url = url.trim().trim_end_matches('/').to_string();
        if url.is_empty() {
            return Err(AppError::Configuration(
                "Quack endpoint URL is required".to_string(),
            ));
        }
        let valid = self.verify_endpoint(&url).await;
        self.state = CredentialState {
            endpoint: Some(url.clone()),
            endpoint_valid: valid,
            token: TokenState::Missing,
        };
        self.persist().await?;
        if valid {
            info!(endpoint = %url, "endpoint set");
        } else {
            warn!(endpoint = %url, "endpoint set but did not answer as a Quack API instance");
        }
        Ok(valid)
    }

    /// Re-probe the current endpoint, or adopt `fallback` when none is set yet.
    /// The token survives a re-probe of an unchanged endpoint.
    pub async fn revalidate_endpoint(&mut self, fallback: Option<&str>) -> Result<bool, AppError> {
        let Some(endpoint) = self.state.endpoint.clone() else {
            return match fallback {
                Some(url) => self.set_endpoint(url).await,
                None => Ok(false),
            };
        };
        let valid = self.verify_endpoint(&endpoint).await;
        if valid != self.state.endpoint_valid {
            self.state.endpoint_valid = valid;
            self.persist().await?;
        }
        Ok(valid)
    }

    /// Probe with the held token and apply the transition.
    pub async fn check_access(&mut self) -> Result<AccessStatus, AppError> {
        let endpoint = self
            .state
            .endpoint
            .clone()
            .ok_or(GateError::NoEndpoint)?;
        let token = self.state.held_token()?.to_string();
        let result = self.api.validate(&endpoint, Some(&token)).await;
        let status = classify_access(&result);
        if self.apply_access_status(status) {
            self.persist().await?;
        }
        info!(endpoint = %endpoint, status = ?status, "access checked");
        Ok(status)
    }

    /// Returns whether the state changed.
    fn apply_access_status(&mut self, status: AccessStatus) -> bool {
        match status {
            AccessStatus::Ok if !self.state.endpoint_valid => {
                self.state.endpoint_valid = true;
                true
            }
            AccessStatus::ExpiredToken => {
                self.state.token = TokenState::Expired;
                true
            }
            _ => false,
        }
    }

    /// Exchange a GitHub token for an API token, unless one is already held.
    pub async fn login(&mut self, github_token: &str) -> Result<LoginOutcome, AppError> {
        let endpoint = self.state.endpoint.clone().ok_or(GateError::NoEndpoint)?;
        if !self.state.endpoint_valid {
            return Err(GateError::EndpointUnverified(endpoint).into());
        }
        if self.state.token_valid() {
            return Ok(LoginOutcome::Cached);
        }
        let token = self.api.exchange_token(&endpoint, github_token).await?;
        self.state.token = TokenState::Valid { token };
        self.persist().await?;
        info!(endpoint = %endpoint, "authentication successful");
        Ok(LoginOutcome::Fresh)
    }

    pub async fn logout(&mut self) -> Result<(), AppError> {
        self.state.token = TokenState::Missing;
        self.persist().await?;
        info!("logged out");
        Ok(())
    }

    /// Expire the held token when a gated call came back 401.
    pub async fn invalidate_on(&mut self, error: &ApiError) {
        if !error.is_unauthorized() || !self.state.token_valid() {
            return;
        }
        warn!("detected 401 response, marking the access token expired");
        self.state.token = TokenState::Expired;
        if let Err(e) = self.persist().await {
            warn!(error = %e, "failed to persist expired token state");
        }
    }

    /// Pass a gated call's result through [`Self::invalidate_on`].
    pub async fn settle<T>(&mut self, result: Result<T, ApiError>) -> Result<T, AppError> {
        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                self.invalidate_on(&e).await;
                Err(e.into())
            }
        }
    }

    async fn persist(&self) -> Result<(), AppError> {
        store::set_json(self.store.as_ref(), &store::key(CREDENTIALS_KEY), &self.state).await?;
        Ok(())
    }
}

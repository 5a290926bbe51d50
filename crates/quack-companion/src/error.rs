use quack_common::error::CommonError;
use quack_common::quack_api::ApiError;

use crate::credentials::GateError;
use crate::session::SessionError;

/// A check or command that cannot start with the input it was given.
#[derive(Debug, thiserror::Error)]
pub enum Precondition {
    #[error("no code selected")]
    EmptySelection,

    #[error("no guideline to check the code against")]
    NoGuidelines,

    #[error("guideline {0} is not in the current list")]
    UnknownGuideline(i64),

    #[error("message cannot be empty")]
    EmptyMessage,

    #[error("guideline content cannot be empty")]
    EmptyContent,

    #[error("no GitHub token found")]
    NoGithubToken,

    #[error(transparent)]
    Session(#[from] SessionError),
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Common(#[from] CommonError),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("authentication required: {0}")]
    Authentication(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("Quack API returned status code {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("unexpected response from the Quack API: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    Precondition(#[from] Precondition),
}

impl AppError {
    /// The next step a user can take to get past this error.
    pub fn remedy(&self) -> &'static str {
        match self {
            AppError::Common(_) => "Check the state store settings (REDIS_URL or QUACK_STATE_PATH)",
            AppError::Configuration(_) => "Configure the endpoint with set_endpoint",
            AppError::Authentication(_) => "Authenticate with login",
            AppError::Network(_) => {
                "Check that the endpoint is reachable, or configure another one with set_endpoint"
            }
            AppError::Remote { .. } => "Retry, or refresh guidelines with fetch_guidelines",
            AppError::InvalidResponse(_) => "Check that the endpoint runs a compatible Quack API",
            AppError::Precondition(p) => match p {
                Precondition::EmptySelection => "Select the code to check",
                Precondition::NoGuidelines => {
                    "Refresh guidelines with fetch_guidelines, or ask for some with request_guidelines"
                }
                Precondition::UnknownGuideline(_) => {
                    "Pick a guideline from list_guidelines, or refresh with fetch_guidelines"
                }
                Precondition::EmptyMessage => "Type a message",
                Precondition::EmptyContent => "Provide the guideline content",
                Precondition::NoGithubToken => {
                    "Pass github_token, set GH_TOKEN/GITHUB_TOKEN, or run `gh auth login`"
                }
                Precondition::Session(SessionError::NoWorkspace) => {
                    "Open a workspace (set QUACK_WORKSPACE)"
                }
                Precondition::Session(SessionError::NoRemote) => {
                    "Add a GitHub `origin` remote to the repository"
                }
                Precondition::Session(SessionError::Git(_)) => {
                    "Check that git is installed (QUACK_GIT_PATH)"
                }
            },
        }
    }

    /// Message shown to the user: the error followed by its remedy.
    pub fn to_user_message(&self) -> String {
        format!("{self}. {}", self.remedy())
    }
}

impl From<ApiError> for AppError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::Unreachable(msg) => AppError::Network(msg),
            ApiError::Request(e) => AppError::Network(e.to_string()),
            ApiError::InvalidJson(e) => AppError::InvalidResponse(e.to_string()),
            ApiError::InvalidUrl(url) => {
                AppError::Configuration(format!("invalid endpoint URL: {url}"))
            }
            ApiError::Status { status: 401, message } => {
                AppError::Authentication(format!("access token rejected ({message})"))
            }
            ApiError::Status { status, message } => AppError::Remote { status, message },
        }
    }
}

impl From<GateError> for AppError {
    fn from(e: GateError) -> Self {
        match e {
            GateError::NoEndpoint | GateError::EndpointUnverified(_) => {
                AppError::Configuration(e.to_string())
            }
            GateError::TokenMissing | GateError::TokenExpired => {
                AppError::Authentication(e.to_string())
            }
        }
    }
}

impl From<SessionError> for AppError {
    fn from(e: SessionError) -> Self {
        AppError::Precondition(Precondition::Session(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expired_token_status_maps_to_authentication() {
        let err = AppError::from(ApiError::Status {
            status: 401,
            message: "Invalid credentials".into(),
        });
        assert!(matches!(err, AppError::Authentication(_)));
        assert_eq!(err.remedy(), "Authenticate with login");
    }

    #[test]
    fn other_status_keeps_the_code() {
        let err = AppError::from(ApiError::Status {
            status: 503,
            message: "down".into(),
        });
        assert!(matches!(err, AppError::Remote { status: 503, .. }));
    }

    #[test]
    fn gate_errors_split_between_configuration_and_authentication() {
        assert!(matches!(
            AppError::from(GateError::NoEndpoint),
            AppError::Configuration(_)
        ));
        assert!(matches!(
            AppError::from(GateError::TokenExpired),
            AppError::Authentication(_)
        ));
    }

    #[test]
    fn user_message_carries_the_remedy() {
        let msg = AppError::from(Precondition::EmptySelection).to_user_message();
        assert_eq!(msg, "no code selected. Select the code to check");
    }
}

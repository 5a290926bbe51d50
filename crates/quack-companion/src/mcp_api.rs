use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use quack_common::model::{ChatMessage, Guideline};

use crate::credentials::AccessStatus;
use crate::guidelines::GuidelineViewState;

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SetEndpointParams {
    /// Base URL of the Quack Compliance API, e.g. "https://api.quack.example".
    pub url: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct LoginParams {
    /// GitHub token to exchange. Defaults to GH_TOKEN, GITHUB_TOKEN, then `gh auth token`.
    pub github_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CreateGuidelineParams {
    /// Guideline text. The first line becomes the title.
    pub content: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct EditGuidelineParams {
    pub guideline_id: i64,
    /// Replacement guideline text.
    pub content: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct DeleteGuidelineParams {
    pub guideline_id: i64,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CheckGuidelineParams {
    /// ID of a guideline from list_guidelines.
    pub guideline_id: i64,
    /// The selected code snippet.
    pub code: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct CheckRepositoryParams {
    /// The selected code snippet.
    pub code: String,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct SendChatMessageParams {
    pub message: String,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct StatusResponse {
    /// One of unconfigured, endpoint_unverified, token_missing, token_valid, token_expired
    pub phase: String,
    pub endpoint: Option<String>,
    pub endpoint_valid: bool,
    pub token_valid: bool,
    /// `owner/name` of the workspace repository, when it has a GitHub origin
    pub repository: Option<String>,
    /// Scope of the cached guideline list: `repo:{id}` or `account`
    pub guideline_scope: Option<String>,
    pub guideline_count: usize,
    pub chat_messages: usize,
    pub installation_id: String,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct SetEndpointResponse {
    pub endpoint: String,
    pub endpoint_valid: bool,
    pub phase: String,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct LoginResponse {
    pub phase: String,
    /// True when an already valid token was kept instead of exchanging a new one
    pub reused_token: bool,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct AccessResponse {
    pub status: AccessStatus,
    pub phase: String,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct GuidelineListResponse {
    pub scope: Option<String>,
    pub repository: Option<String>,
    pub guidelines: Vec<GuidelineViewState>,
    /// Hint shown when the list is empty
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct GuidelineResponse {
    pub guideline: Guideline,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct RequestGuidelinesResponse {
    pub repository: String,
    pub repo_id: i64,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ChatReplyResponse {
    pub reply: String,
    pub messages: usize,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct ChatHistoryResponse {
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct OkResponse {
    pub ok: bool,
}

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A coding guideline a snippet can be checked against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Guideline {
    /// Server-assigned identifier, unique within a repository
    pub id: i64,
    /// Display rank, ascending
    pub order: i64,
    pub title: String,
    pub details: String,
}

/// Guideline as it arrives on the wire.
///
/// Current deployments send `{id, order, title, details}`; older ones send
/// `{id, content, creator_id, created_at, updated_at}`. Both collapse into
/// [`Guideline`] here so nothing past the API boundary sees the legacy shape.
#[derive(Debug, Clone, Deserialize)]
pub struct RawGuideline {
    pub id: i64,
    #[serde(default)]
    pub order: Option<i64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub creator_id: Option<i64>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl From<RawGuideline> for Guideline {
    fn from(raw: RawGuideline) -> Self {
        let content = raw.content.unwrap_or_default();
        let title = raw
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| content.lines().next().unwrap_or_default().trim().to_string());
        let details = raw.details.unwrap_or(content);
        Self {
            id: raw.id,
            order: raw.order.unwrap_or(0),
            title,
            details,
        }
    }
}

/// Stable sort by display rank. Legacy guidelines all rank 0 and keep server order.
pub fn sort_by_order(guidelines: &mut [Guideline]) {
    guidelines.sort_by_key(|g| g.order);
}

/// Verdict for one guideline against one snippet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ComplianceResult {
    pub guideline_id: i64,
    pub is_compliant: bool,
    #[serde(default)]
    pub comment: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// One decoded line of the chat stream.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamingMessage {
    pub message: StreamingContent,
    #[serde(default)]
    pub done: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamingContent {
    #[serde(default)]
    pub content: String,
}

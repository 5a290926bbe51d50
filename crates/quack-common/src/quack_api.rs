use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::model::{sort_by_order, ChatMessage, ComplianceResult, Guideline, RawGuideline, StreamingMessage};

const VALIDATE_ROUTE: &str = "/api/v1/login/validate";

#[derive(Clone, Debug)]
pub struct QuackClientConfig {
    /// Per-request timeout. `None` leaves the transport default in place.
    pub timeout: Option<Duration>,
    pub max_error_body_bytes: usize,
    pub user_agent: String,
}

impl Default for QuackClientConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            max_error_body_bytes: 8 * 1024,
            user_agent: concat!("quack-companion/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("endpoint unreachable: {0}")]
    Unreachable(String),

    #[error("request failed: {0}")]
    Request(reqwest::Error),

    #[error("invalid response JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("API returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("invalid endpoint URL: {0}")]
    InvalidUrl(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() {
            ApiError::Unreachable(e.to_string())
        } else {
            ApiError::Request(e)
        }
    }
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status() == Some(StatusCode::UNAUTHORIZED.as_u16())
    }
}

/// Endpoint and bearer token for a gated call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiAuth {
    pub endpoint: String,
    pub token: String,
}

/// Outcome of `GET /api/v1/login/validate`. Non-2xx statuses are not errors here;
/// the credential state machine classifies them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResponse {
    pub status: u16,
    pub user_id: Option<String>,
}

/// Ordered, finite chat fragments. End of stream is the completion signal.
pub type FragmentStream = BoxStream<'static, Result<String, ApiError>>;

/// The remote Compliance API. [`QuackClient`] is the HTTP implementation.
#[async_trait]
pub trait ComplianceApi: Send + Sync {
    async fn validate(&self, endpoint: &str, token: Option<&str>) -> Result<ProbeResponse, ApiError>;

    /// Exchange a GitHub token for an API access token.
    async fn exchange_token(&self, endpoint: &str, github_token: &str) -> Result<String, ApiError>;

    /// Guidelines of one repository, sorted by `order`.
    async fn repo_guidelines(&self, auth: &ApiAuth, repo_id: i64) -> Result<Vec<Guideline>, ApiError>;

    /// Guidelines owned by the authenticated account, sorted by `order`.
    async fn list_guidelines(&self, auth: &ApiAuth) -> Result<Vec<Guideline>, ApiError>;

    async fn create_guideline(&self, auth: &ApiAuth, content: &str) -> Result<Guideline, ApiError>;

    async fn update_guideline(&self, auth: &ApiAuth, id: i64, content: &str) -> Result<Guideline, ApiError>;

    async fn delete_guideline(&self, auth: &ApiAuth, id: i64) -> Result<(), ApiError>;

    async fn analyze_snippet(
        &self,
        auth: &ApiAuth,
        repo_id: i64,
        code: &str,
    ) -> Result<Vec<ComplianceResult>, ApiError>;

    async fn check_snippet(
        &self,
        auth: &ApiAuth,
        guideline_id: i64,
        code: &str,
    ) -> Result<ComplianceResult, ApiError>;

    async fn chat(&self, auth: &ApiAuth, messages: &[ChatMessage]) -> Result<FragmentStream, ApiError>;

    /// Queue automatic guideline extraction for a repository.
    async fn add_to_waitlist(&self, auth: &ApiAuth, repo_id: i64) -> Result<(), ApiError>;
}

#[derive(Clone)]
pub struct QuackClient {
    config: QuackClientConfig,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct TokenRequest<'a> {
    github_token: &'a str,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct TokenPayload {
    user_id: serde_json::Value,
}

#[derive(Serialize)]
struct ContentRequest<'a> {
    content: &'a str,
}

#[derive(Serialize)]
struct CodeRequest<'a> {
    code: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    messages: &'a [ChatMessage],
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    detail: serde_json::Value,
}

impl QuackClient {
    pub fn new(config: QuackClientConfig) -> Result<Self, ApiError> {
        let mut builder = reqwest::Client::builder().user_agent(config.user_agent.clone());
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build()?;
        Ok(Self { config, http })
    }

    pub fn config(&self) -> &QuackClientConfig {
        &self.config
    }

    async fn parse_json_response<T: for<'de> Deserialize<'de>>(
        &self,
        resp: reqwest::Response,
    ) -> Result<T, ApiError> {
        if !resp.status().is_success() {
            return Err(self.to_status_error(resp).await);
        }
        let bytes = resp.bytes().await?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn expect_success(&self, resp: reqwest::Response) -> Result<(), ApiError> {
        if resp.status().is_success() {
            return Ok(());
        }
        Err(self.to_status_error(resp).await)
    }

    async fn to_status_error(&self, resp: reqwest::Response) -> ApiError {
        let status = resp.status().as_u16();
        let body = read_limited_text(resp, self.config.max_error_body_bytes).await;
        let message = match serde_json::from_str::<ErrorEnvelope>(&body) {
            Ok(ErrorEnvelope {
                detail: serde_json::Value::String(s),
            }) => s,
            Ok(envelope) => envelope.detail.to_string(),
            Err(_) => body,
        };
        ApiError::Status { status, message }
    }

    async fn fetch_guidelines(&self, url: String, auth: &ApiAuth) -> Result<Vec<Guideline>, ApiError> {
        let resp = self.http.get(&url).bearer_auth(&auth.token).send().await?;
        let raw: Vec<RawGuideline> = self.parse_json_response(resp).await?;
        let mut guidelines: Vec<Guideline> = raw.into_iter().map(Guideline::from).collect();
        sort_by_order(&mut guidelines);
        Ok(guidelines)
    }
}

#[async_trait]
impl ComplianceApi for QuackClient {
    async fn validate(&self, endpoint: &str, token: Option<&str>) -> Result<ProbeResponse, ApiError> {
        let url = route(endpoint, VALIDATE_ROUTE)?;
        let mut req = self.http.get(&url);
        if let Some(token) = token {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await?;
        let status = resp.status();
        let user_id = if status.is_success() && token.is_some() {
            resp.json::<TokenPayload>()
                .await
                .ok()
                .map(|p| match p.user_id {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                })
        } else {
            None
        };
        debug!(url, status = status.as_u16(), "validate probe");
        Ok(ProbeResponse {
            status: status.as_u16(),
            user_id,
        })
    }

    async fn exchange_token(&self, endpoint: &str, github_token: &str) -> Result<String, ApiError> {
        let url = route(endpoint, "/api/v1/login/token")?;
        let resp = self
            .http
            .post(&url)
            .json(&TokenRequest { github_token })
            .send()
            .await?;
        let token: TokenResponse = self.parse_json_response(resp).await?;
        Ok(token.access_token)
    }

    async fn repo_guidelines(&self, auth: &ApiAuth, repo_id: i64) -> Result<Vec<Guideline>, ApiError> {
        let url = route(&auth.endpoint, &format!("/api/v1/repos/{repo_id}/guidelines"))?;
        self.fetch_guidelines(url, auth).await
    }

    async fn list_guidelines(&self, auth: &ApiAuth) -> Result<Vec<Guideline>, ApiError> {
        let url = route(&auth.endpoint, "/api/v1/guidelines")?;
        self.fetch_guidelines(url, auth).await
    }

    async fn create_guideline(&self, auth: &ApiAuth, content: &str) -> Result<Guideline, ApiError> {
        let url = route(&auth.endpoint, "/api/v1/guidelines")?;
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&auth.token)
            .json(&ContentRequest { content })
            .send()
            .await?;
        let raw: RawGuideline = self.parse_json_response(resp).await?;
        Ok(raw.into())
    }

    async fn update_guideline(&self, auth: &ApiAuth, id: i64, content: &str) -> Result<Guideline, ApiError> {
        let url = route(&auth.endpoint, &format!("/api/v1/guidelines/{id}"))?;
        let resp = self
            .http
            .patch(&url)
            .bearer_auth(&auth.token)
            .json(&ContentRequest { content })
            .send()
            .await?;
        let raw: RawGuideline = self.parse_json_response(resp).await?;
        Ok(raw.into())
    }

    async fn delete_guideline(&self, auth: &ApiAuth, id: i64) -> Result<(), ApiError> {
        let url = route(&auth.endpoint, &format!("/api/v1/guidelines/{id}"))?;
        let resp = self.http.delete(&url).bearer_auth(&auth.token).send().await?;
        self.expect_success(resp).await
    }

    async fn analyze_snippet(
        &self,
        auth: &ApiAuth,
        repo_id: i64,
        code: &str,
    ) -> Result<Vec<ComplianceResult>, ApiError> {
        let url = route(&auth.endpoint, &format!("/api/v1/compute/analyze/{repo_id}"))?;
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&auth.token)
            .json(&CodeRequest { code })
            .send()
            .await?;
        self.parse_json_response(resp).await
    }

    async fn check_snippet(
        &self,
        auth: &ApiAuth,
        guideline_id: i64,
        code: &str,
    ) -> Result<ComplianceResult, ApiError> {
        let url = route(&auth.endpoint, &format!("/api/v1/compute/check/{guideline_id}"))?;
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&auth.token)
            .json(&CodeRequest { code })
            .send()
            .await?;
        self.parse_json_response(resp).await
    }

    async fn chat(&self, auth: &ApiAuth, messages: &[ChatMessage]) -> Result<FragmentStream, ApiError> {
        let url = route(&auth.endpoint, "/api/v1/code/chat")?;
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&auth.token)
            .json(&ChatRequest { messages })
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(self.to_status_error(resp).await);
        }

        let bytes = Box::pin(resp.bytes_stream());
        let state = (bytes, FragmentDecoder::default(), VecDeque::<String>::new(), false);
        let stream = futures::stream::unfold(state, |(mut bytes, mut decoder, mut pending, mut ended)| async move {
            loop {
                if let Some(fragment) = pending.pop_front() {
                    return Some((Ok(fragment), (bytes, decoder, pending, ended)));
                }
                if ended {
                    return None;
                }
                match bytes.next().await {
                    Some(Ok(chunk)) => pending.extend(decoder.push(&chunk)),
                    Some(Err(e)) => {
                        ended = true;
                        return Some((Err(ApiError::from(e)), (bytes, decoder, pending, ended)));
                    }
                    None => {
                        ended = true;
                        pending.extend(decoder.finish());
                    }
                }
            }
        });
        Ok(stream.boxed())
    }

    async fn add_to_waitlist(&self, auth: &ApiAuth, repo_id: i64) -> Result<(), ApiError> {
        let url = route(&auth.endpoint, &format!("/api/v1/repos/{repo_id}/waitlist"))?;
        let resp = self.http.post(&url).bearer_auth(&auth.token).send().await?;
        self.expect_success(resp).await
    }
}

/// Join an absolute API route onto the endpoint base URL.
pub fn route(endpoint: &str, path: &str) -> Result<String, ApiError> {
    let base = endpoint.trim().trim_end_matches('/');
    if !(base.starts_with("http://") || base.starts_with("https://")) {
        return Err(ApiError::InvalidUrl(endpoint.to_string()));
    }
    Ok(format!("{base}{path}"))
}

/// Splits the chat body into newline-delimited JSON messages and yields their
/// non-empty `message.content`. An optional SSE `data:` prefix is accepted.
/// Bytes are buffered until a full line arrives, so a character split across
/// chunks decodes intact. Lines that fail to decode are logged and dropped.
#[derive(Debug, Default)]
pub struct FragmentDecoder {
    buffer: Vec<u8>,
}

impl FragmentDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some(idx) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=idx).collect();
            out.extend(decode_bytes(&line));
        }
        out
    }

    /// Flush a trailing line that was not newline-terminated.
    pub fn finish(&mut self) -> Vec<String> {
        let rest = std::mem::take(&mut self.buffer);
        decode_bytes(&rest).into_iter().collect()
    }
}

fn decode_bytes(line: &[u8]) -> Option<String> {
    match std::str::from_utf8(line) {
        Ok(text) => decode_line(text),
        Err(e) => {
            warn!(error = %e, "dropping chat line with invalid UTF-8");
            None
        }
    }
}

fn decode_line(line: &str) -> Option<String> {
    let line = line.trim();
    let data = line.strip_prefix("data:").map(str::trim).unwrap_or(line);
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    match serde_json::from_str::<StreamingMessage>(data) {
        Ok(msg) if !msg.message.content.is_empty() => Some(msg.message.content),
        Ok(_) => None,
        Err(e) => {
            warn!(error = %e, "dropping undecodable chat fragment");
            None
        }
    }
}

async fn read_limited_text(resp: reqwest::Response, max_bytes: usize) -> String {
    match resp.bytes().await {
        Ok(mut b) => {
            if b.len() > max_bytes {
                b.truncate(max_bytes);
            }
            String::from_utf8_lossy(&b).to_string()
        }
        Err(e) => {
            warn!(error = %e, "failed to read error body");
            "<failed to read error body>".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_joins_absolute_paths() {
        assert_eq!(
            route("https://api.quack.example/", "/api/v1/guidelines").unwrap(),
            "https://api.quack.example/api/v1/guidelines"
        );
        assert_eq!(
            route("http://localhost:8050", VALIDATE_ROUTE).unwrap(),
            "http://localhost:8050/api/v1/login/validate"
        );
    }

    #[test]
    fn route_rejects_non_http_endpoints() {
        assert!(matches!(route("", "/x"), Err(ApiError::InvalidUrl(_))));
        assert!(matches!(route("ftp://host", "/x"), Err(ApiError::InvalidUrl(_))));
        assert!(matches!(route("https://", "/x"), Err(ApiError::InvalidUrl(_))));
    }

    #[test]
    fn decoder_preserves_fragment_order_across_chunks() {
        let mut decoder = FragmentDecoder::default();
        let mut out = decoder.push(br#"{"message":{"role":"assistant","content":"Hel"},"done":false}"#);
        assert!(out.is_empty());
        out.extend(decoder.push(b"\n{\"message\":{\"content\":\"lo\"}}\n{\"mess"));
        out.extend(decoder.push(br#"age":{"content":"!"},"done":true}"#));
        out.extend(decoder.finish());
        assert_eq!(out, vec!["Hel", "lo", "!"]);
    }

    #[test]
    fn decoder_drops_garbage_and_keeps_going() {
        let mut decoder = FragmentDecoder::default();
        let out = decoder.push(
            b"data: {\"message\":{\"content\":\"a\"}}\n\nnot json\ndata: [DONE]\n{\"message\":{\"content\":\"\"}}\n{\"message\":{\"content\":\"b\"}}\n",
        );
        assert_eq!(out, vec!["a", "b"]);
    }

    #[test]
    fn decoder_keeps_multibyte_characters_split_across_chunks() {
        let line = "{\"message\":{\"content\":\"café\"}}\n".as_bytes();
        let split = line.iter().position(|b| *b == 0xC3).unwrap() + 1;
        let mut decoder = FragmentDecoder::default();
        let mut out = decoder.push(&line[..split]);
        assert!(out.is_empty());
        out.extend(decoder.push(&line[split..]));
        assert_eq!(out, vec!["café"]);
    }

    #[test]
    fn decoder_drops_invalid_utf8_lines() {
        let mut decoder = FragmentDecoder::default();
        let mut out = decoder.push(b"{\"message\":{\"content\":\"\xff\"}}\n");
        out.extend(decoder.push(b"{\"message\":{\"content\":\"ok\"}}\n"));
        assert_eq!(out, vec!["ok"]);
    }

    #[test]
    fn unauthorized_detection() {
        let err = ApiError::Status {
            status: 401,
            message: "expired".into(),
        };
        assert!(err.is_unauthorized());
        assert!(!ApiError::Unreachable("refused".into()).is_unauthorized());
    }
}

//! Recording in-process [`ComplianceApi`] for unit tests.
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;

use quack_common::model::{sort_by_order, ChatMessage, ComplianceResult, Guideline};
use quack_common::quack_api::{ApiAuth, ApiError, ComplianceApi, FragmentStream, ProbeResponse};

pub const FAKE_TOKEN: &str = "fake-access-token";

#[derive(Debug, Clone, Copy)]
pub enum Probe {
    Status(u16),
    Unreachable,
}

struct FakeState {
    probe: Probe,
    failure: Option<u16>,
    call_failures: HashMap<&'static str, u16>,
    guidelines: Vec<Guideline>,
    analysis: Vec<ComplianceResult>,
    verdict: Option<ComplianceResult>,
    fragments: Vec<Result<String, u16>>,
    next_id: i64,
    calls: Vec<&'static str>,
    chat_history: Vec<ChatMessage>,
}

pub struct FakeApi {
    state: Mutex<FakeState>,
}

pub fn guideline(id: i64, order: i64, title: &str) -> Guideline {
    Guideline {
        id,
        order,
        title: title.to_string(),
        details: format!("details of {title}"),
    }
}

pub fn result(guideline_id: i64, is_compliant: bool, comment: &str) -> ComplianceResult {
    ComplianceResult {
        guideline_id,
        is_compliant,
        comment: comment.to_string(),
    }
}

impl FakeApi {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState {
                probe: Probe::Status(200),
                failure: None,
                call_failures: HashMap::new(),
                guidelines: Vec::new(),
                analysis: Vec::new(),
                verdict: None,
                fragments: Vec::new(),
                next_id: 100,
                calls: Vec::new(),
                chat_history: Vec::new(),
            }),
        }
    }

    pub fn set_probe(&self, probe: Probe) {
        self.state.lock().unwrap().probe = probe;
    }

    /// Every gated call fails with this status until cleared.
    pub fn fail_with(&self, status: Option<u16>) {
        self.state.lock().unwrap().failure = status;
    }

    /// Only calls to `name` fail with this status.
    pub fn fail_call(&self, name: &'static str, status: u16) {
        self.state.lock().unwrap().call_failures.insert(name, status);
    }

    pub fn set_guidelines(&self, guidelines: Vec<Guideline>) {
        self.state.lock().unwrap().guidelines = guidelines;
    }

    pub fn set_analysis(&self, results: Vec<ComplianceResult>) {
        self.state.lock().unwrap().analysis = results;
    }

    pub fn set_verdict(&self, verdict: ComplianceResult) {
        self.state.lock().unwrap().verdict = Some(verdict);
    }

    /// `Err(status)` entries surface as stream errors mid-response.
    pub fn set_fragments(&self, fragments: Vec<Result<&str, u16>>) {
        self.state.lock().unwrap().fragments = fragments
            .into_iter()
            .map(|f| f.map(str::to_string))
            .collect();
    }

    pub fn calls_to(&self, name: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| **c == name)
            .count()
    }

    pub fn chat_history(&self) -> Vec<ChatMessage> {
        self.state.lock().unwrap().chat_history.clone()
    }

    fn record(&self, name: &'static str) -> Result<std::sync::MutexGuard<'_, FakeState>, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(name);
        let failure = state.call_failures.get(name).copied().or(state.failure);
        match failure {
            Some(status) => Err(ApiError::Status {
                status,
                message: format!("fake failure for {name}"),
            }),
            None => Ok(state),
        }
    }
}

#[async_trait]
impl ComplianceApi for FakeApi {
    async fn validate(&self, _endpoint: &str, _token: Option<&str>) -> Result<ProbeResponse, ApiError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push("validate");
        match state.probe {
            Probe::Status(status) => Ok(ProbeResponse {
                status,
                user_id: None,
            }),
            Probe::Unreachable => Err(ApiError::Unreachable("connection refused".into())),
        }
    }

    async fn exchange_token(&self, _endpoint: &str, _github_token: &str) -> Result<String, ApiError> {
        self.record("exchange_token")?;
        Ok(FAKE_TOKEN.to_string())
    }

    async fn repo_guidelines(&self, _auth: &ApiAuth, _repo_id: i64) -> Result<Vec<Guideline>, ApiError> {
        let state = self.record("repo_guidelines")?;
        let mut list = state.guidelines.clone();
        sort_by_order(&mut list);
        Ok(list)
    }

    async fn list_guidelines(&self, _auth: &ApiAuth) -> Result<Vec<Guideline>, ApiError> {
        let state = self.record("list_guidelines")?;
        let mut list = state.guidelines.clone();
        sort_by_order(&mut list);
        Ok(list)
    }

    async fn create_guideline(&self, _auth: &ApiAuth, content: &str) -> Result<Guideline, ApiError> {
        let mut state = self.record("create_guideline")?;
        state.next_id += 1;
        let created = Guideline {
            id: state.next_id,
            order: 0,
            title: content.lines().next().unwrap_or_default().to_string(),
            details: content.to_string(),
        };
        state.guidelines.push(created.clone());
        Ok(created)
    }

    async fn update_guideline(&self, _auth: &ApiAuth, id: i64, content: &str) -> Result<Guideline, ApiError> {
        let mut state = self.record("update_guideline")?;
        let Some(existing) = state.guidelines.iter_mut().find(|g| g.id == id) else {
            return Err(ApiError::Status {
                status: 404,
                message: "Guideline not found".into(),
            });
        };
        existing.title = content.lines().next().unwrap_or_default().to_string();
        existing.details = content.to_string();
        Ok(existing.clone())
    }

    async fn delete_guideline(&self, _auth: &ApiAuth, id: i64) -> Result<(), ApiError> {
        let mut state = self.record("delete_guideline")?;
        state.guidelines.retain(|g| g.id != id);
        Ok(())
    }

    async fn analyze_snippet(
        &self,
        _auth: &ApiAuth,
        _repo_id: i64,
        _code: &str,
    ) -> Result<Vec<ComplianceResult>, ApiError> {
        let state = self.record("analyze_snippet")?;
        Ok(state.analysis.clone())
    }

    async fn check_snippet(
        &self,
        _auth: &ApiAuth,
        guideline_id: i64,
        _code: &str,
    ) -> Result<ComplianceResult, ApiError> {
        let state = self.record("check_snippet")?;
        Ok(state
            .verdict
            .clone()
            .unwrap_or_else(|| result(guideline_id, true, "")))
    }

    async fn chat(&self, _auth: &ApiAuth, messages: &[ChatMessage]) -> Result<FragmentStream, ApiError> {
        let mut state = self.record("chat")?;
        state.chat_history = messages.to_vec();
        let items: Vec<Result<String, ApiError>> = state
            .fragments
            .iter()
            .cloned()
            .map(|f| {
                f.map_err(|status| ApiError::Status {
                    status,
                    message: "stream interrupted".into(),
                })
            })
            .collect();
        Ok(futures::stream::iter(items).boxed())
    }

    async fn add_to_waitlist(&self, _auth: &ApiAuth, _repo_id: i64) -> Result<(), ApiError> {
        self.record("add_to_waitlist")?;
        Ok(())
    }
}

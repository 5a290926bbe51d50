use std::sync::Arc;

use rmcp::{
    Json, ServerHandler,
    handler::server::router::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::{Implementation, ProtocolVersion, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
};
use tokio::sync::Mutex;
use tracing::{info, warn};

use quack_common::github::{resolve_github_token, GitHubClient};
use quack_common::quack_api::{ApiError, ComplianceApi};
use quack_common::store::StateStore;

use crate::chat::ChatTranscript;
use crate::compliance::{ComplianceOrchestrator, RepositoryCheck, SingleCheck};
use crate::config::Config;
use crate::credentials::{CredentialManager, LoginOutcome};
use crate::error::{AppError, Precondition};
use crate::guidelines::{GuidelineCache, GuidelineScope};
use crate::mcp_api::{
    AccessResponse, ChatHistoryResponse, ChatReplyResponse, CheckGuidelineParams,
    CheckRepositoryParams, CreateGuidelineParams, DeleteGuidelineParams, EditGuidelineParams,
    GuidelineListResponse, GuidelineResponse, LoginParams, LoginResponse, OkResponse,
    RequestGuidelinesResponse, SendChatMessageParams, SetEndpointParams, SetEndpointResponse,
    StatusResponse,
};
use crate::session::{resolve_repository_identity, RepoIdentity};

const EMPTY_GUIDELINES_HINT: &str =
    "No guidelines found for this repository. Ask for some with request_guidelines.";

/// Shared mutable state. Locks are always taken in field order
/// (credentials, guidelines, chat) and held for the whole tool call.
pub struct CompanionState {
    pub credentials: Mutex<CredentialManager>,
    pub guidelines: Mutex<GuidelineCache>,
    pub chat: Mutex<ChatTranscript>,
}

#[derive(Clone)]
pub struct CompanionServer {
    config: Arc<Config>,
    store: Arc<dyn StateStore>,
    api: Arc<dyn ComplianceApi>,
    github: Arc<GitHubClient>,
    orchestrator: Arc<ComplianceOrchestrator>,
    state: Arc<CompanionState>,
    installation_id: String,
    tool_router: ToolRouter<CompanionServer>,
}

fn render(e: AppError) -> String {
    e.to_user_message()
}

impl CompanionServer {
    pub async fn new(
        config: Config,
        store: Arc<dyn StateStore>,
        api: Arc<dyn ComplianceApi>,
        github: GitHubClient,
        installation_id: String,
    ) -> Result<Self, AppError> {
        let credentials = CredentialManager::load(Arc::clone(&store), Arc::clone(&api)).await?;
        let chat = ChatTranscript::load(Arc::clone(&store)).await?;
        let orchestrator = Arc::new(ComplianceOrchestrator::new(
            Arc::clone(&api),
            Arc::clone(&store),
        ));

        Ok(Self {
            config: Arc::new(config),
            store,
            api,
            github: Arc::new(github),
            orchestrator,
            state: Arc::new(CompanionState {
                credentials: Mutex::new(credentials),
                guidelines: Mutex::new(GuidelineCache::new()),
                chat: Mutex::new(chat),
            }),
            installation_id,
            tool_router: Self::tool_router(),
        })
    }

    /// Startup sequence: re-probe the endpoint, confirm the token, then load
    /// the repository's guidelines. Every step degrades to a warning.
    pub async fn bootstrap(&self) {
        let mut credentials = self.state.credentials.lock().await;
        match credentials
            .revalidate_endpoint(self.config.default_endpoint.as_deref())
            .await
        {
            Ok(valid) => info!(
                endpoint = credentials.state().endpoint.as_deref().unwrap_or("<none>"),
                valid,
                "endpoint revalidated"
            ),
            Err(e) => warn!(error = %e, "endpoint revalidation failed"),
        }

        if credentials.state().token_valid() {
            if let Err(e) = credentials.check_access().await {
                warn!(error = %e, "access check failed");
            }
        }
        info!(phase = credentials.phase().as_str(), "credentials loaded");

        let mut guidelines = self.state.guidelines.lock().await;
        match self.refresh_repository(&mut credentials, &mut guidelines).await {
            Ok((identity, _)) => info!(
                repository = %identity,
                count = guidelines.len(),
                "guidelines loaded"
            ),
            Err(e) => warn!(
                error = %e,
                cached = guidelines.len(),
                "guideline refresh failed, keeping the persisted list"
            ),
        }
    }

    async fn identity(&self) -> Result<RepoIdentity, AppError> {
        Ok(
            resolve_repository_identity(self.config.workspace.as_deref(), &self.config.git_path)
                .await?,
        )
    }

    async fn repo_id(&self, identity: &RepoIdentity) -> Result<i64, AppError> {
        let token = resolve_github_token().await;
        let repo = self
            .github
            .repository(&identity.full_name(), token.as_deref())
            .await
            .map_err(|e| match e {
                ApiError::Status { status, message } => AppError::Remote {
                    status,
                    message: format!("GitHub lookup of {identity} failed: {message}"),
                },
                other => other.into(),
            })?;
        Ok(repo.id)
    }

    /// Switch the cache to the workspace repository (restoring its persisted
    /// list) and replace it with a fresh fetch.
    async fn refresh_repository(
        &self,
        credentials: &mut CredentialManager,
        cache: &mut GuidelineCache,
    ) -> Result<(RepoIdentity, i64), AppError> {
        let identity = self.identity().await?;
        let repo_id = self.repo_id(&identity).await?;
        let scope = GuidelineScope::Repository(repo_id);
        if cache.scope() != Some(scope) {
            *cache = GuidelineCache::load(self.store.as_ref(), scope).await?;
        }

        let auth = credentials.require_authenticated()?;
        let fetched = credentials
            .settle(self.api.repo_guidelines(&auth, repo_id).await)
            .await?;
        cache.replace_all(fetched);
        cache.persist(self.store.as_ref()).await?;
        Ok((identity, repo_id))
    }

    fn list_response(cache: &GuidelineCache, repository: Option<String>) -> GuidelineListResponse {
        GuidelineListResponse {
            scope: cache.scope().map(|s| s.to_string()),
            repository,
            guidelines: cache.view_states().to_vec(),
            message: cache.is_empty().then(|| EMPTY_GUIDELINES_HINT.to_string()),
        }
    }

    async fn status_inner(&self) -> StatusResponse {
        let repository = self.identity().await.ok().map(|id| id.full_name());
        let credentials = self.state.credentials.lock().await;
        let guidelines = self.state.guidelines.lock().await;
        let chat = self.state.chat.lock().await;
        let state = credentials.state();
        StatusResponse {
            phase: credentials.phase().as_str().to_string(),
            endpoint: state.endpoint.clone(),
            endpoint_valid: state.endpoint_valid,
            token_valid: state.token_valid(),
            repository,
            guideline_scope: guidelines.scope().map(|s| s.to_string()),
            guideline_count: guidelines.len(),
            chat_messages: chat.messages().len(),
            installation_id: self.installation_id.clone(),
        }
    }

    async fn set_endpoint_inner(&self, url: &str) -> Result<SetEndpointResponse, AppError> {
        let mut credentials = self.state.credentials.lock().await;
        let mut guidelines = self.state.guidelines.lock().await;
        let endpoint_valid = credentials.set_endpoint(url).await?;
        guidelines.forget(self.store.as_ref()).await?;
        Ok(SetEndpointResponse {
            endpoint: credentials.state().endpoint.clone().unwrap_or_default(),
            endpoint_valid,
            phase: credentials.phase().as_str().to_string(),
        })
    }

    async fn login_inner(&self, github_token: Option<String>) -> Result<LoginResponse, AppError> {
        let github_token = match github_token
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
        {
            Some(token) => token,
            None => resolve_github_token()
                .await
                .ok_or(Precondition::NoGithubToken)?,
        };

        let mut credentials = self.state.credentials.lock().await;
        let outcome = credentials.login(&github_token).await?;
        if outcome == LoginOutcome::Fresh {
            let mut guidelines = self.state.guidelines.lock().await;
            if let Err(e) = self.refresh_repository(&mut credentials, &mut guidelines).await {
                warn!(error = %e, "guideline refresh after login failed");
            }
        }
        Ok(LoginResponse {
            phase: credentials.phase().as_str().to_string(),
            reused_token: outcome == LoginOutcome::Cached,
        })
    }

    async fn logout_inner(&self) -> Result<OkResponse, AppError> {
        let mut credentials = self.state.credentials.lock().await;
        let mut guidelines = self.state.guidelines.lock().await;
        credentials.logout().await?;
        guidelines.forget(self.store.as_ref()).await?;
        Ok(OkResponse { ok: true })
    }

    async fn check_access_inner(&self) -> Result<AccessResponse, AppError> {
        let mut credentials = self.state.credentials.lock().await;
        let status = credentials.check_access().await?;
        Ok(AccessResponse {
            status,
            phase: credentials.phase().as_str().to_string(),
        })
    }

    async fn fetch_guidelines_inner(&self) -> Result<GuidelineListResponse, AppError> {
        let mut credentials = self.state.credentials.lock().await;
        let mut guidelines = self.state.guidelines.lock().await;
        credentials.require_authenticated()?;
        let (identity, repo_id) = self
            .refresh_repository(&mut credentials, &mut guidelines)
            .await?;
        info!(repository = %identity, repo_id, count = guidelines.len(), "guidelines fetched");
        Ok(Self::list_response(&guidelines, Some(identity.full_name())))
    }

    async fn pull_guidelines_inner(&self) -> Result<GuidelineListResponse, AppError> {
        let mut credentials = self.state.credentials.lock().await;
        let mut guidelines = self.state.guidelines.lock().await;
        let auth = credentials.require_authenticated()?;
        let fetched = credentials
            .settle(self.api.list_guidelines(&auth).await)
            .await?;
        guidelines.replace_scope(GuidelineScope::Account, fetched);
        guidelines.persist(self.store.as_ref()).await?;
        info!(count = guidelines.len(), "account guidelines pulled");
        Ok(Self::list_response(&guidelines, None))
    }

    async fn create_guideline_inner(&self, content: &str) -> Result<GuidelineResponse, AppError> {
        let mut credentials = self.state.credentials.lock().await;
        let mut guidelines = self.state.guidelines.lock().await;
        let auth = credentials.require_authenticated()?;
        if content.trim().is_empty() {
            return Err(Precondition::EmptyContent.into());
        }
        let created = credentials
            .settle(self.api.create_guideline(&auth, content).await)
            .await?;
        if guidelines.scope().is_some() {
            guidelines.push(created.clone());
            guidelines.persist(self.store.as_ref()).await?;
        }
        info!(guideline_id = created.id, "guideline created");
        Ok(GuidelineResponse { guideline: created })
    }

    async fn edit_guideline_inner(&self, id: i64, content: &str) -> Result<GuidelineResponse, AppError> {
        let mut credentials = self.state.credentials.lock().await;
        let mut guidelines = self.state.guidelines.lock().await;
        let auth = credentials.require_authenticated()?;
        if content.trim().is_empty() {
            return Err(Precondition::EmptyContent.into());
        }
        let updated = credentials
            .settle(self.api.update_guideline(&auth, id, content).await)
            .await?;
        if guidelines.get(id).is_some() {
            guidelines.upsert(updated.clone());
            guidelines.persist(self.store.as_ref()).await?;
        }
        info!(guideline_id = id, "guideline updated");
        Ok(GuidelineResponse { guideline: updated })
    }

    async fn delete_guideline_inner(&self, id: i64) -> Result<OkResponse, AppError> {
        let mut credentials = self.state.credentials.lock().await;
        let mut guidelines = self.state.guidelines.lock().await;
        let auth = credentials.require_authenticated()?;
        credentials
            .settle(self.api.delete_guideline(&auth, id).await)
            .await?;
        if guidelines.remove(id) {
            guidelines.persist(self.store.as_ref()).await?;
        }
        info!(guideline_id = id, "guideline deleted");
        Ok(OkResponse { ok: true })
    }

    async fn request_guidelines_inner(&self) -> Result<RequestGuidelinesResponse, AppError> {
        let mut credentials = self.state.credentials.lock().await;
        let auth = credentials.require_authenticated()?;
        let identity = self.identity().await?;
        let repo_id = self.repo_id(&identity).await?;
        credentials
            .settle(self.api.add_to_waitlist(&auth, repo_id).await)
            .await?;
        info!(repository = %identity, repo_id, "repository added to the guideline waitlist");
        Ok(RequestGuidelinesResponse {
            repository: identity.full_name(),
            repo_id,
            message: format!(
                "Guidelines requested for {identity}. They will be extracted automatically; \
                 run fetch_guidelines later to load them."
            ),
        })
    }

    async fn check_guideline_inner(&self, id: i64, code: &str) -> Result<SingleCheck, AppError> {
        let mut credentials = self.state.credentials.lock().await;
        let mut guidelines = self.state.guidelines.lock().await;
        self.orchestrator
            .check_against_guideline(&mut credentials, &mut guidelines, id, code)
            .await
    }

    async fn check_repository_inner(&self, code: &str) -> Result<RepositoryCheck, AppError> {
        let mut credentials = self.state.credentials.lock().await;
        let mut guidelines = self.state.guidelines.lock().await;
        credentials.require_authenticated()?;
        let identity = self.identity().await?;
        let repo_id = self.repo_id(&identity).await?;
        self.orchestrator
            .check_against_repository(&mut credentials, &mut guidelines, repo_id, code)
            .await
    }

    async fn send_chat_message_inner(&self, message: &str) -> Result<ChatReplyResponse, AppError> {
        let mut credentials = self.state.credentials.lock().await;
        let mut chat = self.state.chat.lock().await;
        let reply = chat.send(self.api.as_ref(), &mut credentials, message).await?;
        Ok(ChatReplyResponse {
            reply: reply.content,
            messages: chat.messages().len(),
        })
    }
}

#[tool_router]
impl CompanionServer {
    #[tool(description = "Show the endpoint/token phase, the workspace repository, the cached guideline count and the installation id.")]
    async fn status(&self) -> Result<Json<StatusResponse>, String> {
        Ok(Json(self.status_inner().await))
    }

    #[tool(description = "Configure the Quack Compliance API endpoint. The endpoint is probed; any existing token is discarded and login is required again.")]
    async fn set_endpoint(
        &self,
        Parameters(params): Parameters<SetEndpointParams>,
    ) -> Result<Json<SetEndpointResponse>, String> {
        self.set_endpoint_inner(&params.url).await.map(Json).map_err(render)
    }

    #[tool(description = "Authenticate against the configured endpoint by exchanging a GitHub token for an API token. Reuses a still-valid token.")]
    async fn login(
        &self,
        Parameters(params): Parameters<LoginParams>,
    ) -> Result<Json<LoginResponse>, String> {
        self.login_inner(params.github_token).await.map(Json).map_err(render)
    }

    #[tool(description = "Discard the API token and the cached guideline list.")]
    async fn logout(&self) -> Result<Json<OkResponse>, String> {
        self.logout_inner().await.map(Json).map_err(render)
    }

    #[tool(description = "Probe the endpoint with the current token. Reports ok, unknown-route, expired-token, unreachable-endpoint or other.")]
    async fn check_access(&self) -> Result<Json<AccessResponse>, String> {
        self.check_access_inner().await.map(Json).map_err(render)
    }

    #[tool(description = "Fetch the guidelines of the workspace repository (resolved from its GitHub origin remote) and replace the cached list.")]
    async fn fetch_guidelines(&self) -> Result<Json<GuidelineListResponse>, String> {
        self.fetch_guidelines_inner().await.map(Json).map_err(render)
    }

    #[tool(description = "Fetch the guidelines owned by the authenticated account and replace the cached list.")]
    async fn pull_guidelines(&self) -> Result<Json<GuidelineListResponse>, String> {
        self.pull_guidelines_inner().await.map(Json).map_err(render)
    }

    #[tool(description = "List the cached guidelines, sorted by order, with their completion flag from the latest check.")]
    async fn list_guidelines(&self) -> Result<Json<GuidelineListResponse>, String> {
        let workspace_repo = self.identity().await.ok().map(|id| id.full_name());
        let guidelines = self.state.guidelines.lock().await;
        let repository = match guidelines.scope() {
            Some(GuidelineScope::Repository(_)) => workspace_repo,
            _ => None,
        };
        Ok(Json(Self::list_response(&guidelines, repository)))
    }

    #[tool(description = "Create a guideline from free text. The first line becomes its title.")]
    async fn create_guideline(
        &self,
        Parameters(params): Parameters<CreateGuidelineParams>,
    ) -> Result<Json<GuidelineResponse>, String> {
        self.create_guideline_inner(&params.content)
            .await
            .map(Json)
            .map_err(render)
    }

    #[tool(description = "Replace the text of an existing guideline.")]
    async fn edit_guideline(
        &self,
        Parameters(params): Parameters<EditGuidelineParams>,
    ) -> Result<Json<GuidelineResponse>, String> {
        self.edit_guideline_inner(params.guideline_id, &params.content)
            .await
            .map(Json)
            .map_err(render)
    }

    #[tool(description = "Delete a guideline.")]
    async fn delete_guideline(
        &self,
        Parameters(params): Parameters<DeleteGuidelineParams>,
    ) -> Result<Json<OkResponse>, String> {
        self.delete_guideline_inner(params.guideline_id)
            .await
            .map(Json)
            .map_err(render)
    }

    #[tool(description = "Ask the service to extract guidelines for the workspace repository. Fire-and-forget; fetch_guidelines later.")]
    async fn request_guidelines(&self) -> Result<Json<RequestGuidelinesResponse>, String> {
        self.request_guidelines_inner().await.map(Json).map_err(render)
    }

    #[tool(description = "Check a code snippet against one cached guideline. A non-compliant verdict returns a diagnostic.")]
    async fn check_guideline(
        &self,
        Parameters(params): Parameters<CheckGuidelineParams>,
    ) -> Result<Json<SingleCheck>, String> {
        self.check_guideline_inner(params.guideline_id, &params.code)
            .await
            .map(Json)
            .map_err(render)
    }

    #[tool(description = "Re-fetch the workspace repository's guidelines and check a code snippet against all of them. Returns one diagnostic per violated guideline.")]
    async fn check_repository(
        &self,
        Parameters(params): Parameters<CheckRepositoryParams>,
    ) -> Result<Json<RepositoryCheck>, String> {
        self.check_repository_inner(&params.code)
            .await
            .map(Json)
            .map_err(render)
    }

    #[tool(description = "Send a chat message. The assistant reply is streamed into the transcript and returned once complete.")]
    async fn send_chat_message(
        &self,
        Parameters(params): Parameters<SendChatMessageParams>,
    ) -> Result<Json<ChatReplyResponse>, String> {
        self.send_chat_message_inner(&params.message)
            .await
            .map(Json)
            .map_err(render)
    }

    #[tool(description = "Return the chat transcript in order.")]
    async fn get_chat_history(&self) -> Result<Json<ChatHistoryResponse>, String> {
        let chat = self.state.chat.lock().await;
        Ok(Json(ChatHistoryResponse {
            messages: chat.messages().to_vec(),
        }))
    }

    #[tool(description = "Clear the chat transcript.")]
    async fn clear_chat(&self) -> Result<Json<OkResponse>, String> {
        let mut chat = self.state.chat.lock().await;
        chat.clear().await.map_err(render)?;
        Ok(Json(OkResponse { ok: true }))
    }
}

#[tool_handler]
impl ServerHandler for CompanionServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_06_18,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "quack-companion".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Quack Companion MCP server. Configure the Compliance API with set_endpoint, then \
                 authenticate with login. fetch_guidelines loads the workspace repository's \
                 guidelines; check_guideline and check_repository check code snippets against \
                 them. send_chat_message talks to the code assistant. status shows where the \
                 setup stands."
                    .to_string(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{guideline, FakeApi};
    use quack_common::store::MemoryStore;

    #[test]
    fn tools_publish_output_schemas() {
        let tools = CompanionServer::tool_router().list_all();
        for name in [
            "status",
            "set_endpoint",
            "login",
            "logout",
            "check_access",
            "fetch_guidelines",
            "pull_guidelines",
            "list_guidelines",
            "create_guideline",
            "edit_guideline",
            "delete_guideline",
            "request_guidelines",
            "check_guideline",
            "check_repository",
            "send_chat_message",
            "get_chat_history",
            "clear_chat",
        ] {
            let tool = tools
                .iter()
                .find(|t| t.name == name)
                .unwrap_or_else(|| panic!("missing tool: {name}"));
            assert!(
                tool.output_schema.is_some(),
                "tool {name} should publish output_schema"
            );
        }
    }

    async fn server(api: Arc<FakeApi>) -> CompanionServer {
        let dir = std::env::temp_dir().join("quack-companion-no-such-workspace");
        let config = Config::from_lookup(|name| match name {
            "QUACK_WORKSPACE" => Some(dir.display().to_string()),
            _ => None,
        })
        .unwrap();
        let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
        let github = GitHubClient::new("http://127.0.0.1:9").unwrap();
        CompanionServer::new(config, store, api, github, "test-installation".to_string())
            .await
            .unwrap()
    }

    async fn logged_in(api: Arc<FakeApi>) -> CompanionServer {
        let server = server(api).await;
        server.set_endpoint_inner("https://api.example").await.unwrap();
        server.login_inner(Some("gh".to_string())).await.unwrap();
        server
    }

    #[tokio::test]
    async fn fresh_server_is_unconfigured() {
        let server = server(Arc::new(FakeApi::new())).await;
        let status = server.status_inner().await;
        assert_eq!(status.phase, "unconfigured");
        assert_eq!(status.repository, None);
        assert_eq!(status.installation_id, "test-installation");
    }

    #[tokio::test]
    async fn login_reaches_token_valid() {
        let api = Arc::new(FakeApi::new());
        let server = logged_in(api).await;
        assert_eq!(server.status_inner().await.phase, "token_valid");
        let again = server.login_inner(Some("gh".to_string())).await.unwrap();
        assert!(again.reused_token);
    }

    #[tokio::test]
    async fn errors_carry_a_remedy() {
        let server = server(Arc::new(FakeApi::new())).await;
        let err = server.pull_guidelines_inner().await.map_err(render).unwrap_err();
        assert!(err.contains("set_endpoint"), "{err}");
    }

    #[tokio::test]
    async fn fetch_without_workspace_reports_it() {
        let server = logged_in(Arc::new(FakeApi::new())).await;
        let err = server.fetch_guidelines_inner().await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Precondition(Precondition::Session(crate::session::SessionError::NoWorkspace))
        ));
    }

    #[tokio::test]
    async fn account_guideline_crud_mirrors_the_cache() {
        let api = Arc::new(FakeApi::new());
        api.set_guidelines(vec![guideline(1, 1, "Early returns")]);
        let server = logged_in(api.clone()).await;

        let list = server.pull_guidelines_inner().await.unwrap();
        assert_eq!(list.scope.as_deref(), Some("account"));
        assert_eq!(list.guidelines.len(), 1);

        let created = server.create_guideline_inner("No globals\nUse DI").await.unwrap();
        assert_eq!(created.guideline.title, "No globals");
        server
            .edit_guideline_inner(1, "Return early\nAvoid nesting")
            .await
            .unwrap();
        server.delete_guideline_inner(created.guideline.id).await.unwrap();

        let Json(list) = server.list_guidelines().await.unwrap();
        let titles: Vec<&str> = list.guidelines.iter().map(|g| g.guideline.title.as_str()).collect();
        assert_eq!(titles, vec!["Return early"]);

        let err = server.create_guideline_inner("   ").await.unwrap_err();
        assert!(matches!(err, AppError::Precondition(Precondition::EmptyContent)));
    }

    #[tokio::test]
    async fn logout_drops_token_and_guidelines() {
        let api = Arc::new(FakeApi::new());
        api.set_guidelines(vec![guideline(1, 1, "Early returns")]);
        let server = logged_in(api).await;
        server.pull_guidelines_inner().await.unwrap();
        server.logout_inner().await.unwrap();

        let status = server.status_inner().await;
        assert_eq!(status.phase, "token_missing");
        assert_eq!(status.guideline_count, 0);
    }

    #[tokio::test]
    async fn chat_round_trip_through_tools() {
        let api = Arc::new(FakeApi::new());
        api.set_fragments(vec![Ok("Hel"), Ok("lo"), Ok("!")]);
        let server = logged_in(api).await;

        let reply = server.send_chat_message_inner("hi").await.unwrap();
        assert_eq!(reply.reply, "Hello!");
        assert_eq!(reply.messages, 2);

        server.clear_chat().await.unwrap();
        let Json(history) = server.get_chat_history().await.unwrap();
        assert!(history.messages.is_empty());
    }
}

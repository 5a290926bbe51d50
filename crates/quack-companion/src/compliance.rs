//! Single-guideline and whole-repository compliance checks.
//!
//! Both checks go through the credential gate first, then validate their
//! input, then call the API. Nothing is retried; a failed call leaves the
//! cached flags as they were.
use std::collections::HashMap;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::Serialize;
use tracing::{info, warn};

use quack_common::model::Guideline;
use quack_common::quack_api::ComplianceApi;
use quack_common::store::StateStore;

use crate::credentials::CredentialManager;
use crate::error::{AppError, Precondition};
use crate::guidelines::{GuidelineCache, GuidelineScope, GuidelineViewState};

pub const DIAGNOSTIC_SOURCE: &str = "Quack Companion";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
}

/// Annotation attached to the checked code range by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
pub struct Diagnostic {
    pub guideline_id: i64,
    /// Guideline title
    pub code: String,
    pub message: String,
    /// Related information shown next to the annotation
    pub related: String,
    pub severity: Severity,
    pub source: String,
}

impl Diagnostic {
    fn non_compliant(guideline: &Guideline, message: String) -> Self {
        Self {
            guideline_id: guideline.id,
            code: guideline.title.clone(),
            message,
            related: format!("Not compliant with {}", guideline.title),
            severity: Severity::Warning,
            source: DIAGNOSTIC_SOURCE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct SingleCheck {
    pub guideline_id: i64,
    pub is_compliant: bool,
    pub comment: String,
    /// Present when the snippet is not compliant
    pub diagnostic: Option<Diagnostic>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct RepositoryCheck {
    pub repo_id: i64,
    pub diagnostics: Vec<Diagnostic>,
    /// Every cached guideline with its flag after the run
    pub guidelines: Vec<GuidelineViewState>,
    pub compliant: usize,
    pub total: usize,
}

pub struct ComplianceOrchestrator {
    api: Arc<dyn ComplianceApi>,
    store: Arc<dyn StateStore>,
}

fn require_snippet(snippet: &str) -> Result<(), Precondition> {
    if snippet.trim().is_empty() {
        return Err(Precondition::EmptySelection);
    }
    Ok(())
}

impl ComplianceOrchestrator {
    pub fn new(api: Arc<dyn ComplianceApi>, store: Arc<dyn StateStore>) -> Self {
        Self { api, store }
    }

    /// Check a snippet against one cached guideline and update its flag.
    pub async fn check_against_guideline(
        &self,
        credentials: &mut CredentialManager,
        cache: &mut GuidelineCache,
        guideline_id: i64,
        snippet: &str,
    ) -> Result<SingleCheck, AppError> {
        let auth = credentials.require_authenticated()?;
        require_snippet(snippet)?;
        if cache.is_empty() {
            return Err(Precondition::NoGuidelines.into());
        }
        let guideline = cache
            .get(guideline_id)
            .cloned()
            .ok_or(Precondition::UnknownGuideline(guideline_id))?;

        let result = credentials
            .settle(self.api.check_snippet(&auth, guideline_id, snippet).await)
            .await?;
        cache.apply_single_result(guideline_id, result.is_compliant);

        let diagnostic = (!result.is_compliant).then(|| {
            Diagnostic::non_compliant(&guideline, format!("{}\n\n{}", guideline.title, result.comment))
        });
        info!(guideline_id, compliant = result.is_compliant, "guideline check finished");
        Ok(SingleCheck {
            guideline_id,
            is_compliant: result.is_compliant,
            comment: result.comment,
            diagnostic,
        })
    }

    /// Re-fetch the repository's guidelines, analyze the snippet against all of
    /// them, and recompute every flag from the results.
    pub async fn check_against_repository(
        &self,
        credentials: &mut CredentialManager,
        cache: &mut GuidelineCache,
        repo_id: i64,
        snippet: &str,
    ) -> Result<RepositoryCheck, AppError> {
        let auth = credentials.require_authenticated()?;
        require_snippet(snippet)?;

        let fetched = credentials
            .settle(self.api.repo_guidelines(&auth, repo_id).await)
            .await?;
        if fetched.is_empty() {
            cache.replace_scope(GuidelineScope::Repository(repo_id), fetched);
            self.persist(cache).await;
            return Err(Precondition::NoGuidelines.into());
        }

        let results = credentials
            .settle(self.api.analyze_snippet(&auth, repo_id, snippet).await)
            .await?;

        cache.replace_scope(GuidelineScope::Repository(repo_id), fetched);
        self.persist(cache).await;

        let position: HashMap<i64, usize> = cache
            .guidelines()
            .enumerate()
            .map(|(i, g)| (g.id, i))
            .collect();
        let entries = cache.view_states();
        let diagnostics: Vec<Diagnostic> = results
            .iter()
            .filter(|r| !r.is_compliant)
            .filter_map(|r| {
                let idx = position.get(&r.guideline_id)?;
                let guideline = &entries[*idx].guideline;
                Some(Diagnostic::non_compliant(guideline, r.comment.clone()))
            })
            .collect();

        let guidelines = cache.apply_compliance_results(&results);
        let compliant = guidelines.iter().filter(|g| g.completed).count();
        info!(
            repo_id,
            compliant,
            total = guidelines.len(),
            "repository check finished"
        );
        Ok(RepositoryCheck {
            repo_id,
            diagnostics,
            total: guidelines.len(),
            compliant,
            guidelines,
        })
    }

    async fn persist(&self, cache: &GuidelineCache) {
        if let Err(e) = cache.persist(self.store.as_ref()).await {
            warn!(error = %e, "failed to persist guideline list");
        }
    }
}

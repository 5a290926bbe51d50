//! Local mirror of one guideline list plus per-guideline completion flags.
//!
//! The list is replaced wholesale on every fetch and kept sorted by `order`.
//! Completion flags are derived from the latest compliance run and are never
//! persisted; a reload starts with every guideline incomplete.
use std::collections::HashMap;
use std::fmt;

use schemars::JsonSchema;
use serde::Serialize;

use quack_common::error::CommonError;
use quack_common::model::{sort_by_order, ComplianceResult, Guideline};
use quack_common::store::{self, StateStore};

/// Which guideline list the cache mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuidelineScope {
    /// The guidelines of one repository, keyed by GitHub repository id.
    Repository(i64),
    /// The guidelines owned by the authenticated account.
    Account,
}

impl GuidelineScope {
    pub fn store_key(&self) -> String {
        store::key(&format!("guidelines:{self}"))
    }
}

impl fmt::Display for GuidelineScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GuidelineScope::Repository(id) => write!(f, "repo:{id}"),
            GuidelineScope::Account => write!(f, "account"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, JsonSchema)]
pub struct GuidelineViewState {
    #[serde(flatten)]
    pub guideline: Guideline,
    /// True when the latest compliance run found the code compliant
    pub completed: bool,
}

impl GuidelineViewState {
    fn pending(guideline: Guideline) -> Self {
        Self {
            guideline,
            completed: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GuidelineCache {
    scope: Option<GuidelineScope>,
    entries: Vec<GuidelineViewState>,
}

impl GuidelineCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scope(scope: GuidelineScope, guidelines: Vec<Guideline>) -> Self {
        let mut cache = Self {
            scope: Some(scope),
            entries: Vec::new(),
        };
        cache.replace_all(guidelines);
        cache
    }

    pub fn scope(&self) -> Option<GuidelineScope> {
        self.scope
    }

    /// Replace the whole list: sorted by `order`, every flag reset.
    pub fn replace_all(&mut self, mut guidelines: Vec<Guideline>) {
        sort_by_order(&mut guidelines);
        self.entries = guidelines
            .into_iter()
            .map(GuidelineViewState::pending)
            .collect();
    }

    /// Switch to another scope and replace the list.
    pub fn replace_scope(&mut self, scope: GuidelineScope, guidelines: Vec<Guideline>) {
        self.scope = Some(scope);
        self.replace_all(guidelines);
    }

    /// Recompute every flag from a whole-repository run. Guidelines without a
    /// result become incomplete; results for unknown ids are ignored.
    pub fn apply_compliance_results(&mut self, results: &[ComplianceResult]) -> Vec<GuidelineViewState> {
        let verdicts: HashMap<i64, bool> = results
            .iter()
            .map(|r| (r.guideline_id, r.is_compliant))
            .collect();

        let updated: Vec<GuidelineViewState> = self
            .entries
            .iter()
            .map(|entry| GuidelineViewState {
                guideline: entry.guideline.clone(),
                completed: verdicts.get(&entry.guideline.id).copied().unwrap_or(false),
            })
            .collect();
        self.entries = updated;
        self.entries.clone()
    }

    /// Update one flag in place. Returns false for an unknown id.
    pub fn apply_single_result(&mut self, guideline_id: i64, is_compliant: bool) -> bool {
        match self
            .entries
            .iter_mut()
            .find(|e| e.guideline.id == guideline_id)
        {
            Some(entry) => {
                entry.completed = is_compliant;
                true
            }
            None => false,
        }
    }

    pub fn view_states(&self) -> &[GuidelineViewState] {
        &self.entries
    }

    pub fn guidelines(&self) -> impl Iterator<Item = &Guideline> {
        self.entries.iter().map(|e| &e.guideline)
    }

    pub fn get(&self, guideline_id: i64) -> Option<&Guideline> {
        self.guidelines().find(|g| g.id == guideline_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a newly created guideline.
    pub fn push(&mut self, guideline: Guideline) {
        self.entries.push(GuidelineViewState::pending(guideline));
        self.resort();
    }

    /// Replace the guideline with the same id, or append it. An edited
    /// guideline has not been checked yet, so its flag resets.
    pub fn upsert(&mut self, guideline: Guideline) {
        match self
            .entries
            .iter_mut()
            .find(|e| e.guideline.id == guideline.id)
        {
            Some(entry) => *entry = GuidelineViewState::pending(guideline),
            None => self.entries.push(GuidelineViewState::pending(guideline)),
        }
        self.resort();
    }

    pub fn remove(&mut self, guideline_id: i64) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.guideline.id != guideline_id);
        self.entries.len() != before
    }

    pub fn clear(&mut self) {
        self.scope = None;
        self.entries.clear();
    }

    fn resort(&mut self) {
        self.entries.sort_by_key(|e| e.guideline.order);
    }

    /// Restore the persisted list of `scope`, empty when nothing was stored.
    pub async fn load(store: &dyn StateStore, scope: GuidelineScope) -> Result<Self, CommonError> {
        let guidelines: Vec<Guideline> = store::get_json(store, &scope.store_key())
            .await?
            .unwrap_or_default();
        Ok(Self::with_scope(scope, guidelines))
    }

    pub async fn persist(&self, store: &dyn StateStore) -> Result<(), CommonError> {
        let Some(scope) = self.scope else {
            return Ok(());
        };
        let guidelines: Vec<&Guideline> = self.guidelines().collect();
        store::set_json(store, &scope.store_key(), &guidelines).await
    }

    /// Drop the list from memory and from the store.
    pub async fn forget(&mut self, store: &dyn StateStore) -> Result<(), CommonError> {
        if let Some(scope) = self.scope {
            store.delete(&scope.store_key()).await?;
        }
        self.clear();
        Ok(())
    }
}

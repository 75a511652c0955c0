use crate::aggregator::{DisplayedMessage, StreamFailure};
use crate::cache::SidebarState;
use crate::events::{TodoItem, TokenUsage, WorkspaceMessage};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Registration record handed to [`super::WorkspaceStore::add_session`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceMeta {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl WorkspaceMeta {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            created_at: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Immutable snapshot of one workspace, as handed to consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DerivedSessionState {
    pub messages: Vec<DisplayedMessage>,
    pub can_interrupt: bool,
    pub is_compacting: bool,
    pub loading: bool,
    pub raw_messages: Vec<WorkspaceMessage>,
    pub current_model: Option<String>,
    pub recency_timestamp: Option<i64>,
    pub todos: Vec<TodoItem>,
    pub usage: TokenUsage,
    pub last_error: Option<StreamFailure>,
}

impl DerivedSessionState {
    pub fn sidebar(&self) -> SidebarState {
        SidebarState {
            can_interrupt: self.can_interrupt,
            is_compacting: self.is_compacting,
            loading: self.loading,
            current_model: self.current_model.clone(),
            recency_timestamp: self.recency_timestamp,
        }
    }
}

/// Snapshots of every registered workspace.
///
/// Equality is per-entry pointer identity, so the map keeps its own identity
/// as long as no contained snapshot was replaced.
#[derive(Debug, Clone, Default)]
pub struct AllStates(pub BTreeMap<String, Arc<DerivedSessionState>>);

impl PartialEq for AllStates {
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len()
            && self
                .0
                .iter()
                .zip(&other.0)
                .all(|((a_id, a), (b_id, b))| a_id == b_id && Arc::ptr_eq(a, b))
    }
}

impl AllStates {
    pub fn get(&self, workspace_id: &str) -> Option<&Arc<DerivedSessionState>> {
        self.0.get(workspace_id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }
}

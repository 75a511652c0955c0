use super::listeners::{Listener, ListenerId, Listeners};
use crate::utils::sync::lock;
use arc_swap::ArcSwap;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

pub const SIDEBAR_KEY: &str = "sidebar";
pub const RECENCY_KEY: &str = "recency";

/// The primitive per-workspace fields that cross-workspace views depend on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SidebarState {
    pub can_interrupt: bool,
    pub is_compacting: bool,
    pub loading: bool,
    pub current_model: Option<String>,
    pub recency_timestamp: Option<i64>,
}

pub type SidebarMap = BTreeMap<String, SidebarState>;
pub type RecencyMap = BTreeMap<String, i64>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregateChange {
    pub sidebar: bool,
    pub recency: bool,
}

/// Cross-workspace maps rebuilt wholesale on real change.
///
/// Workspaces report their [`SidebarState`] after every folded event. Only a
/// report that differs from the previous one rebuilds the sidebar map, and
/// only a changed recency value rebuilds the recency map, so a burst of
/// content deltas never invalidates either.
pub struct DerivedAggregates {
    contributions: Mutex<HashMap<String, SidebarState>>,
    sidebar: ArcSwap<SidebarMap>,
    recency: ArcSwap<RecencyMap>,
    sidebar_version: AtomicU64,
    recency_version: AtomicU64,
    listeners: Listeners,
}

impl Default for DerivedAggregates {
    fn default() -> Self {
        Self {
            contributions: Mutex::new(HashMap::new()),
            sidebar: ArcSwap::from_pointee(SidebarMap::new()),
            recency: ArcSwap::from_pointee(RecencyMap::new()),
            sidebar_version: AtomicU64::new(0),
            recency_version: AtomicU64::new(0),
            listeners: Listeners::new(),
        }
    }
}

impl DerivedAggregates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the latest state of `workspace_id`.
    pub fn observe(&self, workspace_id: &str, state: SidebarState) -> AggregateChange {
        let change = {
            let mut contributions = lock(&self.contributions);
            let previous = contributions.get(workspace_id);
            if previous == Some(&state) {
                return AggregateChange::default();
            }
            let change = AggregateChange {
                sidebar: true,
                recency: previous.and_then(|p| p.recency_timestamp) != state.recency_timestamp,
            };
            contributions.insert(workspace_id.to_string(), state);
            self.rebuild(&contributions, change);
            change
        };
        self.announce(change);
        change
    }

    /// Drop `workspace_id` from every aggregate.
    pub fn forget(&self, workspace_id: &str) -> AggregateChange {
        let change = {
            let mut contributions = lock(&self.contributions);
            let Some(previous) = contributions.remove(workspace_id) else {
                return AggregateChange::default();
            };
            let change = AggregateChange {
                sidebar: true,
                recency: previous.recency_timestamp.is_some(),
            };
            self.rebuild(&contributions, change);
            change
        };
        self.announce(change);
        change
    }

    fn rebuild(&self, contributions: &HashMap<String, SidebarState>, change: AggregateChange) {
        if change.sidebar {
            let map: SidebarMap = contributions
                .iter()
                .map(|(id, state)| (id.clone(), state.clone()))
                .collect();
            self.sidebar.store(Arc::new(map));
            self.sidebar_version.fetch_add(1, Ordering::SeqCst);
        }
        if change.recency {
            let map: RecencyMap = contributions
                .iter()
                .filter_map(|(id, state)| state.recency_timestamp.map(|ts| (id.clone(), ts)))
                .collect();
            self.recency.store(Arc::new(map));
            self.recency_version.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn announce(&self, change: AggregateChange) {
        if change.sidebar {
            self.listeners.notify(SIDEBAR_KEY);
        }
        if change.recency {
            self.listeners.notify(RECENCY_KEY);
        }
    }

    pub fn sidebar(&self) -> Arc<SidebarMap> {
        self.sidebar.load_full()
    }

    pub fn recency(&self) -> Arc<RecencyMap> {
        self.recency.load_full()
    }

    pub fn sidebar_version(&self) -> u64 {
        self.sidebar_version.load(Ordering::SeqCst)
    }

    pub fn recency_version(&self) -> u64 {
        self.recency_version.load(Ordering::SeqCst)
    }

    /// Listen on [`SIDEBAR_KEY`] or [`RECENCY_KEY`].
    pub fn subscribe_key(&self, key: &str, listener: Listener) -> ListenerId {
        self.listeners.subscribe_key(key, listener)
    }

    pub fn subscribe_any(&self, listener: Listener) -> ListenerId {
        self.listeners.subscribe_any(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.listeners.unsubscribe(id)
    }
}

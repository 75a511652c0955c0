//! Session registry and composition root.
//!
//! [`WorkspaceStore`] owns one [`WorkspaceSession`] per workspace, routes
//! transport events into it, publishes cache invalidations once the session
//! lock is released, and spawns history write-backs for finalized
//! compactions.

pub mod session;
pub mod state;

pub use session::{SessionEffects, WorkspaceSession};
pub use state::{AllStates, DerivedSessionState, WorkspaceMeta};

use crate::cache::{DerivedAggregates, RecencyMap, SidebarMap, SidebarState, VersionedCache};
use crate::compaction::{CancellationMarkers, NoCancellationMarkers, SummaryReplacement};
use crate::config::StoreConfig;
use crate::error::StoreError;
use crate::events::{WorkspaceEvent, parse_event};
use crate::subscription::{ConsumerHub, StateWatch};
use crate::transport::{
    EventHandler, HistoryReplacer, NoticeReceiver, NoticeSender, StoreNotice,
    TransportSubscription, WorkspaceTransport, notice_bus,
};
use crate::utils::sync::lock;
use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, Weak};
use tokio_util::task::TaskTracker;

const ALL_STATES_KEY: &str = "all";

type SessionHandle = Arc<Mutex<WorkspaceSession>>;

#[derive(Default)]
struct Registry {
    /// Every live session, registered or detached.
    sessions: HashMap<String, SessionHandle>,
    /// Registered ids and their transport subscription, once attached.
    registered: HashMap<String, Option<Box<dyn TransportSubscription>>>,
}

struct StoreInner {
    config: StoreConfig,
    transport: Arc<dyn WorkspaceTransport>,
    replacer: Arc<dyn HistoryReplacer>,
    markers: Arc<dyn CancellationMarkers>,
    registry: Mutex<Registry>,
    states: VersionedCache<DerivedSessionState>,
    all_states: VersionedCache<AllStates>,
    aggregates: DerivedAggregates,
    hub: Arc<ConsumerHub>,
    notices: NoticeSender,
    tasks: TaskTracker,
}

/// Builder for [`WorkspaceStore`].
pub struct WorkspaceStoreBuilder {
    config: StoreConfig,
    transport: Arc<dyn WorkspaceTransport>,
    replacer: Arc<dyn HistoryReplacer>,
    markers: Arc<dyn CancellationMarkers>,
}

impl WorkspaceStoreBuilder {
    pub fn config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    pub fn cancellation_markers(mut self, markers: Arc<dyn CancellationMarkers>) -> Self {
        self.markers = markers;
        self
    }

    /// Validate the configuration and wire the store together.
    pub fn build(self) -> Result<WorkspaceStore, StoreError> {
        self.config.validate()?;
        let (notices, _) = notice_bus(self.config.notices.capacity);
        let inner = StoreInner {
            config: self.config,
            transport: self.transport,
            replacer: self.replacer,
            markers: self.markers,
            registry: Mutex::new(Registry::default()),
            states: VersionedCache::new(),
            all_states: VersionedCache::new(),
            aggregates: DerivedAggregates::new(),
            hub: Arc::new(ConsumerHub::new()),
            notices,
            tasks: TaskTracker::new(),
        };

        // Listeners only advance watch counters; consumers pull on their own task.
        let hub = Arc::clone(&inner.hub);
        inner
            .states
            .subscribe_any(Arc::new(move |workspace_id: &str| hub.notify(workspace_id)));
        let hub = Arc::clone(&inner.hub);
        inner
            .all_states
            .subscribe_key(ALL_STATES_KEY, Arc::new(move |_key: &str| hub.notify_all()));
        let hub = Arc::clone(&inner.hub);
        inner
            .aggregates
            .subscribe_any(Arc::new(move |key: &str| hub.notify_aggregate(key)));

        Ok(WorkspaceStore {
            inner: Arc::new(inner),
        })
    }
}

/// Per-workspace streaming aggregation with reference-stable snapshots.
#[derive(Clone)]
pub struct WorkspaceStore {
    inner: Arc<StoreInner>,
}

impl WorkspaceStore {
    pub fn builder(
        transport: Arc<dyn WorkspaceTransport>,
        replacer: Arc<dyn HistoryReplacer>,
    ) -> WorkspaceStoreBuilder {
        WorkspaceStoreBuilder {
            config: StoreConfig::default(),
            transport,
            replacer,
            markers: Arc::new(NoCancellationMarkers),
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.inner.config
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Register a workspace and attach it to the transport. Idempotent.
    pub fn add_session(&self, meta: WorkspaceMeta) {
        self.inner.add_session(meta);
    }

    /// Detach and forget a workspace. Never fails.
    pub fn remove_session(&self, workspace_id: &str) {
        self.inner.remove_session(workspace_id);
    }

    /// Make the registered set equal to `desired`. Detached sessions not in
    /// `desired` are dropped as well.
    pub fn sync_sessions(&self, desired: &HashMap<String, WorkspaceMeta>) {
        let current: BTreeSet<String> = self.registered_ids().into_iter().collect();
        for stale in current.iter().filter(|id| !desired.contains_key(*id)) {
            self.remove_session(stale);
        }
        for detached in self.inner.detached_ids() {
            if !desired.contains_key(&detached) {
                tracing::debug!(workspace_id = %detached, "Dropping detached session");
                self.remove_session(&detached);
            }
        }
        for (id, meta) in desired {
            if !current.contains(id) {
                self.add_session(meta.clone());
            }
        }
    }

    pub fn registered_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.inner.registry)
            .registered
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    pub fn is_registered(&self, workspace_id: &str) -> bool {
        self.inner.is_registered(workspace_id)
    }

    /// `None` when no session exists for `workspace_id`.
    pub fn is_caught_up(&self, workspace_id: &str) -> Option<bool> {
        let session = self.inner.session(workspace_id)?;
        Some(lock(&session).is_caught_up())
    }

    pub fn created_at(&self, workspace_id: &str) -> Option<DateTime<Utc>> {
        let session = self.inner.session(workspace_id)?;
        Some(lock(&session).created_at())
    }

    // ── Ingest ───────────────────────────────────────────────────────

    /// Apply one event to `workspace_id`, in call order.
    pub fn handle_event(&self, workspace_id: &str, event: WorkspaceEvent) {
        self.inner.handle_event(workspace_id, event);
    }

    /// Parse and apply one raw event. Malformed payloads are logged and
    /// dropped; the error is returned for callers that want to count them.
    pub fn handle_raw(&self, workspace_id: &str, raw: serde_json::Value) -> Result<(), StoreError> {
        match parse_event(workspace_id, raw) {
            Ok(event) => {
                self.inner.handle_event(workspace_id, event);
                Ok(())
            }
            Err(error) => {
                tracing::warn!(workspace_id, %error, "Dropping malformed event");
                Err(error)
            }
        }
    }

    /// Drain `events` in order. A given workspace must be fed by one stream
    /// only. Returns the number of events handled.
    pub async fn ingest<S>(&self, events: S) -> usize
    where
        S: Stream<Item = (String, WorkspaceEvent)>,
    {
        let mut events = std::pin::pin!(events);
        let mut handled = 0;
        while let Some((workspace_id, event)) = events.next().await {
            self.inner.handle_event(&workspace_id, event);
            handled += 1;
        }
        handled
    }

    /// Wait until every spawned history replacement has finished.
    pub async fn flush_pending(&self) {
        let tasks = &self.inner.tasks;
        tasks.close();
        tasks.wait().await;
        tasks.reopen();
    }

    // ── Snapshots ────────────────────────────────────────────────────

    pub fn get_state(&self, workspace_id: &str) -> Option<Arc<DerivedSessionState>> {
        self.inner.get_state(workspace_id)
    }

    /// Snapshots of exactly the registered workspaces.
    pub fn get_all_states(&self) -> Arc<AllStates> {
        let inner = &self.inner;
        inner.all_states.get(ALL_STATES_KEY, || {
            let ids: Vec<String> = lock(&inner.registry).registered.keys().cloned().collect();
            AllStates(
                ids.into_iter()
                    .filter_map(|id| inner.get_state(&id).map(|state| (id, state)))
                    .collect(),
            )
        })
    }

    pub fn get_recency(&self) -> Arc<RecencyMap> {
        self.inner.aggregates.recency()
    }

    pub fn get_sidebar_states(&self) -> Arc<SidebarMap> {
        self.inner.aggregates.sidebar()
    }

    // ── Push ─────────────────────────────────────────────────────────

    pub fn watch(&self, workspace_id: &str) -> StateWatch {
        self.inner.hub.watch(workspace_id)
    }

    pub fn watch_all(&self) -> StateWatch {
        self.inner.hub.watch_all()
    }

    /// Watch [`crate::cache::SIDEBAR_KEY`] or [`crate::cache::RECENCY_KEY`].
    pub fn watch_aggregate(&self, key: &str) -> StateWatch {
        self.inner.hub.watch_aggregate(key)
    }

    pub fn notices(&self) -> NoticeReceiver {
        self.inner.notices.subscribe()
    }
}

impl StoreInner {
    fn session(&self, workspace_id: &str) -> Option<SessionHandle> {
        lock(&self.registry).sessions.get(workspace_id).cloned()
    }

    fn is_registered(&self, workspace_id: &str) -> bool {
        lock(&self.registry).registered.contains_key(workspace_id)
    }

    fn detached_ids(&self) -> Vec<String> {
        let registry = lock(&self.registry);
        registry
            .sessions
            .keys()
            .filter(|id| !registry.registered.contains_key(*id))
            .cloned()
            .collect()
    }

    fn session_or_detached(&self, workspace_id: &str) -> SessionHandle {
        let mut registry = lock(&self.registry);
        if let Some(session) = registry.sessions.get(workspace_id) {
            return Arc::clone(session);
        }
        tracing::debug!(workspace_id, "Event for unknown workspace, creating detached session");
        let session = Arc::new(Mutex::new(WorkspaceSession::detached(
            workspace_id,
            &self.config,
        )));
        registry
            .sessions
            .insert(workspace_id.to_string(), Arc::clone(&session));
        session
    }

    fn get_state(&self, workspace_id: &str) -> Option<Arc<DerivedSessionState>> {
        let session = self.session(workspace_id)?;
        Some(self.states.get(workspace_id, || lock(&session).derive()))
    }

    fn add_session(self: &Arc<Self>, meta: WorkspaceMeta) {
        let workspace_id = meta.id.clone();
        {
            let mut registry = lock(&self.registry);
            if registry.registered.contains_key(&workspace_id) {
                tracing::debug!(workspace_id = %workspace_id, "Workspace already registered");
                return;
            }
            if registry.sessions.contains_key(&workspace_id) {
                tracing::debug!(workspace_id = %workspace_id, "Replacing detached session");
            }
            let session = WorkspaceSession::buffering(&meta, &self.config);
            registry
                .sessions
                .insert(workspace_id.clone(), Arc::new(Mutex::new(session)));
            registry.registered.insert(workspace_id.clone(), None);
        }
        tracing::info!(workspace_id = %workspace_id, name = ?meta.name, "Workspace registered");
        self.publish_membership(&workspace_id);

        let weak: Weak<StoreInner> = Arc::downgrade(self);
        let handler_id = workspace_id.clone();
        let handler: EventHandler = Arc::new(move |event: WorkspaceEvent| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_event(&handler_id, event);
            }
        });

        let subscription = match self.transport.subscribe(&workspace_id, handler) {
            Ok(subscription) => subscription,
            Err(error) => {
                let error = StoreError::transport(&workspace_id, "subscribe", &error);
                tracing::warn!(workspace_id = %workspace_id, %error, "Transport subscribe failed");
                return;
            }
        };

        let orphan = {
            let mut registry = lock(&self.registry);
            match registry.registered.get_mut(&workspace_id) {
                Some(slot) => {
                    *slot = Some(subscription);
                    None
                }
                None => Some(subscription),
            }
        };
        if let Some(subscription) = orphan {
            // Removed while subscribing.
            release(&workspace_id, subscription);
        }
    }

    fn remove_session(&self, workspace_id: &str) {
        let (session, registration) = {
            let mut registry = lock(&self.registry);
            (
                registry.sessions.remove(workspace_id),
                registry.registered.remove(workspace_id),
            )
        };
        let existed = session.is_some() || registration.is_some();
        if let Some(Some(subscription)) = registration {
            release(workspace_id, subscription);
        }
        if !existed {
            return;
        }

        self.states.bump(workspace_id);
        self.states.remove(workspace_id);
        self.aggregates.forget(workspace_id);
        self.hub.forget(workspace_id);
        self.all_states.bump(ALL_STATES_KEY);
        tracing::info!(workspace_id, "Workspace removed");
    }

    fn publish_membership(&self, workspace_id: &str) {
        let sidebar = self
            .session(workspace_id)
            .map(|session| lock(&session).sidebar());
        self.states.bump(workspace_id);
        if let Some(sidebar) = sidebar {
            self.aggregates.observe(workspace_id, sidebar);
        }
        self.all_states.bump(ALL_STATES_KEY);
    }

    fn handle_event(self: &Arc<Self>, workspace_id: &str, event: WorkspaceEvent) {
        let session = self.session_or_detached(workspace_id);
        let (effects, sidebar) = {
            let mut session = lock(&session);
            let effects = session.handle(event, self.markers.as_ref(), &self.config);
            let sidebar = effects.changed.then(|| session.sidebar());
            (effects, sidebar)
        };
        self.publish(workspace_id, effects, sidebar);
    }

    fn publish(
        self: &Arc<Self>,
        workspace_id: &str,
        effects: SessionEffects,
        sidebar: Option<SidebarState>,
    ) {
        if effects.changed {
            self.states.bump(workspace_id);
            if self.is_registered(workspace_id) {
                if let Some(sidebar) = sidebar {
                    self.aggregates.observe(workspace_id, sidebar);
                }
                self.all_states.bump(ALL_STATES_KEY);
            }
        }
        for notice in effects.notices {
            // No receivers is fine.
            let _ = self.notices.send(notice);
        }
        if let Some(replacement) = effects.replacement {
            self.spawn_replacement(workspace_id, replacement);
        }
    }

    fn spawn_replacement(self: &Arc<Self>, workspace_id: &str, replacement: SummaryReplacement) {
        let SummaryReplacement {
            request_id,
            summary,
            truncated,
        } = replacement;

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::error!(
                workspace_id,
                %request_id,
                "No async runtime, cannot replace history"
            );
            self.finish_replacement(
                workspace_id,
                &request_id,
                Err(anyhow::anyhow!("no async runtime available")),
                truncated,
            );
            return;
        };

        let weak = Arc::downgrade(self);
        let replacer = Arc::clone(&self.replacer);
        let workspace_id = workspace_id.to_string();
        self.tasks.spawn_on(
            async move {
                let result = replacer.replace_history(&workspace_id, summary).await;
                if let Some(inner) = weak.upgrade() {
                    inner.finish_replacement(&workspace_id, &request_id, result, truncated);
                }
            },
            &handle,
        );
    }

    fn finish_replacement(
        &self,
        workspace_id: &str,
        request_id: &str,
        result: anyhow::Result<()>,
        truncated: bool,
    ) {
        let notice = match result {
            Ok(()) => {
                tracing::info!(workspace_id, request_id, truncated, "Compaction finalized");
                StoreNotice::CompactionFinalized {
                    workspace_id: workspace_id.to_string(),
                    request_id: request_id.to_string(),
                    truncated,
                }
            }
            Err(error) => {
                let error = StoreError::HistoryReplace {
                    workspace_id: workspace_id.to_string(),
                    message: format!("{error:#}"),
                };
                tracing::error!(workspace_id, request_id, %error, "History replacement failed");
                StoreNotice::CompactionFailed {
                    workspace_id: workspace_id.to_string(),
                    request_id: request_id.to_string(),
                    message: error.to_string(),
                }
            }
        };

        // Runs whatever the outcome, so readers never see a stuck write-back.
        if let Some(session) = self.session(workspace_id) {
            let sidebar = {
                let mut session = lock(&session);
                session
                    .finish_compaction(request_id)
                    .then(|| session.sidebar())
            };
            if let Some(sidebar) = sidebar {
                self.states.bump(workspace_id);
                if self.is_registered(workspace_id) {
                    self.aggregates.observe(workspace_id, sidebar);
                    self.all_states.bump(ALL_STATES_KEY);
                }
            }
        }
        let _ = self.notices.send(notice);
    }
}

fn release(workspace_id: &str, subscription: Box<dyn TransportSubscription>) {
    if let Err(error) = subscription.unsubscribe() {
        let error = StoreError::transport(workspace_id, "unsubscribe", &error);
        tracing::warn!(workspace_id, %error, "Transport unsubscribe failed");
    }
}

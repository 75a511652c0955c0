use super::traits::{EventHandler, HistoryReplacer, TransportSubscription, WorkspaceTransport};
use crate::events::{WorkspaceEvent, WorkspaceMessage};
use crate::utils::sync::lock;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

type Routes = HashMap<String, Vec<(u64, EventHandler)>>;

/// In-process transport: events are pushed with [`ChannelTransport::deliver`]
/// and handed to every handler attached to that workspace, synchronously and
/// in call order.
#[derive(Default)]
pub struct ChannelTransport {
    routes: Arc<Mutex<Routes>>,
    next_id: AtomicU64,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand `event` to the handlers of `workspace_id`. Returns `false` when
    /// nobody is attached and the event was dropped.
    pub fn deliver(&self, workspace_id: &str, event: WorkspaceEvent) -> bool {
        let handlers: Vec<EventHandler> = lock(&self.routes)
            .get(workspace_id)
            .map(|attached| attached.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();
        if handlers.is_empty() {
            tracing::debug!(workspace_id, kind = %event.kind(), "No subscriber, event dropped");
            return false;
        }
        for handler in handlers {
            handler(event.clone());
        }
        true
    }

    pub fn is_attached(&self, workspace_id: &str) -> bool {
        self.subscriber_count(workspace_id) > 0
    }

    pub fn subscriber_count(&self, workspace_id: &str) -> usize {
        lock(&self.routes).get(workspace_id).map_or(0, Vec::len)
    }
}

impl WorkspaceTransport for ChannelTransport {
    fn subscribe(
        &self,
        workspace_id: &str,
        handler: EventHandler,
    ) -> anyhow::Result<Box<dyn TransportSubscription>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.routes)
            .entry(workspace_id.to_string())
            .or_default()
            .push((id, handler));
        Ok(Box::new(ChannelSubscription {
            routes: Arc::downgrade(&self.routes),
            workspace_id: workspace_id.to_string(),
            id,
        }))
    }
}

struct ChannelSubscription {
    routes: Weak<Mutex<Routes>>,
    workspace_id: String,
    id: u64,
}

impl TransportSubscription for ChannelSubscription {
    fn unsubscribe(self: Box<Self>) -> anyhow::Result<()> {
        let Some(routes) = self.routes.upgrade() else {
            return Ok(());
        };
        let mut routes = lock(&routes);
        if let Some(attached) = routes.get_mut(&self.workspace_id) {
            attached.retain(|(id, _)| *id != self.id);
            if attached.is_empty() {
                routes.remove(&self.workspace_id);
            }
        }
        Ok(())
    }
}

/// Keeps every replacement in memory instead of writing it anywhere.
#[derive(Debug, Default)]
pub struct RecordingHistoryReplacer {
    replaced: Mutex<Vec<(String, WorkspaceMessage)>>,
}

impl RecordingHistoryReplacer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replaced(&self) -> Vec<(String, WorkspaceMessage)> {
        lock(&self.replaced).clone()
    }

    pub fn count(&self) -> usize {
        lock(&self.replaced).len()
    }
}

impl HistoryReplacer for RecordingHistoryReplacer {
    fn replace_history<'a>(
        &'a self,
        workspace_id: &'a str,
        summary: WorkspaceMessage,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>> {
        Box::pin(async move {
            tracing::info!(workspace_id, summary_id = %summary.id, "History replaced with summary");
            lock(&self.replaced).push((workspace_id.to_string(), summary));
            Ok(())
        })
    }
}

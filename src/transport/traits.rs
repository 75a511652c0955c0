use crate::events::{WorkspaceEvent, WorkspaceMessage};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Callback receiving one workspace's events, in delivery order.
pub type EventHandler = Arc<dyn Fn(WorkspaceEvent) + Send + Sync>;

/// Source of per-workspace event channels.
///
/// Delivery order per workspace is guaranteed. Exactly-once delivery is not:
/// duplicates and replays after reconnect are expected.
pub trait WorkspaceTransport: Send + Sync {
    /// Attach `handler` to the channel of `workspace_id`.
    ///
    /// The channel first replays history, ends the replay with `caught-up`,
    /// then continues with live traffic.
    fn subscribe(
        &self,
        workspace_id: &str,
        handler: EventHandler,
    ) -> anyhow::Result<Box<dyn TransportSubscription>>;
}

/// Handle returned by [`WorkspaceTransport::subscribe`].
pub trait TransportSubscription: Send + Sync {
    fn unsubscribe(self: Box<Self>) -> anyhow::Result<()>;
}

/// Outbound write-back of a compacted history.
///
/// Replaces the stored history of `workspace_id` with `summary`. The
/// transport is expected to echo the result back as `delete` and message
/// events on the workspace channel.
pub trait HistoryReplacer: Send + Sync {
    fn replace_history<'a>(
        &'a self,
        workspace_id: &'a str,
        summary: WorkspaceMessage,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;
}

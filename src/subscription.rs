//! Push side of the consumer API.
//!
//! Cache listeners run synchronously on the event path. All they do here is
//! advance a counter in a `tokio::sync::watch` channel; consumers wake on
//! their own task and pull the snapshot they care about. No consumer code ever
//! runs inside event processing.

use crate::utils::sync::lock;
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;

/// Change counters for per-workspace states, the all-states view and the
/// cross-workspace aggregates.
pub struct ConsumerHub {
    workspaces: Mutex<HashMap<String, watch::Sender<u64>>>,
    aggregates: Mutex<HashMap<String, watch::Sender<u64>>>,
    all: watch::Sender<u64>,
}

impl Default for ConsumerHub {
    fn default() -> Self {
        Self {
            workspaces: Mutex::new(HashMap::new()),
            aggregates: Mutex::new(HashMap::new()),
            all: watch::Sender::new(0),
        }
    }
}

fn advance(sender: &watch::Sender<u64>) {
    sender.send_modify(|version| *version = version.wrapping_add(1));
}

fn watch_key(senders: &Mutex<HashMap<String, watch::Sender<u64>>>, key: &str) -> StateWatch {
    let mut senders = lock(senders);
    let sender = senders
        .entry(key.to_string())
        .or_insert_with(|| watch::Sender::new(0));
    StateWatch::new(sender.subscribe())
}

fn notify_key(senders: &Mutex<HashMap<String, watch::Sender<u64>>>, key: &str) {
    if let Some(sender) = lock(senders).get(key) {
        advance(sender);
    }
}

impl ConsumerHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Watch one workspace. Works before the workspace exists.
    pub fn watch(&self, workspace_id: &str) -> StateWatch {
        watch_key(&self.workspaces, workspace_id)
    }

    /// Watch the set of all registered states.
    pub fn watch_all(&self) -> StateWatch {
        StateWatch::new(self.all.subscribe())
    }

    /// Watch a cross-workspace aggregate by its cache key.
    pub fn watch_aggregate(&self, key: &str) -> StateWatch {
        watch_key(&self.aggregates, key)
    }

    /// Drop the workspace's counter. Open watches see any pending change,
    /// then end.
    pub fn forget(&self, workspace_id: &str) {
        lock(&self.workspaces).remove(workspace_id);
    }

    pub fn notify(&self, workspace_id: &str) {
        notify_key(&self.workspaces, workspace_id);
    }

    pub fn notify_all(&self) {
        advance(&self.all);
    }

    pub fn notify_aggregate(&self, key: &str) {
        notify_key(&self.aggregates, key);
    }
}

/// Receiving end handed to consumers.
///
/// Carries only a change counter. After [`StateWatch::changed`] resolves,
/// pull the current snapshot from the store. Several changes between two
/// polls collapse into one wake-up.
#[derive(Debug, Clone)]
pub struct StateWatch {
    rx: watch::Receiver<u64>,
}

impl StateWatch {
    fn new(mut rx: watch::Receiver<u64>) -> Self {
        rx.mark_unchanged();
        Self { rx }
    }

    /// Wait for the next change. Returns `false` once the store is gone or
    /// the watched workspace was removed.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }

    /// Whether a change arrived since the last [`StateWatch::changed`].
    pub fn has_changed(&self) -> bool {
        self.rx.has_changed().unwrap_or(false)
    }

    /// Number of changes published so far.
    pub fn version(&self) -> u64 {
        *self.rx.borrow()
    }

    /// Stream yielding the counter on every change after this call.
    pub fn into_stream(self) -> WatchStream<u64> {
        WatchStream::from_changes(self.rx)
    }
}

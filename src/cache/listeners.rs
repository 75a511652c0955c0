use crate::utils::sync::lock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Invalidation callback. Receives the key that was bumped.
pub type Listener = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct ListenerTable {
    keyed: HashMap<String, Vec<(ListenerId, Listener)>>,
    global: Vec<(ListenerId, Listener)>,
}

/// Per-key and global invalidation listeners.
///
/// Listeners are called synchronously from [`Listeners::notify`], after the
/// table lock is released, so a listener may subscribe or unsubscribe.
#[derive(Default)]
pub struct Listeners {
    table: Mutex<ListenerTable>,
    next_id: AtomicU64,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> ListenerId {
        ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn subscribe_key(&self, key: &str, listener: Listener) -> ListenerId {
        let id = self.next_id();
        lock(&self.table)
            .keyed
            .entry(key.to_string())
            .or_default()
            .push((id, listener));
        id
    }

    pub fn subscribe_any(&self, listener: Listener) -> ListenerId {
        let id = self.next_id();
        lock(&self.table).global.push((id, listener));
        id
    }

    /// Returns whether a listener was removed. Safe to call repeatedly.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut table = lock(&self.table);
        let before = table.global.len();
        table.global.retain(|(existing, _)| *existing != id);
        if table.global.len() != before {
            return true;
        }
        let mut removed = false;
        table.keyed.retain(|_, listeners| {
            let len = listeners.len();
            listeners.retain(|(existing, _)| *existing != id);
            removed |= listeners.len() != len;
            !listeners.is_empty()
        });
        removed
    }

    pub fn notify(&self, key: &str) {
        let targets: Vec<Listener> = {
            let table = lock(&self.table);
            table
                .keyed
                .get(key)
                .into_iter()
                .flatten()
                .chain(table.global.iter())
                .map(|(_, listener)| Arc::clone(listener))
                .collect()
        };
        for listener in targets {
            listener(key);
        }
    }

    pub fn len(&self) -> usize {
        let table = lock(&self.table);
        table.global.len() + table.keyed.values().map(Vec::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

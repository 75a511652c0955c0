use crate::utils::sync::lock;
use std::collections::HashMap;
use std::sync::Mutex;

/// Record of compactions the user explicitly cancelled.
///
/// The cancel action lives outside this crate: it writes a marker naming the
/// workspace and the compaction request, then interrupts the stream. The
/// coordinator consults the marker when the resulting `stream-abort` arrives.
pub trait CancellationMarkers: Send + Sync {
    /// Remove and report the marker for `(workspace_id, request_id)`.
    ///
    /// A marker for a different request is left in place and reported as
    /// absent.
    fn take_matching(&self, workspace_id: &str, request_id: &str) -> bool;
}

/// No one ever cancels: every interrupted summary is accepted.
#[derive(Debug, Default)]
pub struct NoCancellationMarkers;

impl CancellationMarkers for NoCancellationMarkers {
    fn take_matching(&self, _workspace_id: &str, _request_id: &str) -> bool {
        false
    }
}

/// Process-local markers, one per workspace.
#[derive(Debug, Default)]
pub struct InMemoryCancellationMarkers {
    markers: Mutex<HashMap<String, String>>,
}

impl InMemoryCancellationMarkers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark the compaction `request_id` in `workspace_id` as cancelled.
    pub fn mark(&self, workspace_id: &str, request_id: &str) {
        lock(&self.markers).insert(workspace_id.to_string(), request_id.to_string());
    }

    pub fn get(&self, workspace_id: &str) -> Option<String> {
        lock(&self.markers).get(workspace_id).cloned()
    }

    pub fn clear(&self, workspace_id: &str) -> Option<String> {
        lock(&self.markers).remove(workspace_id)
    }
}

impl CancellationMarkers for InMemoryCancellationMarkers {
    fn take_matching(&self, workspace_id: &str, request_id: &str) -> bool {
        let mut markers = lock(&self.markers);
        if markers.get(workspace_id).map(String::as_str) == Some(request_id) {
            markers.remove(workspace_id);
            true
        } else {
            false
        }
    }
}

//! Pre-checkpoint buffering for one workspace.
//!
//! Until the transport signals `caught-up`, stream/tool/reasoning events are
//! queued and plain messages are collected as history. The checkpoint hands
//! both back so the owner can load the history in one batch and replay the
//! queue in arrival order before any live event is applied.
//!
//! Pass-through events (`stream-error`, `delete`) apply immediately but are
//! also recorded in the queue at their arrival position, so a rebuild at the
//! checkpoint sees them after the stream events they follow. A `delete` also
//! prunes history collected before it.
//!
//! Because history is loaded as one batch, plain messages always land before
//! any replayed stream output, whatever their arrival order.

use crate::events::{EventClass, WorkspaceEvent, WorkspaceMessage};
use std::collections::{HashSet, VecDeque};

/// Where an inbound event goes.
#[derive(Debug, PartialEq)]
pub enum Routed {
    /// Apply now.
    Apply(WorkspaceEvent),
    /// Held until caught-up.
    Deferred,
    /// Checkpoint reached. Rebuild from `history` loaded as one batch, then
    /// apply `pending` in order. The controller is live from here on.
    CaughtUp {
        history: Vec<WorkspaceMessage>,
        pending: Vec<WorkspaceEvent>,
    },
    /// Duplicate or late `caught-up` for a live workspace.
    Ignored,
}

#[derive(Debug)]
pub struct ReplayController {
    live: bool,
    history: Vec<WorkspaceMessage>,
    pending: VecDeque<WorkspaceEvent>,
    max_pending: usize,
    dropped: u64,
}

impl ReplayController {
    /// A controller waiting for its checkpoint.
    pub fn buffering(max_pending: usize) -> Self {
        Self {
            live: false,
            history: Vec::new(),
            pending: VecDeque::new(),
            max_pending: max_pending.max(1),
            dropped: 0,
        }
    }

    /// A controller that applies everything immediately.
    pub fn live(max_pending: usize) -> Self {
        Self {
            live: true,
            ..Self::buffering(max_pending)
        }
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Queued events discarded because the queue was full.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn route(&mut self, workspace_id: &str, event: WorkspaceEvent) -> Routed {
        match event.class() {
            EventClass::Checkpoint if self.live => {
                tracing::debug!(workspace_id, "duplicate caught-up ignored");
                Routed::Ignored
            }
            EventClass::Checkpoint => {
                self.live = true;
                let history = std::mem::take(&mut self.history);
                let pending: Vec<WorkspaceEvent> = self.pending.drain(..).collect();
                tracing::info!(
                    workspace_id,
                    history = history.len(),
                    pending = pending.len(),
                    dropped = self.dropped,
                    "workspace caught up"
                );
                Routed::CaughtUp { history, pending }
            }
            _ if self.live => Routed::Apply(event),
            EventClass::PassThrough => {
                if let Some(replayed) = self.record_pass_through(&event) {
                    self.enqueue(workspace_id, replayed);
                }
                Routed::Apply(event)
            }
            EventClass::History => {
                if let WorkspaceEvent::Message(message) = event {
                    self.history.push(message);
                }
                Routed::Deferred
            }
            EventClass::Bufferable => {
                self.enqueue(workspace_id, event);
                Routed::Deferred
            }
        }
    }

    /// Reconcile a pass-through event with what is already buffered and
    /// return the form it takes in the replay queue.
    fn record_pass_through(&mut self, event: &WorkspaceEvent) -> Option<WorkspaceEvent> {
        match event {
            WorkspaceEvent::Delete { message_ids } => {
                let doomed: HashSet<&str> = message_ids.iter().map(String::as_str).collect();
                self.history
                    .retain(|message| !doomed.contains(message.id.as_str()));
                // Only ids the queue itself creates need deleting on replay.
                let queued: Vec<String> = message_ids
                    .iter()
                    .filter(|id| {
                        self.pending
                            .iter()
                            .any(|pending| pending.message_id() == Some(id.as_str()))
                    })
                    .cloned()
                    .collect();
                (!queued.is_empty()).then_some(WorkspaceEvent::Delete {
                    message_ids: queued,
                })
            }
            other => Some(other.clone()),
        }
    }

    fn enqueue(&mut self, workspace_id: &str, event: WorkspaceEvent) {
        self.pending.push_back(event);
        if self.pending.len() > self.max_pending
            && let Some(oldest) = self.pending.pop_front()
        {
            self.dropped += 1;
            tracing::warn!(
                workspace_id,
                kind = %oldest.kind(),
                max_pending = self.max_pending,
                "pre-checkpoint queue full, dropped oldest event"
            );
        }
    }
}

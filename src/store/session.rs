use super::state::{DerivedSessionState, WorkspaceMeta};
use crate::aggregator::{FoldEffects, StreamingAggregator};
use crate::cache::SidebarState;
use crate::compaction::{
    CancellationMarkers, CompactionCoordinator, CompactionOutcome, CompactionPhase,
    SummaryReplacement,
};
use crate::config::StoreConfig;
use crate::events::WorkspaceEvent;
use crate::replay::{ReplayController, Routed};
use crate::transport::{SkipReason, StoreNotice};
use chrono::{DateTime, Utc};

/// What handling one event produced, for the store to publish once the
/// session lock is released.
#[derive(Debug, Default)]
pub struct SessionEffects {
    pub changed: bool,
    pub notices: Vec<StoreNotice>,
    pub replacement: Option<SummaryReplacement>,
}

impl SessionEffects {
    fn absorb(&mut self, other: SessionEffects) {
        self.changed |= other.changed;
        self.notices.extend(other.notices);
        if other.replacement.is_some() {
            self.replacement = other.replacement;
        }
    }
}

/// All mutable state of one workspace. Guarded by one mutex in the store.
#[derive(Debug)]
pub struct WorkspaceSession {
    id: String,
    created_at: DateTime<Utc>,
    replay: ReplayController,
    aggregator: StreamingAggregator,
    compaction: CompactionCoordinator,
}

impl WorkspaceSession {
    /// A registered session waiting for its history replay.
    pub fn buffering(meta: &WorkspaceMeta, config: &StoreConfig) -> Self {
        Self {
            id: meta.id.clone(),
            created_at: meta.created_at.unwrap_or_else(Utc::now),
            replay: ReplayController::buffering(config.buffer.max_pending_events),
            aggregator: StreamingAggregator::new(),
            compaction: CompactionCoordinator::new(),
        }
    }

    /// A session created for an event nobody registered. Live immediately.
    pub fn detached(workspace_id: &str, config: &StoreConfig) -> Self {
        Self {
            id: workspace_id.to_string(),
            created_at: Utc::now(),
            replay: ReplayController::live(config.buffer.max_pending_events),
            aggregator: StreamingAggregator::new(),
            compaction: CompactionCoordinator::new(),
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn is_caught_up(&self) -> bool {
        self.replay.is_live()
    }

    pub fn compaction_phase(&self) -> CompactionPhase {
        self.compaction.phase(&self.aggregator)
    }

    pub fn handle(
        &mut self,
        event: WorkspaceEvent,
        markers: &dyn CancellationMarkers,
        config: &StoreConfig,
    ) -> SessionEffects {
        match self.replay.route(&self.id, event) {
            Routed::Apply(event) => self.fold(event, markers, config),
            Routed::Deferred | Routed::Ignored => SessionEffects::default(),
            Routed::CaughtUp { history, pending } => {
                // Pass-through events applied early are in `pending` too.
                self.aggregator = StreamingAggregator::new();
                self.aggregator.load_history(history);
                // Leaving the loading state is itself a change.
                let mut effects = SessionEffects {
                    changed: true,
                    ..SessionEffects::default()
                };
                for event in pending {
                    effects.absorb(self.fold(event, markers, config));
                }
                effects
            }
        }
    }

    fn fold(
        &mut self,
        event: WorkspaceEvent,
        markers: &dyn CancellationMarkers,
        config: &StoreConfig,
    ) -> SessionEffects {
        let terminal = match &event {
            WorkspaceEvent::StreamEnd { message_id, .. } => Some((message_id.clone(), true)),
            WorkspaceEvent::StreamAbort { message_id } => Some((message_id.clone(), false)),
            _ => None,
        };
        tracing::debug!(workspace_id = %self.id, kind = %event.kind(), "applying event");

        let fold = self.aggregator.apply(event);
        let mut effects = self.fold_notices(fold);

        if let Some((message_id, ended)) = terminal {
            let outcome = if ended {
                self.compaction
                    .on_stream_end(&self.id, &self.aggregator, &message_id, &config.compaction)
            } else {
                self.compaction.on_stream_abort(
                    &self.id,
                    &self.aggregator,
                    &message_id,
                    markers,
                    &config.compaction,
                )
            };
            self.compaction_effects(outcome, &mut effects);
        }
        effects
    }

    fn fold_notices(&self, fold: FoldEffects) -> SessionEffects {
        let mut effects = SessionEffects {
            changed: fold.changed,
            ..SessionEffects::default()
        };
        if fold.retry_reset {
            effects.notices.push(StoreNotice::RetryReset {
                workspace_id: self.id.clone(),
            });
        }
        if fold.resume_check {
            effects.notices.push(StoreNotice::ResumeCheck {
                workspace_id: self.id.clone(),
            });
        }
        effects
    }

    fn compaction_effects(&self, outcome: CompactionOutcome, effects: &mut SessionEffects) {
        let workspace_id = self.id.clone();
        match outcome {
            CompactionOutcome::NotSummary | CompactionOutcome::Duplicate { .. } => {}
            CompactionOutcome::Finalize(replacement) => {
                effects.changed = true;
                effects.replacement = Some(replacement);
            }
            CompactionOutcome::Cancelled { request_id } => {
                effects.notices.push(StoreNotice::CompactionSkipped {
                    workspace_id,
                    request_id,
                    reason: SkipReason::Cancelled,
                });
            }
            CompactionOutcome::Deferred { request_id, .. } => {
                effects.notices.push(StoreNotice::CompactionSkipped {
                    workspace_id,
                    request_id,
                    reason: SkipReason::EmptySummary,
                });
            }
            CompactionOutcome::Abandoned {
                request_id,
                attempts,
            } => {
                effects.notices.push(StoreNotice::CompactionFailed {
                    workspace_id,
                    request_id,
                    message: format!("no summary text after {attempts} attempts"),
                });
            }
        }
    }

    /// The write-back for `request_id` is over. Returns whether the phase
    /// changed.
    pub fn finish_compaction(&mut self, request_id: &str) -> bool {
        let before = self.compaction_phase();
        self.compaction.finish(request_id);
        before != self.compaction_phase()
    }

    pub fn sidebar(&self) -> SidebarState {
        SidebarState {
            can_interrupt: self.aggregator.active_stream_count() > 0,
            is_compacting: self.compaction_phase() != CompactionPhase::None,
            loading: self.is_loading(),
            current_model: self.aggregator.current_model().map(str::to_string),
            recency_timestamp: self.aggregator.recency_timestamp(),
        }
    }

    fn is_loading(&self) -> bool {
        !self.replay.is_live() && !self.aggregator.has_messages()
    }

    pub fn derive(&self) -> DerivedSessionState {
        let agg = &self.aggregator;
        DerivedSessionState {
            messages: agg.displayed_messages(),
            can_interrupt: agg.active_stream_count() > 0,
            is_compacting: self.compaction_phase() != CompactionPhase::None,
            loading: self.is_loading(),
            raw_messages: agg.messages().to_vec(),
            current_model: agg.current_model().map(str::to_string),
            recency_timestamp: agg.recency_timestamp(),
            todos: agg.todos().to_vec(),
            usage: agg.usage(),
            last_error: agg.last_failure().cloned(),
        }
    }
}

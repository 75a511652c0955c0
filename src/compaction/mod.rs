//! Exactly-once history compaction.
//!
//! A compaction is a user turn tagged with a [`CompactionRequest`], answered by
//! a summary stream. When that stream ends (or is interrupted and the user
//! keeps what was produced) the whole history is replaced by one compacted
//! summary message. Transports may deliver the terminating event more than
//! once; the per-workspace [`CompactionLedger`] guarantees a single
//! replacement per request id.

pub mod ledger;
pub mod markers;

pub use ledger::{CompactionLedger, ExtractionVerdict};
pub use markers::{CancellationMarkers, InMemoryCancellationMarkers, NoCancellationMarkers};

use crate::aggregator::StreamingAggregator;
use crate::config::CompactionConfig;
use crate::events::{CompactionRequest, MessageRole, WorkspaceMessage};
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CompactionPhase {
    None,
    Summarizing,
    Finalizing,
}

/// Summary ready to replace the workspace history.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryReplacement {
    pub request_id: String,
    pub summary: WorkspaceMessage,
    /// Built from an interrupted stream; the text ends with the sentinel.
    pub truncated: bool,
}

/// Decision taken for one terminating stream event.
#[derive(Debug, Clone, PartialEq)]
pub enum CompactionOutcome {
    /// The stream was not answering a compaction request.
    NotSummary,
    /// The request was already finalized or abandoned.
    Duplicate { request_id: String },
    /// Replace history with this summary.
    Finalize(SummaryReplacement),
    /// The user cancelled the compaction explicitly.
    Cancelled { request_id: String },
    /// No summary text yet; a later signal for the same request may succeed.
    Deferred { request_id: String, attempt: u32 },
    /// Extraction kept failing; the request is closed.
    Abandoned { request_id: String, attempts: u32 },
}

/// Per-workspace compaction state: the ledger and the request currently
/// being written back.
#[derive(Debug, Default)]
pub struct CompactionCoordinator {
    ledger: CompactionLedger,
    in_flight: Option<String>,
}

impl CompactionCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn phase(&self, aggregator: &StreamingAggregator) -> CompactionPhase {
        if self.in_flight.is_some() {
            CompactionPhase::Finalizing
        } else if aggregator.is_compacting() {
            CompactionPhase::Summarizing
        } else {
            CompactionPhase::None
        }
    }

    pub fn ledger(&self) -> &CompactionLedger {
        &self.ledger
    }

    /// The history replacement for `request_id` completed, successfully or not.
    pub fn finish(&mut self, request_id: &str) {
        if self.in_flight.as_deref() == Some(request_id) {
            self.in_flight = None;
        }
    }

    /// Called after `stream-end` for `message_id` has been folded.
    pub fn on_stream_end(
        &mut self,
        workspace_id: &str,
        aggregator: &StreamingAggregator,
        message_id: &str,
        config: &CompactionConfig,
    ) -> CompactionOutcome {
        let Some((request_id, request)) = summary_target(aggregator, message_id) else {
            return CompactionOutcome::NotSummary;
        };
        if self.ledger.is_settled(&request_id) {
            tracing::debug!(workspace_id, %request_id, "Duplicate compaction stream-end ignored");
            return CompactionOutcome::Duplicate { request_id };
        }

        let text = summary_text(aggregator, message_id);
        if text.trim().is_empty() {
            return self.extraction_failed(workspace_id, request_id, config);
        }
        self.finalize(workspace_id, aggregator, message_id, request_id, &request, text, false)
    }

    /// Called after `stream-abort` for `message_id` has been folded.
    pub fn on_stream_abort(
        &mut self,
        workspace_id: &str,
        aggregator: &StreamingAggregator,
        message_id: &str,
        markers: &dyn CancellationMarkers,
        config: &CompactionConfig,
    ) -> CompactionOutcome {
        let Some((request_id, request)) = summary_target(aggregator, message_id) else {
            return CompactionOutcome::NotSummary;
        };
        if self.ledger.is_settled(&request_id) {
            tracing::debug!(workspace_id, %request_id, "Duplicate compaction stream-abort ignored");
            return CompactionOutcome::Duplicate { request_id };
        }
        if markers.take_matching(workspace_id, &request_id) {
            tracing::info!(workspace_id, %request_id, "Compaction cancelled by user");
            return CompactionOutcome::Cancelled { request_id };
        }

        let partial = summary_text(aggregator, message_id);
        if partial.trim().is_empty() {
            return self.extraction_failed(workspace_id, request_id, config);
        }
        let text = format!("{}{}", partial.trim_end(), config.truncation_sentinel);
        self.finalize(workspace_id, aggregator, message_id, request_id, &request, text, true)
    }

    fn extraction_failed(
        &mut self,
        workspace_id: &str,
        request_id: String,
        config: &CompactionConfig,
    ) -> CompactionOutcome {
        match self
            .ledger
            .record_failed_extraction(&request_id, config.max_extraction_attempts)
        {
            ExtractionVerdict::Retry { attempt } => {
                tracing::warn!(
                    workspace_id,
                    %request_id,
                    attempt,
                    "No summary text found; compaction skipped, history left untouched"
                );
                CompactionOutcome::Deferred {
                    request_id,
                    attempt,
                }
            }
            ExtractionVerdict::Abandon { attempts } => {
                tracing::warn!(
                    workspace_id,
                    %request_id,
                    attempts,
                    "Giving up on compaction after repeated empty summaries"
                );
                CompactionOutcome::Abandoned {
                    request_id,
                    attempts,
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn finalize(
        &mut self,
        workspace_id: &str,
        aggregator: &StreamingAggregator,
        message_id: &str,
        request_id: String,
        request: &CompactionRequest,
        text: String,
        truncated: bool,
    ) -> CompactionOutcome {
        if !self.ledger.claim(&request_id) {
            return CompactionOutcome::Duplicate { request_id };
        }
        self.in_flight = Some(request_id.clone());

        let source = aggregator.message(message_id);
        let mut summary = WorkspaceMessage::new(
            format!("summary-{}", Uuid::new_v4()),
            MessageRole::Assistant,
        )
        .with_text(text)
        .with_timestamp(Utc::now().timestamp_millis());
        summary.metadata.compacted = true;
        summary.metadata.model = source
            .and_then(|message| message.metadata.model.clone())
            .or_else(|| request.model.clone());
        summary.metadata.usage = source.and_then(|message| message.metadata.usage);
        summary.metadata.continue_message = request.continue_message.clone();

        tracing::debug!(workspace_id, %request_id, truncated, "Compaction summary built");
        CompactionOutcome::Finalize(SummaryReplacement {
            request_id,
            summary,
            truncated,
        })
    }
}

/// Request id and request answered by the stream `message_id`, if the newest
/// user turn asked for a compaction and the stream came after it.
fn summary_target(
    aggregator: &StreamingAggregator,
    message_id: &str,
) -> Option<(String, CompactionRequest)> {
    let (request_id, request) = aggregator.pending_compaction_request()?;
    let messages = aggregator.messages();
    let request_at = messages.iter().rposition(|m| m.id == request_id)?;
    let answered = messages[request_at + 1..]
        .iter()
        .any(|message| message.id == message_id);
    answered.then(|| (request_id.to_string(), request.clone()))
}

fn summary_text(aggregator: &StreamingAggregator, message_id: &str) -> String {
    aggregator
        .message(message_id)
        .map(WorkspaceMessage::text)
        .unwrap_or_default()
}

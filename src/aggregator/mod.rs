pub mod display;
pub mod todos;

pub use display::{DisplayedMessage, ToolStatus};

use crate::events::{
    CompactionRequest, MessagePart, MessageRole, TodoItem, TokenUsage, ToolPart, ToolState,
    WorkspaceEvent, WorkspaceMessage,
};
use chrono::Utc;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Coarse lifecycle of one workspace's folded state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregatorPhase {
    Empty,
    HasHistory,
    Streaming,
    Compacting,
}

/// Last stream failure, kept until the next `stream-start`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamFailure {
    pub message_id: String,
    pub error: String,
    pub error_type: Option<String>,
    pub attempts: u32,
}

/// What folding one event did, beyond mutating the aggregator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FoldEffects {
    /// Any observable field changed.
    pub changed: bool,
    /// A new stream started; retry bookkeeping was reset.
    pub retry_reset: bool,
    /// A stream was aborted; the resume logic should re-check the workspace.
    pub resume_check: bool,
}

impl FoldEffects {
    fn changed() -> Self {
        Self {
            changed: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone)]
struct ActiveStream {
    model: String,
    reasoning_done: bool,
}

/// Folds one workspace's ordered events into its current message list.
///
/// Not synchronized: the owner guarantees that only one event is applied at a
/// time, in delivery order.
#[derive(Debug, Default)]
pub struct StreamingAggregator {
    messages: Vec<WorkspaceMessage>,
    active_streams: HashMap<String, ActiveStream>,
    current_model: Option<String>,
    todos: Vec<TodoItem>,
    retry_attempts: u32,
    last_failure: Option<StreamFailure>,
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

impl StreamingAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a single event. `caught-up` is handled by the replay controller
    /// and is a no-op here.
    pub fn apply(&mut self, event: WorkspaceEvent) -> FoldEffects {
        match event {
            WorkspaceEvent::StreamStart {
                message_id,
                model,
                history_sequence,
                timestamp,
            } => self.stream_start(message_id, model, history_sequence, timestamp),
            WorkspaceEvent::StreamDelta { message_id, delta } => {
                self.stream_delta(&message_id, &delta)
            }
            WorkspaceEvent::StreamEnd {
                message_id,
                parts,
                model,
                usage,
            } => self.stream_end(message_id, parts, model, usage),
            WorkspaceEvent::StreamAbort { message_id } => self.stream_abort(&message_id),
            WorkspaceEvent::StreamError {
                message_id,
                error,
                error_type,
            } => self.stream_error(message_id, error, error_type),
            WorkspaceEvent::ToolCallStart {
                message_id,
                tool_call_id,
                tool_name,
                args,
            } => self.tool_call_start(&message_id, tool_call_id, tool_name, args),
            WorkspaceEvent::ToolCallDelta {
                message_id,
                tool_call_id,
                delta,
            } => self.tool_call_delta(&message_id, &tool_call_id, &delta),
            WorkspaceEvent::ToolCallEnd {
                message_id,
                tool_call_id,
                tool_name,
                result,
            } => self.tool_call_end(&message_id, &tool_call_id, &tool_name, result),
            WorkspaceEvent::ReasoningDelta { message_id, delta } => {
                self.reasoning_delta(&message_id, &delta)
            }
            WorkspaceEvent::ReasoningEnd { message_id } => self.reasoning_end(&message_id),
            WorkspaceEvent::Delete { message_ids } => self.delete(&message_ids),
            WorkspaceEvent::Message(message) => {
                self.add_message(message);
                FoldEffects::changed()
            }
            WorkspaceEvent::CaughtUp => FoldEffects::default(),
        }
    }

    /// Load the pre-checkpoint history in one pass.
    ///
    /// Messages are ordered by history sequence when every message carries
    /// one; otherwise delivery order is kept.
    pub fn load_history(&mut self, mut history: Vec<WorkspaceMessage>) {
        if history
            .iter()
            .all(|message| message.metadata.history_sequence.is_some())
        {
            history.sort_by_key(|message| message.metadata.history_sequence);
        }
        for message in history {
            self.add_message(message);
        }
    }

    /// Insert a completed message, replacing any message with the same id.
    pub fn add_message(&mut self, message: WorkspaceMessage) {
        self.absorb(&message);
        match self.position(&message.id) {
            Some(index) => self.messages[index] = message,
            None => self.messages.push(message),
        }
    }

    fn absorb(&mut self, message: &WorkspaceMessage) {
        if message.role != MessageRole::Assistant {
            return;
        }
        if let Some(model) = &message.metadata.model {
            self.current_model = Some(model.clone());
        }
        if let Some(items) = todos::latest_todos(message) {
            self.todos = items;
        }
    }

    fn position(&self, message_id: &str) -> Option<usize> {
        // Streaming traffic targets the newest message; search from the back.
        self.messages
            .iter()
            .rposition(|message| message.id == message_id)
    }

    fn message_mut(&mut self, message_id: &str) -> Option<&mut WorkspaceMessage> {
        let index = self.position(message_id)?;
        self.messages.get_mut(index)
    }

    fn stream_start(
        &mut self,
        message_id: String,
        model: String,
        history_sequence: Option<u64>,
        timestamp: Option<i64>,
    ) -> FoldEffects {
        if let Some(message) = self.message_mut(&message_id) {
            message.metadata.model = Some(model.clone());
        } else {
            let mut message = WorkspaceMessage::new(message_id.clone(), MessageRole::Assistant);
            message.metadata.history_sequence = history_sequence;
            message.metadata.timestamp = Some(timestamp.unwrap_or_else(now_millis));
            message.metadata.model = Some(model.clone());
            self.messages.push(message);
        }
        self.active_streams.insert(
            message_id,
            ActiveStream {
                model: model.clone(),
                reasoning_done: false,
            },
        );
        self.current_model = Some(model);
        self.retry_attempts = 0;
        self.last_failure = None;
        FoldEffects {
            changed: true,
            retry_reset: true,
            resume_check: false,
        }
    }

    fn stream_delta(&mut self, message_id: &str, delta: &str) -> FoldEffects {
        let Some(message) = self.message_mut(message_id) else {
            tracing::debug!(message_id, "stream-delta for unknown message, ignoring");
            return FoldEffects::default();
        };
        if let Some(MessagePart::Text { text }) = message.parts.last_mut() {
            text.push_str(delta);
        } else {
            message.parts.push(MessagePart::Text {
                text: delta.to_string(),
            });
        }
        FoldEffects::changed()
    }

    fn stream_end(
        &mut self,
        message_id: String,
        parts: Vec<MessagePart>,
        model: Option<String>,
        usage: Option<TokenUsage>,
    ) -> FoldEffects {
        let stream_model = self
            .active_streams
            .remove(&message_id)
            .map(|stream| stream.model);
        let model = model.or(stream_model);

        if let Some(message) = self.message_mut(&message_id) {
            if !parts.is_empty() {
                message.parts = parts;
            }
            if model.is_some() {
                message.metadata.model.clone_from(&model);
            }
            if usage.is_some() {
                message.metadata.usage = usage;
            }
            message.metadata.partial = false;
        } else {
            // Reconnected after the stream began: the end event is all we have.
            let mut message = WorkspaceMessage::new(message_id.clone(), MessageRole::Assistant);
            message.parts = parts;
            message.metadata.timestamp = Some(now_millis());
            message.metadata.model.clone_from(&model);
            message.metadata.usage = usage;
            self.messages.push(message);
        }

        if let Some(index) = self.position(&message_id) {
            let finalized = self.messages[index].clone();
            self.absorb(&finalized);
        }
        if let Some(model) = model {
            self.current_model = Some(model);
        }
        FoldEffects::changed()
    }

    fn stream_abort(&mut self, message_id: &str) -> FoldEffects {
        let was_active = self.active_streams.remove(message_id).is_some();
        let marked = match self.message_mut(message_id) {
            Some(message) => {
                message.metadata.partial = true;
                true
            }
            None => false,
        };
        FoldEffects {
            changed: was_active || marked,
            retry_reset: false,
            resume_check: true,
        }
    }

    fn stream_error(
        &mut self,
        message_id: String,
        error: String,
        error_type: Option<String>,
    ) -> FoldEffects {
        self.active_streams.remove(&message_id);
        match self.message_mut(&message_id) {
            Some(message) => {
                message.metadata.error = Some(error.clone());
                message.metadata.error_type.clone_from(&error_type);
                message.metadata.partial = true;
            }
            None => {
                let mut message =
                    WorkspaceMessage::new(message_id.clone(), MessageRole::Assistant);
                message.metadata.timestamp = Some(now_millis());
                message.metadata.error = Some(error.clone());
                message.metadata.error_type.clone_from(&error_type);
                message.metadata.partial = true;
                self.messages.push(message);
            }
        }
        self.retry_attempts = self.retry_attempts.saturating_add(1);
        self.last_failure = Some(StreamFailure {
            message_id,
            error,
            error_type,
            attempts: self.retry_attempts,
        });
        FoldEffects::changed()
    }

    fn tool_call_start(
        &mut self,
        message_id: &str,
        tool_call_id: String,
        tool_name: String,
        args: serde_json::Value,
    ) -> FoldEffects {
        let Some(message) = self.message_mut(message_id) else {
            tracing::debug!(message_id, %tool_call_id, "tool-call-start for unknown message, ignoring");
            return FoldEffects::default();
        };
        let state = if args.is_null() {
            ToolState::InputStreaming
        } else {
            ToolState::InputAvailable
        };
        message.parts.push(MessagePart::Tool(ToolPart {
            tool_call_id,
            tool_name,
            state,
            input: args,
            streamed_input: String::new(),
            output: None,
        }));
        FoldEffects::changed()
    }

    fn tool_part_mut<'a>(
        message: &'a mut WorkspaceMessage,
        tool_call_id: &str,
    ) -> Option<&'a mut ToolPart> {
        message.parts.iter_mut().rev().find_map(|part| match part {
            MessagePart::Tool(tool) if tool.tool_call_id == tool_call_id => Some(tool),
            _ => None,
        })
    }

    fn tool_call_delta(&mut self, message_id: &str, tool_call_id: &str, delta: &str) -> FoldEffects {
        let Some(tool) = self
            .message_mut(message_id)
            .and_then(|message| Self::tool_part_mut(message, tool_call_id))
        else {
            tracing::debug!(message_id, tool_call_id, "tool-call-delta for unknown call, ignoring");
            return FoldEffects::default();
        };
        tool.streamed_input.push_str(delta);
        FoldEffects::changed()
    }

    fn tool_call_end(
        &mut self,
        message_id: &str,
        tool_call_id: &str,
        tool_name: &str,
        result: serde_json::Value,
    ) -> FoldEffects {
        let Some(tool) = self
            .message_mut(message_id)
            .and_then(|message| Self::tool_part_mut(message, tool_call_id))
        else {
            tracing::debug!(message_id, tool_call_id, tool_name, "tool-call-end for unknown call, ignoring");
            return FoldEffects::default();
        };
        if tool.input.is_null() && !tool.streamed_input.trim().is_empty() {
            match serde_json::from_str(&tool.streamed_input) {
                Ok(input) => tool.input = input,
                Err(error) => {
                    tracing::warn!(
                        tool_call_id,
                        tool_name,
                        "Keeping raw streamed tool input, JSON did not parse: {error}"
                    );
                }
            }
        }
        tool.state = ToolState::OutputAvailable;
        tool.output = Some(result);
        if let Some(items) = todos::todos_from_tool(tool) {
            self.todos = items;
        }
        FoldEffects::changed()
    }

    fn reasoning_delta(&mut self, message_id: &str, delta: &str) -> FoldEffects {
        let Some(message) = self.message_mut(message_id) else {
            tracing::debug!(message_id, "reasoning-delta for unknown message, ignoring");
            return FoldEffects::default();
        };
        if let Some(MessagePart::Reasoning { text }) = message.parts.last_mut() {
            text.push_str(delta);
        } else {
            message.parts.push(MessagePart::Reasoning {
                text: delta.to_string(),
            });
        }
        FoldEffects::changed()
    }

    fn reasoning_end(&mut self, message_id: &str) -> FoldEffects {
        match self.active_streams.get_mut(message_id) {
            Some(stream) if !stream.reasoning_done => {
                stream.reasoning_done = true;
                FoldEffects::changed()
            }
            _ => FoldEffects::default(),
        }
    }

    fn delete(&mut self, message_ids: &[String]) -> FoldEffects {
        let doomed: HashSet<&str> = message_ids.iter().map(String::as_str).collect();
        let before = self.messages.len();
        self.messages
            .retain(|message| !doomed.contains(message.id.as_str()));
        self.active_streams
            .retain(|message_id, _| !doomed.contains(message_id.as_str()));
        FoldEffects {
            changed: self.messages.len() != before,
            ..FoldEffects::default()
        }
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn messages(&self) -> &[WorkspaceMessage] {
        &self.messages
    }

    pub fn message(&self, message_id: &str) -> Option<&WorkspaceMessage> {
        self.position(message_id).map(|index| &self.messages[index])
    }

    pub fn has_messages(&self) -> bool {
        !self.messages.is_empty()
    }

    pub fn active_stream_count(&self) -> usize {
        self.active_streams.len()
    }

    pub fn is_streaming(&self, message_id: &str) -> bool {
        self.active_streams.contains_key(message_id)
    }

    pub fn reasoning_done(&self, message_id: &str) -> bool {
        self.active_streams
            .get(message_id)
            .is_none_or(|stream| stream.reasoning_done)
    }

    pub fn current_model(&self) -> Option<&str> {
        self.current_model.as_deref()
    }

    pub fn todos(&self) -> &[TodoItem] {
        &self.todos
    }

    pub fn last_failure(&self) -> Option<&StreamFailure> {
        self.last_failure.as_ref()
    }

    /// Latest activity worth sorting workspaces by: user turns and compaction
    /// summaries. Assistant output alone does not count.
    pub fn recency_timestamp(&self) -> Option<i64> {
        self.messages
            .iter()
            .filter(|message| message.role == MessageRole::User || message.metadata.compacted)
            .filter_map(|message| message.metadata.timestamp)
            .max()
    }

    pub fn usage(&self) -> TokenUsage {
        let mut total = TokenUsage::default();
        for usage in self.messages.iter().filter_map(|m| m.metadata.usage.as_ref()) {
            total.accumulate(usage);
        }
        total
    }

    pub fn last_user_message(&self) -> Option<&WorkspaceMessage> {
        self.messages
            .iter()
            .rev()
            .find(|message| message.role == MessageRole::User)
    }

    /// The compaction request the newest user turn asked for, if any.
    pub fn pending_compaction_request(&self) -> Option<(&str, &CompactionRequest)> {
        let message = self.last_user_message()?;
        message
            .compaction_request()
            .map(|request| (message.id.as_str(), request))
    }

    pub fn is_compacting(&self) -> bool {
        !self.active_streams.is_empty() && self.pending_compaction_request().is_some()
    }

    pub fn phase(&self) -> AggregatorPhase {
        if self.is_compacting() {
            AggregatorPhase::Compacting
        } else if !self.active_streams.is_empty() {
            AggregatorPhase::Streaming
        } else if self.has_messages() {
            AggregatorPhase::HasHistory
        } else {
            AggregatorPhase::Empty
        }
    }

    pub fn displayed_messages(&self) -> Vec<DisplayedMessage> {
        display::project(self)
    }
}

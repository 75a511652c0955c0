pub mod message;

pub use message::{
    CompactionRequest, MessageMetadata, MessagePart, MessageRole, TodoItem, TodoStatus,
    TokenUsage, ToolPart, ToolState, WorkspaceMessage, text_of,
};

use crate::error::StoreError;
use crate::utils::text::truncate_with_ellipsis;
use serde::{Deserialize, Serialize};

/// Everything a workspace channel can deliver, in delivery order.
///
/// There is no sequence number: the per-workspace channel has a single writer
/// and its delivery order is the order of application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum WorkspaceEvent {
    StreamStart {
        message_id: String,
        model: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        history_sequence: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<i64>,
    },
    StreamDelta {
        message_id: String,
        delta: String,
    },
    StreamEnd {
        message_id: String,
        /// Final parts; when present they replace what was streamed.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        parts: Vec<MessagePart>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<TokenUsage>,
    },
    StreamAbort {
        message_id: String,
    },
    StreamError {
        message_id: String,
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_type: Option<String>,
    },
    ToolCallStart {
        message_id: String,
        tool_call_id: String,
        tool_name: String,
        #[serde(default)]
        args: serde_json::Value,
    },
    ToolCallDelta {
        message_id: String,
        tool_call_id: String,
        delta: String,
    },
    ToolCallEnd {
        message_id: String,
        tool_call_id: String,
        tool_name: String,
        #[serde(default)]
        result: serde_json::Value,
    },
    ReasoningDelta {
        message_id: String,
        delta: String,
    },
    ReasoningEnd {
        message_id: String,
    },
    Delete {
        message_ids: Vec<String>,
    },
    CaughtUp,
    Message(WorkspaceMessage),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum EventKind {
    StreamStart,
    StreamDelta,
    StreamEnd,
    StreamAbort,
    StreamError,
    ToolCallStart,
    ToolCallDelta,
    ToolCallEnd,
    ReasoningDelta,
    ReasoningEnd,
    Delete,
    CaughtUp,
    Message,
}

/// How an event is routed while its workspace has not caught up yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClass {
    /// Applied immediately, caught up or not.
    PassThrough,
    /// Queued until caught-up, then replayed in order.
    Bufferable,
    /// Collected into the historical batch.
    History,
    /// The caught-up checkpoint itself.
    Checkpoint,
}

impl WorkspaceEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::StreamStart { .. } => EventKind::StreamStart,
            Self::StreamDelta { .. } => EventKind::StreamDelta,
            Self::StreamEnd { .. } => EventKind::StreamEnd,
            Self::StreamAbort { .. } => EventKind::StreamAbort,
            Self::StreamError { .. } => EventKind::StreamError,
            Self::ToolCallStart { .. } => EventKind::ToolCallStart,
            Self::ToolCallDelta { .. } => EventKind::ToolCallDelta,
            Self::ToolCallEnd { .. } => EventKind::ToolCallEnd,
            Self::ReasoningDelta { .. } => EventKind::ReasoningDelta,
            Self::ReasoningEnd { .. } => EventKind::ReasoningEnd,
            Self::Delete { .. } => EventKind::Delete,
            Self::CaughtUp => EventKind::CaughtUp,
            Self::Message(_) => EventKind::Message,
        }
    }

    pub fn class(&self) -> EventClass {
        match self.kind() {
            EventKind::StreamError | EventKind::Delete => EventClass::PassThrough,
            EventKind::StreamStart
            | EventKind::StreamDelta
            | EventKind::StreamEnd
            | EventKind::StreamAbort
            | EventKind::ToolCallStart
            | EventKind::ToolCallDelta
            | EventKind::ToolCallEnd
            | EventKind::ReasoningDelta
            | EventKind::ReasoningEnd => EventClass::Bufferable,
            EventKind::Message => EventClass::History,
            EventKind::CaughtUp => EventClass::Checkpoint,
        }
    }

    /// Id of the message this event belongs to, when it targets exactly one.
    pub fn message_id(&self) -> Option<&str> {
        match self {
            Self::StreamStart { message_id, .. }
            | Self::StreamDelta { message_id, .. }
            | Self::StreamEnd { message_id, .. }
            | Self::StreamAbort { message_id }
            | Self::StreamError { message_id, .. }
            | Self::ToolCallStart { message_id, .. }
            | Self::ToolCallDelta { message_id, .. }
            | Self::ToolCallEnd { message_id, .. }
            | Self::ReasoningDelta { message_id, .. }
            | Self::ReasoningEnd { message_id } => Some(message_id),
            Self::Message(message) => Some(&message.id),
            Self::Delete { .. } | Self::CaughtUp => None,
        }
    }
}

const PAYLOAD_PREVIEW_CHARS: usize = 120;

/// Decode a raw transport payload into a [`WorkspaceEvent`].
pub fn parse_event(
    workspace_id: &str,
    value: serde_json::Value,
) -> Result<WorkspaceEvent, StoreError> {
    let preview = truncate_with_ellipsis(&value.to_string(), PAYLOAD_PREVIEW_CHARS);
    serde_json::from_value(value)
        .map_err(|e| StoreError::malformed(workspace_id, format!("{e} (payload: {preview})")))
}

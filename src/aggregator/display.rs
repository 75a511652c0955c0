use super::StreamingAggregator;
use crate::events::{MessagePart, MessageRole, ToolPart, ToolState, WorkspaceMessage};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Pending,
    Executing,
    Completed,
    Failed,
    Interrupted,
}

/// One row of the workspace transcript as a chat view shows it.
///
/// An assistant message fans out into several rows (reasoning, text, tools);
/// `history_id` always points back at the raw message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum DisplayedMessage {
    User {
        id: String,
        history_id: String,
        content: String,
        timestamp: Option<i64>,
        is_compaction_request: bool,
    },
    Assistant {
        id: String,
        history_id: String,
        content: String,
        model: Option<String>,
        timestamp: Option<i64>,
        is_streaming: bool,
        is_partial: bool,
        is_compacted: bool,
        is_last_part_of_message: bool,
    },
    Reasoning {
        id: String,
        history_id: String,
        content: String,
        is_streaming: bool,
    },
    Tool {
        id: String,
        history_id: String,
        tool_call_id: String,
        tool_name: String,
        status: ToolStatus,
        args: serde_json::Value,
        result: Option<serde_json::Value>,
    },
    StreamError {
        id: String,
        history_id: String,
        error: String,
        error_type: Option<String>,
    },
}

impl DisplayedMessage {
    pub fn history_id(&self) -> &str {
        match self {
            Self::User { history_id, .. }
            | Self::Assistant { history_id, .. }
            | Self::Reasoning { history_id, .. }
            | Self::Tool { history_id, .. }
            | Self::StreamError { history_id, .. } => history_id,
        }
    }
}

enum Segment<'a> {
    Text(String),
    Reasoning(String),
    Tool(&'a ToolPart),
}

/// Merge adjacent text and adjacent reasoning parts.
fn segments(parts: &[MessagePart]) -> Vec<Segment<'_>> {
    let mut out: Vec<Segment<'_>> = Vec::with_capacity(parts.len());
    for part in parts {
        match (part, out.last_mut()) {
            (MessagePart::Text { text }, Some(Segment::Text(acc)))
            | (MessagePart::Reasoning { text }, Some(Segment::Reasoning(acc))) => {
                acc.push_str(text);
            }
            (MessagePart::Text { text }, _) => out.push(Segment::Text(text.clone())),
            (MessagePart::Reasoning { text }, _) => out.push(Segment::Reasoning(text.clone())),
            (MessagePart::Tool(tool), _) => out.push(Segment::Tool(tool)),
        }
    }
    out.retain(|segment| match segment {
        Segment::Text(text) | Segment::Reasoning(text) => !text.is_empty(),
        Segment::Tool(_) => true,
    });
    out
}

fn tool_status(tool: &ToolPart, streaming: bool, partial: bool) -> ToolStatus {
    match tool.state {
        ToolState::OutputAvailable if tool.failed() => ToolStatus::Failed,
        ToolState::OutputAvailable => ToolStatus::Completed,
        ToolState::InputStreaming | ToolState::InputAvailable if streaming => {
            ToolStatus::Executing
        }
        ToolState::InputStreaming | ToolState::InputAvailable if partial => {
            ToolStatus::Interrupted
        }
        ToolState::InputStreaming | ToolState::InputAvailable => ToolStatus::Pending,
    }
}

fn project_assistant(
    aggregator: &StreamingAggregator,
    message: &WorkspaceMessage,
    out: &mut Vec<DisplayedMessage>,
) {
    let streaming = aggregator.is_streaming(&message.id);
    let meta = &message.metadata;
    let segments = segments(&message.parts);
    let last = segments.len().saturating_sub(1);

    for (index, segment) in segments.into_iter().enumerate() {
        let id = format!("{}-{index}", message.id);
        let is_last = index == last;
        let row = match segment {
            Segment::Text(content) => DisplayedMessage::Assistant {
                id,
                history_id: message.id.clone(),
                content,
                model: meta.model.clone(),
                timestamp: meta.timestamp,
                is_streaming: streaming && is_last,
                is_partial: meta.partial,
                is_compacted: meta.compacted,
                is_last_part_of_message: is_last,
            },
            Segment::Reasoning(content) => DisplayedMessage::Reasoning {
                id,
                history_id: message.id.clone(),
                content,
                is_streaming: streaming && is_last && !aggregator.reasoning_done(&message.id),
            },
            Segment::Tool(tool) => DisplayedMessage::Tool {
                id,
                history_id: message.id.clone(),
                tool_call_id: tool.tool_call_id.clone(),
                tool_name: tool.tool_name.clone(),
                status: tool_status(tool, streaming, meta.partial),
                args: tool.input.clone(),
                result: tool.output.clone(),
            },
        };
        out.push(row);
    }

    if let Some(error) = &meta.error {
        out.push(DisplayedMessage::StreamError {
            id: format!("{}-error", message.id),
            history_id: message.id.clone(),
            error: error.clone(),
            error_type: meta.error_type.clone(),
        });
    }
}

/// Flatten the raw message list into display rows. System messages are not
/// shown.
pub fn project(aggregator: &StreamingAggregator) -> Vec<DisplayedMessage> {
    let mut out = Vec::with_capacity(aggregator.messages().len());
    for message in aggregator.messages() {
        match message.role {
            MessageRole::User => out.push(DisplayedMessage::User {
                id: message.id.clone(),
                history_id: message.id.clone(),
                content: message.text(),
                timestamp: message.metadata.timestamp,
                is_compaction_request: message.compaction_request().is_some(),
            }),
            MessageRole::Assistant => project_assistant(aggregator, message, &mut out),
            MessageRole::System => {}
        }
    }
    out
}

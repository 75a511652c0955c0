use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePart {
    Text { text: String },
    Reasoning { text: String },
    Tool(ToolPart),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolState {
    /// Arguments are still arriving as `tool-call-delta` text.
    InputStreaming,
    InputAvailable,
    OutputAvailable,
}

/// One tool invocation nested inside an assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolPart {
    pub tool_call_id: String,
    pub tool_name: String,
    pub state: ToolState,
    #[serde(default)]
    pub input: serde_json::Value,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub streamed_input: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
}

impl ToolPart {
    /// Tool results report failure either as `{"success": false}` or with an
    /// `error` field.
    pub fn failed(&self) -> bool {
        self.output.as_ref().is_some_and(|output| {
            output.get("success").and_then(serde_json::Value::as_bool) == Some(false)
                || output.get("error").is_some_and(|e| !e.is_null())
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.input_tokens.saturating_add(self.output_tokens)
    }

    pub fn accumulate(&mut self, other: &TokenUsage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
    }
}

/// Attached to the user message that asked for history to be summarized.
/// The request id is that message's id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompactionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub word_budget: Option<u32>,
    /// Sent on the user's behalf once the summary replaces history.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continue_message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_sequence: Option<u64>,
    /// Milliseconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compaction_request: Option<CompactionRequest>,
    /// Set on the summary message that replaced a compacted history.
    #[serde(default)]
    pub compacted: bool,
    #[serde(default)]
    pub partial: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continue_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkspaceMessage {
    pub id: String,
    pub role: MessageRole,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
    #[serde(default)]
    pub metadata: MessageMetadata,
}

impl WorkspaceMessage {
    pub fn new(id: impl Into<String>, role: MessageRole) -> Self {
        Self {
            id: id.into(),
            role,
            parts: Vec::new(),
            metadata: MessageMetadata::default(),
        }
    }

    pub fn user(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(id, MessageRole::User).with_text(text)
    }

    pub fn assistant(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(id, MessageRole::Assistant).with_text(text)
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.parts.push(MessagePart::Text { text: text.into() });
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.metadata.timestamp = Some(timestamp);
        self
    }

    pub fn with_history_sequence(mut self, sequence: u64) -> Self {
        self.metadata.history_sequence = Some(sequence);
        self
    }

    pub fn with_compaction_request(mut self, request: CompactionRequest) -> Self {
        self.metadata.compaction_request = Some(request);
        self
    }

    /// Concatenated text parts, reasoning and tools excluded.
    pub fn text(&self) -> String {
        text_of(&self.parts)
    }

    /// Compaction request carried by this message, if it is a user message.
    pub fn compaction_request(&self) -> Option<&CompactionRequest> {
        if self.role == MessageRole::User {
            self.metadata.compaction_request.as_ref()
        } else {
            None
        }
    }
}

/// Concatenated text of the given parts.
pub fn text_of(parts: &[MessagePart]) -> String {
    parts
        .iter()
        .filter_map(|part| match part {
            MessagePart::Text { text } => Some(text.as_str()),
            MessagePart::Reasoning { .. } | MessagePart::Tool(_) => None,
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

/// One entry of the structured task list maintained by the `todo_write` tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub content: String,
    pub status: TodoStatus,
    #[serde(default, alias = "activeForm", skip_serializing_if = "Option::is_none")]
    pub active_form: Option<String>,
}

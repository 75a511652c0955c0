use crate::events::{MessagePart, TodoItem, ToolPart, ToolState, WorkspaceMessage};

pub const TODO_TOOL_NAME: &str = "todo_write";

/// Task list carried in a `todo_write` call's arguments.
///
/// Returns `None` for any other tool, for failed calls and for argument
/// shapes that do not decode.
pub fn todos_from_tool(part: &ToolPart) -> Option<Vec<TodoItem>> {
    if part.tool_name != TODO_TOOL_NAME
        || part.state != ToolState::OutputAvailable
        || part.failed()
    {
        return None;
    }
    let todos = part.input.get("todos")?;
    match serde_json::from_value::<Vec<TodoItem>>(todos.clone()) {
        Ok(items) => Some(items),
        Err(error) => {
            tracing::warn!(
                tool_call_id = %part.tool_call_id,
                "Ignoring todo_write call with undecodable todos: {error}"
            );
            None
        }
    }
}

/// Most recent task list written inside `message`, if any.
pub fn latest_todos(message: &WorkspaceMessage) -> Option<Vec<TodoItem>> {
    message.parts.iter().rev().find_map(|part| match part {
        MessagePart::Tool(tool) => todos_from_tool(tool),
        MessagePart::Text { .. } | MessagePart::Reasoning { .. } => None,
    })
}

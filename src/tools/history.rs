use serde_json::{Value, json};

use crate::agent::ChatHistory;
use crate::error::ToolError;
use crate::tools::ToolSpec;

pub const CHAT_HISTORY_TOOL: &str = "get_chat_history";

/// Lets the model read earlier turns of the conversation.
pub fn chat_history_tool() -> ToolSpec {
    ToolSpec::new(
        CHAT_HISTORY_TOOL,
        "Return the chat history between the user and the assistant as a JSON array of \
         {role, content, created_at}, oldest first. Pass `num_chats` to read only the most \
         recent runs.",
    )
    .with_schema(json!({
        "type": "object",
        "properties": {
            "num_chats": {"type": "integer"}
        },
        "required": [],
        "additionalProperties": false
    }))
    .expect("valid schema")
    .with_handler(|args, deps| {
        let num_chats = args
            .get("num_chats")
            .and_then(Value::as_u64)
            .map(|count| count as usize);
        let history = deps
            .get::<ChatHistory>()
            .ok_or(ToolError::MissingDependency("ChatHistory"));
        async move {
            let chats = history?
                .chat_messages(num_chats)
                .into_iter()
                .map(|message| -> Result<Value, ToolError> {
                    let created_at = message
                        .created_at
                        .to_iso8601()
                        .map_err(|err| ToolError::Execution(err.to_string()))?;
                    Ok(json!({
                        "role": message.role,
                        "content": message.content,
                        "created_at": created_at,
                    }))
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Array(chats).to_string())
        }
    })
}

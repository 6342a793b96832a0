//! Completed runs the agent remembers.
//!
//! The agent replays them to the model before each run, and the
//! `get_chat_history` tool reads them through the dependency map.

use std::collections::VecDeque;
use std::sync::{PoisonError, RwLock};

use crate::event::{Message, Timestamp};
use crate::llm::ModelMessage;

/// A model message and the moment it entered the conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedMessage {
    pub message: ModelMessage,
    pub created_at: Timestamp,
}

impl RecordedMessage {
    pub fn now(message: ModelMessage) -> Self {
        Self {
            message,
            created_at: Timestamp::now(),
        }
    }

    pub fn role(&self) -> &'static str {
        match self.message {
            ModelMessage::System(_) => "system",
            ModelMessage::User(_) => "user",
            ModelMessage::Assistant { .. } => "assistant",
            ModelMessage::ToolResult { .. } => "tool",
        }
    }

    pub fn to_event_message(&self) -> Message {
        let (content, tool_call_id, tool_name) = match &self.message {
            ModelMessage::System(content) | ModelMessage::User(content) => {
                (Some(content.clone()), None, None)
            }
            ModelMessage::Assistant { content, .. } => (content.clone(), None, None),
            ModelMessage::ToolResult {
                tool_call_id,
                tool_name,
                content,
                ..
            } => (
                Some(content.clone()),
                Some(tool_call_id.clone()),
                Some(tool_name.clone()),
            ),
        };
        Message {
            role: self.role().to_string(),
            content,
            tool_call_id,
            tool_name,
            created_at: self.created_at,
        }
    }
}

/// The last `capacity` completed runs, oldest first.
#[derive(Debug)]
pub struct ChatHistory {
    runs: RwLock<VecDeque<Vec<RecordedMessage>>>,
    capacity: usize,
}

impl ChatHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            runs: RwLock::new(VecDeque::new()),
            capacity,
        }
    }

    pub fn push_run(&self, run: Vec<RecordedMessage>) {
        let mut runs = self.runs.write().unwrap_or_else(PoisonError::into_inner);
        runs.push_back(run);
        while runs.len() > self.capacity {
            runs.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.runs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every remembered message in conversation order, as sent to the model.
    pub fn model_messages(&self) -> Vec<ModelMessage> {
        self.runs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .flatten()
            .map(|recorded| recorded.message.clone())
            .collect()
    }

    /// User and assistant turns with text from the most recent `last_runs`
    /// runs, or from all of them.
    pub fn chat_messages(&self, last_runs: Option<usize>) -> Vec<Message> {
        let runs = self.runs.read().unwrap_or_else(PoisonError::into_inner);
        let skip = last_runs.map_or(0, |last| runs.len().saturating_sub(last));
        runs.iter()
            .skip(skip)
            .flatten()
            .filter(|recorded| matches!(recorded.role(), "user" | "assistant"))
            .map(RecordedMessage::to_event_message)
            .filter(|message| message.content.as_deref().is_some_and(|text| !text.is_empty()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(prompt: &str, answer: &str, at: i64) -> Vec<RecordedMessage> {
        vec![
            RecordedMessage {
                message: ModelMessage::User(prompt.to_string()),
                created_at: Timestamp::from_unix(at),
            },
            RecordedMessage {
                message: ModelMessage::ToolResult {
                    tool_call_id: "call_1".to_string(),
                    tool_name: "list_tables".to_string(),
                    content: "[]".to_string(),
                    is_error: false,
                },
                created_at: Timestamp::from_unix(at + 1),
            },
            RecordedMessage {
                message: ModelMessage::Assistant {
                    content: Some(answer.to_string()),
                    tool_calls: vec![],
                },
                created_at: Timestamp::from_unix(at + 2),
            },
        ]
    }

    #[test]
    fn keeps_only_the_newest_runs() {
        let history = ChatHistory::new(2);
        history.push_run(run("one", "1", 0));
        history.push_run(run("two", "2", 10));
        history.push_run(run("three", "3", 20));

        assert_eq!(history.len(), 2);
        assert_eq!(
            history.model_messages()[0],
            ModelMessage::User("two".to_string())
        );
    }

    #[test]
    fn zero_capacity_remembers_nothing() {
        let history = ChatHistory::new(0);
        history.push_run(run("one", "1", 0));
        assert!(history.is_empty());
        assert!(history.model_messages().is_empty());
    }

    #[test]
    fn chat_messages_skip_tool_results_and_keep_timestamps() {
        let history = ChatHistory::new(3);
        history.push_run(run("one", "1", 100));
        history.push_run(run("two", "2", 200));

        let all = history.chat_messages(None);
        let turns = all
            .iter()
            .map(|message| (message.role.as_str(), message.content.as_deref()))
            .collect::<Vec<_>>();
        assert_eq!(
            turns,
            vec![
                ("user", Some("one")),
                ("assistant", Some("1")),
                ("user", Some("two")),
                ("assistant", Some("2")),
            ]
        );
        assert_eq!(all[1].created_at, Timestamp::from_unix(102));

        let last = history.chat_messages(Some(1));
        assert_eq!(last.len(), 2);
        assert_eq!(last[0].content.as_deref(), Some("two"));
    }
}

use anthropic_ai_sdk::client::AnthropicClient;
use anthropic_ai_sdk::types::message::{
    ContentBlock, CreateMessageParams, CreateMessageResponse, Message, MessageClient, MessageError,
    RequiredMessageParams, Role, Tool, ToolChoice,
};
use async_trait::async_trait;

use crate::error::ProviderError;
use crate::llm::{
    ChatModel, ModelCompletion, ModelMessage, ModelToolCall, ModelToolChoice, ModelToolDefinition,
    ModelUsage,
};

#[derive(Debug, Clone)]
/// Runtime configuration for [`AnthropicModel`].
pub struct AnthropicModelConfig {
    pub api_key: String,
    /// Model id (for example `claude-3-5-sonnet-latest`).
    pub model: String,
    pub api_version: String,
    /// Base URL override for proxies.
    pub api_base_url: Option<String>,
    pub max_tokens: u32,
    pub temperature: Option<f32>,
}

impl AnthropicModelConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            api_version: AnthropicClient::DEFAULT_API_VERSION.to_string(),
            api_base_url: None,
            max_tokens: 4096,
            temperature: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnthropicModel {
    client: AnthropicClient,
    config: AnthropicModelConfig,
}

impl AnthropicModel {
    pub fn new(config: AnthropicModelConfig) -> Result<Self, ProviderError> {
        let mut builder =
            AnthropicClient::builder(config.api_key.clone(), config.api_version.clone());
        if let Some(url) = &config.api_base_url {
            builder = builder.with_api_base_url(url.clone());
        }

        let client = builder
            .build::<MessageError>()
            .map_err(|err| ProviderError::Request(err.to_string()))?;

        Ok(Self { client, config })
    }
}

#[async_trait]
impl ChatModel for AnthropicModel {
    fn model_id(&self) -> &str {
        &self.config.model
    }

    async fn invoke(
        &self,
        messages: &[ModelMessage],
        tools: &[ModelToolDefinition],
        tool_choice: ModelToolChoice,
    ) -> Result<ModelCompletion, ProviderError> {
        let (history, system) = split_system_prompt(messages);

        let mut request = CreateMessageParams::new(RequiredMessageParams {
            model: self.config.model.clone(),
            messages: history,
            max_tokens: self.config.max_tokens,
        })
        .with_stream(false);

        if let Some(system) = system {
            request = request.with_system(system);
        }
        if let Some(temperature) = self.config.temperature {
            request = request.with_temperature(temperature);
        }

        if !tools.is_empty() {
            request = request
                .with_tools(
                    tools
                        .iter()
                        .map(|tool| Tool {
                            name: tool.name.clone(),
                            description: Some(tool.description.clone()),
                            input_schema: tool.parameters.clone(),
                        })
                        .collect(),
                )
                .with_tool_choice(match tool_choice {
                    ModelToolChoice::Auto => ToolChoice::Auto,
                    ModelToolChoice::Required => ToolChoice::Any,
                    ModelToolChoice::None => ToolChoice::None,
                    ModelToolChoice::Tool(name) => ToolChoice::Tool { name },
                });
        }

        let response = self
            .client
            .create_message(Some(&request))
            .await
            .map_err(|err| ProviderError::Request(err.to_string()))?;

        Ok(completion_from_response(&response))
    }
}

/// Anthropic takes the system prompt out of band; every other message maps
/// onto a user or assistant turn.
fn split_system_prompt(messages: &[ModelMessage]) -> (Vec<Message>, Option<String>) {
    let mut system = Vec::new();
    let mut turns = Vec::new();

    for message in messages {
        match message {
            ModelMessage::System(content) => system.push(content.clone()),
            ModelMessage::User(content) => {
                turns.push(Message::new_text(Role::User, content.clone()));
            }
            ModelMessage::Assistant {
                content,
                tool_calls,
            } => {
                let mut blocks = content
                    .iter()
                    .filter(|text| !text.is_empty())
                    .map(|text| ContentBlock::Text { text: text.clone() })
                    .collect::<Vec<_>>();
                blocks.extend(tool_calls.iter().map(|call| ContentBlock::ToolUse {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    input: call.arguments.clone(),
                }));
                if !blocks.is_empty() {
                    turns.push(Message::new_blocks(Role::Assistant, blocks));
                }
            }
            ModelMessage::ToolResult {
                tool_call_id,
                content,
                is_error,
                ..
            } => {
                let content = if *is_error {
                    format!("Error: {content}")
                } else {
                    content.clone()
                };
                turns.push(Message::new_blocks(
                    Role::User,
                    vec![ContentBlock::ToolResult {
                        tool_use_id: tool_call_id.clone(),
                        content,
                    }],
                ));
            }
        }
    }

    let system = (!system.is_empty()).then(|| system.join("\n\n"));
    (turns, system)
}

fn completion_from_response(response: &CreateMessageResponse) -> ModelCompletion {
    let mut text = Vec::new();
    let mut thinking = Vec::new();
    let mut tool_calls = Vec::new();

    for block in &response.content {
        match block {
            ContentBlock::Text { text: part } => text.push(part.clone()),
            ContentBlock::ToolUse { id, name, input } => tool_calls.push(ModelToolCall {
                id: id.clone(),
                name: name.clone(),
                arguments: input.clone(),
            }),
            ContentBlock::Thinking { thinking: part, .. } => thinking.push(part.clone()),
            _ => {}
        }
    }

    ModelCompletion {
        text: (!text.is_empty()).then(|| text.join("\n")),
        thinking: (!thinking.is_empty()).then(|| thinking.join("\n")),
        tool_calls,
        usage: Some(ModelUsage {
            input_tokens: response.usage.input_tokens,
            output_tokens: response.usage.output_tokens,
        }),
    }
}

#[cfg(test)]
mod tests {
    use anthropic_ai_sdk::types::message::{MessageContent, StopReason, Usage};
    use serde_json::json;

    use super::*;

    fn response(content: Vec<ContentBlock>) -> CreateMessageResponse {
        CreateMessageResponse {
            content,
            id: "msg_1".to_string(),
            model: "claude-test".to_string(),
            role: Role::Assistant,
            stop_reason: Some(StopReason::EndTurn),
            stop_sequence: None,
            type_: "message".to_string(),
            usage: Usage {
                input_tokens: 12,
                output_tokens: 3,
            },
        }
    }

    #[test]
    fn completion_collects_sql_tool_call_and_usage() {
        let completion = completion_from_response(&response(vec![
            ContentBlock::Text {
                text: "Checking the schema".to_string(),
            },
            ContentBlock::ToolUse {
                id: "toolu_1".to_string(),
                name: "list_tables".to_string(),
                input: json!({}),
            },
        ]));

        assert_eq!(completion.text.as_deref(), Some("Checking the schema"));
        assert_eq!(completion.tool_calls[0].name, "list_tables");
        assert_eq!(
            completion.usage,
            Some(ModelUsage {
                input_tokens: 12,
                output_tokens: 3,
            })
        );
    }

    #[test]
    fn completion_without_text_keeps_thinking() {
        let completion = completion_from_response(&response(vec![ContentBlock::Thinking {
            thinking: "look at invoices first".to_string(),
            signature: "sig".to_string(),
        }]));

        assert!(completion.text.is_none());
        assert_eq!(completion.thinking.as_deref(), Some("look at invoices first"));
    }

    #[test]
    fn system_prompt_is_split_and_tool_errors_are_marked() {
        let history = vec![
            ModelMessage::System("You are a SQL agent".to_string()),
            ModelMessage::System("Today is Monday".to_string()),
            ModelMessage::User("count albums".to_string()),
            ModelMessage::ToolResult {
                tool_call_id: "toolu_2".to_string(),
                tool_name: "run_sql_query".to_string(),
                content: "no such table: album".to_string(),
                is_error: true,
            },
        ];

        let (turns, system) = split_system_prompt(&history);
        assert_eq!(system.as_deref(), Some("You are a SQL agent\n\nToday is Monday"));
        assert_eq!(turns.len(), 2);

        let MessageContent::Blocks { content } = &turns[1].content else {
            panic!("expected blocks")
        };
        assert_eq!(
            content[0],
            ContentBlock::ToolResult {
                tool_use_id: "toolu_2".to_string(),
                content: "Error: no such table: album".to_string(),
            }
        );
    }
}

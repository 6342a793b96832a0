use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::ProviderError;
use crate::llm::{
    ChatModel, ModelCompletion, ModelMessage, ModelToolCall, ModelToolChoice, ModelToolDefinition,
    ModelUsage,
};

const DEFAULT_API_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Clone)]
pub struct OpenAiModelConfig {
    pub api_key: String,
    pub model: String,
    /// Any Chat Completions compatible endpoint.
    pub api_base_url: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl OpenAiModelConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            api_base_url: None,
            temperature: None,
            max_tokens: Some(4096),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenAiModel {
    client: Client,
    config: OpenAiModelConfig,
}

impl OpenAiModel {
    pub fn new(config: OpenAiModelConfig) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .build()
            .map_err(|err| ProviderError::Request(err.to_string()))?;

        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        let base = self
            .config
            .api_base_url
            .as_deref()
            .unwrap_or(DEFAULT_API_BASE_URL)
            .trim_end_matches('/');
        format!("{base}/chat/completions")
    }
}

#[async_trait]
impl ChatModel for OpenAiModel {
    fn model_id(&self) -> &str {
        &self.config.model
    }

    async fn invoke(
        &self,
        messages: &[ModelMessage],
        tools: &[ModelToolDefinition],
        tool_choice: ModelToolChoice,
    ) -> Result<ModelCompletion, ProviderError> {
        let body = ChatRequest::build(messages, tools, tool_choice, &self.config);

        let response = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|err| ProviderError::Request(err.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|err| ProviderError::Response(err.to_string()))?;

        if !status.is_success() {
            return Err(ProviderError::Request(describe_api_error(status, &text)));
        }

        let payload = serde_json::from_str::<ChatResponse>(&text)
            .map_err(|err| ProviderError::Response(err.to_string()))?;
        payload.into_completion()
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
enum WireMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<WireToolCall>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

#[derive(Debug, Serialize)]
struct WireTool {
    #[serde(rename = "type")]
    kind: &'static str,
    function: WireFunction,
}

#[derive(Debug, Serialize)]
struct WireFunction {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    arguments: String,
}

fn function_kind() -> String {
    "function".to_string()
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    code: Option<Value>,
}

impl ChatRequest {
    fn build(
        messages: &[ModelMessage],
        tools: &[ModelToolDefinition],
        tool_choice: ModelToolChoice,
        config: &OpenAiModelConfig,
    ) -> Self {
        let tools = tools
            .iter()
            .map(|tool| WireTool {
                kind: "function",
                function: WireFunction {
                    name: tool.name.clone(),
                    description: tool.description.clone(),
                    parameters: tool.parameters.clone(),
                },
            })
            .collect::<Vec<_>>();

        let tool_choice = (!tools.is_empty()).then(|| match tool_choice {
            ModelToolChoice::Auto => json!("auto"),
            ModelToolChoice::Required => json!("required"),
            ModelToolChoice::None => json!("none"),
            ModelToolChoice::Tool(name) => json!({"type": "function", "function": {"name": name}}),
        });

        Self {
            model: config.model.clone(),
            messages: messages.iter().filter_map(wire_message).collect(),
            tools,
            tool_choice,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }
}

fn wire_message(message: &ModelMessage) -> Option<WireMessage> {
    match message {
        ModelMessage::System(content) if !content.is_empty() => Some(WireMessage::System {
            content: content.clone(),
        }),
        ModelMessage::User(content) if !content.is_empty() => Some(WireMessage::User {
            content: content.clone(),
        }),
        ModelMessage::System(_) | ModelMessage::User(_) => None,
        ModelMessage::Assistant {
            content,
            tool_calls,
        } => {
            let content = content.clone().filter(|text| !text.is_empty());
            let tool_calls = tool_calls
                .iter()
                .map(|call| WireToolCall {
                    id: call.id.clone(),
                    kind: function_kind(),
                    function: WireFunctionCall {
                        name: call.name.clone(),
                        arguments: call.arguments.to_string(),
                    },
                })
                .collect::<Vec<_>>();
            if content.is_none() && tool_calls.is_empty() {
                return None;
            }
            Some(WireMessage::Assistant {
                content,
                tool_calls,
            })
        }
        ModelMessage::ToolResult {
            tool_call_id,
            content,
            is_error,
            ..
        } => Some(WireMessage::Tool {
            tool_call_id: tool_call_id.clone(),
            content: if *is_error {
                format!("Error: {content}")
            } else {
                content.clone()
            },
        }),
    }
}

impl ChatResponse {
    fn into_completion(self) -> Result<ModelCompletion, ProviderError> {
        let message = self
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .ok_or_else(|| ProviderError::Response("response has no choice message".to_string()))?;

        let tool_calls = message
            .tool_calls
            .into_iter()
            .map(|call| {
                let arguments = if call.function.arguments.trim().is_empty() {
                    json!({})
                } else {
                    serde_json::from_str(&call.function.arguments).map_err(|err| {
                        ProviderError::Response(format!(
                            "arguments for tool '{}' are not valid JSON: {err}",
                            call.function.name
                        ))
                    })?
                };
                Ok(ModelToolCall {
                    id: call.id,
                    name: call.function.name,
                    arguments,
                })
            })
            .collect::<Result<Vec<_>, ProviderError>>()?;

        Ok(ModelCompletion {
            text: message.content.filter(|text| !text.is_empty()),
            thinking: message.reasoning_content.filter(|text| !text.is_empty()),
            tool_calls,
            usage: self.usage.map(|usage| ModelUsage {
                input_tokens: usage.prompt_tokens,
                output_tokens: usage.completion_tokens,
            }),
        })
    }
}

fn describe_api_error(status: reqwest::StatusCode, body: &str) -> String {
    let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) else {
        return if body.is_empty() {
            format!("openai request failed ({status})")
        } else {
            format!("openai request failed ({status}): {body}")
        };
    };

    let code = match envelope.error.code {
        Some(Value::String(code)) => code,
        Some(other) => other.to_string(),
        None => status.as_u16().to_string(),
    };
    let kind = envelope
        .error
        .kind
        .unwrap_or_else(|| "api_error".to_string());
    let message = envelope
        .error
        .message
        .unwrap_or_else(|| "unknown error".to_string());
    format!("openai error {code} {kind}: {message}")
}

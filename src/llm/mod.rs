mod anthropic;
mod openai;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::{LlmProvider, Settings};
use crate::error::ProviderError;

pub use anthropic::{AnthropicModel, AnthropicModelConfig};
pub use openai::{OpenAiModel, OpenAiModelConfig};

#[derive(Clone, Debug, PartialEq)]
#[doc(hidden)]
pub enum ModelMessage {
    System(String),
    User(String),
    Assistant {
        content: Option<String>,
        tool_calls: Vec<ModelToolCall>,
    },
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        content: String,
        is_error: bool,
    },
}

#[derive(Clone, Debug, PartialEq)]
#[doc(hidden)]
pub struct ModelToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Clone, Debug)]
#[doc(hidden)]
pub struct ModelToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[doc(hidden)]
pub enum ModelToolChoice {
    Auto,
    Required,
    None,
    Tool(String),
}

#[derive(Clone, Debug, Default, PartialEq)]
#[doc(hidden)]
pub struct ModelCompletion {
    pub text: Option<String>,
    pub thinking: Option<String>,
    pub tool_calls: Vec<ModelToolCall>,
    pub usage: Option<ModelUsage>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
#[doc(hidden)]
pub struct ModelUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Provider-side model id, reported on every response event.
    fn model_id(&self) -> &str;

    async fn invoke(
        &self,
        messages: &[ModelMessage],
        tools: &[ModelToolDefinition],
        tool_choice: ModelToolChoice,
    ) -> Result<ModelCompletion, ProviderError>;
}

/// Builds the chat model selected by `LLM_PROVIDER`.
pub fn build_model(settings: &Settings) -> Result<Box<dyn ChatModel>, ProviderError> {
    match settings.provider {
        LlmProvider::OpenAi => {
            let api_key = require_key("OPENAI_API_KEY", settings.openai.api_key.as_deref())?;
            let mut config = OpenAiModelConfig::new(api_key, settings.openai.model.clone());
            config.temperature = settings.openai.temperature;
            config.api_base_url = settings.openai.base_url.clone();
            Ok(Box::new(OpenAiModel::new(config)?))
        }
        LlmProvider::Anthropic => {
            let api_key =
                require_key("ANTHROPIC_API_KEY", settings.anthropic.api_key.as_deref())?;
            let mut config = AnthropicModelConfig::new(api_key, settings.anthropic.model.clone());
            config.temperature = settings.anthropic.temperature;
            Ok(Box::new(AnthropicModel::new(config)?))
        }
    }
}

fn require_key(name: &str, value: Option<&str>) -> Result<String, ProviderError> {
    match value {
        Some(key) if !key.trim().is_empty() => Ok(key.to_string()),
        _ => Err(ProviderError::Request(format!("{name} is not set"))),
    }
}

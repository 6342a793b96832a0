//! Websocket relay for a tool-calling SQL agent.
//!
//! - `agent`: tool-calling loop that streams [`ResponseEvent`]s, plus the
//!   [`SharedAgent`] handle every connection runs through
//! - `relay`: connection manager, per-connection event relay and the JSON
//!   serializer, served over axum websockets
//! - `tools::sql`: SQLite schema and query tools; `tools::history` lets the
//!   model read earlier turns
//! - `llm`: OpenAI and Anthropic chat adapters

pub mod agent;
pub mod config;
pub mod error;
pub mod event;
pub mod llm;
pub mod relay;
pub mod sql_agent;
pub mod telemetry;
pub mod tools;

pub use agent::{
    Agent, AgentBuilder, AgentConfig, AgentHandle, ChatHistory, ResponseStream, RunOptions,
    SharedAgent,
};
pub use config::{LlmProvider, LogFormat, Settings};
pub use error::{
    AgentError, ConfigError, ProviderError, RelayError, SchemaError, SerializationError, ToolError,
};
pub use event::{ExtraValue, ResponseEvent, RunEvent, Timestamp, ToolExecution};
pub use llm::{
    AnthropicModel, AnthropicModelConfig, ChatModel, ModelCompletion, ModelMessage, ModelToolCall,
    ModelToolChoice, ModelToolDefinition, OpenAiModel, OpenAiModelConfig, build_model,
};
pub use relay::{ConnectionId, ConnectionManager, SerializedEvent, serialize_event};
pub use tools::{DependencyMap, ToolSpec};

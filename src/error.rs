use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("tool schema must be a JSON object")]
    SchemaNotObject,
    #[error("tool schema must declare type=object")]
    RootTypeMustBeObject,
    #[error("required must be an array of strings")]
    InvalidRequired,
}

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool not found: {0}")]
    NotFound(String),
    #[error("invalid tool arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },
    #[error("dependency missing: {0}")]
    MissingDependency(&'static str),
    #[error("tool execution failed: {0}")]
    Execution(String),
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Request(String),
    #[error("provider response invalid: {0}")]
    Response(String),
}

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Tool(#[from] ToolError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("max iterations reached ({max_iterations})")]
    MaxIterationsReached { max_iterations: u32 },
    #[error("agent stream ended without a completed run")]
    MissingFinalResponse,
    #[error("agent configuration error: {0}")]
    Config(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("unknown LLM provider: {0} (expected \"openai\" or \"anthropic\")")]
    UnknownProvider(String),
}

/// Raised while converting a response event into its JSON form.
///
/// Never crosses the serializer boundary: the serializer swaps the partial
/// payload for a fallback that carries this error's text.
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("timestamp out of range: {0}")]
    Timestamp(i64),
    #[error("field {field} could not be encoded: {source}")]
    Encode {
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("websocket handshake failed: {0}")]
    Handshake(String),
    #[error("failed to read from client: {0}")]
    TransportRead(String),
    #[error("failed to write to client: {0}")]
    TransportWrite(String),
    #[error(transparent)]
    UpstreamRun(#[from] AgentError),
}

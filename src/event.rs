//! Response events produced by a streamed agent run.
//!
//! A [`ResponseEvent`] is a tagged record: [`RunEvent`] names the kind, and
//! every other field is optional. Consumers read the fields they know and
//! ignore the rest; the relay forwards them through
//! [`serialize_event`](crate::relay::serialize_event).

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use serde_json::Value;

use crate::error::SerializationError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RunEvent {
    RunStarted,
    RunResponseContent,
    ReasoningStep,
    ToolCallStarted,
    ToolCallCompleted,
    RunCompleted,
    RunError,
}

impl RunEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunEvent::RunStarted => "RunStarted",
            RunEvent::RunResponseContent => "RunResponseContent",
            RunEvent::ReasoningStep => "ReasoningStep",
            RunEvent::ToolCallStarted => "ToolCallStarted",
            RunEvent::ToolCallCompleted => "ToolCallCompleted",
            RunEvent::RunCompleted => "RunCompleted",
            RunEvent::RunError => "RunError",
        }
    }

    /// Whether the event only appears when intermediate steps are requested.
    pub fn is_intermediate(&self) -> bool {
        !matches!(self, RunEvent::RunResponseContent | RunEvent::RunError)
    }
}

impl fmt::Display for RunEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Seconds since the Unix epoch, rendered as RFC 3339 on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp(i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now().timestamp())
    }

    pub fn from_unix(seconds: i64) -> Self {
        Self(seconds)
    }

    pub fn unix(&self) -> i64 {
        self.0
    }

    pub fn to_iso8601(&self) -> Result<String, SerializationError> {
        DateTime::<Utc>::from_timestamp(self.0, 0)
            .map(|datetime| datetime.to_rfc3339_opts(SecondsFormat::Secs, true))
            .ok_or(SerializationError::Timestamp(self.0))
    }
}

impl Serialize for Timestamp {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let rendered = self.to_iso8601().map_err(serde::ser::Error::custom)?;
        serializer.serialize_str(&rendered)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunMetrics {
    pub input_tokens: Option<u32>,
    pub output_tokens: Option<u32>,
    pub total_tokens: Option<u32>,
    /// Wall-clock seconds.
    pub time: Option<f64>,
    pub tool_calls: Option<u32>,
}

impl RunMetrics {
    pub fn add_usage(&mut self, input_tokens: u32, output_tokens: u32) {
        let input = self.input_tokens.unwrap_or(0).saturating_add(input_tokens);
        let output = self.output_tokens.unwrap_or(0).saturating_add(output_tokens);
        self.input_tokens = Some(input);
        self.output_tokens = Some(output);
        self.total_tokens = Some(input.saturating_add(output));
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolExecution {
    pub tool_call_id: Option<String>,
    pub tool_name: String,
    pub tool_args: Value,
    pub result: Option<String>,
    pub tool_call_error: Option<bool>,
    pub metrics: Option<RunMetrics>,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub role: String,
    pub content: Option<String>,
    pub tool_call_id: Option<String>,
    pub tool_name: Option<String>,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaArtifact {
    pub id: String,
    pub url: Option<String>,
    pub mime_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UrlCitation {
    pub url: String,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Citations {
    pub urls: Vec<UrlCitation>,
    pub raw: Option<Value>,
}

/// Loosely-typed payload carried in `extra_data`.
#[derive(Clone)]
pub enum ExtraValue {
    Json(Value),
    Timestamp(Timestamp),
    List(Vec<ExtraValue>),
    Map(BTreeMap<String, ExtraValue>),
    /// Anything without a JSON shape; forwarded as its display text.
    Opaque(Arc<dyn fmt::Display + Send + Sync>),
}

impl ExtraValue {
    pub fn opaque<T>(value: T) -> Self
    where
        T: fmt::Display + Send + Sync + 'static,
    {
        ExtraValue::Opaque(Arc::new(value))
    }
}

impl fmt::Debug for ExtraValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtraValue::Json(value) => f.debug_tuple("Json").field(value).finish(),
            ExtraValue::Timestamp(ts) => f.debug_tuple("Timestamp").field(ts).finish(),
            ExtraValue::List(items) => f.debug_tuple("List").field(items).finish(),
            ExtraValue::Map(map) => f.debug_tuple("Map").field(map).finish(),
            ExtraValue::Opaque(value) => f.debug_tuple("Opaque").field(&value.to_string()).finish(),
        }
    }
}

impl From<Value> for ExtraValue {
    fn from(value: Value) -> Self {
        ExtraValue::Json(value)
    }
}

impl From<Timestamp> for ExtraValue {
    fn from(value: Timestamp) -> Self {
        ExtraValue::Timestamp(value)
    }
}

/// One unit of output from a streamed agent run.
#[derive(Debug, Clone)]
pub struct ResponseEvent {
    pub event: RunEvent,
    pub content: Option<String>,
    pub content_type: Option<String>,
    pub thinking: Option<String>,
    pub reasoning_content: Option<String>,
    pub messages: Option<Vec<Message>>,
    pub metrics: Option<RunMetrics>,
    pub model: Option<String>,
    pub run_id: Option<String>,
    pub agent_id: Option<String>,
    pub session_id: Option<String>,
    pub workflow_id: Option<String>,
    pub tools: Option<Vec<ToolExecution>>,
    pub formatted_tool_calls: Option<Vec<String>>,
    pub images: Option<Vec<MediaArtifact>>,
    pub videos: Option<Vec<MediaArtifact>>,
    pub audio: Option<Vec<MediaArtifact>>,
    pub response_audio: Option<MediaArtifact>,
    pub citations: Option<Citations>,
    pub extra_data: Option<BTreeMap<String, ExtraValue>>,
    pub created_at: Option<Timestamp>,
}

impl ResponseEvent {
    pub fn new(event: RunEvent) -> Self {
        Self {
            event,
            content: None,
            content_type: None,
            thinking: None,
            reasoning_content: None,
            messages: None,
            metrics: None,
            model: None,
            run_id: None,
            agent_id: None,
            session_id: None,
            workflow_id: None,
            tools: None,
            formatted_tool_calls: None,
            images: None,
            videos: None,
            audio: None,
            response_audio: None,
            citations: None,
            extra_data: None,
            created_at: None,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self.content_type = Some("str".to_string());
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolExecution>) -> Self {
        self.formatted_tool_calls = Some(tools.iter().map(format_tool_call).collect());
        self.tools = Some(tools);
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<ExtraValue>) -> Self {
        self.extra_data
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Error event delivered in place of a failed run.
    pub fn run_error(message: impl Into<String>) -> Self {
        let mut event = ResponseEvent::new(RunEvent::RunError).with_content(message);
        event.created_at = Some(Timestamp::now());
        event
    }
}

/// Renders a call the way a transcript would show it: `name(key=value, ...)`.
pub fn format_tool_call(tool: &ToolExecution) -> String {
    let args = match &tool.tool_args {
        Value::Object(map) => map
            .iter()
            .map(|(key, value)| match value {
                Value::String(text) => format!("{key}={text}"),
                other => format!("{key}={other}"),
            })
            .collect::<Vec<_>>()
            .join(", "),
        Value::Null => String::new(),
        other => other.to_string(),
    };
    format!("{}({args})", tool.tool_name)
}

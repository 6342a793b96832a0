//! Conversion of [`ResponseEvent`]s into JSON objects for the wire.

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::SerializationError;
use crate::event::{ExtraValue, ResponseEvent};

/// JSON object sent to a client for one event.
pub type SerializedEvent = Map<String, Value>;

/// Converts an event into a JSON object. Never fails.
///
/// Only allow-listed fields are emitted and absent ones are omitted. If any
/// field cannot be converted, the whole payload is replaced by
/// `{content, event, error}`.
pub fn serialize_event(event: &ResponseEvent) -> SerializedEvent {
    match try_serialize(event) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(event = %event.event, error = %err, "sending fallback payload");
            fallback(event, &err)
        }
    }
}

fn try_serialize(event: &ResponseEvent) -> Result<SerializedEvent, SerializationError> {
    let mut out = Map::new();

    put(&mut out, "content", text(&event.content));
    put(&mut out, "content_type", text(&event.content_type));
    put(&mut out, "thinking", text(&event.thinking));
    put(&mut out, "reasoning_content", text(&event.reasoning_content));
    put(
        &mut out,
        "event",
        Some(Value::String(event.event.as_str().to_string())),
    );
    put(&mut out, "messages", records("messages", event.messages.as_deref())?);
    put(&mut out, "metrics", record("metrics", event.metrics.as_ref())?);
    put(&mut out, "model", text(&event.model));
    put(&mut out, "run_id", text(&event.run_id));
    put(&mut out, "agent_id", text(&event.agent_id));
    put(&mut out, "session_id", text(&event.session_id));
    put(&mut out, "workflow_id", text(&event.workflow_id));
    put(&mut out, "tools", records("tools", event.tools.as_deref())?);
    put(
        &mut out,
        "formatted_tool_calls",
        event
            .formatted_tool_calls
            .as_ref()
            .map(|calls| Value::from(calls.clone())),
    );
    put(&mut out, "images", records("images", event.images.as_deref())?);
    put(&mut out, "videos", records("videos", event.videos.as_deref())?);
    put(&mut out, "audio", records("audio", event.audio.as_deref())?);
    put(
        &mut out,
        "response_audio",
        record("response_audio", event.response_audio.as_ref())?,
    );
    put(&mut out, "citations", record("citations", event.citations.as_ref())?);

    if let Some(extra) = &event.extra_data {
        let mut resolved = Map::new();
        for (key, value) in extra {
            if key.starts_with('_') {
                continue;
            }
            let value = resolve_extra(value)?;
            if !value.is_null() {
                resolved.insert(key.clone(), value);
            }
        }
        put(&mut out, "extra_data", Some(Value::Object(resolved)));
    }

    let created_at = event
        .created_at
        .map(|created_at| created_at.to_iso8601())
        .transpose()?;
    put(&mut out, "created_at", created_at.map(Value::String));

    Ok(out)
}

fn fallback(event: &ResponseEvent, err: &SerializationError) -> SerializedEvent {
    let mut out = Map::new();
    out.insert(
        "content".to_string(),
        event.content.clone().map_or(Value::Null, Value::String),
    );
    out.insert(
        "event".to_string(),
        Value::String(event.event.as_str().to_string()),
    );
    out.insert(
        "error".to_string(),
        Value::String(format!("Error serializing response: {err}")),
    );
    out
}

fn put(out: &mut SerializedEvent, key: &str, value: Option<Value>) {
    if let Some(value) = value.filter(|value| !value.is_null()) {
        out.insert(key.to_string(), value);
    }
}

fn text(value: &Option<String>) -> Option<Value> {
    value.clone().map(Value::String)
}

fn record<T: Serialize>(
    field: &'static str,
    value: Option<&T>,
) -> Result<Option<Value>, SerializationError> {
    value.map(|value| encode(field, value)).transpose()
}

fn records<T: Serialize>(
    field: &'static str,
    values: Option<&[T]>,
) -> Result<Option<Value>, SerializationError> {
    let Some(values) = values else {
        return Ok(None);
    };
    let items = values
        .iter()
        .map(|value| encode(field, value))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Some(Value::Array(items)))
}

fn encode<T: Serialize>(field: &'static str, value: &T) -> Result<Value, SerializationError> {
    serde_json::to_value(value)
        .map(flatten_record)
        .map_err(|source| SerializationError::Encode { field, source })
}

/// Keeps the public, non-null attributes of a record. Only the top level is
/// filtered; nested values pass through as encoded.
fn flatten_record(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(key, value)| !key.starts_with('_') && !value.is_null())
                .collect(),
        ),
        other => other,
    }
}

fn resolve_extra(value: &ExtraValue) -> Result<Value, SerializationError> {
    Ok(match value {
        ExtraValue::Json(value) => value.clone(),
        ExtraValue::Timestamp(timestamp) => Value::String(timestamp.to_iso8601()?),
        ExtraValue::List(items) => Value::Array(
            items
                .iter()
                .map(resolve_extra)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        ExtraValue::Map(map) => Value::Object(
            map.iter()
                .map(|(key, value)| Ok((key.clone(), resolve_extra(value)?)))
                .collect::<Result<Map<_, _>, SerializationError>>()?,
        ),
        ExtraValue::Opaque(value) => Value::String(value.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::net::Ipv4Addr;

    use serde_json::json;

    use super::*;
    use crate::event::{
        Citations, MediaArtifact, Message, RunEvent, RunMetrics, Timestamp, ToolExecution,
        UrlCitation,
    };

    fn keys(payload: &SerializedEvent) -> Vec<&str> {
        let mut keys = payload.keys().map(String::as_str).collect::<Vec<_>>();
        keys.sort_unstable();
        keys
    }

    fn tool(created_at: Timestamp) -> ToolExecution {
        ToolExecution {
            tool_call_id: Some("call_1".to_string()),
            tool_name: "run_sql_query".to_string(),
            tool_args: json!({"limit": 2, "query": "SELECT Name FROM Artist"}),
            result: None,
            tool_call_error: None,
            metrics: None,
            created_at,
        }
    }

    #[test]
    fn fully_populated_event_becomes_plain_json() {
        let mut event = ResponseEvent::new(RunEvent::RunCompleted)
            .with_content("2 artists")
            .with_tools(vec![tool(Timestamp::from_unix(1_700_000_000))])
            .with_extra("host", ExtraValue::opaque(Ipv4Addr::LOCALHOST))
            .with_extra("seen_at", Timestamp::from_unix(0))
            .with_extra("_trace", json!("hidden"))
            .with_extra("empty", Value::Null)
            .with_extra(
                "nested",
                ExtraValue::Map(BTreeMap::from([(
                    "items".to_string(),
                    ExtraValue::List(vec![
                        ExtraValue::Json(json!(1)),
                        ExtraValue::opaque("two"),
                    ]),
                )])),
            );
        event.run_id = Some("run-1".to_string());
        event.workflow_id = Some("wf-1".to_string());
        event.metrics = Some(RunMetrics {
            total_tokens: Some(42),
            ..RunMetrics::default()
        });
        event.messages = Some(vec![Message {
            role: "user".to_string(),
            content: Some("how many artists?".to_string()),
            tool_call_id: None,
            tool_name: None,
            created_at: Timestamp::from_unix(1_700_000_000),
        }]);
        event.images = Some(vec![MediaArtifact {
            id: "img-1".to_string(),
            url: Some("https://example.com/chart.png".to_string()),
            mime_type: None,
        }]);
        event.citations = Some(Citations {
            urls: vec![UrlCitation {
                url: "https://www.sqlite.org".to_string(),
                title: None,
            }],
            raw: None,
        });
        event.created_at = Some(Timestamp::from_unix(1_700_000_000));

        let payload = serialize_event(&event);

        assert_eq!(
            Value::Object(payload),
            json!({
                "content": "2 artists",
                "content_type": "str",
                "event": "RunCompleted",
                "messages": [{
                    "role": "user",
                    "content": "how many artists?",
                    "created_at": "2023-11-14T22:13:20Z"
                }],
                "metrics": {"total_tokens": 42},
                "run_id": "run-1",
                "workflow_id": "wf-1",
                "tools": [{
                    "tool_call_id": "call_1",
                    "tool_name": "run_sql_query",
                    "tool_args": {"query": "SELECT Name FROM Artist", "limit": 2},
                    "created_at": "2023-11-14T22:13:20Z"
                }],
                "formatted_tool_calls": ["run_sql_query(limit=2, query=SELECT Name FROM Artist)"],
                "images": [{"id": "img-1", "url": "https://example.com/chart.png"}],
                "citations": {"urls": [{"url": "https://www.sqlite.org", "title": null}]},
                "extra_data": {
                    "host": "127.0.0.1",
                    "seen_at": "1970-01-01T00:00:00Z",
                    "nested": {"items": [1, "two"]}
                },
                "created_at": "2023-11-14T22:13:20Z"
            })
        );
    }

    #[test]
    fn absent_fields_are_omitted() {
        let payload = serialize_event(&ResponseEvent::new(RunEvent::RunStarted));
        assert_eq!(keys(&payload), vec!["event"]);
    }

    #[test]
    fn bad_created_at_falls_back_to_minimal_payload() {
        let mut event = ResponseEvent::new(RunEvent::RunResponseContent).with_content("Album");
        event.created_at = Some(Timestamp::from_unix(i64::MAX));

        let payload = serialize_event(&event);

        assert_eq!(keys(&payload), vec!["content", "error", "event"]);
        assert_eq!(payload["content"], "Album");
        assert_eq!(payload["event"], "RunResponseContent");
        assert_eq!(
            payload["error"],
            format!("Error serializing response: timestamp out of range: {}", i64::MAX)
        );
    }

    #[test]
    fn bad_nested_timestamp_falls_back_without_content() {
        let event = ResponseEvent::new(RunEvent::ToolCallStarted)
            .with_tools(vec![tool(Timestamp::from_unix(i64::MIN))]);

        let payload = serialize_event(&event);

        assert_eq!(keys(&payload), vec!["content", "error", "event"]);
        assert_eq!(payload["content"], Value::Null);
        assert_eq!(payload["event"], "ToolCallStarted");
        let error = payload["error"].as_str().expect("error text");
        assert!(error.starts_with("Error serializing response: field tools"));
    }

    #[test]
    fn bad_extra_timestamp_falls_back() {
        let event = ResponseEvent::new(RunEvent::RunCompleted)
            .with_extra("expires", ExtraValue::List(vec![Timestamp::from_unix(i64::MAX).into()]));

        let payload = serialize_event(&event);
        assert_eq!(keys(&payload), vec!["content", "error", "event"]);
    }

    #[test]
    fn records_lose_private_and_null_attributes() {
        assert_eq!(
            flatten_record(json!({"name": "Artist", "_rowid": 7, "alias": null, "meta": {"x": null}})),
            json!({"name": "Artist", "meta": {"x": null}})
        );
        assert_eq!(flatten_record(json!([1, null])), json!([1, null]));
    }
}

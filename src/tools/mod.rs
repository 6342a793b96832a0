pub mod history;
pub mod sql;

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::error::{SchemaError, ToolError};

type DynDependency = Arc<dyn Any + Send + Sync>;
type ToolHandler =
    dyn Fn(Value, &DependencyMap) -> BoxFuture<'static, Result<String, ToolError>> + Send + Sync;

/// Values handed to tool handlers, looked up by type.
#[derive(Clone, Default, Debug)]
pub struct DependencyMap {
    typed: Arc<RwLock<HashMap<TypeId, DynDependency>>>,
}

impl DependencyMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T>(&self, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.insert_shared(Arc::new(value));
    }

    /// Registers a value the caller keeps a handle to.
    pub fn insert_shared<T>(&self, value: Arc<T>)
    where
        T: Send + Sync + 'static,
    {
        self.typed
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(TypeId::of::<T>(), value);
    }

    pub fn get<T>(&self) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        let value = self
            .typed
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&TypeId::of::<T>())?
            .clone();
        Arc::downcast::<T>(value).ok()
    }
}

#[derive(Clone)]
pub struct ToolSpec {
    name: String,
    description: String,
    json_schema: Value,
    handler: Arc<ToolHandler>,
}

impl std::fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSpec")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("json_schema", &self.json_schema)
            .finish()
    }
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        let name = name.into();
        let unconfigured = name.clone();
        Self {
            name,
            description: description.into(),
            json_schema: serde_json::json!({
                "type": "object",
                "properties": {},
                "required": [],
                "additionalProperties": true,
            }),
            handler: Arc::new(move |_args, _deps| {
                let message = format!("no handler configured for tool '{unconfigured}'");
                Box::pin(async move { Err(ToolError::Execution(message)) })
            }),
        }
    }

    pub fn with_schema(mut self, schema: Value) -> Result<Self, SchemaError> {
        validate_schema(&schema)?;
        self.json_schema = schema;
        Ok(self)
    }

    pub fn with_handler<F, Fut>(mut self, handler: F) -> Self
    where
        F: Fn(Value, &DependencyMap) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, ToolError>> + Send + 'static,
    {
        self.handler = Arc::new(move |args, deps| Box::pin(handler(args, deps)));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn json_schema(&self) -> &Value {
        &self.json_schema
    }

    pub async fn execute(
        &self,
        args: Value,
        dependencies: &DependencyMap,
    ) -> Result<String, ToolError> {
        validate_arguments(self.name(), &self.json_schema, &args)?;
        (self.handler)(args, dependencies).await
    }
}

fn validate_schema(schema: &Value) -> Result<(), SchemaError> {
    let schema = schema.as_object().ok_or(SchemaError::SchemaNotObject)?;

    if schema.get("type").and_then(Value::as_str) != Some("object") {
        return Err(SchemaError::RootTypeMustBeObject);
    }

    match schema.get("required") {
        None => Ok(()),
        Some(Value::Array(items)) if items.iter().all(Value::is_string) => Ok(()),
        Some(_) => Err(SchemaError::InvalidRequired),
    }
}

fn validate_arguments(tool: &str, schema: &Value, args: &Value) -> Result<(), ToolError> {
    let invalid = |message: String| ToolError::InvalidArguments {
        tool: tool.to_string(),
        message,
    };

    let args = args
        .as_object()
        .ok_or_else(|| invalid("arguments must be a JSON object".to_string()))?;
    let schema = schema
        .as_object()
        .ok_or_else(|| invalid("tool schema must be a JSON object".to_string()))?;

    let required = schema
        .get("required")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str);
    for field in required {
        if !args.contains_key(field) {
            return Err(invalid(format!("missing required field: {field}")));
        }
    }

    let empty = serde_json::Map::new();
    let properties = schema
        .get("properties")
        .and_then(Value::as_object)
        .unwrap_or(&empty);
    let closed = schema.get("additionalProperties").and_then(Value::as_bool) == Some(false);

    for (key, value) in args {
        let Some(property) = properties.get(key) else {
            if closed {
                return Err(invalid(format!("unknown field: {key}")));
            }
            continue;
        };
        if let Some(type_name) = property.get("type").and_then(Value::as_str) {
            if !value_matches_type(value, type_name) {
                return Err(invalid(format!("field '{key}' must be of type {type_name}")));
            }
        }
    }

    Ok(())
}

fn value_matches_type(value: &Value, type_name: &str) -> bool {
    match type_name {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn limit_tool() -> ToolSpec {
        ToolSpec::new("preview", "preview rows")
            .with_schema(json!({
                "type": "object",
                "properties": {
                    "table_name": {"type": "string"},
                    "limit": {"type": "integer"}
                },
                "required": ["table_name"],
                "additionalProperties": false
            }))
            .expect("schema valid")
            .with_handler(|args, _deps| async move {
                let limit = args.get("limit").and_then(Value::as_u64).unwrap_or(10);
                Ok(limit.to_string())
            })
    }

    #[test]
    fn schema_validation_rejects_bad_roots_and_required() {
        assert!(matches!(
            ToolSpec::new("bad", "bad").with_schema(json!({"type": "string"})),
            Err(SchemaError::RootTypeMustBeObject)
        ));
        assert!(matches!(
            ToolSpec::new("bad", "bad").with_schema(json!([])),
            Err(SchemaError::SchemaNotObject)
        ));
        assert!(matches!(
            ToolSpec::new("bad", "bad").with_schema(json!({"type": "object", "required": [1]})),
            Err(SchemaError::InvalidRequired)
        ));
    }

    #[tokio::test]
    async fn arguments_are_checked_against_schema() {
        let tool = limit_tool();
        let deps = DependencyMap::new();

        let missing = tool.execute(json!({}), &deps).await.expect_err("missing");
        assert!(missing.to_string().contains("missing required field: table_name"));

        let unknown = tool
            .execute(json!({"table_name": "Album", "where": "1=1"}), &deps)
            .await
            .expect_err("unknown");
        assert!(unknown.to_string().contains("unknown field: where"));

        let wrong_type = tool
            .execute(json!({"table_name": "Album", "limit": "5"}), &deps)
            .await
            .expect_err("wrong type");
        assert!(wrong_type.to_string().contains("must be of type integer"));

        let outcome = tool
            .execute(json!({"table_name": "Album", "limit": 5}), &deps)
            .await
            .expect("valid call");
        assert_eq!(outcome, "5");
    }

    #[tokio::test]
    async fn unconfigured_handler_reports_tool_name() {
        let err = ToolSpec::new("noop", "nothing")
            .execute(json!({}), &DependencyMap::new())
            .await
            .expect_err("no handler");
        assert!(err.to_string().contains("'noop'"));
    }

    #[test]
    fn shared_dependencies_are_the_same_instance() {
        let deps = DependencyMap::new();
        deps.insert::<u32>(1);
        let counter = Arc::new(RwLock::new(0_u32));
        deps.insert_shared(Arc::clone(&counter));

        *counter.write().unwrap() = 7;
        let seen = deps.get::<RwLock<u32>>().expect("registered");
        assert_eq!(*seen.read().unwrap(), 7);
        assert!(Arc::ptr_eq(&seen, &counter));
        assert_eq!(deps.get::<u32>().as_deref(), Some(&1));
        assert!(deps.get::<u64>().is_none());
    }
}

use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use regex::Regex;
use rusqlite::{Batch, Connection, Statement};
use rusqlite::types::ValueRef;
use serde::Serialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::error::ToolError;
use crate::tools::{DependencyMap, ToolSpec};

const DEFAULT_ROW_LIMIT: u64 = 10;

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("identifier pattern compiles")
});

/// SQLite database shared by the SQL tools.
#[derive(Debug)]
pub struct SqlContext {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub type_name: String,
    pub nullable: bool,
    pub primary_key: bool,
}

impl SqlContext {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, rusqlite::Error> {
        let path = path.as_ref();
        Ok(Self {
            conn: Mutex::new(Connection::open(path)?),
            db_path: Some(path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> Result<Self, rusqlite::Error> {
        Ok(Self {
            conn: Mutex::new(Connection::open_in_memory()?),
            db_path: None,
        })
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    pub fn execute_batch(&self, sql: &str) -> Result<(), rusqlite::Error> {
        self.conn().execute_batch(sql)
    }

    pub fn list_tables(&self) -> Result<Vec<String>, rusqlite::Error> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(names)
    }

    pub fn describe_table(&self, table_name: &str) -> Result<Vec<ColumnInfo>, ToolError> {
        if !IDENTIFIER.is_match(table_name) {
            return Err(ToolError::Execution(format!(
                "invalid table name: {table_name}"
            )));
        }

        let conn = self.conn();
        let columns = conn
            .prepare(&format!("PRAGMA table_info(\"{table_name}\")"))
            .and_then(|mut stmt| {
                let columns = stmt
                    .query_map([], |row| {
                        Ok(ColumnInfo {
                            name: row.get(1)?,
                            type_name: row.get(2)?,
                            nullable: row.get::<_, i64>(3)? == 0,
                            primary_key: row.get::<_, i64>(5)? > 0,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>();
                columns
            })
            .map_err(|err| ToolError::Execution(err.to_string()))?;

        if columns.is_empty() {
            return Err(ToolError::Execution(format!(
                "table not found: {table_name}"
            )));
        }
        Ok(columns)
    }

    /// Runs the single statement in `query` and returns at most `limit` rows
    /// as JSON objects. Statements without result columns report the number
    /// of changed rows.
    pub fn run_query(&self, query: &str, limit: u64) -> Result<Value, ToolError> {
        let conn = self.conn();
        let mut batch = Batch::new(&conn, query);
        let Some(mut stmt) = batch.next().map_err(sql_error)? else {
            return Err(ToolError::Execution(
                "query is empty, provide one SQL statement".to_string(),
            ));
        };
        if !matches!(batch.next(), Ok(None)) {
            return Err(ToolError::Execution(
                "only one SQL statement can run per query, nothing was executed".to_string(),
            ));
        }

        read_rows(&conn, &mut stmt, limit).map_err(sql_error)
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn read_rows(
    conn: &Connection,
    stmt: &mut Statement<'_>,
    limit: u64,
) -> Result<Value, rusqlite::Error> {
    let columns = stmt
        .column_names()
        .into_iter()
        .map(str::to_string)
        .collect::<Vec<_>>();

    let mut rows = stmt.query([])?;
    if columns.is_empty() {
        while rows.next()?.is_some() {}
        drop(rows);
        return Ok(json!({"rows_affected": conn.changes()}));
    }

    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        if out.len() as u64 >= limit {
            break;
        }
        let mut record = Map::new();
        for (index, column) in columns.iter().enumerate() {
            record.insert(column.clone(), sqlite_to_json(row.get_ref(index)?));
        }
        out.push(Value::Object(record));
    }
    Ok(Value::Array(out))
}

fn sqlite_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(number) => json!(number),
        ValueRef::Real(number) => serde_json::Number::from_f64(number)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(format!("<blob {} bytes>", bytes.len())),
    }
}

pub fn all_tools() -> Vec<ToolSpec> {
    vec![list_tables_tool(), describe_table_tool(), run_sql_query_tool()]
}

pub fn list_tables_tool() -> ToolSpec {
    ToolSpec::new(
        "list_tables",
        "List the tables in the database. Returns a JSON array of table names.",
    )
    .with_schema(json!({
        "type": "object",
        "properties": {},
        "required": [],
        "additionalProperties": false
    }))
    .expect("valid schema")
    .with_handler(|_args, deps| {
        let ctx = get_ctx(deps);
        async move {
            let ctx = ctx?;
            let result = blocking(move || ctx.list_tables().map_err(sql_error)).await?;
            Ok(render(result.map(|tables| json!(tables))))
        }
    })
}

pub fn describe_table_tool() -> ToolSpec {
    ToolSpec::new(
        "describe_table",
        "Describe the columns of a table: name, type, nullability and primary key.",
    )
    .with_schema(json!({
        "type": "object",
        "properties": {
            "table_name": {"type": "string"}
        },
        "required": ["table_name"],
        "additionalProperties": false
    }))
    .expect("valid schema")
    .with_handler(|args, deps| {
        let table_name = args
            .get("table_name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let ctx = get_ctx(deps);
        async move {
            let ctx = ctx?;
            let result = blocking(move || ctx.describe_table(&table_name)).await?;
            Ok(render(result.map(|columns| json!(columns))))
        }
    })
}

pub fn run_sql_query_tool() -> ToolSpec {
    ToolSpec::new(
        "run_sql_query",
        "Run a SQL query and return the result rows as JSON objects. \
         At most `limit` rows are returned (default 10).",
    )
    .with_schema(json!({
        "type": "object",
        "properties": {
            "query": {"type": "string"},
            "limit": {"type": "integer"}
        },
        "required": ["query"],
        "additionalProperties": false
    }))
    .expect("valid schema")
    .with_handler(|args, deps| {
        let query = args
            .get("query")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let limit = args
            .get("limit")
            .and_then(Value::as_u64)
            .unwrap_or(DEFAULT_ROW_LIMIT);
        let ctx = get_ctx(deps);
        async move {
            let ctx = ctx?;
            debug!(%query, limit, "running sql query");
            let result = blocking(move || ctx.run_query(&query, limit)).await?;
            Ok(render(result))
        }
    })
}

fn get_ctx(deps: &DependencyMap) -> Result<Arc<SqlContext>, ToolError> {
    deps.get::<SqlContext>()
        .ok_or(ToolError::MissingDependency("SqlContext"))
}

async fn blocking<T, F>(work: F) -> Result<Result<T, ToolError>, ToolError>
where
    F: FnOnce() -> Result<T, ToolError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| ToolError::Execution(format!("sql worker failed: {err}")))
}

fn sql_error(err: rusqlite::Error) -> ToolError {
    ToolError::Execution(err.to_string())
}

/// Query failures go back to the model as text so it can correct itself.
fn render(result: Result<Value, ToolError>) -> String {
    match result {
        Ok(value) => value.to_string(),
        Err(ToolError::Execution(message)) => format!("Error: {message}"),
        Err(err) => format!("Error: {err}"),
    }
}

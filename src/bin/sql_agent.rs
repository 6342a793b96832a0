use std::env;
use std::error::Error;
use std::sync::Arc;

use futures_util::StreamExt;
use serde_json::Value;
use sql_agent_relay::sql_agent::build_sql_agent;
use sql_agent_relay::telemetry::init_tracing;
use sql_agent_relay::tools::sql::SqlContext;
use sql_agent_relay::{RunOptions, Settings, build_model, serialize_event};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let prompt = env::args().skip(1).collect::<Vec<_>>().join(" ");
    let prompt = if prompt.trim().is_empty() {
        "list all the tables in the database".to_string()
    } else {
        prompt
    };

    let settings = Settings::from_env()?;
    init_tracing(&settings);

    let db = SqlContext::open(&settings.db_path)?;
    let model = build_model(&settings)?;
    let mut agent = build_sql_agent(&settings, Arc::from(model), db)?;

    let stream = agent.run_stream(prompt, RunOptions::with_intermediate_steps());
    futures_util::pin_mut!(stream);

    while let Some(event) = stream.next().await {
        let payload = Value::Object(serialize_event(&event?));
        println!("{}", serde_json::to_string_pretty(&payload)?);
    }

    Ok(())
}

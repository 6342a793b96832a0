use std::error::Error;
use std::sync::Arc;

use sql_agent_relay::relay::{ConnectionManager, serve, shutdown_signal};
use sql_agent_relay::sql_agent::build_sql_agent;
use sql_agent_relay::telemetry::init_tracing;
use sql_agent_relay::tools::sql::SqlContext;
use sql_agent_relay::{Settings, SharedAgent, build_model};
use tokio::net::TcpListener;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let settings = Settings::from_env()?;
    init_tracing(&settings);

    let db = SqlContext::open(&settings.db_path)?;
    info!(db_path = %settings.db_path.display(), "opened database");

    let model = build_model(&settings)?;
    info!(provider = ?settings.provider, model = model.model_id(), "model ready");

    let agent = build_sql_agent(&settings, Arc::from(model), db)?;
    let manager = Arc::new(ConnectionManager::new(Arc::new(SharedAgent::new(agent))));

    let listener = TcpListener::bind(settings.bind_addr()).await?;
    serve(listener, manager, shutdown_signal()).await?;
    info!("server stopped");
    Ok(())
}

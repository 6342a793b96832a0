//! The Chinook SQL agent served by the binaries.

use std::sync::Arc;

use crate::agent::Agent;
use crate::config::Settings;
use crate::error::AgentError;
use crate::llm::ChatModel;
use crate::tools::sql::{SqlContext, all_tools};

pub const AGENT_NAME: &str = "SQL Agent";
pub const AGENT_ID: &str = "sql_agent";

const DESCRIPTION: &str = "\
You are a SQL Agent, specialized in querying and analyzing the Chinook database.
The Chinook database represents a digital media store, including tables for artists, albums,
media tracks, invoices, and customers. You can help users explore and analyze this data.";

const INSTRUCTIONS: &str = "\
Respond to the user by following these steps:

1. When asked about the database:
   - Use the SQL tools to explore the schema
   - List available tables and their columns when requested
   - Explain relationships between tables when relevant

2. When asked to query data:
   - Write clean, efficient SQLite queries
   - Present results in a readable way
   - Explain your query approach when appropriate

3. When analyzing data:
   - Provide insights based on the query results
   - Suggest follow-up queries that might be interesting
   - Point out patterns or anomalies in the data

4. Maintain context:
   - Build upon previous queries and results in the conversation

5. Handle errors gracefully:
   - If a query fails, explain why and suggest a correction

Format responses using markdown.";

/// Builds the SQL agent over `db`, with history and limits from `settings`.
pub fn build_sql_agent(
    settings: &Settings,
    model: Arc<dyn ChatModel>,
    db: SqlContext,
) -> Result<Agent, AgentError> {
    Agent::builder()
        .shared_model(model)
        .name(AGENT_NAME)
        .agent_id(AGENT_ID)
        .user_id(settings.user_id.clone())
        .description(DESCRIPTION)
        .instructions(INSTRUCTIONS)
        .add_datetime_to_instructions(true)
        .num_history_runs(settings.num_history_runs)
        .read_chat_history(true)
        .max_iterations(settings.max_iterations)
        .tools(all_tools())
        .dependency(db)
        .build()
}

mod handle;
mod history;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_stream::try_stream;
use futures_util::{Stream, StreamExt};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{AgentError, ToolError};
use crate::event::{ResponseEvent, RunEvent, RunMetrics, Timestamp, ToolExecution};
use crate::llm::{
    ChatModel, ModelCompletion, ModelMessage, ModelToolCall, ModelToolChoice, ModelToolDefinition,
};
use crate::tools::history::chat_history_tool;
use crate::tools::{DependencyMap, ToolSpec};

pub use handle::{AgentHandle, ResponseStream, SharedAgent};
pub use history::{ChatHistory, RecordedMessage};

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub name: String,
    pub agent_id: String,
    /// Generated per agent when unset.
    pub session_id: Option<String>,
    pub user_id: Option<String>,
    pub description: Option<String>,
    pub instructions: Option<String>,
    pub additional_context: Option<String>,
    pub add_datetime_to_instructions: bool,
    /// Completed runs replayed to the model as conversation history.
    pub num_history_runs: usize,
    /// Registers `get_chat_history` so the model can read earlier turns.
    pub read_chat_history: bool,
    pub max_iterations: u32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "Agent".to_string(),
            agent_id: "agent".to_string(),
            session_id: None,
            user_id: None,
            description: None,
            instructions: None,
            additional_context: None,
            add_datetime_to_instructions: false,
            num_history_runs: 3,
            read_chat_history: false,
            max_iterations: 24,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Emit run lifecycle, reasoning and tool-call events besides content.
    pub stream_intermediate_steps: bool,
}

impl RunOptions {
    pub fn with_intermediate_steps() -> Self {
        Self {
            stream_intermediate_steps: true,
        }
    }

    fn includes(&self, kind: RunEvent) -> bool {
        self.stream_intermediate_steps || !kind.is_intermediate()
    }
}

pub struct AgentBuilder {
    model: Option<Arc<dyn ChatModel>>,
    tools: Vec<ToolSpec>,
    config: AgentConfig,
    dependencies: DependencyMap,
}

impl Default for AgentBuilder {
    fn default() -> Self {
        Self {
            model: None,
            tools: Vec::new(),
            config: AgentConfig::default(),
            dependencies: DependencyMap::new(),
        }
    }
}

impl AgentBuilder {
    pub fn model<M>(mut self, model: M) -> Self
    where
        M: ChatModel + 'static,
    {
        self.model = Some(Arc::new(model));
        self
    }

    pub fn shared_model(mut self, model: Arc<dyn ChatModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn tool(mut self, tool: ToolSpec) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools.extend(tools);
        self
    }

    pub fn config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    pub fn agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.config.agent_id = agent_id.into();
        self
    }

    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.config.session_id = Some(session_id.into());
        self
    }

    pub fn user_id(mut self, user_id: Option<String>) -> Self {
        self.config.user_id = user_id;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.config.description = Some(description.into());
        self
    }

    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.config.instructions = Some(instructions.into());
        self
    }

    pub fn additional_context(mut self, context: impl Into<String>) -> Self {
        self.config.additional_context = Some(context.into());
        self
    }

    pub fn add_datetime_to_instructions(mut self, enabled: bool) -> Self {
        self.config.add_datetime_to_instructions = enabled;
        self
    }

    pub fn num_history_runs(mut self, runs: usize) -> Self {
        self.config.num_history_runs = runs;
        self
    }

    pub fn read_chat_history(mut self, enabled: bool) -> Self {
        self.config.read_chat_history = enabled;
        self
    }

    pub fn max_iterations(mut self, max_iterations: u32) -> Self {
        self.config.max_iterations = max_iterations;
        self
    }

    pub fn dependency<T>(self, value: T) -> Self
    where
        T: Send + Sync + 'static,
    {
        self.dependencies.insert(value);
        self
    }

    pub fn build(mut self) -> Result<Agent, AgentError> {
        let Some(model) = self.model else {
            return Err(AgentError::Config(
                "agent model must be configured via AgentBuilder::model(...)".to_string(),
            ));
        };

        if self.config.read_chat_history {
            self.tools.push(chat_history_tool());
        }

        let mut tool_map = HashMap::new();
        for tool in &self.tools {
            if tool_map
                .insert(tool.name().to_string(), tool.clone())
                .is_some()
            {
                return Err(AgentError::Config(format!(
                    "duplicate tool registered: {}",
                    tool.name()
                )));
            }
        }

        let session_id = self
            .config
            .session_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let history = Arc::new(ChatHistory::new(self.config.num_history_runs));
        self.dependencies.insert_shared(Arc::clone(&history));

        Ok(Agent {
            model,
            tools: self.tools,
            tool_map,
            config: self.config,
            dependencies: self.dependencies,
            session_id,
            history,
        })
    }
}

pub struct Agent {
    model: Arc<dyn ChatModel>,
    tools: Vec<ToolSpec>,
    tool_map: HashMap<String, ToolSpec>,
    config: AgentConfig,
    dependencies: DependencyMap,
    session_id: String,
    history: Arc<ChatHistory>,
}

/// Identifiers and counters shared by every event of one run.
struct RunContext {
    run_id: String,
    agent_id: String,
    session_id: String,
    model: String,
    started: Instant,
    metrics: RunMetrics,
}

impl RunContext {
    fn event(&self, kind: RunEvent) -> ResponseEvent {
        let mut event = ResponseEvent::new(kind);
        event.run_id = Some(self.run_id.clone());
        event.agent_id = Some(self.agent_id.clone());
        event.session_id = Some(self.session_id.clone());
        event.model = Some(self.model.clone());
        event.created_at = Some(Timestamp::now());
        event
    }

    fn completed(&self, content: String, messages: &[RecordedMessage]) -> ResponseEvent {
        let mut metrics = self.metrics.clone();
        metrics.time = Some(self.started.elapsed().as_secs_f64());

        let mut event = self.event(RunEvent::RunCompleted).with_content(content);
        event.metrics = Some(metrics);
        event.messages = Some(messages.iter().map(RecordedMessage::to_event_message).collect());
        event
    }
}

impl Agent {
    pub fn builder() -> AgentBuilder {
        AgentBuilder::default()
    }

    pub fn agent_id(&self) -> &str {
        &self.config.agent_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Runs to completion and returns the final content.
    pub async fn run(&mut self, prompt: impl Into<String>) -> Result<String, AgentError> {
        let stream = self.run_stream(prompt, RunOptions::with_intermediate_steps());
        futures_util::pin_mut!(stream);

        let mut final_content = None;
        while let Some(event) = stream.next().await {
            let event = event?;
            if event.event == RunEvent::RunCompleted {
                final_content = event.content;
            }
        }

        final_content.ok_or(AgentError::MissingFinalResponse)
    }

    pub fn run_stream(
        &mut self,
        prompt: impl Into<String>,
        options: RunOptions,
    ) -> impl Stream<Item = Result<ResponseEvent, AgentError>> + '_ {
        let prompt = prompt.into();

        try_stream! {
            let mut run = RunContext {
                run_id: Uuid::new_v4().to_string(),
                agent_id: self.config.agent_id.clone(),
                session_id: self.session_id.clone(),
                model: self.model.model_id().to_string(),
                started: Instant::now(),
                metrics: RunMetrics::default(),
            };
            info!(run_id = %run.run_id, agent_id = %run.agent_id, "run started");

            let mut current = vec![RecordedMessage::now(ModelMessage::User(prompt))];

            if options.includes(RunEvent::RunStarted) {
                yield run.event(RunEvent::RunStarted);
            }

            let tool_definitions = self
                .tools
                .iter()
                .map(|tool| ModelToolDefinition {
                    name: tool.name().to_string(),
                    description: tool.description().to_string(),
                    parameters: tool.json_schema().clone(),
                })
                .collect::<Vec<_>>();

            let tool_choice = if tool_definitions.is_empty() {
                ModelToolChoice::None
            } else {
                ModelToolChoice::Auto
            };

            for iteration in 0..self.config.max_iterations {
                let context = self.context_messages(&current);
                let completion = self
                    .model
                    .invoke(&context, &tool_definitions, tool_choice.clone())
                    .await?;
                debug!(run_id = %run.run_id, iteration, tool_calls = completion.tool_calls.len(), "model responded");

                if let Some(usage) = &completion.usage {
                    run.metrics.add_usage(usage.input_tokens, usage.output_tokens);
                }

                if let Some(thinking) = completion.thinking.clone() {
                    if options.includes(RunEvent::ReasoningStep) {
                        let mut event = run.event(RunEvent::ReasoningStep);
                        event.reasoning_content = Some(thinking.clone());
                        event.thinking = Some(thinking);
                        yield event;
                    }
                }

                current.push(RecordedMessage::now(assistant_message(&completion)));

                if let Some(text) = completion.text.clone().filter(|text| !text.is_empty()) {
                    yield run.event(RunEvent::RunResponseContent).with_content(text);
                }

                if completion.tool_calls.is_empty() {
                    let content = completion.text.unwrap_or_default();
                    if options.includes(RunEvent::RunCompleted) {
                        yield run.completed(content, &current);
                    }
                    self.finish_run(current, &run);
                    return;
                }

                for tool_call in completion.tool_calls {
                    let started = Timestamp::now();
                    let pending = ToolExecution {
                        tool_call_id: Some(tool_call.id.clone()),
                        tool_name: tool_call.name.clone(),
                        tool_args: tool_call.arguments.clone(),
                        result: None,
                        tool_call_error: None,
                        metrics: None,
                        created_at: started,
                    };
                    if options.includes(RunEvent::ToolCallStarted) {
                        yield run.event(RunEvent::ToolCallStarted).with_tools(vec![pending.clone()]);
                    }

                    let clock = Instant::now();
                    let execution = self.execute_tool_call(&tool_call).await;
                    run.metrics.tool_calls = Some(run.metrics.tool_calls.unwrap_or(0) + 1);
                    current.push(RecordedMessage::now(ModelMessage::ToolResult {
                        tool_call_id: tool_call.id.clone(),
                        tool_name: tool_call.name.clone(),
                        content: execution.result_text.clone(),
                        is_error: execution.is_error,
                    }));

                    if options.includes(RunEvent::ToolCallCompleted) {
                        let finished = ToolExecution {
                            result: Some(execution.result_text.clone()),
                            tool_call_error: Some(execution.is_error),
                            metrics: Some(RunMetrics {
                                time: Some(clock.elapsed().as_secs_f64()),
                                ..RunMetrics::default()
                            }),
                            ..pending
                        };
                        yield run.event(RunEvent::ToolCallCompleted).with_tools(vec![finished]);
                    }
                }
            }

            Err::<(), AgentError>(AgentError::MaxIterationsReached {
                max_iterations: self.config.max_iterations,
            })?;
        }
    }

    /// System prompt, replayed history and the in-flight run, in model order.
    fn context_messages(&self, current: &[RecordedMessage]) -> Vec<ModelMessage> {
        let mut messages = Vec::new();
        if let Some(system_prompt) = self.system_prompt() {
            messages.push(ModelMessage::System(system_prompt));
        }
        messages.extend(self.history.model_messages());
        messages.extend(current.iter().map(|recorded| recorded.message.clone()));
        messages
    }

    fn system_prompt(&self) -> Option<String> {
        let mut sections = Vec::new();
        if let Some(description) = &self.config.description {
            sections.push(description.trim().to_string());
        }
        if let Some(instructions) = &self.config.instructions {
            sections.push(format!("## Instructions\n{}", instructions.trim()));
        }
        if self.config.add_datetime_to_instructions {
            sections.push(format!(
                "The current time is {}.",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S %Z")
            ));
        }
        if let Some(context) = &self.config.additional_context {
            sections.push(context.trim().to_string());
        }
        if let Some(user_id) = &self.config.user_id {
            sections.push(format!(
                "<context>You are interacting with the user: {user_id}</context>"
            ));
        }

        (!sections.is_empty()).then(|| sections.join("\n\n"))
    }

    fn finish_run(&self, messages: Vec<RecordedMessage>, run: &RunContext) {
        self.history.push_run(messages);
        info!(
            run_id = %run.run_id,
            elapsed_ms = run.started.elapsed().as_millis() as u64,
            total_tokens = run.metrics.total_tokens.unwrap_or(0),
            "run completed"
        );
    }

    async fn execute_tool_call(&self, tool_call: &ModelToolCall) -> ToolExecutionResult {
        let Some(tool) = self.tool_map.get(&tool_call.name) else {
            return ToolExecutionResult {
                result_text: format!("Unknown tool '{}'.", tool_call.name),
                is_error: true,
            };
        };

        match tool
            .execute(tool_call.arguments.clone(), &self.dependencies)
            .await
        {
            Ok(text) => ToolExecutionResult {
                result_text: text,
                is_error: false,
            },
            Err(err) => ToolExecutionResult {
                result_text: format_tool_error(err),
                is_error: true,
            },
        }
    }
}

fn assistant_message(completion: &ModelCompletion) -> ModelMessage {
    ModelMessage::Assistant {
        content: completion.text.clone(),
        tool_calls: completion.tool_calls.clone(),
    }
}

fn format_tool_error(err: ToolError) -> String {
    err.to_string()
}

struct ToolExecutionResult {
    result_text: String,
    is_error: bool,
}

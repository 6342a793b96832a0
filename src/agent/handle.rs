use std::sync::Arc;

use async_stream::try_stream;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use futures_util::{Stream, StreamExt};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{Agent, RunOptions};
use crate::error::AgentError;
use crate::event::ResponseEvent;

/// Lazy, single-consumer sequence of events for one run. Dropping it
/// abandons the run.
pub type ResponseStream = BoxStream<'static, Result<ResponseEvent, AgentError>>;

/// Entry point the relay uses to start runs.
#[async_trait]
pub trait AgentHandle: Send + Sync {
    /// Starts a streamed run. May suspend before the first event is ready.
    async fn arun(&self, prompt: String, options: RunOptions)
    -> Result<ResponseStream, AgentError>;
}

/// One [`Agent`] shared by every connection.
///
/// A run holds the agent for its whole lifetime, so runs from different
/// connections execute one after another. Conversation history is shared
/// across callers.
#[derive(Clone)]
pub struct SharedAgent {
    inner: Arc<Mutex<Agent>>,
}

impl SharedAgent {
    pub fn new(agent: Agent) -> Self {
        Self {
            inner: Arc::new(Mutex::new(agent)),
        }
    }
}

#[async_trait]
impl AgentHandle for SharedAgent {
    async fn arun(
        &self,
        prompt: String,
        options: RunOptions,
    ) -> Result<ResponseStream, AgentError> {
        let agent = Arc::clone(&self.inner).lock_owned().await;
        Ok(locked_run(agent, prompt, options).boxed())
    }
}

fn locked_run(
    mut agent: OwnedMutexGuard<Agent>,
    prompt: String,
    options: RunOptions,
) -> impl Stream<Item = Result<ResponseEvent, AgentError>> + Send + 'static {
    try_stream! {
        let events = agent.run_stream(prompt, options);
        futures_util::pin_mut!(events);
        while let Some(event) = events.next().await {
            yield event?;
        }
    }
}

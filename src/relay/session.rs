//! Per-connection relay loop: read a prompt, stream the run back, repeat.

use std::collections::VecDeque;

use futures_util::StreamExt;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::channel::{ClientChannel, Inbound};
use super::manager::{ConnectionId, ConnectionManager};
use super::serializer::serialize_event;
use crate::agent::{AgentHandle, RunOptions};
use crate::error::RelayError;
use crate::event::ResponseEvent;

/// How a single run ended from the relay's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunOutcome {
    Finished,
    ClientClosed,
}

/// Result of racing agent progress against client input.
enum Step<T> {
    Agent(T),
    Client(Option<Result<Inbound, RelayError>>),
}

/// Serves one client from handshake to disconnect.
///
/// Runs for this client never overlap: text that arrives while a run is
/// streaming is queued and answered afterwards, in order. A close during a
/// run abandons it. The connection is deregistered on every exit path.
pub async fn serve_connection<C>(manager: &ConnectionManager, mut channel: C)
where
    C: ClientChannel,
{
    let Ok(conn_id) = manager.connect(&mut channel).await else {
        return;
    };

    match relay_events(manager.agent(), conn_id, &mut channel).await {
        Ok(()) => debug!(conn_id = %conn_id, "client closed the channel"),
        Err(err) => info!(conn_id = %conn_id, error = %err, "dropping connection"),
    }

    manager.disconnect(conn_id).await;
}

#[instrument(skip_all, fields(conn_id = %conn_id))]
async fn relay_events<C>(
    agent: &dyn AgentHandle,
    conn_id: ConnectionId,
    channel: &mut C,
) -> Result<(), RelayError>
where
    C: ClientChannel + ?Sized,
{
    let mut pending = VecDeque::new();

    loop {
        let prompt = match pending.pop_front() {
            Some(prompt) => prompt,
            None => match channel.recv().await {
                Some(Ok(Inbound::Text(text))) => text,
                Some(Ok(Inbound::Close)) | None => return Ok(()),
                Some(Err(err)) => return Err(err),
            },
        };

        if forward_run(agent, channel, prompt, &mut pending).await? == RunOutcome::ClientClosed {
            return Ok(());
        }
    }
}

async fn forward_run<C>(
    agent: &dyn AgentHandle,
    channel: &mut C,
    prompt: String,
    pending: &mut VecDeque<String>,
) -> Result<RunOutcome, RelayError>
where
    C: ClientChannel + ?Sized,
{
    debug!(prompt_len = prompt.len(), queued = pending.len(), "starting run");
    let mut started = agent.arun(prompt, RunOptions::with_intermediate_steps());

    let mut stream = loop {
        let step = tokio::select! {
            result = &mut started => Step::Agent(result),
            inbound = channel.recv() => Step::Client(inbound),
        };
        match step {
            Step::Agent(Ok(stream)) => break stream,
            Step::Agent(Err(err)) => {
                report_upstream_error(channel, err.into()).await?;
                return Ok(RunOutcome::Finished);
            }
            Step::Client(inbound) => {
                if !absorb(inbound, pending)? {
                    return Ok(RunOutcome::ClientClosed);
                }
            }
        }
    };
    drop(started);

    let mut forwarded = 0_usize;
    loop {
        let step = tokio::select! {
            next = stream.next() => Step::Agent(next),
            inbound = channel.recv() => Step::Client(inbound),
        };
        match step {
            Step::Agent(Some(Ok(event))) => {
                send_event(channel, &event).await?;
                forwarded += 1;
            }
            Step::Agent(Some(Err(err))) => {
                report_upstream_error(channel, err.into()).await?;
                return Ok(RunOutcome::Finished);
            }
            Step::Agent(None) => {
                debug!(forwarded, "run finished");
                return Ok(RunOutcome::Finished);
            }
            Step::Client(inbound) => {
                if !absorb(inbound, pending)? {
                    debug!(forwarded, "client left mid-run, abandoning run");
                    return Ok(RunOutcome::ClientClosed);
                }
            }
        }
    }
}

/// Queues client text received mid-run. Returns `false` once the client has
/// closed.
fn absorb(
    inbound: Option<Result<Inbound, RelayError>>,
    pending: &mut VecDeque<String>,
) -> Result<bool, RelayError> {
    match inbound {
        Some(Ok(Inbound::Text(text))) => {
            pending.push_back(text);
            Ok(true)
        }
        Some(Ok(Inbound::Close)) | None => Ok(false),
        Some(Err(err)) => Err(err),
    }
}

async fn send_event<C>(channel: &mut C, event: &ResponseEvent) -> Result<(), RelayError>
where
    C: ClientChannel + ?Sized,
{
    let payload = Value::Object(serialize_event(event));
    channel.send_json(&payload).await
}

async fn report_upstream_error<C>(channel: &mut C, err: RelayError) -> Result<(), RelayError>
where
    C: ClientChannel + ?Sized,
{
    warn!(error = %err, "agent run failed");
    send_event(channel, &ResponseEvent::run_error(err.to_string())).await
}
